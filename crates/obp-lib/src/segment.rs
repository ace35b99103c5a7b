//! Separation of the pump-up transient from the measurement region.
//!
//! The cuff maximum among all maxima beats marks the end of pump-up. After
//! a guard band, the scan waits for a run of beats with stable inter-beat
//! intervals (start) and then for the configured end condition.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{SegmentConfig, SegmentEndPolicy};
use crate::detectors::peaks::Beat;
use crate::error::{ObpError, Result};

/// Why the segment ended where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentEnd {
    /// The configured end policy triggered.
    Detected,
    /// No end was detected; the trailing beats were trimmed instead.
    TrailingDefault,
}

/// Validated measurement region, as inclusive indices into the maxima.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub pump_up_index: usize,
    pub start: usize,
    pub end: usize,
    pub end_reason: SegmentEnd,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn beats<'a>(&self, maxima: &'a [Beat]) -> &'a [Beat] {
        &maxima[self.start..=self.end]
    }
}

#[derive(Debug, Clone, Copy)]
enum ScanState {
    SeekingStart { run: usize },
    SeekingEnd { start: usize },
    Done { start: usize, end: usize },
}

/// Index of the beat with the highest cuff pressure, first on ties.
pub fn pump_up_index(maxima: &[Beat]) -> Option<usize> {
    maxima
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, b)| match best {
            Some((_, p)) if p >= b.cuff_pressure => best,
            _ => Some((i, b.cuff_pressure)),
        })
        .map(|(i, _)| i)
}

pub fn delimit(maxima: &[Beat], cfg: &SegmentConfig) -> Result<Segment> {
    if maxima.len() < cfg.min_beats {
        return Err(ObpError::InsufficientData(format!(
            "{} maxima detected, at least {} needed",
            maxima.len(),
            cfg.min_beats
        )));
    }
    let pump_up = pump_up_index(maxima)
        .ok_or_else(|| ObpError::InsufficientData("no maxima detected".into()))?;

    let mut delta_t = vec![0.0; maxima.len()];
    let mut state = ScanState::SeekingStart { run: 0 };

    // The last beat is never scanned: its interval cannot be confirmed.
    for i in 1..maxima.len() - 1 {
        delta_t[i] = maxima[i].t - maxima[i - 1].t;
        let delta2_t = delta_t[i] - delta_t[i - 1];
        let stable = delta2_t.abs() < cfg.stability_threshold_s;

        state = match state {
            ScanState::SeekingStart { run } => {
                if stable && i > pump_up + cfg.pumpup_guard_beats {
                    let run = run + 1;
                    if run == cfg.stable_run {
                        ScanState::SeekingEnd {
                            start: i + 1 - run,
                        }
                    } else {
                        ScanState::SeekingStart { run }
                    }
                } else {
                    ScanState::SeekingStart { run: 0 }
                }
            }
            ScanState::SeekingEnd { start } => {
                let ended = match cfg.end_policy {
                    SegmentEndPolicy::IntervalInstability => {
                        delta2_t.abs() > cfg.stability_threshold_s
                    }
                    SegmentEndPolicy::AmplitudeDecay => {
                        maxima[start].osc_amplitude * cfg.decay_factor > maxima[i].osc_amplitude
                    }
                };
                if ended {
                    ScanState::Done {
                        start,
                        end: i.saturating_sub(cfg.end_backoff).max(start),
                    }
                } else {
                    state
                }
            }
            ScanState::Done { .. } => break,
        };
    }

    let segment = match state {
        ScanState::SeekingStart { .. } => {
            return Err(ObpError::InsufficientData(format!(
                "no run of {} stable beats after pump-up beat {}",
                cfg.stable_run, pump_up
            )))
        }
        ScanState::SeekingEnd { start } => {
            let end = (maxima.len() - 1)
                .checked_sub(cfg.trailing_trim)
                .filter(|&end| end >= start)
                .ok_or_else(|| {
                    ObpError::InsufficientData(format!(
                        "measurement region starting at beat {start} is emptied by trimming {} trailing beats",
                        cfg.trailing_trim
                    ))
                })?;
            Segment {
                pump_up_index: pump_up,
                start,
                end,
                end_reason: SegmentEnd::TrailingDefault,
            }
        }
        ScanState::Done { start, end } => Segment {
            pump_up_index: pump_up,
            start,
            end,
            end_reason: SegmentEnd::Detected,
        },
    };

    debug!(
        "segment beats {}..={} of {} (pump-up at {}, end {:?})",
        segment.start,
        segment.end,
        maxima.len(),
        segment.pump_up_index,
        segment.end_reason
    );
    Ok(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::peaks::BeatKind;

    /// Beats at the given times with cuff pressure rising to a peak at
    /// `pump_up` and falling afterwards.
    fn beats(times: &[f64], pump_up: usize, amplitude: impl Fn(usize) -> f64) -> Vec<Beat> {
        times
            .iter()
            .enumerate()
            .map(|(i, &t)| Beat {
                index: (t * 1000.0) as usize,
                t,
                cuff_pressure: 150.0 - (i as f64 - pump_up as f64).abs() * 3.0,
                osc_amplitude: amplitude(i),
                kind: BeatKind::Max,
            })
            .collect()
    }

    fn regular(n: usize, period: f64) -> Vec<f64> {
        (0..n).map(|i| 1.0 + i as f64 * period).collect()
    }

    #[test]
    fn stable_recording_trims_trailing_beats() {
        let maxima = beats(&regular(30, 0.8), 2, |_| 1.0);
        let cfg = SegmentConfig::default();
        let seg = delimit(&maxima, &cfg).unwrap();
        assert_eq!(seg.pump_up_index, 2);
        assert_eq!(seg.start, 8);
        assert_eq!(seg.end, 29 - cfg.trailing_trim);
        assert_eq!(seg.end_reason, SegmentEnd::TrailingDefault);
        assert!(seg.start > seg.pump_up_index);
    }

    #[test]
    fn unstable_intervals_delay_the_start() {
        let mut times = regular(30, 0.8);
        // irregular beat right after the guard band
        for t in times.iter_mut().skip(9) {
            *t += 0.5;
        }
        let maxima = beats(&times, 2, |_| 1.0);
        let seg = delimit(&maxima, &SegmentConfig::default()).unwrap();
        // beats 9 and 10 see the jump in their second difference
        assert_eq!(seg.start, 11);
    }

    #[test]
    fn interval_instability_ends_the_segment() {
        let mut times = regular(40, 0.8);
        for t in times.iter_mut().skip(25) {
            *t += 0.4;
        }
        let maxima = beats(&times, 0, |_| 1.0);
        let cfg = SegmentConfig::default();
        let seg = delimit(&maxima, &cfg).unwrap();
        assert_eq!(seg.start, 6);
        assert_eq!(seg.end, 25 - cfg.end_backoff);
        assert_eq!(seg.end_reason, SegmentEnd::Detected);
    }

    #[test]
    fn amplitude_decay_ends_the_segment() {
        let amplitude = |i: usize| if i < 20 { 1.0 + i as f64 * 0.1 } else { 1.0 };
        let maxima = beats(&regular(40, 0.8), 0, amplitude);
        let cfg = SegmentConfig {
            end_policy: SegmentEndPolicy::AmplitudeDecay,
            ..SegmentConfig::default()
        };
        let seg = delimit(&maxima, &cfg).unwrap();
        assert_eq!(seg.start, 6);
        // 1.6 * 1.2 first exceeds a growing beat once amplitudes drop at beat 20
        assert_eq!(seg.end, 20 - cfg.end_backoff);
        assert_eq!(seg.end_reason, SegmentEnd::Detected);
        assert!(seg.start <= seg.end && seg.end < maxima.len());
    }

    #[test]
    fn too_few_beats_is_insufficient_data() {
        let maxima = beats(&regular(5, 0.8), 0, |_| 1.0);
        let err = delimit(&maxima, &SegmentConfig::default()).unwrap_err();
        assert!(matches!(err, ObpError::InsufficientData(_)));
    }

    #[test]
    fn pump_up_at_the_end_leaves_no_segment() {
        let maxima = beats(&regular(12, 0.8), 11, |_| 1.0);
        let err = delimit(&maxima, &SegmentConfig::default()).unwrap_err();
        assert!(matches!(err, ObpError::InsufficientData(_)));
    }

    #[test]
    fn pump_up_ties_resolve_to_first() {
        let mut maxima = beats(&regular(10, 0.8), 3, |_| 1.0);
        maxima[6].cuff_pressure = maxima[3].cuff_pressure;
        assert_eq!(pump_up_index(&maxima), Some(3));
        assert_eq!(pump_up_index(&[]), None);
    }
}
