//! MAP, SBP and DBP from the envelope, plus pulse rate from the segment.

use std::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::conditioning::ConditionedSignal;
use crate::config::{EstimationMethod, EstimatorConfig, SlopeNorm};
use crate::detectors::peaks::Beat;
use crate::envelope::{Envelope, EnvelopePoint};
use crate::error::{Flank, ObpError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EstimateQuality {
    Validated,
    /// The listed flanks fell back to the envelope boundary.
    Degraded { flanks: Vec<Flank> },
}

/// Pressures in mmHg, pulse rate in beats per minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureEstimate {
    pub map: f64,
    pub sbp: f64,
    pub dbp: f64,
    pub pulse_rate_bpm: f64,
    pub quality: EstimateQuality,
}

fn round_to(v: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (v * scale).round() / scale
}

impl PressureEstimate {
    /// Pressures to 2 decimals and pulse rate to 1, for display.
    pub fn rounded(&self) -> Self {
        Self {
            map: round_to(self.map, 2),
            sbp: round_to(self.sbp, 2),
            dbp: round_to(self.dbp, 2),
            pulse_rate_bpm: round_to(self.pulse_rate_bpm, 1),
            quality: self.quality.clone(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.quality, EstimateQuality::Degraded { .. })
    }
}

impl fmt::Display for PressureEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SBP   {:>7.2} mmHg", self.sbp)?;
        writeln!(f, "MAP   {:>7.2} mmHg", self.map)?;
        writeln!(f, "DBP   {:>7.2} mmHg", self.dbp)?;
        write!(f, "Pulse {:>7.1} bpm", self.pulse_rate_bpm)?;
        if let EstimateQuality::Degraded { flanks } = &self.quality {
            let names: Vec<String> = flanks.iter().map(|fl| fl.to_string()).collect();
            write!(f, "\n(degraded: {} boundary used)", names.join(", "))?;
        }
        Ok(())
    }
}

/// 60 / mean inter-beat interval over the given beats.
pub fn pulse_rate_bpm(beats: &[Beat]) -> Result<f64> {
    let (Some(first), Some(last)) = (beats.first(), beats.last()) else {
        return Err(ObpError::InsufficientData("no beats for pulse rate".into()));
    };
    let span = last.t - first.t;
    if beats.len() < 2 || span <= 0.0 {
        return Err(ObpError::InsufficientData(format!(
            "pulse rate needs two distinct beats, got {}",
            beats.len()
        )));
    }
    Ok(60.0 / (span / (beats.len() - 1) as f64))
}

/// Time of the first threshold crossing on one flank, interpolated between
/// the bracketing points. `None` when there is no crossing or it lands on
/// the first point with nothing to interpolate against.
fn ratio_crossing(points: &[EnvelopePoint], peak: usize, flank: Flank, threshold: f64) -> Option<f64> {
    let crossing = match flank {
        Flank::Systolic => (0..=peak).find(|&i| points[i].amplitude > threshold)?,
        Flank::Diastolic => (peak + 1..points.len()).find(|&i| points[i].amplitude < threshold)?,
    };
    if crossing == 0 {
        return None;
    }
    let (lo, hi) = (&points[crossing - 1], &points[crossing]);
    let rise = hi.amplitude - lo.amplitude;
    let w = if rise == 0.0 {
        0.0
    } else {
        (threshold - lo.amplitude) / rise
    };
    Some(lo.t + w * (hi.t - lo.t))
}

/// Cuff pressure at the steepest step of one flank: rising on the systolic
/// side, falling on the diastolic side.
fn steepest_step(points: &[EnvelopePoint], peak: usize, flank: Flank, norm: SlopeNorm) -> Option<f64> {
    let steps = match flank {
        Flank::Systolic => 1..peak + 1,
        Flank::Diastolic => peak + 1..points.len(),
    };
    steps
        .filter_map(|i| {
            let (lo, hi) = (&points[i - 1], &points[i]);
            let delta = hi.amplitude - lo.amplitude;
            let slope = match norm {
                SlopeNorm::Raw => delta,
                SlopeNorm::Time => delta / (hi.t - lo.t),
                SlopeNorm::Pressure => {
                    let dp = (hi.cuff_pressure - lo.cuff_pressure).abs();
                    if dp == 0.0 {
                        return None;
                    }
                    delta / dp
                }
            };
            let signed = match flank {
                Flank::Systolic => slope,
                Flank::Diastolic => -slope,
            };
            Some((signed, 0.5 * (lo.cuff_pressure + hi.cuff_pressure)))
        })
        .fold(None, |best: Option<(f64, f64)>, cand| match best {
            Some(b) if b.0 >= cand.0 => Some(b),
            _ => Some(cand),
        })
        .map(|(_, pressure)| pressure)
}

pub fn estimate(
    envelope: &Envelope,
    signal: &ConditionedSignal,
    segment_beats: &[Beat],
    cfg: &EstimatorConfig,
) -> Result<PressureEstimate> {
    let points = &envelope.points;
    let peak = envelope
        .peak_position()
        .ok_or_else(|| ObpError::InsufficientData("envelope is empty".into()))?;
    let max_amplitude = points[peak].amplitude;
    if max_amplitude <= 0.0 {
        return Err(ObpError::InsufficientData(format!(
            "envelope maximum {max_amplitude} is not positive"
        )));
    }
    let map = points[peak].cuff_pressure;

    let locate = |flank: Flank| -> Option<f64> {
        match cfg.method {
            EstimationMethod::FixedRatio => {
                let ratio = match flank {
                    Flank::Systolic => cfg.ratio_sbp,
                    Flank::Diastolic => cfg.ratio_dbp,
                };
                ratio_crossing(points, peak, flank, ratio * max_amplitude)
                    .map(|t| signal.cuff_at_time(cfg.cuff_trace, t))
            }
            EstimationMethod::MaximumSlope => steepest_step(points, peak, flank, cfg.slope_norm),
        }
    };

    let mut degraded = Vec::new();
    let mut resolve = |flank: Flank, boundary: &EnvelopePoint| -> Result<f64> {
        match locate(flank) {
            Some(p) => Ok(p),
            None if cfg.allow_degraded => {
                warn!(
                    "no {flank} crossing, falling back to envelope boundary at {:.2} mmHg",
                    boundary.cuff_pressure
                );
                degraded.push(flank);
                Ok(boundary.cuff_pressure)
            }
            None => Err(ObpError::RatioCrossingNotFound { flank }),
        }
    };
    let sbp = resolve(Flank::Systolic, &points[0])?;
    let dbp = resolve(Flank::Diastolic, &points[points.len() - 1])?;

    let quality = if degraded.is_empty() {
        EstimateQuality::Validated
    } else {
        EstimateQuality::Degraded { flanks: degraded }
    };
    let estimate = PressureEstimate {
        map,
        sbp,
        dbp,
        pulse_rate_bpm: pulse_rate_bpm(segment_beats)?,
        quality,
    };
    if !(estimate.dbp <= estimate.map && estimate.map <= estimate.sbp) {
        warn!(
            "estimate out of order: SBP {:.2}, MAP {:.2}, DBP {:.2}",
            estimate.sbp, estimate.map, estimate.dbp
        );
    }
    info!(
        "SBP {:.2} / DBP {:.2} mmHg, MAP {:.2} mmHg, pulse {:.1} bpm",
        estimate.sbp, estimate.dbp, estimate.map, estimate.pulse_rate_bpm
    );
    Ok(estimate)
}
