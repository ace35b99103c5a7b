use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{ObpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatKind {
    Max,
    Min,
}

/// One oscillation extremum, with cuff pressure and oscillation sampled at
/// the same index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    /// Sample index into the conditioned recording.
    pub index: usize,
    pub t: f64,
    pub cuff_pressure: f64,
    pub osc_amplitude: f64,
    pub kind: BeatKind,
}

/// Maxima and minima of the oscillation band, each ordered by time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Beats {
    pub maxima: Vec<Beat>,
    pub minima: Vec<Beat>,
}

/// Indices of samples higher than both neighbours. A flat top counts once,
/// at its middle sample. The first and last samples are never peaks.
pub fn local_maxima(data: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if data.len() < 3 {
        return peaks;
    }
    let last = data.len() - 1;
    let mut i = 1;
    while i < last {
        if data[i - 1] < data[i] {
            let mut ahead = i + 1;
            while ahead < last && data[ahead] == data[i] {
                ahead += 1;
            }
            if data[ahead] < data[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Vertical drop from `peak` to the higher of the two lowest points
/// reached before the signal climbs above the peak on either side.
pub fn prominence(data: &[f64], peak: usize) -> f64 {
    let height = data[peak];

    let mut left_min = height;
    let mut i = peak;
    loop {
        if data[i] > height {
            break;
        }
        left_min = left_min.min(data[i]);
        if i == 0 {
            break;
        }
        i -= 1;
    }

    let mut right_min = height;
    let mut i = peak;
    while i < data.len() && data[i] <= height {
        right_min = right_min.min(data[i]);
        i += 1;
    }

    height - left_min.max(right_min)
}

/// Local maxima whose prominence is at least `min_prominence`.
pub fn find_peaks(data: &[f64], min_prominence: f64) -> Vec<usize> {
    local_maxima(data)
        .into_iter()
        .filter(|&p| prominence(data, p) >= min_prominence)
        .collect()
}

/// Detect oscillation maxima and minima. Minima are the prominent maxima
/// of the negated oscillation. An empty result is not an error here.
pub fn find_beats(
    oscillation: &[f64],
    cuff: &[f64],
    time: &[f64],
    min_prominence: f64,
) -> Result<Beats> {
    if oscillation.len() != cuff.len() || oscillation.len() != time.len() {
        return Err(ObpError::Format(format!(
            "oscillation, cuff and time lengths differ ({}, {}, {})",
            oscillation.len(),
            cuff.len(),
            time.len()
        )));
    }

    let beat = |index: usize, kind: BeatKind| Beat {
        index,
        t: time[index],
        cuff_pressure: cuff[index],
        osc_amplitude: oscillation[index],
        kind,
    };

    let maxima: Vec<Beat> = find_peaks(oscillation, min_prominence)
        .into_iter()
        .map(|i| beat(i, BeatKind::Max))
        .collect();
    let negated: Vec<f64> = oscillation.iter().map(|v| -v).collect();
    let minima: Vec<Beat> = find_peaks(&negated, min_prominence)
        .into_iter()
        .map(|i| beat(i, BeatKind::Min))
        .collect();

    debug!(
        "found {} maxima and {} minima (prominence {})",
        maxima.len(),
        minima.len(),
        min_prominence
    );
    Ok(Beats { maxima, minima })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse_train(fs: f64, count: usize, spacing_s: f64) -> (Vec<f64>, Vec<f64>) {
        let first = 0.5;
        let duration = first + spacing_s * count as f64;
        let n = (duration * fs) as usize;
        let time: Vec<f64> = (0..n).map(|i| i as f64 / fs).collect();
        let data = time
            .iter()
            .map(|&t| {
                (0..count)
                    .map(|k| {
                        let centre = first + k as f64 * spacing_s;
                        (-0.5 * ((t - centre) / 0.05).powi(2)).exp()
                    })
                    .sum()
            })
            .collect();
        (time, data)
    }

    #[test]
    fn gaussian_pulses_yield_one_beat_each() {
        let fs = 1000.0;
        let spacing = 0.8;
        let (time, data) = pulse_train(fs, 12, spacing);
        let cuff = vec![100.0; data.len()];
        let beats = find_beats(&data, &cuff, &time, 0.3).unwrap();
        assert_eq!(beats.maxima.len(), 12);
        for w in beats.maxima.windows(2) {
            let ibi = w[1].t - w[0].t;
            assert!((ibi - spacing).abs() <= 1.0 / fs + 1e-9, "ibi {ibi}");
        }
        assert_eq!(beats.minima.len(), 11);
        assert!(beats.maxima.iter().all(|b| b.kind == BeatKind::Max));
    }

    #[test]
    fn small_ripples_fail_prominence() {
        let data = [0.0, 1.0, 0.95, 0.97, 0.0, 0.5, 0.0];
        assert_eq!(local_maxima(&data), vec![1, 3, 5]);
        assert!((prominence(&data, 1) - 1.0).abs() < 1e-12);
        assert!((prominence(&data, 3) - 0.02).abs() < 1e-12);
        assert_eq!(find_peaks(&data, 0.3), vec![1, 5]);
    }

    #[test]
    fn plateau_peak_reports_middle_sample() {
        let data = [0.0, 1.0, 1.0, 1.0, 0.0];
        assert_eq!(local_maxima(&data), vec![2]);
        let edge = [1.0, 1.0, 0.0];
        assert!(local_maxima(&edge).is_empty());
    }

    #[test]
    fn samples_cuff_and_oscillation_at_same_index() {
        let time: Vec<f64> = (0..7).map(|i| i as f64).collect();
        let osc = [0.0, 1.0, 0.0, -1.0, 0.0, 1.0, 0.0];
        let cuff = [10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0];
        let beats = find_beats(&osc, &cuff, &time, 0.5).unwrap();
        assert_eq!(beats.maxima.len(), 2);
        assert_eq!(beats.maxima[1].index, 5);
        assert!((beats.maxima[1].cuff_pressure - 15.0).abs() < 1e-12);
        assert_eq!(beats.minima.len(), 1);
        assert!((beats.minima[0].osc_amplitude + 1.0).abs() < 1e-12);
    }

    #[test]
    fn flat_signal_has_no_beats() {
        let flat = vec![0.0; 100];
        let time: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let beats = find_beats(&flat, &flat, &time, 0.1).unwrap();
        assert!(beats.maxima.is_empty() && beats.minima.is_empty());
    }

    #[test]
    fn mismatched_lengths_are_a_format_error() {
        let err = find_beats(&[0.0; 3], &[0.0; 2], &[0.0; 3], 0.1);
        assert!(matches!(err, Err(ObpError::Format(_))));
    }
}
