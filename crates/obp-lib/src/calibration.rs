//! Sensor calibration from a dedicated recording: ambient pressure first,
//! then a known reference pressure held until the end.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::conditioning::to_voltage;
use crate::config::AdcConfig;
use crate::error::{ObpError, Result};
use crate::filters::Butterworth;
use crate::signal::{sample_rate, CalibrationConstants, Sample, MMHG_PER_KPA};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub lowpass_hz: f64,
    pub lowpass_order: usize,
    /// Ambient window [start, end) in seconds from the start of the recording.
    pub ambient_window_s: (f64, f64),
    /// Length of the reference window ending at the last sample.
    pub reference_window_s: f64,
    /// Pressure applied during the reference window (mmHg).
    pub target_mmhg: f64,
    pub kpa_per_volt: f64,
    pub mmhg_per_kpa: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            lowpass_hz: 0.5,
            lowpass_order: 2,
            ambient_window_s: (10.0, 20.0),
            reference_window_s: 10.0,
            target_mmhg: 150.0,
            kpa_per_volt: 50.0,
            mmhg_per_kpa: MMHG_PER_KPA,
        }
    }
}

/// Smallest ambient-to-reference step accepted, in volts.
pub const MIN_STEP_V: f64 = 1e-6;

/// Divider correction mapping a `high - low` voltage step onto `target_mmhg`.
pub fn scale_factor(
    low_v: f64,
    high_v: f64,
    target_mmhg: f64,
    kpa_per_volt: f64,
    mmhg_per_kpa: f64,
) -> Result<f64> {
    let delta = high_v - low_v;
    if !(delta.is_finite() && delta >= MIN_STEP_V) {
        return Err(ObpError::Calibration(format!(
            "reference window is not above ambient (delta {delta} V)"
        )));
    }
    if !(target_mmhg > 0.0 && kpa_per_volt > 0.0 && mmhg_per_kpa > 0.0) {
        return Err(ObpError::Calibration(
            "target pressure and unit factors must be positive".into(),
        ));
    }
    Ok(target_mmhg / (delta * kpa_per_volt * mmhg_per_kpa))
}

fn window_mean(time: &[f64], data: &[f64], from: f64, to: f64, label: &str) -> Result<f64> {
    let (sum, count) = time
        .iter()
        .zip(data)
        .filter(|&(&t, _)| t >= from && t < to)
        .fold((0.0, 0usize), |(s, n), (_, &v)| (s + v, n + 1));
    if count == 0 {
        return Err(ObpError::Calibration(format!(
            "{label} window [{from}, {to}) s holds no samples"
        )));
    }
    Ok(sum / count as f64)
}

pub fn calibrate(
    samples: &[Sample],
    cfg: &CalibrationConfig,
    adc: &AdcConfig,
) -> Result<CalibrationConstants> {
    let (scale, time, volts) = to_voltage(samples, adc)?;
    let fs = sample_rate(&time)?;
    let lp = Butterworth::lowpass(cfg.lowpass_order, cfg.lowpass_hz, fs)
        .map_err(|e| ObpError::Calibration(e.to_string()))?;
    let smoothed = lp.filter(&volts);

    let (t0, t_end) = (time[0], time[time.len() - 1]);
    let (a_from, a_to) = cfg.ambient_window_s;
    let r_from = t_end - cfg.reference_window_s;
    if a_to > t_end || r_from < t0 {
        return Err(ObpError::Calibration(format!(
            "recording of {:.1} s is too short for the calibration windows",
            t_end - t0
        )));
    }

    let ambient = window_mean(&time, &smoothed, t0 + a_from, t0 + a_to, "ambient")?;
    // inclusive of the final sample
    let reference = window_mean(&time, &smoothed, r_from, f64::INFINITY, "reference")?;
    debug!("calibration input {scale:?} at {fs:.1} Hz: ambient {ambient:.5} V, reference {reference:.5} V");

    let factor = scale_factor(
        ambient,
        reference,
        cfg.target_mmhg,
        cfg.kpa_per_volt,
        cfg.mmhg_per_kpa,
    )?;
    info!("ambient voltage {ambient:.5} V, divider correction {factor:.5}");
    Ok(CalibrationConstants {
        ambient_voltage: ambient,
        scale_factor: factor,
        mmhg_per_kpa: cfg.mmhg_per_kpa,
        kpa_per_volt: cfg.kpa_per_volt,
    })
}
