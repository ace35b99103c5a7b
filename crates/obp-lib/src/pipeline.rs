use log::debug;
use serde::{Deserialize, Serialize};

use crate::calibration::{calibrate, CalibrationConfig};
use crate::conditioning::{condition, convert};
use crate::config::ObpConfig;
use crate::detectors::peaks::find_beats;
use crate::envelope::{build_envelope, smooth_envelope, Envelope};
use crate::error::Result;
use crate::estimate::{estimate, PressureEstimate};
use crate::segment::{delimit, Segment};
use crate::signal::{CalibrationConstants, Sample};

/// Everything the pipeline derived from one recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub sample_rate_hz: f64,
    pub samples: usize,
    pub maxima: usize,
    pub minima: usize,
    pub segment: Segment,
    pub envelope: Envelope,
    pub estimate: PressureEstimate,
}

/// Run conversion, band splitting, beat detection, segmentation, envelope
/// construction and estimation on one recording.
pub fn run_pipeline(
    samples: &[Sample],
    calib: &CalibrationConstants,
    cfg: &ObpConfig,
) -> Result<PipelineReport> {
    cfg.validate()?;
    let trace = cfg.estimator.cuff_trace;

    let series = convert(samples, calib, &cfg.adc)?;
    let signal = condition(&series, &cfg.filters)?;
    let cuff = signal.cuff(trace);
    let beats = find_beats(signal.oscillation(), &cuff, &signal.time, cfg.peaks.prominence)?;
    let segment = delimit(&beats.maxima, &cfg.segment)?;

    let discrete = build_envelope(
        &beats.maxima,
        &beats.minima,
        &segment,
        cfg.envelope.kind,
        &signal,
        trace,
    )?;
    let envelope = smooth_envelope(&discrete, &cfg.envelope, &signal, trace)?;
    let estimate = estimate(&envelope, &signal, segment.beats(&beats.maxima), &cfg.estimator)?;
    debug!(
        "pipeline done: {} samples, {} maxima, segment {}..={}",
        series.len(),
        beats.maxima.len(),
        segment.start,
        segment.end
    );

    Ok(PipelineReport {
        sample_rate_hz: signal.fs,
        samples: series.len(),
        maxima: beats.maxima.len(),
        minima: beats.minima.len(),
        segment,
        envelope,
        estimate,
    })
}

/// Calibrate against a dedicated recording, with the converter settings of
/// the estimation config.
pub fn run_calibration(
    samples: &[Sample],
    cal_cfg: &CalibrationConfig,
    cfg: &ObpConfig,
) -> Result<CalibrationConstants> {
    calibrate(samples, cal_cfg, &cfg.adc)
}
