//! Tunable parameters of the estimation pipeline.
//!
//! Every section deserializes with `#[serde(default)]`, so a TOML file only
//! has to name the fields it changes. The defaults are the values used on
//! the recordings the pipeline was tuned against; most of the segment
//! offsets are empirical and kept configurable for that reason.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ObpError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObpConfig {
    pub adc: AdcConfig,
    pub filters: FilterConfig,
    pub peaks: PeakConfig,
    pub segment: SegmentConfig,
    pub envelope: EnvelopeConfig,
    pub estimator: EstimatorConfig,
}

/// Input range of the 24-bit converter. Recordings whose primary channel
/// exceeds `v_max` are taken to be raw counts with a millisecond time base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdcConfig {
    pub v_min: f64,
    pub v_max: f64,
    pub full_scale_code: f64,
    /// Divisor applied to the time column of raw-count recordings.
    pub raw_time_divisor: f64,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            v_min: -1.325,
            v_max: 1.325,
            full_scale_code: ((1u32 << 24) - 1) as f64,
            raw_time_divisor: 1000.0,
        }
    }
}

/// Cascade used to split the calibrated pressure into bands. The high-pass
/// runs on the low-pass output, not on the raw pressure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Cuff-pressure band cutoff (Hz), typically 5.
    pub lowpass_hz: f64,
    /// 1..=8, typically 4-6.
    pub lowpass_order: usize,
    /// Oscillation band cutoff (Hz), typically 0.3-0.5.
    pub highpass_hz: f64,
    /// 1..=8, typically 2-4.
    pub highpass_order: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            lowpass_hz: 5.0,
            lowpass_order: 4,
            highpass_hz: 0.5,
            highpass_order: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Minimum prominence (mmHg) of an oscillation extremum, typically 0.1-0.3.
    pub prominence: f64,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self { prominence: 0.3 }
    }
}

/// How the end of the measurement region is found once its start is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentEndPolicy {
    /// First beat whose interval second difference exceeds the stability threshold.
    IntervalInstability,
    /// First beat whose amplitude falls below `decay_factor` times the start amplitude.
    AmplitudeDecay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Beats skipped after the pump-up maximum before scanning starts.
    pub pumpup_guard_beats: usize,
    /// Consecutive stable beats that open the measurement region.
    pub stable_run: usize,
    /// Bound on |second difference of inter-beat interval| (s), typically 0.1-0.2.
    pub stability_threshold_s: f64,
    pub end_policy: SegmentEndPolicy,
    /// Beats discarded before the detected end, typically 2-3.
    pub end_backoff: usize,
    /// Amplitude ratio for [`SegmentEndPolicy::AmplitudeDecay`], typically 1.1-1.2.
    pub decay_factor: f64,
    /// Beats dropped from the last maximum when no end is detected, typically 3-4.
    pub trailing_trim: usize,
    /// Fewer maxima than this fail immediately.
    pub min_beats: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            pumpup_guard_beats: 5,
            stable_run: 5,
            stability_threshold_s: 0.2,
            end_policy: SegmentEndPolicy::IntervalInstability,
            end_backoff: 3,
            decay_factor: 1.2,
            trailing_trim: 3,
            min_beats: 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// High-pass value at each maximum.
    MaximaOnly,
    /// Maximum minus its time-aligned minimum.
    MaxMinusMin,
    /// Peak-to-peak at every extremum, the opposite extremum linearly interpolated.
    Interleaved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Smoothing {
    /// Keep one point per beat.
    None,
    /// Piecewise-linear, resampled on the native time base.
    Linear,
    /// Piecewise three-point quadratic, resampled on the native time base.
    Quadratic,
    /// Least-squares polynomial of `poly_degree`, resampled on the native time base.
    Polynomial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    pub kind: EnvelopeKind,
    pub smoothing: Smoothing,
    pub poly_degree: usize,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            kind: EnvelopeKind::MaxMinusMin,
            smoothing: Smoothing::None,
            poly_degree: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    /// SBP/DBP where the envelope crosses fixed fractions of its maximum.
    FixedRatio,
    /// SBP/DBP at the steepest envelope change on each flank.
    MaximumSlope,
}

/// Normalization of envelope steps for [`EstimationMethod::MaximumSlope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlopeNorm {
    Raw,
    Time,
    Pressure,
}

/// Which trace supplies the cuff pressure at a given sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CuffTrace {
    LowPass,
    /// Low-pass minus high-pass: the deflation trend without oscillation.
    Deflation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub method: EstimationMethod,
    pub slope_norm: SlopeNorm,
    /// Typically 0.5-0.55.
    pub ratio_sbp: f64,
    /// Typically 0.7-0.8.
    pub ratio_dbp: f64,
    pub cuff_trace: CuffTrace,
    /// Substitute the envelope boundary for a missing crossing and tag the
    /// estimate as degraded instead of failing.
    pub allow_degraded: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            method: EstimationMethod::FixedRatio,
            slope_norm: SlopeNorm::Time,
            ratio_sbp: 0.55,
            ratio_dbp: 0.70,
            cuff_trace: CuffTrace::LowPass,
            allow_degraded: false,
        }
    }
}

impl ObpConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: ObpConfig =
            toml::from_str(text).map_err(|e| ObpError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every field against its valid range. Cutoffs are checked
    /// against Nyquist once the sample rate is known, in `filters`.
    pub fn validate(&self) -> Result<()> {
        let adc = &self.adc;
        if !(adc.v_max > adc.v_min) {
            return invalid("adc.v_max must exceed adc.v_min");
        }
        if !(adc.full_scale_code > 0.0 && adc.raw_time_divisor > 0.0) {
            return invalid("adc.full_scale_code and adc.raw_time_divisor must be positive");
        }

        let f = &self.filters;
        if !(f.lowpass_hz > 0.0 && f.highpass_hz > 0.0) {
            return invalid("filter cutoffs must be positive");
        }
        if f.highpass_hz >= f.lowpass_hz {
            return invalid("filters.highpass_hz must be below filters.lowpass_hz");
        }
        for order in [f.lowpass_order, f.highpass_order] {
            if !(1..=8).contains(&order) {
                return invalid("filter orders must be within 1..=8");
            }
        }

        if !(self.peaks.prominence > 0.0) {
            return invalid("peaks.prominence must be positive");
        }

        let s = &self.segment;
        if s.stable_run == 0 {
            return invalid("segment.stable_run must be at least 1");
        }
        if !(s.stability_threshold_s > 0.0) {
            return invalid("segment.stability_threshold_s must be positive");
        }
        if !(s.decay_factor >= 1.0) {
            return invalid("segment.decay_factor must be at least 1");
        }
        if s.min_beats < s.stable_run + 2 {
            return invalid("segment.min_beats must leave room for a stable run");
        }

        if !(1..=8).contains(&self.envelope.poly_degree) {
            return invalid("envelope.poly_degree must be within 1..=8");
        }

        let e = &self.estimator;
        for (name, ratio) in [("ratio_sbp", e.ratio_sbp), ("ratio_dbp", e.ratio_dbp)] {
            if !(ratio > 0.0 && ratio < 1.0) {
                return Err(ObpError::InvalidConfig(format!(
                    "estimator.{name} must lie in (0, 1), got {ratio}"
                )));
            }
        }
        Ok(())
    }
}

fn invalid<T>(msg: &str) -> Result<T> {
    Err(ObpError::InvalidConfig(msg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ObpConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = ObpConfig::from_toml_str(
            r#"
            [segment]
            end_policy = "amplitude_decay"
            trailing_trim = 4

            [estimator]
            ratio_dbp = 0.75
            method = "maximum_slope"
            slope_norm = "pressure"
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.segment.end_policy, SegmentEndPolicy::AmplitudeDecay);
        assert_eq!(cfg.segment.trailing_trim, 4);
        assert_eq!(cfg.segment.stable_run, 5);
        assert_eq!(cfg.estimator.method, EstimationMethod::MaximumSlope);
        assert_eq!(cfg.estimator.slope_norm, SlopeNorm::Pressure);
        assert!((cfg.estimator.ratio_dbp - 0.75).abs() < 1e-12);
        assert!((cfg.estimator.ratio_sbp - 0.55).abs() < 1e-12);
        assert_eq!(cfg.filters, FilterConfig::default());
    }

    #[test]
    fn rejects_out_of_range_ratio() {
        let err = ObpConfig::from_toml_str("[estimator]\nratio_sbp = 1.5\n").unwrap_err();
        assert!(matches!(err, ObpError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_inverted_band_split() {
        let mut cfg = ObpConfig::default();
        cfg.filters.highpass_hz = 6.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_config_survives_toml() {
        let cfg = ObpConfig::default();
        let text = cfg.to_toml_string().expect("serialize");
        let back = ObpConfig::from_toml_str(&text).expect("parse");
        assert_eq!(back, cfg);
    }
}
