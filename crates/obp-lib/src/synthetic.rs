//! Synthetic cuff recordings for tests and demos.
//!
//! A cycle is an ambient hold, a raised-cosine pump-up and a linear
//! deflation. A cardiac oscillation rides on the cuff pressure with an
//! amplitude that is a triangle in cuff pressure, peaking at `map_mmhg`.

use std::f64::consts::PI;

use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::config::AdcConfig;
use crate::error::{ObpError, Result};
use crate::signal::{CalibrationConstants, Sample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntheticOutput {
    /// Calibrated volts against seconds.
    Volts,
    /// 24-bit converter codes against milliseconds.
    AdcCodes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticRecording {
    pub fs: f64,
    pub ambient_s: f64,
    pub pumpup_s: f64,
    pub deflation_s: f64,
    pub peak_mmhg: f64,
    pub final_mmhg: f64,
    pub heart_rate_bpm: f64,
    pub map_mmhg: f64,
    /// Oscillation amplitude at MAP.
    pub osc_peak_mmhg: f64,
    /// Fraction of the peak amplitude kept far from MAP.
    pub osc_floor: f64,
    /// Cuff-pressure distance from MAP at which the triangle reaches zero.
    pub osc_width_mmhg: f64,
    /// Standard deviation of additive Gaussian noise.
    pub noise_mmhg: f64,
    pub seed: u64,
    pub output: SyntheticOutput,
}

impl Default for SyntheticRecording {
    fn default() -> Self {
        Self {
            fs: 1000.0,
            ambient_s: 2.0,
            pumpup_s: 6.0,
            deflation_s: 30.0,
            peak_mmhg: 150.0,
            final_mmhg: 40.0,
            heart_rate_bpm: 72.0,
            map_mmhg: 95.0,
            osc_peak_mmhg: 1.0,
            osc_floor: 0.25,
            osc_width_mmhg: 50.0,
            noise_mmhg: 0.0,
            seed: 7,
            output: SyntheticOutput::Volts,
        }
    }
}

impl SyntheticRecording {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("fs", self.fs),
            ("deflation_s", self.deflation_s),
            ("heart_rate_bpm", self.heart_rate_bpm),
            ("osc_width_mmhg", self.osc_width_mmhg),
        ];
        if let Some((name, v)) = positive.iter().find(|(_, v)| !(v.is_finite() && *v > 0.0)) {
            return Err(ObpError::InvalidConfig(format!("{name} must be positive, got {v}")));
        }
        if self.ambient_s < 0.0 || self.pumpup_s < 0.0 || self.osc_peak_mmhg < 0.0 {
            return Err(ObpError::InvalidConfig(
                "ambient_s, pumpup_s and osc_peak_mmhg must not be negative".into(),
            ));
        }
        if !(self.final_mmhg < self.map_mmhg && self.map_mmhg < self.peak_mmhg) {
            return Err(ObpError::InvalidConfig(format!(
                "MAP {} must lie inside the deflation range {}..{}",
                self.map_mmhg, self.final_mmhg, self.peak_mmhg
            )));
        }
        if !(0.0..=1.0).contains(&self.osc_floor) {
            return Err(ObpError::InvalidConfig(format!(
                "osc_floor must lie in [0, 1], got {}",
                self.osc_floor
            )));
        }
        Ok(())
    }

    pub fn duration_s(&self) -> f64 {
        self.ambient_s + self.pumpup_s + self.deflation_s
    }

    /// Deflation trend without oscillation. With no ambient hold and no
    /// pump-up the recording starts at `peak_mmhg`.
    pub fn cuff_at(&self, t: f64) -> f64 {
        let pump_start = self.ambient_s;
        let deflate_start = pump_start + self.pumpup_s;
        if t < pump_start {
            0.0
        } else if t < deflate_start {
            let x = (t - pump_start) / self.pumpup_s;
            self.peak_mmhg * 0.5 * (1.0 - (PI * x).cos())
        } else {
            let x = ((t - deflate_start) / self.deflation_s).min(1.0);
            self.peak_mmhg + (self.final_mmhg - self.peak_mmhg) * x
        }
    }

    /// When the deflation trend passes MAP.
    pub fn map_time(&self) -> f64 {
        let x = (self.peak_mmhg - self.map_mmhg) / (self.peak_mmhg - self.final_mmhg);
        self.ambient_s + self.pumpup_s + x * self.deflation_s
    }

    pub fn oscillation_amplitude(&self, cuff_mmhg: f64) -> f64 {
        let triangle = 1.0 - (cuff_mmhg - self.map_mmhg).abs() / self.osc_width_mmhg;
        self.osc_peak_mmhg * triangle.max(self.osc_floor)
    }

    /// Noise-free cuff pressure. A beat peaks exactly at [`Self::map_time`].
    pub fn pressure_at(&self, t: f64) -> f64 {
        let trend = self.cuff_at(t);
        let beat_hz = self.heart_rate_bpm / 60.0;
        trend + self.oscillation_amplitude(trend) * (2.0 * PI * beat_hz * (t - self.map_time())).cos()
    }

    /// Pressure trace in mmHg, noise included.
    pub fn pressures(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        self.validate()?;
        let n = (self.duration_s() * self.fs).round() as usize;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let noise = Normal::new(0.0, self.noise_mmhg)
            .map_err(|e| ObpError::InvalidConfig(format!("noise_mmhg {}: {e}", self.noise_mmhg)))?;
        let time: Vec<f64> = (0..n).map(|i| i as f64 / self.fs).collect();
        let mmhg = time
            .iter()
            .map(|&t| {
                let jitter = if self.noise_mmhg > 0.0 {
                    noise.sample(&mut rng)
                } else {
                    0.0
                };
                self.pressure_at(t) + jitter
            })
            .collect();
        Ok((time, mmhg))
    }

    /// Render the recording the way the acquisition hardware would store it.
    pub fn render(&self, calib: &CalibrationConstants, adc: &AdcConfig) -> Result<Vec<Sample>> {
        calib.validate()?;
        let (time, mmhg) = self.pressures()?;
        let span = adc.v_max - adc.v_min;
        Ok(time
            .into_iter()
            .zip(mmhg)
            .map(|(t, p)| {
                let v = calib.to_voltage(p);
                match self.output {
                    SyntheticOutput::Volts => Sample { t, raw: v },
                    SyntheticOutput::AdcCodes => Sample {
                        t: t * adc.raw_time_divisor,
                        raw: ((v - adc.v_min) / span * adc.full_scale_code)
                            .round()
                            .clamp(0.0, adc.full_scale_code),
                    },
                }
            })
            .collect())
    }
}
