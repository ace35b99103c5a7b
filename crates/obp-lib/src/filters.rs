//! Butterworth low-/high-pass filters as cascades of second-order sections.
//!
//! Sections come from the bilinear transform with the cutoff pre-warped, so
//! the -3 dB point lands exactly on the requested frequency. Filtering is
//! causal and starts from a zero state, like a recursive filter run over the
//! recording as it was captured.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{ObpError, Result};
use crate::signal::Band;

/// Normalized section coefficients (a0 == 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 2],
}

impl Biquad {
    fn lowpass(k: f64, q: f64) -> Self {
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);
        let b0 = k2 * norm;
        Self {
            b: [b0, 2.0 * b0, b0],
            a: [2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        }
    }

    fn highpass(k: f64, q: f64) -> Self {
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);
        Self {
            b: [norm, -2.0 * norm, norm],
            a: [2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        }
    }

    fn first_order_lowpass(k: f64) -> Self {
        let norm = 1.0 / (1.0 + k);
        Self {
            b: [k * norm, k * norm, 0.0],
            a: [(k - 1.0) * norm, 0.0],
        }
    }

    fn first_order_highpass(k: f64) -> Self {
        let norm = 1.0 / (1.0 + k);
        Self {
            b: [norm, -norm, 0.0],
            a: [(k - 1.0) * norm, 0.0],
        }
    }

    /// Complex response at normalized angular frequency `w` (rad/sample), as (re, im).
    fn response(&self, w: f64) -> (f64, f64) {
        // z^-1 = cos w - j sin w
        let (c1, s1) = (w.cos(), -w.sin());
        let (c2, s2) = ((2.0 * w).cos(), -(2.0 * w).sin());
        let num = (
            self.b[0] + self.b[1] * c1 + self.b[2] * c2,
            self.b[1] * s1 + self.b[2] * s2,
        );
        let den = (1.0 + self.a[0] * c1 + self.a[1] * c2, self.a[0] * s1 + self.a[1] * s2);
        let mag2 = den.0 * den.0 + den.1 * den.1;
        (
            (num.0 * den.0 + num.1 * den.1) / mag2,
            (num.1 * den.0 - num.0 * den.1) / mag2,
        )
    }
}

/// Transposed direct form II state for one section.
#[derive(Debug, Clone, Copy, Default)]
struct SectionState {
    z1: f64,
    z2: f64,
}

impl SectionState {
    #[inline]
    fn step(&mut self, s: &Biquad, x: f64) -> f64 {
        let y = s.b[0] * x + self.z1;
        self.z1 = s.b[1] * x - s.a[0] * y + self.z2;
        self.z2 = s.b[2] * x - s.a[1] * y;
        y
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Butterworth {
    pub band: Band,
    pub cutoff_hz: f64,
    pub order: usize,
    pub fs: f64,
    sections: Vec<Biquad>,
}

impl Butterworth {
    pub fn lowpass(order: usize, cutoff_hz: f64, fs: f64) -> Result<Self> {
        Self::design(Band::Lowpass, order, cutoff_hz, fs)
    }

    pub fn highpass(order: usize, cutoff_hz: f64, fs: f64) -> Result<Self> {
        Self::design(Band::Highpass, order, cutoff_hz, fs)
    }

    pub fn design(band: Band, order: usize, cutoff_hz: f64, fs: f64) -> Result<Self> {
        if !(1..=8).contains(&order) {
            return Err(ObpError::InvalidConfig(format!(
                "Butterworth order must be within 1..=8, got {order}"
            )));
        }
        if !(fs.is_finite() && fs > 0.0) {
            return Err(ObpError::InvalidConfig(format!("invalid sample rate {fs}")));
        }
        if !(cutoff_hz > 0.0 && cutoff_hz < fs * 0.5) {
            return Err(ObpError::InvalidConfig(format!(
                "cutoff {cutoff_hz} Hz must lie between 0 and Nyquist ({} Hz)",
                fs * 0.5
            )));
        }

        let k = (PI * cutoff_hz / fs).tan();
        let mut sections = Vec::with_capacity(order.div_ceil(2));
        for pair in 1..=order / 2 {
            // Q of the pole pair at angle (2k-1)pi/2n from the imaginary axis.
            let q = 1.0 / (2.0 * ((2 * pair - 1) as f64 * PI / (2 * order) as f64).sin());
            sections.push(match band {
                Band::Lowpass => Biquad::lowpass(k, q),
                Band::Highpass => Biquad::highpass(k, q),
            });
        }
        if order % 2 == 1 {
            sections.push(match band {
                Band::Lowpass => Biquad::first_order_lowpass(k),
                Band::Highpass => Biquad::first_order_highpass(k),
            });
        }

        Ok(Self {
            band,
            cutoff_hz,
            order,
            fs,
            sections,
        })
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    pub fn filter(&self, data: &[f64]) -> Vec<f64> {
        let mut state = vec![SectionState::default(); self.sections.len()];
        data.iter()
            .map(|&x| {
                self.sections
                    .iter()
                    .zip(state.iter_mut())
                    .fold(x, |acc, (section, st)| st.step(section, acc))
            })
            .collect()
    }

    /// Analytic magnitude response at `freq_hz`.
    pub fn magnitude_at(&self, freq_hz: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / self.fs;
        self.sections
            .iter()
            .map(|s| {
                let (re, im) = s.response(w);
                (re * re + im * im).sqrt()
            })
            .product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 1000.0;

    fn sine(freq: f64, seconds: f64) -> Vec<f64> {
        let n = (seconds * FS) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / FS).sin())
            .collect()
    }

    fn steady_amplitude(out: &[f64], tail: usize) -> f64 {
        out[out.len() - tail..]
            .iter()
            .fold(0.0f64, |acc, v| acc.max(v.abs()))
    }

    #[test]
    fn analytic_response_is_minus_3db_at_cutoff() {
        for order in 1..=6 {
            let lp = Butterworth::lowpass(order, 5.0, FS).unwrap();
            let hp = Butterworth::highpass(order, 0.5, FS).unwrap();
            let half_power = std::f64::consts::FRAC_1_SQRT_2;
            assert!((lp.magnitude_at(5.0) - half_power).abs() < 1e-6, "lp order {order}");
            assert!((hp.magnitude_at(0.5) - half_power).abs() < 1e-6, "hp order {order}");
            assert!((lp.magnitude_at(0.0) - 1.0).abs() < 1e-9);
            assert!(hp.magnitude_at(0.0) < 1e-9);
        }
    }

    #[test]
    fn lowpass_sinusoid_at_cutoff_is_within_3db() {
        let lp = Butterworth::lowpass(4, 5.0, FS).unwrap();
        let out = lp.filter(&sine(5.0, 4.0));
        let amp = steady_amplitude(&out, 1000);
        let expected = lp.magnitude_at(5.0);
        // within 3 dB of the designed response
        assert!(amp > expected / 2f64.sqrt() && amp < expected * 2f64.sqrt(), "amp {amp}");
        assert!((amp - expected).abs() < 0.02, "amp {amp} expected {expected}");
    }

    #[test]
    fn dc_passes_lowpass_and_is_removed_by_highpass() {
        let dc = vec![3.0; 30_000];
        let lp = Butterworth::lowpass(4, 5.0, FS).unwrap().filter(&dc);
        assert!((lp.last().unwrap() - 3.0).abs() < 1e-9);
        let hp = Butterworth::highpass(2, 0.5, FS).unwrap().filter(&lp);
        assert!(hp.last().unwrap().abs() < 1e-6);
    }

    #[test]
    fn highpass_keeps_cardiac_band() {
        let hp = Butterworth::highpass(2, 0.5, FS).unwrap();
        let out = hp.filter(&sine(1.2, 20.0));
        let amp = steady_amplitude(&out, 2000);
        assert!((amp - hp.magnitude_at(1.2)).abs() < 0.02);
        assert!(amp > 0.95);
    }

    #[test]
    fn odd_order_uses_first_order_section() {
        let lp = Butterworth::lowpass(5, 5.0, FS).unwrap();
        assert_eq!(lp.sections().len(), 3);
    }

    #[test]
    fn rejects_cutoff_above_nyquist() {
        assert!(Butterworth::lowpass(4, 600.0, FS).is_err());
        assert!(Butterworth::highpass(0, 0.5, FS).is_err());
    }
}
