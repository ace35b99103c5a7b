use serde::{Deserialize, Serialize};

use crate::error::{ObpError, Result};

/// One row of a recording: timestamp plus the primary pressure channel,
/// either as volts or as raw ADC counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub t: f64,
    pub raw: f64,
}

/// Constants produced by the sensor calibration procedure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConstants {
    /// Sensor output at ambient pressure (V).
    pub ambient_voltage: f64,
    /// Correction for the voltage divider in front of the ADC. Always > 0.
    pub scale_factor: f64,
    pub mmhg_per_kpa: f64,
    /// Sensor sensitivity, from the datasheet (20 mV per kPa).
    pub kpa_per_volt: f64,
}

impl Default for CalibrationConstants {
    fn default() -> Self {
        Self {
            ambient_voltage: 0.710,
            scale_factor: 2.50,
            mmhg_per_kpa: MMHG_PER_KPA,
            kpa_per_volt: 50.0,
        }
    }
}

pub const MMHG_PER_KPA: f64 = 7.500_615_758_456_6;

impl CalibrationConstants {
    pub fn validate(&self) -> Result<()> {
        if !(self.scale_factor.is_finite() && self.scale_factor > 0.0) {
            return Err(ObpError::Calibration(format!(
                "scale factor must be positive, got {}",
                self.scale_factor
            )));
        }
        if !(self.mmhg_per_kpa > 0.0 && self.kpa_per_volt > 0.0) {
            return Err(ObpError::Calibration(
                "unit conversion factors must be positive".into(),
            ));
        }
        if !self.ambient_voltage.is_finite() {
            return Err(ObpError::Calibration("ambient voltage is not finite".into()));
        }
        Ok(())
    }

    /// mmHg per volt above ambient.
    pub fn gain(&self) -> f64 {
        self.mmhg_per_kpa * self.kpa_per_volt * self.scale_factor
    }

    pub fn to_mmhg(&self, voltage: f64) -> f64 {
        (voltage - self.ambient_voltage) * self.gain()
    }

    pub fn to_voltage(&self, mmhg: f64) -> f64 {
        mmhg / self.gain() + self.ambient_voltage
    }
}

/// Calibrated cuff pressure, one entry per input sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureSeries {
    /// Seconds
    pub time: Vec<f64>,
    /// mmHg
    pub mmhg: Vec<f64>,
}

impl PressureSeries {
    pub fn len(&self) -> usize {
        self.mmhg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmhg.is_empty()
    }

    /// Mean sampling frequency over the whole record.
    pub fn sample_rate(&self) -> Result<f64> {
        sample_rate(&self.time)
    }
}

/// Mean sampling frequency of a strictly increasing time base.
pub fn sample_rate(time: &[f64]) -> Result<f64> {
    if time.len() < 2 {
        return Err(ObpError::Format(format!(
            "need at least two samples to derive a sample rate, got {}",
            time.len()
        )));
    }
    let span = time[time.len() - 1] - time[0];
    if !(span.is_finite() && span > 0.0) {
        return Err(ObpError::Format(format!(
            "time base does not advance (span {span} s)"
        )));
    }
    Ok((time.len() - 1) as f64 / span)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Lowpass,
    Highpass,
}

/// Output of one Butterworth stage, on the time base of the series it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredSignal {
    pub band: Band,
    pub cutoff_hz: f64,
    pub order: usize,
    pub data: Vec<f64>,
}

/// Index of the sample closest to `t` on a sorted time base.
pub fn nearest_index(time: &[f64], t: f64) -> usize {
    if time.is_empty() {
        return 0;
    }
    let upper = time.partition_point(|&x| x < t);
    if upper == 0 {
        return 0;
    }
    if upper >= time.len() {
        return time.len() - 1;
    }
    if (time[upper] - t) < (t - time[upper - 1]) {
        upper
    } else {
        upper - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_index_rounds_to_closest_sample() {
        let time = [0.0, 0.001, 0.002, 0.003];
        assert_eq!(nearest_index(&time, -1.0), 0);
        assert_eq!(nearest_index(&time, 0.0011), 1);
        assert_eq!(nearest_index(&time, 0.0019), 2);
        assert_eq!(nearest_index(&time, 9.0), 3);
    }

    #[test]
    fn calibration_round_trips_through_voltage() {
        let calib = CalibrationConstants::default();
        let v = calib.to_voltage(120.0);
        assert!((calib.to_mmhg(v) - 120.0).abs() < 1e-9);
        assert!((calib.to_mmhg(calib.ambient_voltage)).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_positive_scale_factor() {
        let calib = CalibrationConstants {
            scale_factor: 0.0,
            ..CalibrationConstants::default()
        };
        assert!(matches!(calib.validate(), Err(ObpError::Calibration(_))));
    }

    #[test]
    fn sample_rate_from_time_base() {
        let time: Vec<f64> = (0..1001).map(|i| i as f64 / 1000.0).collect();
        assert!((sample_rate(&time).unwrap() - 1000.0).abs() < 1e-6);
        assert!(sample_rate(&[1.0, 1.0]).is_err());
    }
}
