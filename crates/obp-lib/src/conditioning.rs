use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{AdcConfig, CuffTrace, FilterConfig};
use crate::error::{ObpError, Result};
use crate::filters::Butterworth;
use crate::signal::{
    nearest_index, Band, CalibrationConstants, FilteredSignal, PressureSeries, Sample,
};

/// How the primary channel of a recording was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputScale {
    /// Volts against a time base in seconds.
    Volts,
    /// Converter counts against a time base in milliseconds.
    AdcCounts,
}

/// Detect the input scale and map the primary channel to volts with a
/// time base in seconds.
pub fn to_voltage(samples: &[Sample], adc: &AdcConfig) -> Result<(InputScale, Vec<f64>, Vec<f64>)> {
    if samples.is_empty() {
        return Err(ObpError::Format("recording contains no samples".into()));
    }
    if let Some((i, _)) = samples
        .iter()
        .enumerate()
        .find(|(_, s)| !(s.t.is_finite() && s.raw.is_finite()))
    {
        return Err(ObpError::Format(format!("sample {i} is not finite")));
    }

    let peak = samples.iter().map(|s| s.raw).fold(f64::MIN, f64::max);
    let scale = if peak > adc.v_max {
        InputScale::AdcCounts
    } else {
        InputScale::Volts
    };

    let (time, volts): (Vec<f64>, Vec<f64>) = match scale {
        InputScale::Volts => samples.iter().map(|s| (s.t, s.raw)).unzip(),
        InputScale::AdcCounts => {
            let span = adc.v_max - adc.v_min;
            samples
                .iter()
                .map(|s| {
                    (
                        s.t / adc.raw_time_divisor,
                        s.raw * span / adc.full_scale_code + adc.v_min,
                    )
                })
                .unzip()
        }
    };
    if scale == InputScale::AdcCounts {
        warn!("primary channel exceeds {} V, treating input as ADC counts in ms", adc.v_max);
    }
    Ok((scale, time, volts))
}

/// Convert raw samples to calibrated cuff pressure, one output per input.
pub fn convert(
    samples: &[Sample],
    calib: &CalibrationConstants,
    adc: &AdcConfig,
) -> Result<PressureSeries> {
    calib.validate()?;
    let (_, time, volts) = to_voltage(samples, adc)?;
    if let Some(i) = time.windows(2).position(|w| w[1] <= w[0]) {
        return Err(ObpError::Format(format!(
            "time base is not strictly increasing at sample {}",
            i + 1
        )));
    }
    let mmhg = volts.iter().map(|&v| calib.to_mmhg(v)).collect();
    Ok(PressureSeries { time, mmhg })
}

/// A recording split into its cuff-pressure and oscillation bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionedSignal {
    pub fs: f64,
    pub time: Vec<f64>,
    pub pressure: Vec<f64>,
    pub lowpass: FilteredSignal,
    /// High-pass of the low-pass output.
    pub highpass: FilteredSignal,
}

impl ConditionedSignal {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn oscillation(&self) -> &[f64] {
        &self.highpass.data
    }

    /// Cuff pressure per sample on the requested trace.
    pub fn cuff(&self, trace: CuffTrace) -> Vec<f64> {
        match trace {
            CuffTrace::LowPass => self.lowpass.data.clone(),
            CuffTrace::Deflation => self
                .lowpass
                .data
                .iter()
                .zip(&self.highpass.data)
                .map(|(lp, hp)| lp - hp)
                .collect(),
        }
    }

    pub fn cuff_at(&self, trace: CuffTrace, index: usize) -> f64 {
        let lp = self.lowpass.data[index];
        match trace {
            CuffTrace::LowPass => lp,
            CuffTrace::Deflation => lp - self.highpass.data[index],
        }
    }

    /// Cuff pressure at the sample nearest to time `t`.
    pub fn cuff_at_time(&self, trace: CuffTrace, t: f64) -> f64 {
        self.cuff_at(trace, nearest_index(&self.time, t))
    }
}

/// Apply the band-splitting cascade: low-pass on the pressure, then
/// high-pass on the low-pass output.
pub fn condition(series: &PressureSeries, cfg: &FilterConfig) -> Result<ConditionedSignal> {
    let fs = series.sample_rate()?;
    let lp = Butterworth::lowpass(cfg.lowpass_order, cfg.lowpass_hz, fs)?;
    let hp = Butterworth::highpass(cfg.highpass_order, cfg.highpass_hz, fs)?;
    let low = lp.filter(&series.mmhg);
    let high = hp.filter(&low);
    debug!(
        "conditioned {} samples at {:.1} Hz (lp {} Hz/{}, hp {} Hz/{})",
        series.len(),
        fs,
        cfg.lowpass_hz,
        cfg.lowpass_order,
        cfg.highpass_hz,
        cfg.highpass_order
    );
    Ok(ConditionedSignal {
        fs,
        time: series.time.clone(),
        pressure: series.mmhg.clone(),
        lowpass: FilteredSignal {
            band: Band::Lowpass,
            cutoff_hz: cfg.lowpass_hz,
            order: cfg.lowpass_order,
            data: low,
        },
        highpass: FilteredSignal {
            band: Band::Highpass,
            cutoff_hz: cfg.highpass_hz,
            order: cfg.highpass_order,
            data: high,
        },
    })
}
