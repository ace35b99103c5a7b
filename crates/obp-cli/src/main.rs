use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use obp_lib::{
    calibration::CalibrationConfig,
    config::{
        CuffTrace, EnvelopeKind, EstimationMethod, ObpConfig, SegmentEndPolicy, SlopeNorm,
        Smoothing,
    },
    estimate::PressureEstimate,
    io::{csv as csv_io, text as text_io},
    pipeline::{run_calibration, run_pipeline},
    segment::Segment,
    signal::{CalibrationConstants, Sample},
    synthetic::{SyntheticOutput, SyntheticRecording},
};
use serde::Serialize;
use std::{
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "obp",
    version,
    about = "Oscillometric blood pressure estimation from cuff recordings"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum EnvelopeArg {
    #[value(name = "maxima")]
    Maxima,
    #[value(name = "max-min")]
    MaxMin,
    #[value(name = "interleaved")]
    Interleaved,
}

impl From<EnvelopeArg> for EnvelopeKind {
    fn from(arg: EnvelopeArg) -> Self {
        match arg {
            EnvelopeArg::Maxima => EnvelopeKind::MaximaOnly,
            EnvelopeArg::MaxMin => EnvelopeKind::MaxMinusMin,
            EnvelopeArg::Interleaved => EnvelopeKind::Interleaved,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SmoothingArg {
    None,
    Linear,
    Quadratic,
    Polynomial,
}

impl From<SmoothingArg> for Smoothing {
    fn from(arg: SmoothingArg) -> Self {
        match arg {
            SmoothingArg::None => Smoothing::None,
            SmoothingArg::Linear => Smoothing::Linear,
            SmoothingArg::Quadratic => Smoothing::Quadratic,
            SmoothingArg::Polynomial => Smoothing::Polynomial,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MethodArg {
    #[value(name = "fixed-ratio")]
    FixedRatio,
    /// Maximum slope, normalized by time
    #[value(name = "slope-time")]
    SlopeTime,
    /// Maximum slope, normalized by cuff pressure
    #[value(name = "slope-pressure")]
    SlopePressure,
    /// Maximum slope of the raw amplitude differences
    #[value(name = "slope-raw")]
    SlopeRaw,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum EndPolicyArg {
    #[value(name = "interval")]
    Interval,
    #[value(name = "decay")]
    Decay,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TraceArg {
    #[value(name = "lowpass")]
    LowPass,
    #[value(name = "deflation")]
    Deflation,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate SBP/MAP/DBP from a recording read from --input or stdin
    Estimate {
        #[arg(long)]
        input: Option<PathBuf>,
        /// Calibration constants (TOML, or JSON by extension)
        #[arg(long)]
        calibration: Option<PathBuf>,
        /// Pipeline configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        envelope: Option<EnvelopeArg>,
        #[arg(long)]
        smoothing: Option<SmoothingArg>,
        #[arg(long)]
        method: Option<MethodArg>,
        #[arg(long)]
        end_policy: Option<EndPolicyArg>,
        #[arg(long)]
        cuff_trace: Option<TraceArg>,
        #[arg(long)]
        prominence: Option<f64>,
        #[arg(long)]
        ratio_sbp: Option<f64>,
        #[arg(long)]
        ratio_dbp: Option<f64>,
        /// Fall back to the envelope boundary when a crossing is missing
        #[arg(long)]
        allow_degraded: bool,
        /// Write the envelope as CSV
        #[arg(long)]
        envelope_out: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    /// Derive calibration constants from an ambient-then-reference recording
    Calibrate {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = 150.0)]
        target_mmhg: f64,
        /// Write the constants to a file (TOML, or JSON by extension)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write a synthetic cuff recording
    Simulate {
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = 7)]
        seed: u64,
        #[arg(long, default_value_t = 0.0)]
        noise_mmhg: f64,
        #[arg(long, default_value_t = 95.0)]
        map_mmhg: f64,
        #[arg(long, default_value_t = 72.0)]
        heart_rate_bpm: f64,
        /// Emit 24-bit converter codes against milliseconds
        #[arg(long)]
        raw_codes: bool,
    },
    /// Print the default configuration as TOML
    Config,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Estimate {
            input,
            calibration,
            config,
            envelope,
            smoothing,
            method,
            end_policy,
            cuff_trace,
            prominence,
            ratio_sbp,
            ratio_dbp,
            allow_degraded,
            envelope_out,
            format,
        } => {
            let mut cfg = match config.as_deref() {
                Some(path) => ObpConfig::load(path)?,
                None => ObpConfig::default(),
            };
            let overrides = Overrides {
                envelope,
                smoothing,
                method,
                end_policy,
                cuff_trace,
                prominence,
                ratio_sbp,
                ratio_dbp,
                allow_degraded,
            };
            overrides.apply(&mut cfg);
            cmd_estimate(
                input.as_deref(),
                calibration.as_deref(),
                &cfg,
                envelope_out.as_deref(),
                format,
            )?
        }
        Commands::Calibrate {
            input,
            target_mmhg,
            out,
        } => cmd_calibrate(input.as_deref(), target_mmhg, out.as_deref())?,
        Commands::Simulate {
            out,
            seed,
            noise_mmhg,
            map_mmhg,
            heart_rate_bpm,
            raw_codes,
        } => {
            let rec = SyntheticRecording {
                seed,
                noise_mmhg,
                map_mmhg,
                heart_rate_bpm,
                output: if raw_codes {
                    SyntheticOutput::AdcCodes
                } else {
                    SyntheticOutput::Volts
                },
                ..SyntheticRecording::default()
            };
            cmd_simulate(&rec, out.as_deref())?
        }
        Commands::Config => print!("{}", ObpConfig::default().to_toml_string()?),
    }
    Ok(())
}

/// Command-line settings layered over the loaded configuration.
struct Overrides {
    envelope: Option<EnvelopeArg>,
    smoothing: Option<SmoothingArg>,
    method: Option<MethodArg>,
    end_policy: Option<EndPolicyArg>,
    cuff_trace: Option<TraceArg>,
    prominence: Option<f64>,
    ratio_sbp: Option<f64>,
    ratio_dbp: Option<f64>,
    allow_degraded: bool,
}

impl Overrides {
    fn apply(self, cfg: &mut ObpConfig) {
        if let Some(kind) = self.envelope {
            cfg.envelope.kind = kind.into();
        }
        if let Some(smoothing) = self.smoothing {
            cfg.envelope.smoothing = smoothing.into();
        }
        if let Some(method) = self.method {
            let (method, norm) = match method {
                MethodArg::FixedRatio => (EstimationMethod::FixedRatio, cfg.estimator.slope_norm),
                MethodArg::SlopeTime => (EstimationMethod::MaximumSlope, SlopeNorm::Time),
                MethodArg::SlopePressure => (EstimationMethod::MaximumSlope, SlopeNorm::Pressure),
                MethodArg::SlopeRaw => (EstimationMethod::MaximumSlope, SlopeNorm::Raw),
            };
            cfg.estimator.method = method;
            cfg.estimator.slope_norm = norm;
        }
        if let Some(policy) = self.end_policy {
            cfg.segment.end_policy = match policy {
                EndPolicyArg::Interval => SegmentEndPolicy::IntervalInstability,
                EndPolicyArg::Decay => SegmentEndPolicy::AmplitudeDecay,
            };
        }
        if let Some(trace) = self.cuff_trace {
            cfg.estimator.cuff_trace = match trace {
                TraceArg::LowPass => CuffTrace::LowPass,
                TraceArg::Deflation => CuffTrace::Deflation,
            };
        }
        if let Some(p) = self.prominence {
            cfg.peaks.prominence = p;
        }
        if let Some(r) = self.ratio_sbp {
            cfg.estimator.ratio_sbp = r;
        }
        if let Some(r) = self.ratio_dbp {
            cfg.estimator.ratio_dbp = r;
        }
        if self.allow_degraded {
            cfg.estimator.allow_degraded = true;
        }
    }
}

#[derive(Serialize)]
struct EstimateOutput<'a> {
    estimate: PressureEstimate,
    sample_rate_hz: f64,
    samples: usize,
    maxima: usize,
    minima: usize,
    segment: &'a Segment,
    envelope_points: usize,
}

fn read_recording(input: Option<&Path>) -> Result<Vec<Sample>> {
    match input {
        Some(path) => text_io::read_samples(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Ok(text_io::parse_samples(&buf)?)
        }
    }
}

fn cmd_estimate(
    input: Option<&Path>,
    calibration: Option<&Path>,
    cfg: &ObpConfig,
    envelope_out: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let samples = read_recording(input)?;
    let calib = match calibration {
        Some(path) => text_io::read_calibration(path)?,
        None => CalibrationConstants::default(),
    };
    let report = run_pipeline(&samples, &calib, cfg).context("estimation failed")?;
    if let Some(path) = envelope_out {
        csv_io::write_envelope_csv(path, &report.envelope)?;
        info!("wrote {} envelope points to {}", report.envelope.len(), path.display());
    }

    let estimate = report.estimate.rounded();
    match format {
        OutputFormat::Json => {
            let out = EstimateOutput {
                estimate,
                sample_rate_hz: report.sample_rate_hz,
                samples: report.samples,
                maxima: report.maxima,
                minima: report.minima,
                segment: &report.segment,
                envelope_points: report.envelope.len(),
            };
            println!("{}", serde_json::to_string(&out)?);
        }
        OutputFormat::Text => println!("{estimate}"),
    }
    Ok(())
}

fn cmd_calibrate(input: Option<&Path>, target_mmhg: f64, out: Option<&Path>) -> Result<()> {
    let samples = read_recording(input)?;
    let cal_cfg = CalibrationConfig {
        target_mmhg,
        ..CalibrationConfig::default()
    };
    let calib = run_calibration(&samples, &cal_cfg, &ObpConfig::default())
        .context("calibration failed")?;
    if let Some(path) = out {
        let text = if path.extension().is_some_and(|e| e == "json") {
            serde_json::to_string_pretty(&calib)?
        } else {
            toml::to_string(&calib)?
        };
        std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    }
    println!("{}", serde_json::to_string(&calib)?);
    Ok(())
}

fn cmd_simulate(rec: &SyntheticRecording, out: Option<&Path>) -> Result<()> {
    let samples = rec.render(&CalibrationConstants::default(), &ObpConfig::default().adc)?;
    match out {
        Some(path) => text_io::write_samples(path, &samples)?,
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            lock.write_all(text_io::format_samples(&samples).as_bytes())?;
        }
    }
    Ok(())
}
