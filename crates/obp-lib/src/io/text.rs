use anyhow::{Context, Result as AnyResult};
use std::fmt::Write as _;
use std::path::Path;

use crate::error::{ObpError, Result};
use crate::signal::{CalibrationConstants, Sample};

/// Parse a whitespace-delimited recording: time in the first column, the
/// primary pressure channel in the second. Rows carry 2 or 4 columns; blank
/// lines and `#` comments are skipped.
pub fn parse_samples(text: &str) -> Result<Vec<Sample>> {
    let mut out: Vec<Sample> = Vec::new();
    let mut width = None;
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields = trimmed
            .split_whitespace()
            .map(|f| {
                f.parse::<f64>().map_err(|_| {
                    ObpError::Format(format!("line {} has a non-numeric field: {}", idx + 1, f))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        if fields.len() != 2 && fields.len() != 4 {
            return Err(ObpError::Format(format!(
                "line {} has {} columns, expected 2 or 4",
                idx + 1,
                fields.len()
            )));
        }
        match width {
            None => width = Some(fields.len()),
            Some(w) if w != fields.len() => {
                return Err(ObpError::Format(format!(
                    "line {} has {} columns, earlier rows have {}",
                    idx + 1,
                    fields.len(),
                    w
                )))
            }
            Some(_) => {}
        }
        let sample = Sample {
            t: fields[0],
            raw: fields[1],
        };
        if let Some(prev) = out.last() {
            if sample.t <= prev.t {
                return Err(ObpError::Format(format!(
                    "line {}: time {} does not follow {}",
                    idx + 1,
                    sample.t,
                    prev.t
                )));
            }
        }
        out.push(sample);
    }
    if out.is_empty() {
        return Err(ObpError::Format("no samples found".into()));
    }
    Ok(out)
}

/// Read a recording from disk.
pub fn read_samples(path: &Path) -> AnyResult<Vec<Sample>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_samples(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Render samples as a two-column table readable by [`parse_samples`].
pub fn format_samples(samples: &[Sample]) -> String {
    let mut out = String::with_capacity(samples.len() * 24);
    for s in samples {
        let _ = writeln!(out, "{}\t{}", s.t, s.raw);
    }
    out
}

pub fn write_samples(path: &Path, samples: &[Sample]) -> AnyResult<()> {
    std::fs::write(path, format_samples(samples))
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Load calibration constants from JSON (`.json`) or TOML (anything else).
pub fn read_calibration(path: &Path) -> AnyResult<CalibrationConstants> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let calib: CalibrationConstants = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&text)
            .with_context(|| format!("parsing calibration JSON {}", path.display()))?
    } else {
        toml::from_str(&text)
            .with_context(|| format!("parsing calibration TOML {}", path.display()))?
    };
    calib.validate()?;
    Ok(calib)
}
