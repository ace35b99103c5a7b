use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::io::Write;
use std::path::Path;

use crate::envelope::Envelope;

/// Write envelope points as CSV with an `index,t,cuff_pressure,amplitude`
/// header, one row per point.
pub fn write_envelope<W: Write>(writer: W, envelope: &Envelope) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(writer);
    for point in &envelope.points {
        writer.serialize(point).context("writing envelope row")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_envelope_csv(path: &Path, envelope: &Envelope) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    write_envelope(file, envelope).with_context(|| format!("writing {}", path.display()))
}
