pub mod calibration;
pub mod conditioning;
pub mod config;
pub mod detectors;
pub mod envelope;
pub mod error;
pub mod estimate;
pub mod filters;
pub mod io;
pub mod pipeline;
pub mod segment;
pub mod signal;
pub mod synthetic;

pub use config::*;
pub use error::{Flank, ObpError, Result};
pub use estimate::{EstimateQuality, PressureEstimate};
pub use pipeline::{run_calibration, run_pipeline, PipelineReport};
pub use signal::*;
