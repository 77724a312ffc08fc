//! Performance-log parsing and denoising arithmetic.

mod denoise;
mod parser;

pub use denoise::{clean_metrics, CLEAN_KEYS};
pub use parser::parse_report;

use std::collections::HashMap;

/// Mapping from counter name to a non-negative value, as produced by the
/// sampler or derived from it.
pub type MetricReport = HashMap<String, f64>;
