mod classification;
mod types;

pub use classification::{categorize, OutageCategory};
pub use types::{DbOutcome, HaError};
