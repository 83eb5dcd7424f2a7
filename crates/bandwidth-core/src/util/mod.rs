//! Utility modules for bandwidth-core.

mod duration;

pub use duration::{DurationParseError, parse_duration};
