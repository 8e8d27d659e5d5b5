pub mod errors;
pub mod model;
mod scan_log;

pub use errors::ParserError;
pub use model::{Measurement, CHANNEL_COLUMN_ORDER, CHANNEL_COUNT};
pub use scan_log::{parse_scan_log, MEASUREMENT_MARKER, TIMESTAMP_FORMAT};

#[cfg(test)]
mod tests;
