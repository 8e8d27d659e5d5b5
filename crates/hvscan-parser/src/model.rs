use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of readout channels in every scan-log record.
pub const CHANNEL_COUNT: usize = 16;

/// Physical channel IDs in on-disk column order.
///
/// Auto-HV-scan logs write the per-channel column blocks in quadrant
/// order (HpFT, HpNT, HmFT, HmNT rather than ascending channel ID), so
/// column position `i` within a block belongs to physical channel
/// `CHANNEL_COLUMN_ORDER[i]`. This is a wiring contract with the
/// producing instrument; never infer it from the file.
pub const CHANNEL_COLUMN_ORDER: [usize; CHANNEL_COUNT] =
    [12, 13, 14, 15, 8, 9, 10, 11, 4, 5, 6, 7, 0, 1, 2, 3];

/// One measurement record from a scan log. Per-channel arrays are
/// indexed by physical channel ID, not column position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Record time, converted from the log's local zone to UTC.
    pub timestamp: DateTime<Utc>,
    /// High-voltage monitor readback, volts.
    pub v_mon: [f64; CHANNEL_COUNT],
    /// Current monitor readback.
    pub i_mon: [f64; CHANNEL_COUNT],
    /// Raw per-channel trigger rate.
    pub rate: [f64; CHANNEL_COUNT],
    /// Channel-averaged rate reported by the instrument.
    pub avg_rate: f64,
}
