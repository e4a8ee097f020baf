//! Per-session tracking counters.

/// Counters accumulated while a volume is live. Zeroed whenever the
/// reconstruction volume is reset.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackingStats {
    /// Consecutive alignment failures since the last success or reset.
    pub tracking_error_count: u32,
    /// Timestamp of the previous depth frame in milliseconds. Zero means
    /// no frame has been seen since the last reset, which disables the
    /// next timestamp-gap check.
    pub last_frame_timestamp_ms: i64,
    /// Frames successfully aligned since the last reset or FPS sample.
    pub processed_frame_count: u64,
}

impl TrackingStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
