//! Metric helpers for `wireroute`.
//!
//! Names and thin wrappers over the [`metrics`](https://docs.rs/metrics)
//! facade. Without the `metrics` feature every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Gauge tracking live stream sessions.
pub const SESSIONS_ACTIVE: &str = "wireroute_sessions_active";
/// Counter tracking frames read and written.
pub const FRAMES_PROCESSED: &str = "wireroute_frames_processed_total";
/// Counter tracking pack, unpack, handler and transport errors.
pub const ERRORS_TOTAL: &str = "wireroute_errors_total";
/// Counter tracking panics caught in handlers and session tasks.
pub const PANICS_TOTAL: &str = "wireroute_panics_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Frames read from a peer.
    Inbound,
    /// Frames written to a peer.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "only labels metrics"))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

pub fn inc_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_ACTIVE).increment(1.0);
}

pub fn dec_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}

pub fn inc_panics() {
    #[cfg(feature = "metrics")]
    counter!(PANICS_TOTAL).increment(1);
}
