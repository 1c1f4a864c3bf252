//! Engine configuration.

use std::time::Duration;

use crate::color::{ColorId, DEFAULT_PALETTE};

/// Messages kept per room before the oldest half is evicted.
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// Notifications kept before the oldest half is evicted.
pub const DEFAULT_NOTIFICATION_CAP: usize = 10;

/// Most recent notifications checked for duplicates.
pub const DEFAULT_DEDUP_WINDOW: usize = 10;

/// Idle time on the outbound stream before a heartbeat is sent.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Interval between poll ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound on every unary service call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for queued farewell events to drain on stop.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(500);

/// Time allowed for background tasks to finish after cancellation.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-room message cap. Exceeding it trims the room to half the cap.
    pub history_cap: usize,
    /// Notification cap. Exceeding it trims the log to half the cap.
    pub notification_cap: usize,
    /// Number of most recent notifications checked for duplicates.
    pub dedup_window: usize,
    /// Outbound idle time before a heartbeat.
    pub heartbeat_interval: Duration,
    /// Poll tick interval.
    pub poll_interval: Duration,
    /// Bound on each unary call.
    pub request_timeout: Duration,
    /// Drain budget for farewell events on stop.
    pub stop_grace: Duration,
    /// Bound on joining background tasks on stop.
    pub join_timeout: Duration,
    /// Switch into a room right after joining or creating it.
    pub auto_switch: bool,
    /// Colors handed out to nicknames.
    pub palette: Vec<ColorId>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_cap: DEFAULT_HISTORY_CAP,
            notification_cap: DEFAULT_NOTIFICATION_CAP,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            auto_switch: true,
            palette: DEFAULT_PALETTE.to_vec(),
        }
    }
}
