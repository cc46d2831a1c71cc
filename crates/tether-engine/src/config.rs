use std::time::Duration;

/// Per-session engine settings.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// How long a detached session keeps its state before expiring.
    pub idle_timeout: Duration,
    /// How long a handler waits for the client to answer a property read.
    pub property_timeout: Duration,
    /// Capacity of each session's command inbox.
    pub inbox_capacity: usize,
    /// Frames kept for replay (unsent plus unacknowledged) before the session
    /// gives up on replay and falls back to a full resync.
    pub max_pending_frames: usize,
    /// Persist a snapshot through `StateStorage` after every render.
    pub persist_snapshots: bool,
    /// Consecutive malformed frames tolerated before the session is terminated.
    pub max_protocol_violations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            property_timeout: Duration::from_secs(10),
            inbox_capacity: 256,
            max_pending_frames: 1024,
            persist_snapshots: true,
            max_protocol_violations: 32,
        }
    }
}
