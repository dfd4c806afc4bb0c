use tokio::time::Instant;

use crate::surface::MediaHandle;

/// Produced once per sampling tick; never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterruptionSignal {
    pub active: bool,
    pub media: Option<MediaHandle>,
    pub at: Instant,
    pub timestamp_ms: i64,
}
