use chrono::Utc;
use tokio::time::Instant;

use crate::models::InterruptionSignal;

use super::SurfaceAdapter;

pub struct SignalMonitor;

impl SignalMonitor {
    /// One sample of the surface. Read-only.
    pub fn sample(adapter: &dyn SurfaceAdapter, now: Instant) -> InterruptionSignal {
        InterruptionSignal {
            active: adapter.query_interruption_active(),
            media: adapter.current_media_handle(),
            at: now,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}
