use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::surface::MediaHandle;

/// One contiguous interruption, possibly spanning several media swaps.
///
/// Owned by the pod state machine. The dismissal engine only touches the
/// attempt bookkeeping fields.
#[derive(Debug, Clone)]
pub struct PodSession {
    pub id: String,
    /// Set by the rate manager on the session's first active tick.
    pub active: bool,
    /// Rate in effect right before the pod. The only value ever restored.
    pub saved_rate: f64,
    pub started_at: DateTime<Utc>,
    pub opened_at: Instant,
    pub attempt_count: u32,
    pub last_attempt_at: Option<Instant>,
    pub media: Option<MediaHandle>,
    pub media_swaps: u32,
    pub unavoidable_reported: bool,
    pub ready_announced: bool,
}

impl PodSession {
    pub fn open(now: Instant) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            active: false,
            saved_rate: 1.0,
            started_at: Utc::now(),
            opened_at: now,
            attempt_count: 0,
            last_attempt_at: None,
            media: None,
            media_swaps: 0,
            unavoidable_reported: false,
            ready_announced: false,
        }
    }

    pub fn cooldown_elapsed(&self, now: Instant, cooldown: std::time::Duration) -> bool {
        self.last_attempt_at
            .map(|at| now.saturating_duration_since(at) >= cooldown)
            .unwrap_or(true)
    }
}
