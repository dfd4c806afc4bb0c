use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Dismissal strategies in order of increasing intrusiveness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    Programmatic,
    TrustedInputRedirect,
    RemoteAgent,
}

impl Strategy {
    pub const ESCALATION: [Strategy; 3] = [
        Strategy::Programmatic,
        Strategy::TrustedInputRedirect,
        Strategy::RemoteAgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Programmatic => "programmatic",
            Strategy::TrustedInputRedirect => "trusted-input-redirect",
            Strategy::RemoteAgent => "remote-agent",
        }
    }

}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AttemptOutcome {
    Pending,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DismissalAttempt {
    pub id: u64,
    pub strategy: Strategy,
    pub started_at: Instant,
    pub outcome: AttemptOutcome,
}

impl DismissalAttempt {
    pub fn new(id: u64, strategy: Strategy, started_at: Instant) -> Self {
        Self {
            id,
            strategy,
            started_at,
            outcome: AttemptOutcome::Pending,
        }
    }
}
