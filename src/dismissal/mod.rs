pub mod agent;
pub mod engine;
pub mod readiness;
pub mod redirect;

pub use agent::{AgentCommand, AgentTransport, HttpAgentTransport, RemoteAgent};
pub use engine::{DismissalEngine, EngineState, TickContext};
pub use readiness::{
    ControlScan, LabelReadiness, ReadinessDetector, ReadinessPredicate, ReadyControl,
};
pub use redirect::{FiredRedirect, KeyRedirect};
