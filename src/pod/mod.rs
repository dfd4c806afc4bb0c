pub mod controller;
pub mod machine;
pub mod notify;
pub mod rate;

pub use controller::{ControllerHandle, PodService};
pub use machine::{ControllerSnapshot, PodPhase, PodStateMachine};
pub use notify::Notifier;
pub use rate::RateOverrideManager;
