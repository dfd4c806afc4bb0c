pub mod attempt;
pub mod session;
pub mod signal;

pub use attempt::{AttemptOutcome, DismissalAttempt, Strategy};
pub use session::PodSession;
pub use signal::InterruptionSignal;
