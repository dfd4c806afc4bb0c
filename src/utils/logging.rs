//! Module-gated logging macros.
//!
//! A module opts in by declaring its own flag before using the macros:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_info, log_warn};
//!
//! log_info!("pod opened");
//! ```
//! Every line goes through the `log` facade with a `podskip` target so a
//! host can filter the controller with `RUST_LOG=podskip=debug`.

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!(target: "podskip", $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!(target: "podskip", $($arg)*);
        }
    };
}

/// Warnings are for recoverable surface faults (rate writes, agent calls).
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!(target: "podskip", $($arg)*);
        }
    };
}

/// Errors are reserved for handler-level faults caught by the tick loop.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!(target: "podskip", $($arg)*);
        }
    };
}
