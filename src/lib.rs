mod utils;

pub mod dismissal;
pub mod models;
pub mod pod;
pub mod settings;
pub mod surface;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

use std::path::PathBuf;

use anyhow::Result;

pub use dismissal::{DismissalEngine, EngineState, KeyRedirect, ReadinessPredicate, RemoteAgent};
pub use models::{InterruptionSignal, PodSession, Strategy};
pub use pod::{ControllerHandle, ControllerSnapshot, PodPhase, PodService, PodStateMachine};
pub use settings::{ControllerSettings, SettingsStore};
pub use surface::{SurfaceAdapter, SurfaceEvent, SurfaceEvents};

/// Initialise logging (reads `RUST_LOG`, defaults to info). Safe to call twice.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Entry point for a host: loads settings once and starts the single
/// controller instance for this page.
pub async fn launch(
    adapter: Box<dyn SurfaceAdapter>,
    settings_path: PathBuf,
) -> Result<(PodService, ControllerHandle)> {
    init_logging();
    log::info!("podskip starting up...");

    let settings = SettingsStore::new(settings_path).load()?;
    let mut service = PodService::new();
    let controller = service.start(adapter, &settings).await?;
    Ok((service, controller))
}
