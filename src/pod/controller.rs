use anyhow::{anyhow, bail, Context, Result};
use log::info;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::settings::ControllerSettings;
use crate::surface::{SurfaceAdapter, SurfaceEvent};

use super::machine::{ControllerSnapshot, PodStateMachine};

/// Cloneable front door to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<SurfaceEvent>,
    snapshot: watch::Receiver<ControllerSnapshot>,
}

impl ControllerHandle {
    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Waits for the next published snapshot.
    pub async fn changed(&mut self) -> Result<ControllerSnapshot> {
        self.snapshot
            .changed()
            .await
            .context("controller loop has stopped")?;
        Ok(self.snapshot.borrow_and_update().clone())
    }

    pub fn send(&self, event: SurfaceEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| anyhow!("controller loop has stopped"))
    }

    pub fn navigated(&self) -> Result<()> {
        self.send(SurfaceEvent::Navigation)
    }

    pub fn toggle_enabled(&self) -> Result<()> {
        self.send(SurfaceEvent::ToggleEnabled)
    }
}

/// Owns the tick loop task for the page's lifetime.
pub struct PodService {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    controller: Option<ControllerHandle>,
}

impl Default for PodService {
    fn default() -> Self {
        Self::new()
    }
}

impl PodService {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            controller: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn controller(&self) -> Option<ControllerHandle> {
        self.controller.clone()
    }

    pub async fn start(
        &mut self,
        adapter: Box<dyn SurfaceAdapter>,
        settings: &ControllerSettings,
    ) -> Result<ControllerHandle> {
        settings.validate()?;
        let machine = PodStateMachine::new(settings, adapter)?;
        self.start_with(machine).await
    }

    pub async fn start_with(&mut self, mut machine: PodStateMachine) -> Result<ControllerHandle> {
        if self.handle.is_some() {
            bail!("controller already running");
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        machine.attach_listeners(events_tx.clone());
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            machine,
            events_rx,
            snapshot_tx,
            cancel_token.clone(),
        ));

        let controller = ControllerHandle {
            events: events_tx,
            snapshot: snapshot_rx,
        };
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.controller = Some(controller.clone());
        info!("pod controller started");
        Ok(controller)
    }

    /// Cancels the loop and waits for it; an open pod is restored first.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.controller = None;

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("pod controller task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

async fn tick_loop(
    mut machine: PodStateMachine,
    mut events: mpsc::UnboundedReceiver<SurfaceEvent>,
    snapshots: watch::Sender<ControllerSnapshot>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(machine.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                machine.shutdown(Instant::now());
                let _ = snapshots.send(machine.snapshot());
                info!("pod controller shutting down");
                break;
            }
            Some(event) = events.recv() => {
                machine.handle_event(event, Instant::now());
            }
            _ = ticker.tick() => {
                machine.tick(Instant::now());
            }
        }
        let _ = snapshots.send(machine.snapshot());
    }
}
