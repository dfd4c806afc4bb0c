use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use crate::dismissal::{DismissalEngine, EngineState, ReadinessDetector, RemoteAgent, TickContext};
use crate::models::PodSession;
use crate::settings::ControllerSettings;
use crate::surface::{SignalMonitor, SurfaceAdapter, SurfaceEvent, SurfaceEvents};

use super::notify::Notifier;
use super::rate::RateOverrideManager;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PodPhase {
    ContentPlaying,
    PodActive,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSnapshot {
    pub enabled: bool,
    pub phase: PodPhase,
    pub session_id: Option<String>,
    pub pod_started_at: Option<DateTime<Utc>>,
    pub saved_rate: Option<f64>,
    pub attempt_count: u32,
    pub media_swaps: u32,
    pub engine: EngineState,
    pub ticks: u64,
    pub faults: u64,
    /// Wall-clock time of the latest surface sample.
    pub last_sample_ms: Option<i64>,
}

/// Top-level coordinator. Owns the single open [`PodSession`] and lends it
/// to the rate manager and dismissal engine on every tick.
pub struct PodStateMachine {
    adapter: Box<dyn SurfaceAdapter>,
    tick_interval: Duration,
    enabled: bool,
    phase: PodPhase,
    session: Option<PodSession>,
    rate: RateOverrideManager,
    engine: DismissalEngine,
    notifier: Notifier,
    ticks: u64,
    faults: u64,
    last_sample_ms: Option<i64>,
}

impl PodStateMachine {
    pub fn new(settings: &ControllerSettings, adapter: Box<dyn SurfaceAdapter>) -> Result<Self> {
        let agent = settings
            .remote_agent
            .as_ref()
            .map(RemoteAgent::from_settings)
            .transpose()?;
        Ok(Self::with_parts(
            settings,
            adapter,
            ReadinessDetector::from_settings(settings),
            agent,
        ))
    }

    pub fn with_parts(
        settings: &ControllerSettings,
        adapter: Box<dyn SurfaceAdapter>,
        detector: ReadinessDetector,
        agent: Option<RemoteAgent>,
    ) -> Self {
        Self {
            adapter,
            tick_interval: settings.tick_interval(),
            enabled: settings.enabled,
            phase: PodPhase::ContentPlaying,
            session: None,
            rate: RateOverrideManager::new(settings.override_rate),
            engine: DismissalEngine::new(settings, detector, agent),
            notifier: Notifier::new(
                settings.notify_dedup_window(),
                Duration::from_millis(settings.notify_duration_ms),
            ),
            ticks: 0,
            faults: 0,
            last_sample_ms: None,
        }
    }

    /// Gives the surface its event sender and the key redirect it must
    /// consult before dispatching keystrokes.
    pub fn attach_listeners(&mut self, tx: UnboundedSender<SurfaceEvent>) {
        let events = SurfaceEvents::new(tx, self.engine.key_redirect());
        self.adapter.register_listeners(events);
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn phase(&self) -> PodPhase {
        self.phase
    }

    pub fn session(&self) -> Option<&PodSession> {
        self.session.as_ref()
    }

    pub fn engine(&self) -> &DismissalEngine {
        &self.engine
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            enabled: self.enabled,
            phase: self.phase,
            session_id: self.session.as_ref().map(|s| s.id.clone()),
            pod_started_at: self.session.as_ref().map(|s| s.started_at),
            saved_rate: self
                .session
                .as_ref()
                .filter(|s| s.active)
                .map(|s| s.saved_rate),
            attempt_count: self.session.as_ref().map(|s| s.attempt_count).unwrap_or(0),
            media_swaps: self.session.as_ref().map(|s| s.media_swaps).unwrap_or(0),
            engine: self.engine.state(),
            ticks: self.ticks,
            faults: self.faults,
            last_sample_ms: self.last_sample_ms,
        }
    }

    pub fn tick(&mut self, now: Instant) {
        self.ticks += 1;
        self.guarded(now, Self::process_tick);
    }

    pub fn handle_event(&mut self, event: SurfaceEvent, now: Instant) {
        match event {
            SurfaceEvent::Navigation => {
                if self.phase == PodPhase::PodActive {
                    log_info!("navigation while pod active; closing pod");
                    self.guarded(now, |machine, _| {
                        machine.close_session("navigation");
                        Ok(())
                    });
                }
            }
            SurfaceEvent::Media(kind) => {
                log_debug!("media event {kind:?}; reasserting");
                self.tick(now);
            }
            SurfaceEvent::ToggleEnabled => {
                self.enabled = !self.enabled;
                log_info!("controller {}", if self.enabled { "enabled" } else { "disabled" });
                self.guarded(now, |machine, now| {
                    if !machine.enabled {
                        machine.close_session("disabled");
                    }
                    let message = if machine.enabled {
                        "Ad override enabled"
                    } else {
                        "Ad override disabled"
                    };
                    machine
                        .notifier
                        .notify(machine.adapter.as_mut(), message, now);
                    Ok(())
                });
            }
        }
    }

    /// Closes any open pod so the user's rate is restored on teardown.
    pub fn shutdown(&mut self, now: Instant) {
        self.guarded(now, |machine, _| {
            machine.close_session("shutdown");
            Ok(())
        });
    }

    /// Runs `step`, turning an error or panic into a forced session close.
    fn guarded(&mut self, now: Instant, step: impl FnOnce(&mut Self, Instant) -> Result<()>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| step(self, now)));
        let fault = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("{err:#}"),
            Err(payload) => panic_message(payload.as_ref()),
        };

        self.faults += 1;
        log_error!("pod handler fault: {fault}; forcing pod close");
        self.force_close();
    }

    fn process_tick(&mut self, now: Instant) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let signal = SignalMonitor::sample(self.adapter.as_ref(), now);
        self.last_sample_ms = Some(signal.timestamp_ms);
        match (self.phase, signal.active) {
            (PodPhase::ContentPlaying, false) => {
                self.rate.observe_content(self.adapter.as_ref(), signal.media);
                return Ok(());
            }
            (PodPhase::ContentPlaying, true) => self.open_session(signal.at),
            (PodPhase::PodActive, false) => {
                self.close_session("signal cleared");
                return Ok(());
            }
            (PodPhase::PodActive, true) => {}
        }

        let Self {
            adapter,
            session,
            rate,
            engine,
            notifier,
            ..
        } = self;
        let session = session
            .as_mut()
            .context("pod active without an open session")?;

        rate.enter_pod(session, adapter.as_mut(), signal.media);

        let mut ctx = TickContext {
            adapter: adapter.as_mut(),
            session,
            notifier,
            media: signal.media,
            now,
        };
        engine.on_tick(&mut ctx);
        Ok(())
    }

    fn open_session(&mut self, now: Instant) {
        let session = PodSession::open(now);
        log_info!("pod {} detected", session.id);
        self.session = Some(session);
        self.phase = PodPhase::PodActive;
        self.engine.start();
    }

    /// Internal state is reset before the surface is touched, so a fault
    /// during restore still leaves the machine closed.
    fn close_session(&mut self, reason: &str) {
        self.engine.stop();
        self.notifier.reset();
        self.phase = PodPhase::ContentPlaying;

        let Some(mut session) = self.session.take() else {
            return;
        };
        let media = self.adapter.current_media_handle();
        self.rate.exit_pod(&mut session, self.adapter.as_mut(), media);
        log_info!(
            "pod {} closed ({reason}) after {:?} and {} failed attempts",
            session.id,
            session.opened_at.elapsed(),
            session.attempt_count
        );
    }

    fn force_close(&mut self) {
        let restored = panic::catch_unwind(AssertUnwindSafe(|| self.close_session("fault")));
        if restored.is_err() {
            log_error!("restore failed during fault recovery; dropping pod state");
            self.engine.stop();
            self.notifier.reset();
            self.session = None;
            self.phase = PodPhase::ContentPlaying;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dismissal::engine::UNAVOIDABLE_MESSAGE;
    use crate::dismissal::{AgentCommand, AgentTransport};
    use crate::models::Strategy;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use crate::surface::{ControlHandle, ControlSnapshot, KeyStroke, MediaEventKind, MediaHandle, Rect};
    use crate::testing::FakeSurface;

    const TICK: Duration = Duration::from_millis(150);
    const MEDIA: MediaHandle = MediaHandle(1);

    struct Harness {
        surface: FakeSurface,
        machine: PodStateMachine,
        now: Instant,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_settings(ControllerSettings::default())
        }

        fn with_settings(settings: ControllerSettings) -> Self {
            let surface = FakeSurface::new();
            surface.attach_media(MEDIA, 1.0);
            let machine = PodStateMachine::new(&settings, Box::new(surface.clone())).unwrap();
            Self {
                surface,
                machine,
                now: Instant::now(),
            }
        }

        fn with_agent(agent: RemoteAgent) -> Self {
            let settings = ControllerSettings::default();
            let surface = FakeSurface::new();
            surface.attach_media(MEDIA, 1.0);
            let machine = PodStateMachine::with_parts(
                &settings,
                Box::new(surface.clone()),
                ReadinessDetector::from_settings(&settings),
                Some(agent),
            );
            Self {
                surface,
                machine,
                now: Instant::now(),
            }
        }

        /// Drives one pod to the point where `strategy` is the live attempt.
        fn escalate_to(&mut self, strategy: Strategy) {
            self.surface.add_control(ControlHandle(5), skip_button());
            self.surface.block_programmatic_activation(true);
            self.tick(true);
            self.advance(Duration::from_millis(1500));
            self.tick(true);
            self.advance(Duration::from_millis(1200));
            self.tick(true);
            if strategy == Strategy::RemoteAgent {
                self.advance(Duration::from_millis(1200));
                self.tick(true);
            }
        }

        fn tick(&mut self, ad: bool) {
            self.surface.set_ad(ad);
            self.now += TICK;
            self.machine.tick(self.now);
        }

        fn advance(&mut self, by: Duration) {
            self.now += by;
        }
    }

    fn skip_button() -> ControlSnapshot {
        ControlSnapshot {
            hidden: false,
            disabled: false,
            viewport_rect: Some(Rect {
                x: 600.0,
                y: 400.0,
                width: 90.0,
                height: 36.0,
            }),
            label: "Skip Ad".into(),
        }
    }

    #[test]
    fn scenario_a_override_then_restore() {
        let mut h = Harness::new();
        h.tick(false);
        assert_eq!(h.surface.rate(MEDIA), Some(1.0));

        for _ in 0..3 {
            h.tick(true);
            assert_eq!(h.surface.rate(MEDIA), Some(16.0));
            assert_eq!(h.machine.phase(), PodPhase::PodActive);
        }
        let snapshot = h.machine.snapshot();
        assert!(snapshot.pod_started_at.is_some());
        assert!(snapshot.last_sample_ms.is_some());

        h.tick(false);
        assert_eq!(h.surface.rate(MEDIA), Some(1.0));
        assert_eq!(h.machine.phase(), PodPhase::ContentPlaying);
        assert!(h.machine.session().is_none());
    }

    #[test]
    fn scenario_b_unavoidable_reported_once() {
        let mut h = Harness::new();
        for _ in 0..10 {
            h.tick(true);
            assert_eq!(h.surface.rate(MEDIA), Some(16.0));
        }

        let unavoidable = h
            .surface
            .statuses()
            .iter()
            .filter(|s| s.as_str() == UNAVOIDABLE_MESSAGE)
            .count();
        assert_eq!(unavoidable, 1);
        assert!(h.surface.activations().is_empty());
        assert!(h.machine.engine().last_attempt().is_none());
    }

    #[test]
    fn scenario_c_failed_attempt_is_counted() {
        let mut h = Harness::new();
        h.tick(true);
        h.tick(true);
        h.surface.add_control(ControlHandle(5), skip_button());
        h.tick(true);
        assert_eq!(h.surface.activations(), vec![ControlHandle(5)]);

        h.advance(Duration::from_millis(1500));
        h.tick(true);
        assert_eq!(h.machine.snapshot().attempt_count, 1);
        let failures = h
            .surface
            .statuses()
            .iter()
            .filter(|s| s.starts_with("Skip attempt"))
            .count();
        assert_eq!(failures, 1);

        // Cooldown: the redirect is not armed on the next few ticks.
        for _ in 0..7 {
            h.tick(true);
            assert!(!h.machine.engine().key_redirect().is_armed());
        }
        h.tick(true);
        assert!(h.machine.engine().key_redirect().is_armed());
    }

    #[test]
    fn scenario_d_navigation_discards_pending_verification() {
        let mut h = Harness::new();
        h.surface.add_control(ControlHandle(5), skip_button());
        h.tick(false);
        h.tick(true);
        assert!(h.machine.engine().has_pending_verification());

        h.machine.handle_event(SurfaceEvent::Navigation, h.now);
        assert_eq!(h.machine.phase(), PodPhase::ContentPlaying);
        assert_eq!(h.surface.rate(MEDIA), Some(1.0));
        assert!(!h.machine.engine().has_pending_verification());

        h.advance(Duration::from_millis(1500));
        h.tick(false);
        h.tick(false);
        assert_eq!(h.surface.rate(MEDIA), Some(1.0));
        assert!(!h
            .surface
            .statuses()
            .iter()
            .any(|s| s.starts_with("Skip attempt")));
    }

    #[test]
    fn navigation_cancels_armed_redirect() {
        let mut h = Harness::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        h.machine.attach_listeners(tx);
        h.escalate_to(Strategy::TrustedInputRedirect);
        assert!(h.machine.engine().key_redirect().is_armed());

        h.machine.handle_event(SurfaceEvent::Navigation, h.now);
        assert_eq!(h.machine.phase(), PodPhase::ContentPlaying);
        assert!(!h.machine.engine().key_redirect().is_armed());
        assert_eq!(h.surface.press_key(&KeyStroke::plain("Enter")), None);
        assert_eq!(h.surface.rate(MEDIA), Some(1.0));

        h.tick(false);
        assert!(h.surface.activations().is_empty());
        assert_eq!(h.surface.rate(MEDIA), Some(1.0));
    }

    #[derive(Default)]
    struct StallingTransport {
        sent: Mutex<Vec<AgentCommand>>,
    }

    #[async_trait]
    impl AgentTransport for StallingTransport {
        async fn send(&self, command: AgentCommand) -> Result<()> {
            let stall = command == AgentCommand::Arm;
            self.sent.lock().unwrap().push(command);
            if stall {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn navigation_cancels_remote_agent_delegation() {
        let transport = Arc::new(StallingTransport::default());
        let mut h = Harness::with_agent(RemoteAgent::with_transport(transport.clone()));
        h.escalate_to(Strategy::RemoteAgent);
        assert!(h.machine.engine().has_pending_verification());
        assert!(!h.machine.engine().key_redirect().is_armed());

        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*transport.sent.lock().unwrap(), vec![AgentCommand::Arm]);

        h.machine.handle_event(SurfaceEvent::Navigation, h.now);
        assert!(!h.machine.engine().has_pending_verification());
        assert_eq!(h.surface.rate(MEDIA), Some(1.0));

        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec![AgentCommand::Arm, AgentCommand::Disarm]
        );
    }

    #[test]
    fn restore_survives_media_swaps() {
        let mut h = Harness::new();
        h.surface.set_rate_externally(MEDIA, 1.25);
        h.tick(false);
        h.tick(true);

        h.surface.attach_media(MediaHandle(2), 1.0);
        h.tick(true);
        assert_eq!(h.surface.rate(MediaHandle(2)), Some(16.0));
        h.surface.attach_media(MediaHandle(3), 1.0);
        h.tick(true);
        assert_eq!(h.machine.snapshot().media_swaps, 2);
        assert_eq!(h.machine.snapshot().saved_rate, Some(1.25));

        h.tick(false);
        assert_eq!(h.surface.rate(MediaHandle(3)), Some(1.25));
    }

    #[test]
    fn reasserts_after_external_reset() {
        let mut h = Harness::new();
        h.tick(true);
        for _ in 0..5 {
            h.surface.set_rate_externally(MEDIA, 1.0);
            h.tick(true);
            assert_eq!(h.surface.rate(MEDIA), Some(16.0));
        }
        h.tick(false);
        assert_eq!(h.surface.rate(MEDIA), Some(1.0));
    }

    #[test]
    fn handler_fault_forces_close_and_restore() {
        let mut h = Harness::new();
        h.surface.add_control(ControlHandle(5), skip_button());
        h.tick(true);
        assert_eq!(h.surface.rate(MEDIA), Some(16.0));

        h.surface.panic_on_control_scan(true);
        h.advance(Duration::from_millis(1500));
        // Verification runs this tick; the scan panics on the next.
        h.tick(true);
        h.advance(Duration::from_millis(1200));
        h.tick(true);

        let snapshot = h.machine.snapshot();
        assert_eq!(snapshot.faults, 1);
        assert_eq!(snapshot.phase, PodPhase::ContentPlaying);
        assert_eq!(h.surface.rate(MEDIA), Some(1.0));
        assert!(!h.machine.engine().key_redirect().is_armed());
    }

    #[test]
    fn toggle_disables_and_restores() {
        let mut h = Harness::new();
        h.tick(true);
        assert_eq!(h.surface.rate(MEDIA), Some(16.0));

        h.machine.handle_event(SurfaceEvent::ToggleEnabled, h.now);
        assert!(!h.machine.is_enabled());
        assert_eq!(h.surface.rate(MEDIA), Some(1.0));
        assert!(h.surface.statuses().contains(&"Ad override disabled".to_string()));

        h.tick(true);
        assert_eq!(h.surface.rate(MEDIA), Some(1.0));

        h.machine.handle_event(SurfaceEvent::ToggleEnabled, h.now);
        h.tick(true);
        assert_eq!(h.surface.rate(MEDIA), Some(16.0));
    }

    #[test]
    fn media_event_reasserts_between_ticks() {
        let mut h = Harness::new();
        h.tick(true);
        h.surface.set_rate_externally(MEDIA, 1.0);

        h.machine
            .handle_event(SurfaceEvent::Media(MediaEventKind::RateChange), h.now);
        assert_eq!(h.surface.rate(MEDIA), Some(16.0));
    }

    #[test]
    fn redirected_keystroke_skips_through_surface() {
        let mut h = Harness::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        h.machine.attach_listeners(tx);
        h.surface.add_control(ControlHandle(5), skip_button());
        h.surface.clear_ad_on_activation(true);
        h.surface.block_programmatic_activation(true);

        h.tick(true);
        h.advance(Duration::from_millis(1500));
        h.tick(true);
        h.advance(Duration::from_millis(1200));
        h.tick(true);
        assert!(h.machine.engine().key_redirect().is_armed());

        assert_eq!(h.surface.press_key(&KeyStroke::plain("Space")), Some(ControlHandle(5)));
        assert_eq!(h.surface.focused(), Some(ControlHandle(5)));
        h.tick(false);
        assert_eq!(h.machine.phase(), PodPhase::ContentPlaying);
        assert_eq!(h.surface.rate(MEDIA), Some(1.0));
    }

    #[test]
    fn new_pod_starts_with_fresh_counters() {
        let mut h = Harness::new();
        h.surface.add_control(ControlHandle(5), skip_button());
        h.tick(true);
        h.advance(Duration::from_millis(1500));
        h.tick(true);
        assert_eq!(h.machine.snapshot().attempt_count, 1);
        h.tick(false);

        h.tick(true);
        let snapshot = h.machine.snapshot();
        assert_eq!(snapshot.attempt_count, 0);
        assert_eq!(snapshot.phase, PodPhase::PodActive);
    }
}
