use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::{AttemptOutcome, DismissalAttempt, PodSession, Strategy};
use crate::pod::Notifier;
use crate::settings::ControllerSettings;
use crate::surface::{ControlHandle, MediaHandle, SurfaceAdapter};

use super::agent::RemoteAgent;
use super::readiness::{ControlScan, ReadinessDetector, ReadyControl};
use super::redirect::KeyRedirect;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub const UNAVOIDABLE_MESSAGE: &str = "Unskippable ad: fast-forwarding until it ends";
pub const READY_MESSAGE: &str = "Skip available";
pub const RESOLVED_MESSAGE: &str = "Ad skipped";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    Idle,
    Detecting,
    Attempting,
    Verifying,
    Resolved,
}

/// Per-tick view of the pod, lent to the engine by the state machine.
pub struct TickContext<'a> {
    pub adapter: &'a mut dyn SurfaceAdapter,
    pub session: &'a mut PodSession,
    pub notifier: &'a mut Notifier,
    pub media: Option<MediaHandle>,
    pub now: Instant,
}

#[derive(Debug)]
struct PendingVerification {
    session_id: String,
    attempt: DismissalAttempt,
    due: Instant,
}

/// Strategies already spent on one appearance of a control.
#[derive(Debug)]
struct Occurrence {
    control: ControlHandle,
    exhausted: Vec<Strategy>,
    /// The escalated redirect is waiting for the user's keystroke. Cleared
    /// once it fires or another strategy takes over.
    redirect_live: bool,
}

pub struct DismissalEngine {
    state: EngineState,
    detector: ReadinessDetector,
    redirect: KeyRedirect,
    agent: Option<RemoteAgent>,
    cooldown: Duration,
    verification_window: Duration,
    occurrence: Option<Occurrence>,
    pending: Option<PendingVerification>,
    agent_cancel: Option<CancellationToken>,
    last_attempt: Option<DismissalAttempt>,
    next_attempt_id: u64,
}

impl DismissalEngine {
    pub fn new(
        settings: &ControllerSettings,
        detector: ReadinessDetector,
        agent: Option<RemoteAgent>,
    ) -> Self {
        Self {
            state: EngineState::Idle,
            detector,
            redirect: KeyRedirect::new(settings.redirect_keys.clone()),
            agent,
            cooldown: settings.cooldown(),
            verification_window: settings.verification_window(),
            occurrence: None,
            pending: None,
            agent_cancel: None,
            last_attempt: None,
            next_attempt_id: 1,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn key_redirect(&self) -> KeyRedirect {
        self.redirect.clone()
    }

    pub fn last_attempt(&self) -> Option<&DismissalAttempt> {
        self.last_attempt.as_ref()
    }

    pub fn has_pending_verification(&self) -> bool {
        self.pending.is_some()
    }

    pub fn start(&mut self) {
        self.occurrence = None;
        self.pending = None;
        self.last_attempt = None;
        self.state = EngineState::Detecting;
    }

    /// Synchronously drops every in-flight piece of work: the armed key
    /// redirect, a pending verification and any remote-agent delegation.
    pub fn stop(&mut self) {
        self.redirect.disarm();
        if let Some(token) = self.agent_cancel.take() {
            token.cancel();
        }
        if let Some(pending) = self.pending.take() {
            log_debug!(
                "dropping pending verification of attempt {} for pod {}",
                pending.attempt.id,
                pending.session_id
            );
        }
        self.occurrence = None;
        self.state = EngineState::Idle;
    }

    pub fn on_tick(&mut self, ctx: &mut TickContext<'_>) {
        if matches!(self.state, EngineState::Idle | EngineState::Resolved) {
            return;
        }

        self.consume_redirect(ctx);

        if self.pending.is_some() {
            self.verify(ctx);
            return;
        }

        self.detect(ctx);
    }

    fn consume_redirect(&mut self, ctx: &mut TickContext<'_>) {
        let Some(fired) = self.redirect.take_fired() else {
            return;
        };
        if fired.session_id != ctx.session.id {
            log_debug!("discarding redirect fired for stale pod {}", fired.session_id);
            return;
        }

        log_info!(
            "pod {}: user keystroke {} delivered to control {:?}",
            ctx.session.id,
            fired.key,
            fired.control
        );
        if let Some(occurrence) = self.occurrence.as_mut() {
            occurrence.redirect_live = false;
        }
        ctx.session.last_attempt_at = Some(ctx.now);
        ctx.notifier.notify(&mut *ctx.adapter, "Skip sent", ctx.now);

        let attempt = match self.last_attempt.take() {
            Some(attempt)
                if attempt.strategy == Strategy::TrustedInputRedirect
                    && attempt.outcome == AttemptOutcome::Pending =>
            {
                attempt
            }
            other => {
                self.last_attempt = other;
                self.begin_attempt(Strategy::TrustedInputRedirect, ctx)
            }
        };
        self.await_verification(ctx, attempt);
    }

    fn verify(&mut self, ctx: &mut TickContext<'_>) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.session_id != ctx.session.id {
            log_debug!("discarding verification for closed pod {}", pending.session_id);
            self.state = EngineState::Detecting;
            return;
        }
        if ctx.now < pending.due {
            self.pending = Some(pending);
            return;
        }

        let mut attempt = pending.attempt;
        if ctx.adapter.query_interruption_active() {
            attempt.outcome = AttemptOutcome::Failure;
            ctx.session.attempt_count += 1;
            ctx.session.last_attempt_at = Some(ctx.now);
            if let Some(occurrence) = self.occurrence.as_mut() {
                if !occurrence.exhausted.contains(&attempt.strategy) {
                    occurrence.exhausted.push(attempt.strategy);
                }
            }
            log_warn!(
                "pod {}: {} attempt {} did not clear the ad after {:?} ({} failed so far)",
                ctx.session.id,
                attempt.strategy.as_str(),
                attempt.id,
                ctx.now.saturating_duration_since(attempt.started_at),
                ctx.session.attempt_count
            );
            let message = format!("Skip attempt {} failed", ctx.session.attempt_count);
            ctx.notifier.notify(&mut *ctx.adapter, &message, ctx.now);
            self.state = EngineState::Detecting;
        } else {
            attempt.outcome = AttemptOutcome::Success;
            log_info!(
                "pod {}: {} attempt {} cleared the ad",
                ctx.session.id,
                attempt.strategy.as_str(),
                attempt.id
            );
            self.redirect.disarm();
            ctx.notifier.notify(&mut *ctx.adapter, RESOLVED_MESSAGE, ctx.now);
            self.state = EngineState::Resolved;
        }
        self.last_attempt = Some(attempt);
    }

    fn detect(&mut self, ctx: &mut TickContext<'_>) {
        self.state = EngineState::Detecting;

        let Some(media) = ctx.media else {
            return;
        };
        if !ctx.adapter.media_playing(media) {
            log_debug!("media not playing; re-polling next tick");
            return;
        }

        match self.detector.scan(&*ctx.adapter) {
            ControlScan::Absent => {
                self.occurrence = None;
                self.redirect.disarm();
                if !ctx.session.unavoidable_reported {
                    ctx.session.unavoidable_reported = true;
                    log_info!("pod {}: no dismissal control exposed", ctx.session.id);
                    ctx.notifier
                        .notify(&mut *ctx.adapter, UNAVOIDABLE_MESSAGE, ctx.now);
                }
            }
            ControlScan::NotReady => {
                self.redirect.disarm();
            }
            ControlScan::Ready(control) => self.attempt(ctx, control),
        }
    }

    fn attempt(&mut self, ctx: &mut TickContext<'_>, control: ReadyControl) {
        let same_control = self
            .occurrence
            .as_ref()
            .map(|o| o.control == control.handle)
            .unwrap_or(false);
        if !same_control {
            self.redirect.disarm();
            self.occurrence = Some(Occurrence {
                control: control.handle,
                exhausted: Vec::new(),
                redirect_live: false,
            });
        }

        if !ctx.session.ready_announced {
            ctx.session.ready_announced = true;
            ctx.notifier.notify(&mut *ctx.adapter, READY_MESSAGE, ctx.now);
        }

        // Back in view after a blip: the unused redirect stays on offer.
        if self.redirect_live() && !self.redirect.is_armed() {
            self.redirect.arm(control.handle, &ctx.session.id);
        }

        if !ctx.session.cooldown_elapsed(ctx.now, self.cooldown) {
            return;
        }

        match self.next_strategy() {
            Strategy::Programmatic => self.run_programmatic(ctx, control.handle),
            Strategy::TrustedInputRedirect => self.arm_redirect(ctx, control.handle),
            Strategy::RemoteAgent => self.run_remote_agent(ctx, &control),
        }
    }

    fn is_exhausted(&self, strategy: Strategy) -> bool {
        self.occurrence
            .as_ref()
            .map(|o| o.exhausted.contains(&strategy))
            .unwrap_or(false)
    }

    fn redirect_live(&self) -> bool {
        self.occurrence
            .as_ref()
            .map(|o| o.redirect_live)
            .unwrap_or(false)
    }

    fn is_available(&self, strategy: Strategy) -> bool {
        match strategy {
            Strategy::RemoteAgent => self.agent.is_some(),
            _ => true,
        }
    }

    /// Cheapest strategy not yet spent on this control. Once all are spent
    /// the cycle starts over from the cheapest.
    fn next_strategy(&mut self) -> Strategy {
        let pick = Strategy::ESCALATION
            .into_iter()
            .find(|s| self.is_available(*s) && !self.is_exhausted(*s));
        match pick {
            Some(strategy) => strategy,
            None => {
                if let Some(occurrence) = self.occurrence.as_mut() {
                    occurrence.exhausted.clear();
                }
                Strategy::Programmatic
            }
        }
    }

    fn begin_attempt(&mut self, strategy: Strategy, ctx: &mut TickContext<'_>) -> DismissalAttempt {
        if strategy != Strategy::TrustedInputRedirect {
            self.redirect.disarm();
            if let Some(occurrence) = self.occurrence.as_mut() {
                occurrence.redirect_live = false;
            }
        }
        let attempt = DismissalAttempt::new(self.next_attempt_id, strategy, ctx.now);
        self.next_attempt_id += 1;
        ctx.session.last_attempt_at = Some(ctx.now);
        log_info!(
            "pod {}: starting {} attempt {}",
            ctx.session.id,
            strategy.as_str(),
            attempt.id
        );
        attempt
    }

    fn await_verification(&mut self, ctx: &TickContext<'_>, attempt: DismissalAttempt) {
        self.pending = Some(PendingVerification {
            session_id: ctx.session.id.clone(),
            attempt,
            due: ctx.now + self.verification_window,
        });
        self.state = EngineState::Verifying;
    }

    fn run_programmatic(&mut self, ctx: &mut TickContext<'_>, control: ControlHandle) {
        self.state = EngineState::Attempting;
        let attempt = self.begin_attempt(Strategy::Programmatic, ctx);

        if let Err(err) = ctx.adapter.focus_control(control) {
            log_debug!("focus before activation failed: {err:#}");
        }
        if let Err(err) = ctx.adapter.activate_control(control) {
            log_debug!("programmatic activation failed: {err:#}");
        }

        self.await_verification(ctx, attempt);
    }

    fn arm_redirect(&mut self, ctx: &mut TickContext<'_>, control: ControlHandle) {
        let attempt = self.begin_attempt(Strategy::TrustedInputRedirect, ctx);
        self.redirect.arm(control, &ctx.session.id);
        if let Some(occurrence) = self.occurrence.as_mut() {
            occurrence.exhausted.push(Strategy::TrustedInputRedirect);
            occurrence.redirect_live = true;
        }

        let [first, second] = self.redirect.keys();
        let hint = format!("Press {first} or {second} to skip");
        ctx.notifier.notify(&mut *ctx.adapter, &hint, ctx.now);
        self.last_attempt = Some(attempt);
    }

    fn run_remote_agent(&mut self, ctx: &mut TickContext<'_>, control: &ReadyControl) {
        let Some(agent) = self.agent.clone() else {
            return;
        };
        let Some(rect) = control.snapshot.viewport_rect else {
            log_debug!("control {:?} has no on-screen box for the agent", control.handle);
            if let Some(occurrence) = self.occurrence.as_mut() {
                occurrence.exhausted.push(Strategy::RemoteAgent);
            }
            return;
        };

        if let Some(previous) = self.agent_cancel.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        let (x, y) = rect.center();
        // Detached; the outcome is observed through the interruption signal.
        if agent.delegate(x, y, token.clone()).is_none() {
            if let Some(occurrence) = self.occurrence.as_mut() {
                occurrence.exhausted.push(Strategy::RemoteAgent);
            }
            return;
        }
        self.agent_cancel = Some(token);

        self.state = EngineState::Attempting;
        let attempt = self.begin_attempt(Strategy::RemoteAgent, ctx);
        self.await_verification(ctx, attempt);
    }
}
