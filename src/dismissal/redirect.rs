use std::sync::{Arc, Mutex, MutexGuard};

use crate::surface::{ControlHandle, KeyStroke};

const ENABLE_LOGS: bool = true;

use crate::log_info;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ArmedTarget {
    control: ControlHandle,
    session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredRedirect {
    pub control: ControlHandle,
    pub session_id: String,
    pub key: String,
}

#[derive(Debug, Default)]
struct RedirectState {
    armed: Option<ArmedTarget>,
    fired: Option<FiredRedirect>,
}

/// Routes the user's next qualifying keystroke to the dismissal control.
///
/// Shared between the engine (arms/disarms on the tick loop) and the
/// surface's key hook (consults it synchronously before dispatch). One-shot:
/// a fired redirect disarms itself.
#[derive(Clone)]
pub struct KeyRedirect {
    keys: Arc<[String; 2]>,
    state: Arc<Mutex<RedirectState>>,
}

impl KeyRedirect {
    pub fn new(keys: [String; 2]) -> Self {
        Self {
            keys: Arc::new(keys),
            state: Arc::new(Mutex::new(RedirectState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RedirectState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn keys(&self) -> &[String; 2] {
        &self.keys
    }

    pub fn arm(&self, control: ControlHandle, session_id: &str) {
        let mut state = self.lock();
        state.armed = Some(ArmedTarget {
            control,
            session_id: session_id.to_string(),
        });
    }

    /// Drops both the armed target and any unconsumed fire record.
    pub fn disarm(&self) {
        let mut state = self.lock();
        state.armed = None;
        state.fired = None;
    }

    pub fn is_armed(&self) -> bool {
        self.lock().armed.is_some()
    }

    pub fn qualifies(&self, key: &KeyStroke) -> bool {
        !key.has_modifier() && self.keys.iter().any(|k| *k == key.code)
    }

    /// Called by the surface before it dispatches a real keydown. Never
    /// consumes the keystroke.
    pub fn before_dispatch(&self, key: &KeyStroke) -> Option<ControlHandle> {
        if !self.qualifies(key) {
            return None;
        }
        let mut state = self.lock();
        let target = state.armed.take()?;
        log_info!("redirecting {} to control {:?}", key.code, target.control);
        state.fired = Some(FiredRedirect {
            control: target.control,
            session_id: target.session_id,
            key: key.code.clone(),
        });
        Some(target.control)
    }

    pub fn take_fired(&self) -> Option<FiredRedirect> {
        self.lock().fired.take()
    }
}
