//! Scripted in-memory surface for tests.
//!
//! Clones share state, so a test can hand one clone to the controller and
//! keep driving the page through another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};

use crate::surface::{
    ControlHandle, ControlSnapshot, KeyStroke, MediaHandle, SurfaceAdapter, SurfaceEvents,
};

#[derive(Default)]
struct FakeState {
    player_marker: Option<bool>,
    overlay: Option<bool>,
    media: Option<MediaHandle>,
    rates: HashMap<MediaHandle, f64>,
    rate_unreadable: bool,
    paused: bool,
    controls: Vec<(ControlHandle, ControlSnapshot)>,
    activations: Vec<ControlHandle>,
    focused: Option<ControlHandle>,
    statuses: Vec<String>,
    rate_writes: Vec<(MediaHandle, f64)>,
    listeners: Option<SurfaceEvents>,
    clear_ad_on_activation: bool,
    block_programmatic: bool,
    panic_on_scan: bool,
}

#[derive(Clone, Default)]
pub struct FakeSurface {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_evidence(&self, player_marker: Option<bool>, overlay: Option<bool>) {
        let mut state = self.lock();
        state.player_marker = player_marker;
        state.overlay = overlay;
    }

    /// Marks the player as showing (or not showing) an ad.
    pub fn set_ad(&self, active: bool) {
        self.set_evidence(Some(active), Some(false));
    }

    /// Swaps in a new media element at `rate`.
    pub fn attach_media(&self, media: MediaHandle, rate: f64) {
        let mut state = self.lock();
        state.media = Some(media);
        state.rates.insert(media, rate);
    }

    /// Rate change made by the user or the host, not the controller.
    pub fn set_rate_externally(&self, media: MediaHandle, rate: f64) {
        self.lock().rates.insert(media, rate);
    }

    pub fn rate(&self, media: MediaHandle) -> Option<f64> {
        self.lock().rates.get(&media).copied()
    }

    pub fn set_rate_unreadable(&self, unreadable: bool) {
        self.lock().rate_unreadable = unreadable;
    }

    pub fn set_playing(&self, playing: bool) {
        self.lock().paused = !playing;
    }

    pub fn add_control(&self, control: ControlHandle, snapshot: ControlSnapshot) {
        self.lock().controls.push((control, snapshot));
    }

    pub fn update_control(&self, control: ControlHandle, snapshot: ControlSnapshot) {
        let mut state = self.lock();
        if let Some(entry) = state.controls.iter_mut().find(|(h, _)| *h == control) {
            entry.1 = snapshot;
        }
    }

    pub fn remove_controls(&self) {
        self.lock().controls.clear();
    }

    pub fn activations(&self) -> Vec<ControlHandle> {
        self.lock().activations.clone()
    }

    pub fn focused(&self) -> Option<ControlHandle> {
        self.lock().focused
    }

    pub fn statuses(&self) -> Vec<String> {
        self.lock().statuses.clone()
    }

    pub fn rate_writes(&self) -> Vec<(MediaHandle, f64)> {
        self.lock().rate_writes.clone()
    }

    /// A successful activation ends the ad.
    pub fn clear_ad_on_activation(&self, enabled: bool) {
        self.lock().clear_ad_on_activation = enabled;
    }

    /// Script-level activation is ignored, as on hosts that require a
    /// trusted input event.
    pub fn block_programmatic_activation(&self, blocked: bool) {
        self.lock().block_programmatic = blocked;
    }

    pub fn panic_on_control_scan(&self, enabled: bool) {
        self.lock().panic_on_scan = enabled;
    }

    pub fn listeners(&self) -> Option<SurfaceEvents> {
        self.lock().listeners.clone()
    }

    /// Simulates a real keydown: the redirect is consulted, focus moves, and
    /// the keystroke activates whatever holds focus.
    pub fn press_key(&self, key: &KeyStroke) -> Option<ControlHandle> {
        let listeners = self.listeners()?;
        let target = listeners.before_key_dispatch(key)?;

        let mut state = self.lock();
        state.focused = Some(target);
        state.activations.push(target);
        if state.clear_ad_on_activation {
            state.player_marker = Some(false);
            state.overlay = Some(false);
        }
        Some(target)
    }
}

impl SurfaceAdapter for FakeSurface {
    fn player_marker_present(&self) -> Option<bool> {
        self.lock().player_marker
    }

    fn overlay_decoration_present(&self) -> Option<bool> {
        self.lock().overlay
    }

    fn current_media_handle(&self) -> Option<MediaHandle> {
        self.lock().media
    }

    fn get_playback_rate(&self, media: MediaHandle) -> Option<f64> {
        let state = self.lock();
        if state.rate_unreadable {
            return None;
        }
        state.rates.get(&media).copied()
    }

    fn set_playback_rate(&mut self, media: MediaHandle, rate: f64) -> Result<()> {
        let mut state = self.lock();
        if !state.rates.contains_key(&media) {
            bail!("media {media:?} is detached");
        }
        state.rates.insert(media, rate);
        state.rate_writes.push((media, rate));
        Ok(())
    }

    fn media_playing(&self, _media: MediaHandle) -> bool {
        !self.lock().paused
    }

    fn find_dismissal_control(&self) -> Option<ControlHandle> {
        self.candidate_controls().into_iter().next()
    }

    fn candidate_controls(&self) -> Vec<ControlHandle> {
        let should_panic = self.lock().panic_on_scan;
        if should_panic {
            panic!("control scan exploded");
        }
        self.lock().controls.iter().map(|(h, _)| *h).collect()
    }

    fn inspect_control(&self, control: ControlHandle) -> Option<ControlSnapshot> {
        self.lock()
            .controls
            .iter()
            .find(|(h, _)| *h == control)
            .map(|(_, s)| s.clone())
    }

    fn activate_control(&mut self, control: ControlHandle) -> Result<()> {
        let mut state = self.lock();
        if state.block_programmatic {
            bail!("untrusted activation ignored");
        }
        state.activations.push(control);
        if state.clear_ad_on_activation {
            state.player_marker = Some(false);
            state.overlay = Some(false);
        }
        Ok(())
    }

    fn focus_control(&mut self, control: ControlHandle) -> Result<()> {
        self.lock().focused = Some(control);
        Ok(())
    }

    fn register_listeners(&mut self, events: SurfaceEvents) {
        self.lock().listeners = Some(events);
    }

    fn render_status(&mut self, message: &str, _duration: Duration) {
        self.lock().statuses.push(message.to_string());
    }
}
