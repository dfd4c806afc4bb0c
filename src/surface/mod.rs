//! The seam between the controller and the host page.
//!
//! The controller never inspects page structure itself; everything it knows
//! about the player, the media element and the dismissal control comes
//! through [`SurfaceAdapter`].

pub mod monitor;

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::dismissal::KeyRedirect;

pub use monitor::SignalMonitor;

/// Opaque reference to a media element. Swapped by the host between ads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaHandle(pub u64);

/// Opaque reference to a candidate dismissal control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// What the surface can tell about a control on this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSnapshot {
    /// Hidden by layout (`display: none`, zero box) or visibility.
    pub hidden: bool,
    pub disabled: bool,
    /// Intersection of the control's box with the visible viewport.
    pub viewport_rect: Option<Rect>,
    /// Accessible label (aria-label, falling back to text content).
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStroke {
    pub code: String,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
}

impl KeyStroke {
    pub fn plain(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            alt: false,
            ctrl: false,
            meta: false,
        }
    }

    pub fn has_modifier(&self) -> bool {
        self.alt || self.ctrl || self.meta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaEventKind {
    LoadedMetadata,
    CanPlay,
    Playing,
    RateChange,
    SourceSwap,
}

/// Pushed by the adapter into the controller's event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// Single-page route change without a full reload.
    Navigation,
    Media(MediaEventKind),
    ToggleEnabled,
}

/// Handed to the adapter once at startup.
///
/// Navigation, media and toggle events are queued for the tick loop. Key
/// events are answered synchronously through [`SurfaceEvents::before_key_dispatch`]
/// because focus has to move before the host dispatches the keystroke.
#[derive(Clone)]
pub struct SurfaceEvents {
    tx: UnboundedSender<SurfaceEvent>,
    redirect: KeyRedirect,
}

impl SurfaceEvents {
    pub fn new(tx: UnboundedSender<SurfaceEvent>, redirect: KeyRedirect) -> Self {
        Self { tx, redirect }
    }

    pub fn navigated(&self) {
        let _ = self.tx.send(SurfaceEvent::Navigation);
    }

    pub fn media_event(&self, kind: MediaEventKind) {
        let _ = self.tx.send(SurfaceEvent::Media(kind));
    }

    pub fn toggle_enabled(&self) {
        let _ = self.tx.send(SurfaceEvent::ToggleEnabled);
    }

    /// Returns the control that must receive focus before `key` is
    /// dispatched, if a redirect is armed. The keystroke itself is never
    /// suppressed.
    pub fn before_key_dispatch(&self, key: &KeyStroke) -> Option<ControlHandle> {
        self.redirect.before_dispatch(key)
    }
}

/// Page inspection and mutation, implemented per host surface.
pub trait SurfaceAdapter: Send {
    /// Player-level marker classes. `None` when the player is absent.
    fn player_marker_present(&self) -> Option<bool>;

    /// Ad-overlay subtree carrying any known decoration. `None` when the
    /// overlay module is absent.
    fn overlay_decoration_present(&self) -> Option<bool>;

    fn query_interruption_active(&self) -> bool {
        self.player_marker_present().unwrap_or(false)
            || self.overlay_decoration_present().unwrap_or(false)
    }

    fn current_media_handle(&self) -> Option<MediaHandle>;

    /// `None` when the rate cannot be read.
    fn get_playback_rate(&self, media: MediaHandle) -> Option<f64>;

    fn set_playback_rate(&mut self, media: MediaHandle, rate: f64) -> Result<()>;

    /// False while buffering, paused or not yet started.
    fn media_playing(&self, _media: MediaHandle) -> bool {
        true
    }

    fn find_dismissal_control(&self) -> Option<ControlHandle>;

    /// All candidate controls in surface order.
    fn candidate_controls(&self) -> Vec<ControlHandle> {
        self.find_dismissal_control().into_iter().collect()
    }

    fn inspect_control(&self, control: ControlHandle) -> Option<ControlSnapshot>;

    /// Focus and activate the control with script-level calls.
    fn activate_control(&mut self, control: ControlHandle) -> Result<()>;

    fn focus_control(&mut self, control: ControlHandle) -> Result<()>;

    fn register_listeners(&mut self, events: SurfaceEvents);

    fn render_status(&mut self, message: &str, duration: Duration);
}
