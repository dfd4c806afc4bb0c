use crate::models::PodSession;
use crate::surface::{MediaHandle, SurfaceAdapter};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const FALLBACK_RATE: f64 = 1.0;

/// Owns the override/restore invariant for a pod, however many media
/// elements the host swaps in while it lasts.
pub struct RateOverrideManager {
    override_rate: f64,
    /// Last rate seen while content was playing.
    last_content_rate: Option<f64>,
}

impl RateOverrideManager {
    pub fn new(override_rate: f64) -> Self {
        Self {
            override_rate,
            last_content_rate: None,
        }
    }

    /// Remembers the user's rate between pods. Never reads the override
    /// value back as a user choice.
    pub fn observe_content(&mut self, adapter: &dyn SurfaceAdapter, media: Option<MediaHandle>) {
        if let Some(rate) = media.and_then(|m| adapter.get_playback_rate(m)) {
            if rate != self.override_rate && rate.is_finite() && rate > 0.0 {
                self.last_content_rate = Some(rate);
            }
        }
    }

    /// Idempotent; called on every active tick.
    pub fn enter_pod(
        &mut self,
        session: &mut PodSession,
        adapter: &mut dyn SurfaceAdapter,
        media: Option<MediaHandle>,
    ) {
        let current = media.and_then(|m| adapter.get_playback_rate(m));

        if !session.active {
            session.saved_rate = current
                .filter(|rate| rate.is_finite() && *rate > 0.0)
                .or(self.last_content_rate)
                .unwrap_or(FALLBACK_RATE);
            session.active = true;
            session.media = media;
            log_info!(
                "pod {} started; saved rate {}",
                session.id,
                session.saved_rate
            );
        } else if media.is_some() && session.media != media {
            session.media_swaps += 1;
            session.media = media;
            log_info!(
                "pod {} media swapped ({} so far)",
                session.id,
                session.media_swaps
            );
        }

        let Some(media) = media else {
            return;
        };

        if current != Some(self.override_rate) {
            match adapter.set_playback_rate(media, self.override_rate) {
                Ok(()) => log_debug!("override {}x applied to {:?}", self.override_rate, media),
                Err(err) => log_warn!("failed to apply override rate: {err:#}"),
            }
        }
    }

    /// Restores the saved rate. No-op for an inactive session.
    pub fn exit_pod(
        &mut self,
        session: &mut PodSession,
        adapter: &mut dyn SurfaceAdapter,
        media: Option<MediaHandle>,
    ) -> bool {
        if !session.active {
            return false;
        }
        session.active = false;

        match media {
            Some(media) => {
                if let Err(err) = adapter.set_playback_rate(media, session.saved_rate) {
                    log_warn!("failed to restore rate {}: {err:#}", session.saved_rate);
                }
            }
            None => log_warn!("pod {} ended with no media attached", session.id),
        }
        self.last_content_rate = Some(session.saved_rate);
        log_info!(
            "pod {} ended; restored rate {}",
            session.id,
            session.saved_rate
        );
        true
    }
}
