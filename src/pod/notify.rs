use std::time::Duration;

use tokio::time::Instant;

use crate::surface::SurfaceAdapter;

#[derive(Debug, Clone)]
struct NotificationRecord {
    last_message: String,
    last_shown_at: Instant,
}

/// Suppresses a repeated status message inside the dedup window.
pub struct Notifier {
    dedup_window: Duration,
    default_duration: Duration,
    record: Option<NotificationRecord>,
}

impl Notifier {
    pub fn new(dedup_window: Duration, default_duration: Duration) -> Self {
        Self {
            dedup_window,
            default_duration,
            record: None,
        }
    }

    pub fn notify(
        &mut self,
        adapter: &mut dyn SurfaceAdapter,
        message: &str,
        now: Instant,
    ) -> bool {
        self.notify_for(adapter, message, self.default_duration, now)
    }

    /// Returns whether the message was rendered.
    pub fn notify_for(
        &mut self,
        adapter: &mut dyn SurfaceAdapter,
        message: &str,
        duration: Duration,
        now: Instant,
    ) -> bool {
        if let Some(record) = &self.record {
            if record.last_message == message
                && now.saturating_duration_since(record.last_shown_at) < self.dedup_window
            {
                return false;
            }
        }

        adapter.render_status(message, duration);
        self.record = Some(NotificationRecord {
            last_message: message.to_string(),
            last_shown_at: now,
        });
        true
    }

    pub fn reset(&mut self) {
        self.record = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSurface;

    fn notifier() -> Notifier {
        Notifier::new(Duration::from_millis(400), Duration::from_millis(1200))
    }

    #[test]
    fn duplicate_inside_window_renders_once() {
        let mut surface = FakeSurface::new();
        let mut notifier = notifier();
        let t0 = Instant::now();

        assert!(notifier.notify(&mut surface, "X", t0));
        assert!(!notifier.notify(&mut surface, "X", t0 + Duration::from_millis(399)));
        assert_eq!(surface.statuses(), vec!["X".to_string()]);
    }

    #[test]
    fn duplicate_after_window_renders_again() {
        let mut surface = FakeSurface::new();
        let mut notifier = notifier();
        let t0 = Instant::now();

        notifier.notify(&mut surface, "X", t0);
        assert!(notifier.notify(&mut surface, "X", t0 + Duration::from_millis(400)));
        assert_eq!(surface.statuses().len(), 2);
    }

    #[test]
    fn different_message_is_not_suppressed() {
        let mut surface = FakeSurface::new();
        let mut notifier = notifier();
        let t0 = Instant::now();

        notifier.notify(&mut surface, "X", t0);
        assert!(notifier.notify(&mut surface, "Y", t0 + Duration::from_millis(10)));
        assert!(notifier.notify(&mut surface, "X", t0 + Duration::from_millis(20)));
    }
}
