use crate::settings::{CandidateRanking, ControllerSettings};
use crate::surface::{ControlHandle, ControlSnapshot, SurfaceAdapter};

/// Decides whether a described control is actionable right now.
pub trait ReadinessPredicate: Send {
    fn is_ready(&self, control: &ControlSnapshot) -> bool;
}

/// Visible, enabled, on screen, labelled "skip"-like and not still counting
/// down.
pub struct LabelReadiness {
    ready: Vec<String>,
    pending: Vec<String>,
}

impl LabelReadiness {
    pub fn new(ready: &[String], pending: &[String]) -> Self {
        let lower = |items: &[String]| -> Vec<String> {
            items.iter().map(|s| s.to_lowercase()).collect()
        };
        Self {
            ready: lower(ready),
            pending: lower(pending),
        }
    }
}

impl ReadinessPredicate for LabelReadiness {
    fn is_ready(&self, control: &ControlSnapshot) -> bool {
        if control.hidden || control.disabled {
            return false;
        }
        let on_screen = control
            .viewport_rect
            .map(|rect| rect.area() > 0.0)
            .unwrap_or(false);
        if !on_screen {
            return false;
        }

        let label = control.label.to_lowercase();
        self.ready.iter().any(|p| label.contains(p.as_str()))
            && !self.pending.iter().any(|p| label.contains(p.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadyControl {
    pub handle: ControlHandle,
    pub snapshot: ControlSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlScan {
    /// The surface exposes no dismissal control at all.
    Absent,
    /// Controls exist but none is actionable yet.
    NotReady,
    Ready(ReadyControl),
}

/// Evaluated fresh on every tick; nothing is cached across ticks.
pub struct ReadinessDetector {
    predicate: Box<dyn ReadinessPredicate>,
    ranking: CandidateRanking,
}

impl ReadinessDetector {
    pub fn new(predicate: Box<dyn ReadinessPredicate>, ranking: CandidateRanking) -> Self {
        Self { predicate, ranking }
    }

    pub fn from_settings(settings: &ControllerSettings) -> Self {
        Self::new(
            Box::new(LabelReadiness::new(
                &settings.ready_labels,
                &settings.pending_labels,
            )),
            settings.candidate_ranking,
        )
    }

    pub fn scan(&self, adapter: &dyn SurfaceAdapter) -> ControlScan {
        let candidates = adapter.candidate_controls();
        if candidates.is_empty() {
            return ControlScan::Absent;
        }

        let mut ready = candidates.into_iter().filter_map(|handle| {
            let snapshot = adapter.inspect_control(handle)?;
            self.predicate
                .is_ready(&snapshot)
                .then_some(ReadyControl { handle, snapshot })
        });

        let picked = match self.ranking {
            CandidateRanking::FirstReady => ready.next(),
            CandidateRanking::LargestArea => ready.max_by(|a, b| {
                area(&a.snapshot)
                    .partial_cmp(&area(&b.snapshot))
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        };

        match picked {
            Some(control) => ControlScan::Ready(control),
            None => ControlScan::NotReady,
        }
    }
}

fn area(snapshot: &ControlSnapshot) -> f64 {
    snapshot.viewport_rect.map(|r| r.area()).unwrap_or(0.0)
}
