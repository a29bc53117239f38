// THEORY:
// The stats aggregator reduces one frame's classifications into the `LiveState`
// that external pollers see. It is recomputed from scratch every frame and never
// patched incrementally, so a scene change can never leave a previous frame's
// population on screen.

use crate::core_modules::detection::Detection;
use crate::core_modules::engagement::EngagementStatus;
use crate::core_modules::identity::CoarseIdentity;
use serde::Serialize;
use std::time::Duration;

/// Everything the engine decided about one detected person in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonClassification {
    pub identity: CoarseIdentity,
    pub detection: Detection,
    /// This detection's own distance to the nearest other person; infinite when alone.
    ///
    /// When several detections share an identity, `status`, `elapsed` and `tasks`
    /// come from the first of them in the frame, so this distance need not be the
    /// one that decided `status`.
    pub distance: f64,
    pub status: EngagementStatus,
    pub elapsed: Duration,
    pub tasks: Vec<String>,
    /// Overlay text, e.g. `Engaged` or `Timer: 4s`.
    pub label: String,
}

/// Wire summary of one person.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonSummary {
    pub id: String,
    pub status: EngagementStatus,
    pub elapsed_seconds: f64,
    pub tasks: Vec<String>,
}

/// Summary of the most recently processed frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveState {
    pub total: usize,
    pub isolated: usize,
    pub persons: Vec<PersonSummary>,
}

impl LiveState {
    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.isolated == 0 && self.persons.is_empty()
    }
}

/// Builds a fresh `LiveState` from this frame's classifications, in detection order.
pub fn aggregate(classifications: &[PersonClassification]) -> LiveState {
    let persons: Vec<PersonSummary> = classifications
        .iter()
        .map(|c| PersonSummary {
            id: c.identity.to_string(),
            status: c.status,
            elapsed_seconds: c.elapsed.as_secs_f64(),
            tasks: c.tasks.clone(),
        })
        .collect();

    LiveState {
        total: classifications.len(),
        isolated: classifications
            .iter()
            .filter(|c| c.status == EngagementStatus::Isolated)
            .count(),
        persons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification(x: i32, status: EngagementStatus, elapsed_secs: u64) -> PersonClassification {
        PersonClassification {
            identity: CoarseIdentity { x, y: 0 },
            detection: Detection::new(x * 20, 0, x * 20, 0),
            distance: 0.0,
            status,
            elapsed: Duration::from_secs(elapsed_secs),
            tasks: if status == EngagementStatus::Isolated { vec!["wave".into()] } else { Vec::new() },
            label: String::new(),
        }
    }

    #[test]
    fn empty_frame_gives_empty_state() {
        let state = aggregate(&[]);
        assert!(state.is_empty());
        assert_eq!(state, LiveState::default());
    }

    #[test]
    fn counts_and_order_follow_the_frame() {
        let state = aggregate(&[
            classification(3, EngagementStatus::Isolated, 30),
            classification(1, EngagementStatus::Engaged, 0),
            classification(2, EngagementStatus::Watching, 4),
        ]);
        assert_eq!(state.total, 3);
        assert_eq!(state.isolated, 1);
        let ids: Vec<&str> = state.persons.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["3_0", "1_0", "2_0"]);
    }

    #[test]
    fn wire_format_uses_the_published_field_names() {
        let state = aggregate(&[classification(4, EngagementStatus::Isolated, 25)]);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "total": 1,
                "isolated": 1,
                "persons": [{
                    "id": "4_0",
                    "status": "isolated",
                    "elapsedSeconds": 25.0,
                    "tasks": ["wave"]
                }]
            })
        );
    }
}
