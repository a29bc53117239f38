// THEORY:
// The engagement state machine turns a per-frame distance into a per-person
// status that is coherent over time. It is the only writer of the isolation store.
//
// Key architectural principles:
// 1.  **Three states, no terminal one**: `Engaged` (someone is close enough),
//     `Watching` (apart, but not for long enough yet) and `Isolated` (apart for
//     at least the isolation time). A person with no record is implicitly engaged.
// 2.  **Onset is sticky**: the clock starts the first frame a person is apart and
//     is never restarted while they stay apart, so elapsed time grows monotonically.
// 3.  **Engagement is a full reset**: coming back within range deletes the record
//     and its tasks. A later isolation starts a new clock and a new task draw.
// 4.  **Tasks once per episode**: the task assigner runs on the first isolated
//     frame only; later frames reuse the stored tasks.

use crate::config::FrameSettings;
use crate::core_modules::identity::CoarseIdentity;
use crate::core_modules::isolation_store::IsolationStore;
use crate::core_modules::task_assigner::TaskAssigner;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Per-person classification for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementStatus {
    Engaged,
    Watching,
    Isolated,
}

impl EngagementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementStatus::Engaged => "engaged",
            EngagementStatus::Watching => "watching",
            EngagementStatus::Isolated => "isolated",
        }
    }
}

/// The outcome of evaluating one identity in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub status: EngagementStatus,
    /// Time since isolation onset; zero while engaged.
    pub elapsed: Duration,
    pub tasks: Vec<String>,
}

impl Evaluation {
    fn engaged() -> Self {
        Self { status: EngagementStatus::Engaged, elapsed: Duration::ZERO, tasks: Vec::new() }
    }

    /// Overlay text for this person, e.g. `Timer: 12s`.
    pub fn label(&self) -> String {
        match self.status {
            EngagementStatus::Engaged => "Engaged".to_string(),
            EngagementStatus::Watching => format!("Timer: {}s", self.elapsed.as_secs()),
            EngagementStatus::Isolated => "Low Interaction".to_string(),
        }
    }
}

/// Owns the isolation store and the task assigner for one session.
#[derive(Debug)]
pub struct EngagementStateMachine {
    store: IsolationStore,
    assigner: TaskAssigner,
}

impl EngagementStateMachine {
    pub fn new(assigner: TaskAssigner) -> Self {
        Self { store: IsolationStore::new(), assigner }
    }

    /// Applies the transition rules for `identity` at session time `now`.
    pub fn evaluate(
        &mut self,
        identity: CoarseIdentity,
        distance: f64,
        now: Duration,
        settings: &FrameSettings,
    ) -> Evaluation {
        if distance <= f64::from(settings.distance_threshold) {
            if self.store.remove(&identity) {
                debug!(%identity, distance, "re-engaged, isolation record cleared");
            }
            return Evaluation::engaged();
        }

        let record = self.store.touch(identity, now);
        let elapsed = record.elapsed(now);

        if elapsed < settings.isolation_time {
            return Evaluation { status: EngagementStatus::Watching, elapsed, tasks: Vec::new() };
        }

        if !record.has_tasks() {
            record.tasks = self.assigner.draw();
            debug!(%identity, elapsed_secs = elapsed.as_secs_f64(), tasks = ?record.tasks, "isolated, tasks assigned");
        }

        Evaluation {
            status: EngagementStatus::Isolated,
            elapsed,
            tasks: record.tasks.clone(),
        }
    }

    pub fn store(&self) -> &IsolationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut IsolationStore {
        &mut self.store
    }
}
