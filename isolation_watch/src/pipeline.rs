// THEORY:
// The `pipeline` module is the top-level API of the engine. An `IsolationPipeline`
// is the session context: it owns every piece of mutable engine state (the
// isolation store inside the state machine, the task assigner's random source)
// and is owned in turn by exactly one frame loop. Because frames are processed
// strictly one after another, none of that state needs a lock.
//
// Per frame the stages run in a fixed order:
//   Detection Frame -> Identity Resolver -> Proximity Classifier
//   -> Engagement State Machine (+ Task Assigner) -> Stats Aggregator
// and the result is returned as a `FrameAnalysis` for renderers and pollers.

use crate::config::{EngineConfig, FrameSettings};
use crate::core_modules::detection::{DetectionFrame, RawDetection};
use crate::core_modules::engagement::EngagementStateMachine;
use crate::core_modules::identity::{CoarseIdentity, GridBinResolver, IdentityResolver};
use crate::core_modules::isolation_store::IsolationRecord;
use crate::core_modules::proximity::nearest_neighbor_distances;
use crate::core_modules::stats::aggregate;
use crate::core_modules::task_assigner::TaskAssigner;
use crate::error::Result;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

// Re-export key data structures for the public API.
pub use crate::core_modules::detection::Detection;
pub use crate::core_modules::engagement::{EngagementStatus, Evaluation};
pub use crate::core_modules::stats::{LiveState, PersonClassification, PersonSummary};

/// The complete result of processing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    pub persons: Vec<PersonClassification>,
    pub live_state: LiveState,
    /// The settings this frame was classified with, for the HUD.
    pub settings: FrameSettings,
}

/// Session context for the isolation tracking engine.
pub struct IsolationPipeline {
    resolver: Box<dyn IdentityResolver + Send>,
    state_machine: EngagementStateMachine,
    edge_margin: u32,
    record_ttl: Duration,
}

impl IsolationPipeline {
    /// Builds a pipeline with the spatial-binning resolver and an OS-seeded task assigner.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_parts(
            config,
            Box::new(GridBinResolver::new(config.bin_size)),
            TaskAssigner::new(config.task_pool.clone()),
        ))
    }

    /// Builds a pipeline around caller-supplied collaborators.
    pub fn with_parts(
        config: &EngineConfig,
        resolver: Box<dyn IdentityResolver + Send>,
        assigner: TaskAssigner,
    ) -> Self {
        Self {
            resolver,
            state_machine: EngagementStateMachine::new(assigner),
            edge_margin: config.edge_margin,
            record_ttl: config.record_ttl(),
        }
    }

    /// Convenience wrapper that applies class and edge-margin filtering first.
    pub fn process_raw(
        &mut self,
        raw: &[RawDetection],
        frame_width: u32,
        frame_height: u32,
        now: Duration,
        settings: FrameSettings,
    ) -> FrameAnalysis {
        let frame = DetectionFrame::from_raw(raw, frame_width, frame_height, self.edge_margin);
        self.process_frame(&frame, now, settings)
    }

    /// Classifies every person in `frame` at session time `now`.
    pub fn process_frame(&mut self, frame: &DetectionFrame, now: Duration, settings: FrameSettings) -> FrameAnalysis {
        // Stage 1: Identity Resolution
        let identities: Vec<CoarseIdentity> = frame
            .detections
            .iter()
            .map(|d| self.resolver.resolve(d))
            .collect();

        // Stage 2: Proximity
        let distances = nearest_neighbor_distances(&frame.centers());

        // Stage 3: Engagement (each identity is evaluated once per frame;
        // a colliding detection reuses the first evaluation)
        let mut evaluated: HashMap<CoarseIdentity, Evaluation> = HashMap::with_capacity(identities.len());
        let mut persons = Vec::with_capacity(frame.len());
        for ((detection, identity), distance) in frame.detections.iter().zip(&identities).zip(&distances) {
            let evaluation = evaluated
                .entry(*identity)
                .or_insert_with(|| self.state_machine.evaluate(*identity, *distance, now, &settings))
                .clone();

            persons.push(PersonClassification {
                identity: *identity,
                detection: *detection,
                distance: *distance,
                status: evaluation.status,
                label: evaluation.label(),
                elapsed: evaluation.elapsed,
                tasks: evaluation.tasks,
            });
        }

        // Stage 3.5: Record Eviction
        if !frame.is_empty() {
            let evicted = self.state_machine.store_mut().evict_stale(now, self.record_ttl);
            if evicted > 0 {
                debug!(evicted, remaining = self.state_machine.store().len(), "evicted stale isolation records");
            }
        }

        // Stage 4: Stats
        let live_state = aggregate(&persons);

        FrameAnalysis { persons, live_state, settings }
    }

    pub fn tracked_records(&self) -> usize {
        self.state_machine.store().len()
    }

    pub fn record_for(&self, identity: &CoarseIdentity) -> Option<&IsolationRecord> {
        self.state_machine.store().get(identity)
    }
}
