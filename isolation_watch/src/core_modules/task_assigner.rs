// THEORY:
// When someone has been on their own long enough, the overlay suggests a few small
// "remediation" tasks. The draw happens exactly once per isolation episode, so the
// text under a person's box never flickers between frames. The random source is
// injected so a session can be replayed deterministically.

use crate::config::TASKS_PER_PERSON;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{RngCore, SeedableRng};

/// Draws a fixed number of distinct prompts from a fixed pool.
pub struct TaskAssigner {
    pool: Vec<String>,
    rng: Box<dyn RngCore + Send>,
}

impl TaskAssigner {
    /// Uses an OS-seeded generator.
    pub fn new(pool: Vec<String>) -> Self {
        Self::with_rng(pool, Box::new(StdRng::from_os_rng()))
    }

    pub fn seeded(pool: Vec<String>, seed: u64) -> Self {
        Self::with_rng(pool, Box::new(StdRng::seed_from_u64(seed)))
    }

    /// Duplicate prompts are dropped so that a draw can never repeat one.
    pub fn with_rng(mut pool: Vec<String>, rng: Box<dyn RngCore + Send>) -> Self {
        let mut seen = std::collections::HashSet::new();
        pool.retain(|task| seen.insert(task.clone()));
        Self { pool, rng }
    }

    pub fn pool(&self) -> &[String] {
        &self.pool
    }

    /// Returns `TASKS_PER_PERSON` distinct prompts in draw order
    /// (fewer only if the pool itself is smaller).
    pub fn draw(&mut self) -> Vec<String> {
        self.pool
            .choose_multiple(&mut *self.rng, TASKS_PER_PERSON)
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for TaskAssigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskAssigner").field("pool", &self.pool).finish_non_exhaustive()
    }
}
