// THEORY:
// The isolation store is the engine's only long-lived memory. It answers one
// question per person: "since when has this identity been apart from everyone,
// and which tasks has it been given?" A record is born on isolation onset, keeps
// its `since` untouched while the person stays apart, and dies the moment they
// re-engage.
//
// Identities are positional, so a person who walks away or jitters across a bin
// edge leaves an orphaned record behind. Records therefore also remember when
// they were last refreshed, and `evict_stale` drops the ones nobody has claimed
// for longer than the configured TTL.

use crate::core_modules::identity::CoarseIdentity;
use std::collections::HashMap;
use std::time::Duration;

/// Isolation bookkeeping for one coarse identity.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationRecord {
    /// Session time of the isolation onset. Never moves while the record lives.
    pub since: Duration,
    /// Session time of the last frame that classified this identity as apart.
    pub last_seen: Duration,
    /// Assigned remediation tasks; empty until the person is first `isolated`.
    pub tasks: Vec<String>,
}

impl IsolationRecord {
    fn new(now: Duration) -> Self {
        Self { since: now, last_seen: now, tasks: Vec::new() }
    }

    pub fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.since)
    }

    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct IsolationStore {
    records: HashMap<CoarseIdentity, IsolationRecord>,
}

impl IsolationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &CoarseIdentity) -> Option<&IsolationRecord> {
        self.records.get(identity)
    }

    /// Returns the record for `identity`, creating it with `since = now` if absent,
    /// and marks it as seen at `now`.
    pub fn touch(&mut self, identity: CoarseIdentity, now: Duration) -> &mut IsolationRecord {
        let record = self
            .records
            .entry(identity)
            .or_insert_with(|| IsolationRecord::new(now));
        record.last_seen = record.last_seen.max(now);
        record
    }

    /// Deletes the record (and its tasks). Returns whether one existed.
    pub fn remove(&mut self, identity: &CoarseIdentity) -> bool {
        self.records.remove(identity).is_some()
    }

    /// Drops every record last seen more than `ttl` before `now`; returns how many.
    pub fn evict_stale(&mut self, now: Duration, ttl: Duration) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| now.saturating_sub(record.last_seen) <= ttl);
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
