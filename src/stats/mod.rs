//! Lock-free fleet statistics using atomic operations
//!
//! Aggregated across all execution units without mutex contention; the
//! dashboard polls the serializable snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Fleet-wide counters
#[derive(Debug, Default)]
pub struct FleetStats {
    pub subtasks_started: AtomicU64,
    pub subtasks_completed: AtomicU64,
    pub subtasks_failed: AtomicU64,
    pub uploads_published: AtomicU64,
    pub follows_performed: AtomicU64,
    pub challenges_seen: AtomicU64,
    pub active_sessions: AtomicU64,
    pub start_time: AtomicU64,
}

impl FleetStats {
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            start_time: AtomicU64::new(now),
            ..Default::default()
        }
    }

    pub fn record_subtask_started(&self) {
        self.subtasks_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subtask_completed(&self) {
        self.subtasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subtask_failed(&self) {
        self.subtasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload_published(&self) {
        self.uploads_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_follows(&self, count: u64) {
        self.follows_performed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_challenge(&self) {
        self.challenges_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_session(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remove_session(&self) {
        // Saturating: a crashed unit may never have registered.
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Sub-tasks finished per hour since start
    pub fn subtasks_per_hour(&self) -> f64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let start = self.start_time.load(Ordering::Relaxed);
        let elapsed_hours = now.saturating_sub(start) as f64 / 3600.0;

        if elapsed_hours < 0.001 {
            return 0.0;
        }

        let finished = self.subtasks_completed.load(Ordering::Relaxed)
            + self.subtasks_failed.load(Ordering::Relaxed);
        finished as f64 / elapsed_hours
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.subtasks_started.store(0, Ordering::Relaxed);
        self.subtasks_completed.store(0, Ordering::Relaxed);
        self.subtasks_failed.store(0, Ordering::Relaxed);
        self.uploads_published.store(0, Ordering::Relaxed);
        self.follows_performed.store(0, Ordering::Relaxed);
        self.challenges_seen.store(0, Ordering::Relaxed);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.start_time.store(now, Ordering::Relaxed);
    }

    /// Get snapshot for serialization
    pub fn snapshot(&self) -> FleetStatsSnapshot {
        FleetStatsSnapshot {
            subtasks_started: self.subtasks_started.load(Ordering::Relaxed),
            subtasks_completed: self.subtasks_completed.load(Ordering::Relaxed),
            subtasks_failed: self.subtasks_failed.load(Ordering::Relaxed),
            uploads_published: self.uploads_published.load(Ordering::Relaxed),
            follows_performed: self.follows_performed.load(Ordering::Relaxed),
            challenges_seen: self.challenges_seen.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            subtasks_per_hour: self.subtasks_per_hour(),
        }
    }
}

/// Serializable snapshot of fleet stats
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStatsSnapshot {
    pub subtasks_started: u64,
    pub subtasks_completed: u64,
    pub subtasks_failed: u64,
    pub uploads_published: u64,
    pub follows_performed: u64,
    pub challenges_seen: u64,
    pub active_sessions: u64,
    pub subtasks_per_hour: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = FleetStats::new();
        stats.record_subtask_started();
        stats.record_subtask_completed();
        stats.record_follows(7);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.subtasks_started, 1);
        assert_eq!(snapshot.subtasks_completed, 1);
        assert_eq!(snapshot.follows_performed, 7);
    }

    #[test]
    fn remove_session_never_underflows() {
        let stats = FleetStats::new();
        stats.remove_session();
        assert_eq!(stats.active_sessions(), 0);
        stats.add_session();
        stats.remove_session();
        assert_eq!(stats.active_sessions(), 0);
    }
}
