//! Result reconciliation.
//!
//! The only writer of sub-task outcomes, account statuses, and task
//! aggregates. Every reconcile call opens its own fresh store connection
//! and closes it before returning; it is always invoked after the unit's
//! browser context is gone.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::model::{aggregate_status, SubTask, SubTaskStatus, TaskStatus};
use crate::store::{Store, StoreError};

use super::executor::SubTaskOutcome;

/// Persists outcomes and keeps the dashboard's view coherent.
pub struct ResultReconciler {
    store: Arc<dyn Store>,
}

impl ResultReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persist one sub-task outcome: terminal status, timestamps, log,
    /// account status and session marks, and any cookie snapshot.
    pub async fn reconcile_subtask(
        &self,
        subtask: &mut SubTask,
        outcome: &SubTaskOutcome,
    ) -> Result<(), StoreError> {
        let mut conn = self.store.open().await?;

        if !subtask.advance(outcome.status) {
            warn!(
                "Sub-task {}: refusing backward transition {:?} -> {:?}",
                subtask.id, subtask.status, outcome.status
            );
        } else {
            subtask.completed_at = Some(Utc::now());
        }

        subtask.proxy_id = outcome.proxy_id.clone();
        subtask.follows_done += outcome.follows_done;
        if outcome.follow_cursor.is_some() {
            subtask.follow_cursor = outcome.follow_cursor.clone();
        }
        for line in &outcome.log {
            subtask.log_line(line.clone());
        }

        conn.update_subtask(subtask).await?;

        // Account mutations happen here and nowhere else.
        let mut account = conn.load_account(&subtask.account_id).await?;
        if outcome.session_opened {
            account.last_used = Some(Utc::now());
        }
        if outcome.warmed {
            account.last_warmed = Some(Utc::now());
        }
        if let Some(profile_id) = &outcome.profile_id {
            account.profile_id = Some(profile_id.clone());
        }
        if let Some(proxy_id) = &outcome.proxy_id {
            account.proxy_id = Some(proxy_id.clone());
        }
        if let Some(cursor) = &outcome.follow_cursor {
            account.follow_cursor = Some(cursor.clone());
        }
        conn.update_account_session_marks(&subtask.account_id, &account)
            .await?;

        if let Some(status) = outcome.account_status {
            info!(
                "Account {}: status -> {:?} after sub-task {}",
                subtask.account_id, status, subtask.id
            );
            conn.update_account_status(&subtask.account_id, status)
                .await?;
        }

        if let Some(snapshot) = &outcome.cookie_snapshot {
            conn.save_cookie_snapshot(snapshot).await?;
        }

        conn.close().await
    }

    /// Compute and persist the task aggregate from its sub-task statuses.
    pub async fn reconcile_task(
        &self,
        task_id: &str,
        statuses: &[SubTaskStatus],
    ) -> Result<TaskStatus, StoreError> {
        let aggregate = aggregate_status(statuses);

        let completed = statuses
            .iter()
            .filter(|s| matches!(s, SubTaskStatus::Completed))
            .count();
        let line = format!(
            "run ended: {:?} ({}/{} sub-tasks completed)",
            aggregate,
            completed,
            statuses.len()
        );

        let mut conn = self.store.open().await?;
        conn.update_task_status(task_id, aggregate, Some(line))
            .await?;
        conn.close().await?;

        info!("Task {}: aggregate status {:?}", task_id, aggregate);
        Ok(aggregate)
    }
}
