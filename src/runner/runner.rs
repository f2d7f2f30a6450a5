//! Task runner.
//!
//! Fans a task out into one sub-task per assigned account and drives them
//! through isolated execution units under a bounded concurrency limit. The
//! per-unit sequence is fixed: read the plan from the store and close the
//! connection, run the entire flow on in-memory state, tear the browser
//! down, then reconcile on a fresh connection. Store and browser are never
//! open on the same unit at the same time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::flows::CancelToken;
use crate::model::{SubTask, SubTaskStatus, Task, TaskKind, TaskStatus};
use crate::stats::FleetStats;
use crate::store::{Store, StoreError};

use super::executor::{SubTaskExecutor, SubTaskPlan};
use super::reconcile::ResultReconciler;

/// Runs tasks to a terminal aggregate status.
pub struct TaskRunner {
    store: Arc<dyn Store>,
    executor: Arc<dyn SubTaskExecutor>,
    reconciler: Arc<ResultReconciler>,
    stats: Arc<FleetStats>,
    /// Accounts with an in-flight sub-task anywhere in this process.
    /// Checked and claimed atomically before dispatch.
    running_accounts: Arc<DashMap<String, String>>,
    default_concurrency: usize,
}

impl TaskRunner {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<dyn SubTaskExecutor>,
        stats: Arc<FleetStats>,
        default_concurrency: usize,
    ) -> Self {
        let reconciler = Arc::new(ResultReconciler::new(store.clone()));
        Self {
            store,
            executor,
            reconciler,
            stats,
            running_accounts: Arc::new(DashMap::new()),
            default_concurrency: default_concurrency.max(1),
        }
    }

    /// Accounts currently claimed by in-flight sub-tasks.
    pub fn running_account_count(&self) -> usize {
        self.running_accounts.len()
    }

    /// Run one task to completion: plan, dispatch, reconcile, aggregate.
    pub async fn run(&self, task_id: &str, cancel: &CancelToken) -> Result<TaskStatus, StoreError> {
        // Planning phase: one connection, closed before any unit starts.
        let (task, dispatch) = self.plan(task_id).await?;

        let limit = if task.config.concurrency_limit > 0 {
            task.config.concurrency_limit
        } else {
            self.default_concurrency
        };
        info!(
            "Task {}: dispatching {} sub-tasks (concurrency {})",
            task_id,
            dispatch.len(),
            limit
        );

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut handles = Vec::with_capacity(dispatch.len());

        for plan in dispatch {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let executor = self.executor.clone();
            let reconciler = self.reconciler.clone();
            let stats = self.stats.clone();
            let running_accounts = self.running_accounts.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        running_accounts.remove(&plan.account.id);
                        return;
                    }
                };

                Self::run_unit(
                    store,
                    executor,
                    reconciler,
                    stats,
                    running_accounts,
                    plan,
                    &cancel,
                )
                .await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Task {}: execution unit panicked: {}", task_id, e);
            }
        }

        // Aggregate from the store's ground truth, on a fresh connection.
        let mut conn = self.store.open().await?;
        let statuses: Vec<SubTaskStatus> = conn
            .load_subtasks(task_id)
            .await?
            .iter()
            .map(|s| s.status)
            .collect();
        conn.close().await?;

        self.reconciler.reconcile_task(task_id, &statuses).await
    }

    /// Load the task, create missing sub-task rows, and build plans for
    /// every account this run may dispatch. Accounts already RUNNING
    /// anywhere keep a PENDING row and are not dispatched.
    async fn plan(&self, task_id: &str) -> Result<(Task, Vec<SubTaskPlan>), StoreError> {
        let mut conn = self.store.open().await?;

        let task = conn.load_task(task_id).await?;
        conn.update_task_status(task_id, TaskStatus::Running, Some("run started".into()))
            .await?;

        let existing: HashMap<String, SubTask> = conn
            .load_subtasks(task_id)
            .await?
            .into_iter()
            .map(|s| (s.account_id.clone(), s))
            .collect();

        let mut dispatch = Vec::new();

        for account_id in &task.account_ids {
            // Terminal sub-tasks from a prior run keep their status.
            if let Some(prior) = existing.get(account_id) {
                if prior.status.is_terminal() {
                    continue;
                }
                if prior.status == SubTaskStatus::Running {
                    warn!(
                        "Task {}: account {} already has a running sub-task, skipping",
                        task_id, account_id
                    );
                    continue;
                }
            }

            let account = match conn.load_account(account_id).await {
                Ok(account) => account,
                Err(e) => {
                    warn!("Task {}: cannot load account {}: {}", task_id, account_id, e);
                    continue;
                }
            };

            let subtask = match existing.get(account_id) {
                Some(prior) => prior.clone(),
                None => {
                    let subtask = SubTask::new(task_id, account_id);
                    conn.insert_subtask(&subtask).await?;
                    subtask
                }
            };

            // Another task may hold the account right now; the row stays
            // PENDING and a later run picks it up.
            if conn.account_has_running_subtask(account_id).await? {
                info!(
                    "Task {}: account {} is running elsewhere, leaving sub-task pending",
                    task_id, account_id
                );
                continue;
            }
            let claimed = match self.running_accounts.entry(account_id.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => false,
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(subtask.id.clone());
                    true
                }
            };
            if !claimed {
                info!(
                    "Task {}: account {} claimed by another task in-process, leaving sub-task pending",
                    task_id, account_id
                );
                continue;
            }

            let assignment = if task.kind == TaskKind::Upload {
                match conn.load_assignment(&subtask.id).await? {
                    Some(assignment) => Some(assignment),
                    None => conn.take_unassigned_content(task_id, &subtask.id).await?,
                }
            } else {
                None
            };

            dispatch.push(SubTaskPlan {
                subtask,
                account,
                task_kind: task.kind,
                task_config: task.config.clone(),
                assignment,
            });
        }

        conn.close().await?;
        Ok((task, dispatch))
    }

    /// One execution unit: mark RUNNING on a short-lived connection, close
    /// it, execute with only in-memory state, then reconcile on a fresh
    /// connection. The account claim is released last.
    async fn run_unit(
        store: Arc<dyn Store>,
        executor: Arc<dyn SubTaskExecutor>,
        reconciler: Arc<ResultReconciler>,
        stats: Arc<FleetStats>,
        running_accounts: Arc<DashMap<String, String>>,
        mut plan: SubTaskPlan,
        cancel: &CancelToken,
    ) {
        let account_id = plan.account.id.clone();

        let marked = async {
            let mut conn = store.open().await?;
            plan.subtask.advance(SubTaskStatus::Running);
            plan.subtask.started_at = Some(Utc::now());
            conn.update_subtask(&plan.subtask).await?;
            conn.close().await
        }
        .await;

        if let Err(e) = marked {
            error!(
                "Sub-task {}: could not mark running, not executing: {}",
                plan.subtask.id, e
            );
            // Nothing ran; the row stays PENDING for a later run.
            running_accounts.remove(&account_id);
            return;
        }

        stats.record_subtask_started();

        // No store connection is open past this point; the browser context
        // lives entirely between these two phases.
        let outcome = executor.execute(&plan, cancel).await;

        match outcome.status {
            SubTaskStatus::Completed => stats.record_subtask_completed(),
            _ => stats.record_subtask_failed(),
        }

        if let Err(e) = reconciler.reconcile_subtask(&mut plan.subtask, &outcome).await {
            error!("Sub-task {}: reconcile failed: {}", plan.subtask.id, e);
        }

        running_accounts.remove(&account_id);
    }
}
