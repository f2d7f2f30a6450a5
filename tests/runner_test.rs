//! Task runner properties against the in-memory store and a scripted
//! executor: aggregate-status invariants, per-account mutual exclusion,
//! bounded concurrency, connection discipline, and progress persistence.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use fleetdriver::flows::CancelToken;
use fleetdriver::model::{
    Account, AccountStatus, FailureKind, SubTaskStatus, Task, TaskKind, TaskStatus,
};
use fleetdriver::runner::{SubTaskExecutor, SubTaskOutcome, SubTaskPlan, TaskRunner};
use fleetdriver::stats::FleetStats;
use fleetdriver::store::{MemStore, Store};

/// Executor that plays back scripted terminal statuses per account while
/// watching for concurrency violations.
#[derive(Default)]
struct ScriptedExecutor {
    /// account_id -> terminal status to return
    outcomes: HashMap<String, SubTaskStatus>,
    /// Extra outcome fields per account (follow progress etc.)
    follow_progress: HashMap<String, (usize, String)>,
    delay_ms: u64,

    current: AtomicUsize,
    max_concurrent: AtomicUsize,
    in_flight_accounts: Mutex<HashSet<String>>,
    overlap_detected: AtomicBool,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new(outcomes: &[(&str, SubTaskStatus)]) -> Self {
        Self {
            outcomes: outcomes
                .iter()
                .map(|(id, s)| (id.to_string(), *s))
                .collect(),
            delay_ms: 50,
            ..Default::default()
        }
    }

    fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    fn executed_accounts(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl SubTaskExecutor for ScriptedExecutor {
    async fn execute(&self, plan: &SubTaskPlan, cancel: &CancelToken) -> SubTaskOutcome {
        if cancel.is_cancelled() {
            return SubTaskOutcome::failed(FailureKind::Cancelled);
        }

        let account_id = plan.account.id.clone();

        {
            let mut in_flight = self.in_flight_accounts.lock();
            if !in_flight.insert(account_id.clone()) {
                // Two units are executing the same account at once.
                self.overlap_detected.store(true, Ordering::SeqCst);
            }
        }
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;

        self.executed.lock().push(account_id.clone());
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.in_flight_accounts.lock().remove(&account_id);

        let status = self
            .outcomes
            .get(&account_id)
            .copied()
            .unwrap_or(SubTaskStatus::Completed);

        let mut outcome = match status {
            SubTaskStatus::Failed(kind) => SubTaskOutcome::failed(kind),
            _ => SubTaskOutcome {
                status,
                proxy_id: Some("p1".into()),
                profile_id: Some("profile-1".into()),
                account_status: None,
                log: vec!["scripted".into()],
                session_opened: true,
                warmed: false,
                follows_done: 0,
                follow_cursor: None,
                cookie_snapshot: None,
            },
        };

        if let Some((follows, cursor)) = self.follow_progress.get(&account_id) {
            outcome.follows_done = *follows;
            outcome.follow_cursor = Some(cursor.clone());
        }

        outcome
    }
}

fn setup(
    accounts: &[&str],
    tasks: &[(&str, &[&str])],
    executor: Arc<ScriptedExecutor>,
    concurrency: usize,
) -> (MemStore, TaskRunner) {
    let store = MemStore::new();
    for id in accounts {
        store.insert_account(Account::new(id, &format!("user-{}", id), "pw"));
    }
    for (task_id, account_ids) in tasks {
        store.insert_task(Task::new(
            task_id,
            TaskKind::Warmup,
            account_ids.iter().map(|a| a.to_string()).collect(),
        ));
    }

    let store_dyn: Arc<dyn Store> = Arc::new(store.clone());
    let runner = TaskRunner::new(store_dyn, executor, Arc::new(FleetStats::new()), concurrency);
    (store, runner)
}

#[tokio::test]
async fn all_completed_aggregates_to_completed() {
    let executor = Arc::new(ScriptedExecutor::new(&[
        ("a1", SubTaskStatus::Completed),
        ("a2", SubTaskStatus::Completed),
    ]));
    let (store, runner) = setup(&["a1", "a2"], &[("t1", &["a1", "a2"])], executor, 4);

    let status = runner.run("t1", &CancelToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);
    assert_eq!(store.task("t1").unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn all_failed_aggregates_to_failed() {
    let executor = Arc::new(ScriptedExecutor::new(&[
        ("a1", SubTaskStatus::Failed(FailureKind::Navigation)),
        ("a2", SubTaskStatus::Failed(FailureKind::Suspended)),
    ]));
    let (store, runner) = setup(&["a1", "a2"], &[("t1", &["a1", "a2"])], executor, 4);

    let status = runner.run("t1", &CancelToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Failed);
    assert_eq!(store.task("t1").unwrap().status, TaskStatus::Failed);
}

#[tokio::test]
async fn mixed_scenario_aggregates_to_partially_completed() {
    // One success, one CAPTCHA, one resource exhaustion before any browser.
    let executor = Arc::new(ScriptedExecutor::new(&[
        ("a1", SubTaskStatus::Completed),
        ("a2", SubTaskStatus::Failed(FailureKind::CaptchaUnresolved)),
        ("a3", SubTaskStatus::Failed(FailureKind::NoProxyAvailable)),
    ]));
    let (store, runner) = setup(
        &["a1", "a2", "a3"],
        &[("t1", &["a1", "a2", "a3"])],
        executor,
        4,
    );

    let status = runner.run("t1", &CancelToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::PartiallyCompleted);

    let by_account: HashMap<String, SubTaskStatus> = store
        .subtasks_of("t1")
        .into_iter()
        .map(|s| (s.account_id.clone(), s.status))
        .collect();
    assert_eq!(by_account["a1"], SubTaskStatus::Completed);
    assert_eq!(
        by_account["a2"],
        SubTaskStatus::Failed(FailureKind::CaptchaUnresolved)
    );
    assert_eq!(
        by_account["a3"],
        SubTaskStatus::Failed(FailureKind::NoProxyAvailable)
    );

    // The CAPTCHA failure also moved the account status.
    assert_eq!(
        store.account("a2").unwrap().status,
        AccountStatus::HumanVerificationRequired
    );
    assert_eq!(store.account("a3").unwrap().status, AccountStatus::Active);
}

#[tokio::test]
async fn subtask_rows_carry_timestamps_and_logs() {
    let executor = Arc::new(ScriptedExecutor::new(&[("a1", SubTaskStatus::Completed)]));
    let (store, runner) = setup(&["a1"], &[("t1", &["a1"])], executor, 1);

    runner.run("t1", &CancelToken::new()).await.unwrap();

    let subtasks = store.subtasks_of("t1");
    assert_eq!(subtasks.len(), 1);
    let subtask = &subtasks[0];
    assert!(subtask.started_at.is_some());
    assert!(subtask.completed_at.is_some());
    assert!(!subtask.log.is_empty());
    assert_eq!(subtask.proxy_id.as_deref(), Some("p1"));
}

#[tokio::test]
async fn concurrency_limit_bounds_in_flight_units() {
    let accounts: Vec<String> = (1..=6).map(|i| format!("a{}", i)).collect();
    let account_refs: Vec<&str> = accounts.iter().map(String::as_str).collect();

    let executor = Arc::new(ScriptedExecutor::new(&[]).with_delay(100));
    let task_accounts = account_refs.clone();
    let (_store, runner) = setup(
        &account_refs,
        &[("t1", task_accounts.as_slice())],
        executor.clone(),
        2,
    );

    let status = runner.run("t1", &CancelToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);
    assert!(
        executor.max_concurrent.load(Ordering::SeqCst) <= 2,
        "saw {} concurrent units",
        executor.max_concurrent.load(Ordering::SeqCst)
    );
    assert_eq!(executor.executed_accounts().len(), 6);
}

#[tokio::test]
async fn same_account_never_runs_concurrently_across_tasks() {
    let executor = Arc::new(
        ScriptedExecutor::new(&[("a1", SubTaskStatus::Completed)]).with_delay(300),
    );
    let (store, runner) = setup(
        &["a1"],
        &[("t1", &["a1"]), ("t2", &["a1"])],
        executor.clone(),
        4,
    );
    let runner = Arc::new(runner);
    let cancel = CancelToken::new();

    let (r1, r2) = tokio::join!(runner.run("t1", &cancel), runner.run("t2", &cancel));
    let (s1, s2) = (r1.unwrap(), r2.unwrap());

    // Never two units on the same account at once.
    assert!(!executor.overlap_detected.load(Ordering::SeqCst));

    // One task won the account; the other either stayed pending or ran
    // after the winner finished.
    assert!(matches!(s1, TaskStatus::Completed | TaskStatus::Pending));
    assert!(matches!(s2, TaskStatus::Completed | TaskStatus::Pending));
    assert!(
        s1 == TaskStatus::Completed || s2 == TaskStatus::Completed,
        "at least one task must have run the account"
    );

    // A task that went back to Pending still has its sub-task row, pending.
    if s2 == TaskStatus::Pending {
        let rows = store.subtasks_of("t2");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, SubTaskStatus::Pending);
    }
    assert_eq!(runner.running_account_count(), 0);
}

#[tokio::test]
async fn account_running_elsewhere_leaves_subtask_pending() {
    let executor = Arc::new(ScriptedExecutor::new(&[("a1", SubTaskStatus::Completed)]));
    let (store, runner) = setup(&["a1"], &[("t1", &["a1"])], executor.clone(), 4);

    // Another daemon holds the account: a RUNNING sub-task in the store.
    {
        let mut foreign = fleetdriver::model::SubTask::new("t0", "a1");
        foreign.advance(SubTaskStatus::Running);
        let conn_store: Arc<dyn Store> = Arc::new(store.clone());
        let mut conn = conn_store.open().await.unwrap();
        conn.insert_subtask(&foreign).await.unwrap();
        conn.close().await.unwrap();
    }

    let status = runner.run("t1", &CancelToken::new()).await.unwrap();

    // Nothing executed; the row stays pending and the task goes back to
    // pending for a later run.
    assert_eq!(status, TaskStatus::Pending);
    assert!(executor.executed_accounts().is_empty());
    let rows = store.subtasks_of("t1");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, SubTaskStatus::Pending);
}

#[tokio::test]
async fn rerun_finishes_pending_subtasks_and_keeps_terminal_ones() {
    let executor = Arc::new(ScriptedExecutor::new(&[
        ("a1", SubTaskStatus::Completed),
        ("a2", SubTaskStatus::Completed),
    ]));
    let (store, runner) = setup(&["a1", "a2"], &[("t1", &["a1", "a2"])], executor.clone(), 4);

    // First run: a2 is held elsewhere, so only a1 completes.
    {
        let mut foreign = fleetdriver::model::SubTask::new("t0", "a2");
        foreign.advance(SubTaskStatus::Running);
        let conn_store: Arc<dyn Store> = Arc::new(store.clone());
        let mut conn = conn_store.open().await.unwrap();
        conn.insert_subtask(&foreign).await.unwrap();

        let status = runner.run("t1", &CancelToken::new()).await.unwrap();
        assert_eq!(status, TaskStatus::Pending);

        // The hold clears.
        foreign.advance(SubTaskStatus::Completed);
        conn.update_subtask(&foreign).await.unwrap();
        conn.close().await.unwrap();
    }

    // Second run finishes the pending row without re-running a1.
    let status = runner.run("t1", &CancelToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);
    assert_eq!(
        executor
            .executed_accounts()
            .iter()
            .filter(|a| a.as_str() == "a1")
            .count(),
        1
    );
}

#[tokio::test]
async fn follow_progress_persists_even_on_failure() {
    let mut executor = ScriptedExecutor::new(&[(
        "a1",
        SubTaskStatus::Failed(FailureKind::Navigation),
    )]);
    executor
        .follow_progress
        .insert("a1".into(), (7, "user7".into()));
    let executor = Arc::new(executor);

    let (store, runner) = setup(&["a1"], &[("t1", &["a1"])], executor, 2);

    let status = runner.run("t1", &CancelToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Failed);

    // The cursor survived the failed run for the next attempt to resume.
    let rows = store.subtasks_of("t1");
    assert_eq!(rows[0].follows_done, 7);
    assert_eq!(rows[0].follow_cursor.as_deref(), Some("user7"));
    assert_eq!(
        store.account("a1").unwrap().follow_cursor.as_deref(),
        Some("user7")
    );
}

#[tokio::test]
async fn cancelled_run_ends_in_classified_failures() {
    let executor = Arc::new(ScriptedExecutor::new(&[]));
    let (store, runner) = setup(&["a1", "a2"], &[("t1", &["a1", "a2"])], executor, 4);

    let cancel = CancelToken::new();
    cancel.cancel();

    let status = runner.run("t1", &cancel).await.unwrap();
    assert_eq!(status, TaskStatus::Failed);

    for subtask in store.subtasks_of("t1") {
        assert_eq!(
            subtask.status,
            SubTaskStatus::Failed(FailureKind::Cancelled)
        );
    }
}

#[tokio::test]
async fn no_store_connection_survives_a_run() {
    let executor = Arc::new(ScriptedExecutor::new(&[]));
    let (store, runner) = setup(
        &["a1", "a2", "a3"],
        &[("t1", &["a1", "a2", "a3"])],
        executor,
        2,
    );

    runner.run("t1", &CancelToken::new()).await.unwrap();
    assert_eq!(store.open_connection_count(), 0);
}
