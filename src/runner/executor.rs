//! Sub-task execution.
//!
//! A [`SubTaskPlan`] is everything one execution unit needs, read from the
//! store before any browser context exists; a [`SubTaskOutcome`] is
//! everything the reconciler writes back after the context is gone. The
//! [`SubTaskExecutor`] seam keeps the runner testable without a browser.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::binder::{BindError, Binding, ProfileProxyBinder};
use crate::browser::{DriverConfig, SessionDriver, Surface};
use crate::challenge::ChallengeHandler;
use crate::flows::{
    CancelToken, CookieFlow, CookieOutcome, FollowFlow, FollowOutcome, LoginFlow, LoginOutcome,
    UploadFlow, UploadMetadata, UploadOutcome, WarmupFlow, WarmupOutcome,
};
use crate::model::{
    Account, AccountStatus, ContentAssignment, CookieSnapshot, FailureKind, SubTask,
    SubTaskStatus, TaskConfig, TaskKind,
};
use crate::pacing::{Pacer, PacingConfig};
use crate::selectors::SelectorTable;
use crate::stats::FleetStats;

/// Everything a unit needs, materialized before the browser opens.
#[derive(Debug, Clone)]
pub struct SubTaskPlan {
    pub subtask: SubTask,
    pub account: Account,
    pub task_kind: TaskKind,
    pub task_config: TaskConfig,
    pub assignment: Option<ContentAssignment>,
}

/// Everything the reconciler persists after the browser closed.
#[derive(Debug, Clone)]
pub struct SubTaskOutcome {
    pub status: SubTaskStatus,
    pub proxy_id: Option<String>,
    pub profile_id: Option<String>,
    /// Account status implied by the run, if any.
    pub account_status: Option<AccountStatus>,
    pub log: Vec<String>,
    /// Whether a browser session was actually opened (drives `last_used`).
    pub session_opened: bool,
    /// Whether a warm-up completed (drives `last_warmed`).
    pub warmed: bool,
    pub follows_done: usize,
    pub follow_cursor: Option<String>,
    pub cookie_snapshot: Option<CookieSnapshot>,
}

impl SubTaskOutcome {
    pub fn failed(kind: FailureKind) -> Self {
        Self {
            status: SubTaskStatus::Failed(kind),
            proxy_id: None,
            profile_id: None,
            account_status: kind.account_status(),
            log: vec![format!("failed: {}", kind)],
            session_opened: false,
            warmed: false,
            follows_done: 0,
            follow_cursor: None,
            cookie_snapshot: None,
        }
    }
}

/// Runs one planned sub-task to a terminal outcome. Implementations must
/// never touch the store; that is the runner's and reconciler's job.
#[async_trait]
pub trait SubTaskExecutor: Send + Sync {
    async fn execute(&self, plan: &SubTaskPlan, cancel: &CancelToken) -> SubTaskOutcome;
}

/// Executor configuration carried in from the app config.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Target site root, e.g. `https://www.instagram.com`.
    pub base_url: String,
    pub pacing: PacingConfig,
    pub driver: DriverConfig,
}

/// The production executor: binder → session driver → login → task flow →
/// teardown, entirely on in-memory state.
pub struct BrowserExecutor {
    binder: Arc<ProfileProxyBinder>,
    challenges: Arc<ChallengeHandler>,
    stats: Arc<FleetStats>,
    config: ExecutorConfig,
}

impl BrowserExecutor {
    pub fn new(
        binder: Arc<ProfileProxyBinder>,
        challenges: Arc<ChallengeHandler>,
        stats: Arc<FleetStats>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            binder,
            challenges,
            stats,
            config,
        }
    }

    /// Run the task-specific flow after a successful login.
    async fn run_task_flow<S: Surface + ?Sized>(
        &self,
        surface: &S,
        plan: &SubTaskPlan,
        outcome: &mut SubTaskOutcome,
        cancel: &CancelToken,
    ) {
        match plan.task_kind {
            TaskKind::Upload => {
                let Some(assignment) = &plan.assignment else {
                    outcome.status = SubTaskStatus::Failed(FailureKind::NoContentAssigned);
                    outcome.log.push("no content assigned".into());
                    return;
                };
                let metadata = UploadMetadata::resolve(assignment, &plan.task_config);
                let mut flow = UploadFlow::new(&self.config.base_url, &self.challenges);
                match flow
                    .run(surface, &assignment.media_path, &metadata, cancel)
                    .await
                {
                    UploadOutcome::Published => {
                        self.stats.record_upload_published();
                        outcome.status = SubTaskStatus::Completed;
                        outcome
                            .log
                            .push(format!("published {}", assignment.media_path));
                    }
                    UploadOutcome::Failed(kind) => {
                        outcome.status = SubTaskStatus::Failed(kind);
                        outcome.log.push(format!("upload failed: {}", kind));
                    }
                }
            }
            TaskKind::Warmup => {
                let flow = WarmupFlow::new(&self.config.base_url, &self.challenges);
                match flow
                    .run(surface, plan.task_config.warmup_pages, cancel)
                    .await
                {
                    WarmupOutcome::Completed { pages_browsed } => {
                        outcome.status = SubTaskStatus::Completed;
                        outcome.warmed = true;
                        outcome.log.push(format!("warmed up, {} pages", pages_browsed));
                    }
                    WarmupOutcome::Failed(kind) => {
                        outcome.status = SubTaskStatus::Failed(kind);
                        outcome.log.push(format!("warmup failed: {}", kind));
                    }
                }
            }
            TaskKind::Follow => {
                let flow = FollowFlow::new(&self.config.base_url);
                let result = flow
                    .run(
                        surface,
                        &plan.task_config.follow_targets,
                        plan.account.follow_cursor.as_deref(),
                        plan.task_config.follows_per_account,
                        cancel,
                    )
                    .await;

                let progress = result.progress().clone();
                self.stats.record_follows(progress.followed as u64);
                outcome.follows_done = progress.followed;
                // Progress survives failure: the cursor is committed even
                // when the run dies mid-queue.
                outcome.follow_cursor = progress.cursor.clone();

                match result {
                    FollowOutcome::Completed(p) => {
                        outcome.status = SubTaskStatus::Completed;
                        outcome.log.push(format!("followed {} targets", p.followed));
                    }
                    FollowOutcome::Failed(p, kind) => {
                        outcome.status = SubTaskStatus::Failed(kind);
                        outcome.log.push(format!(
                            "follow failed after {} targets: {}",
                            p.followed, kind
                        ));
                    }
                }
            }
            TaskKind::CookieCollect => {
                let flow = CookieFlow::new(&self.config.base_url);
                match flow
                    .run(surface, &plan.task_config.cookie_urls, true, cancel)
                    .await
                {
                    CookieOutcome::Collected {
                        cookies_json,
                        valid,
                        urls_visited,
                    } => {
                        outcome.status = SubTaskStatus::Completed;
                        outcome.cookie_snapshot = Some(CookieSnapshot {
                            account_id: plan.account.id.clone(),
                            cookies_json,
                            captured_at: chrono::Utc::now(),
                            valid,
                        });
                        outcome
                            .log
                            .push(format!("cookies captured after {} visits", urls_visited));
                    }
                    CookieOutcome::Failed(kind) => {
                        outcome.status = SubTaskStatus::Failed(kind);
                        outcome.log.push(format!("cookie collection failed: {}", kind));
                    }
                }
            }
        }
    }

    async fn teardown(&self, driver: SessionDriver, binding: &Binding) {
        driver.close().await;
        self.binder.release(binding).await;
        self.stats.remove_session();
    }
}

#[async_trait]
impl SubTaskExecutor for BrowserExecutor {
    async fn execute(&self, plan: &SubTaskPlan, cancel: &CancelToken) -> SubTaskOutcome {
        let account = &plan.account;

        if cancel.is_cancelled() {
            return SubTaskOutcome::failed(FailureKind::Cancelled);
        }

        // Resource acquisition happens before any browser work, so a dry
        // pool is a cheap failure.
        let binding = match self.binder.acquire(account).await {
            Ok(binding) => binding,
            Err(BindError::NoProxyAvailable) => {
                warn!("Account {}: no proxy available", account.username);
                return SubTaskOutcome::failed(FailureKind::NoProxyAvailable);
            }
            Err(BindError::Provider(e)) => {
                warn!("Account {}: profile provider failed: {}", account.username, e);
                return SubTaskOutcome::failed(FailureKind::ProfileUnavailable);
            }
        };

        let driver = match SessionDriver::connect(
            &binding.endpoint,
            &account.username,
            SelectorTable::shared().clone(),
            Pacer::new(self.config.pacing.clone()),
            self.config.driver.clone(),
        )
        .await
        {
            Ok(driver) => driver,
            Err(e) => {
                warn!("Account {}: driver connect failed: {}", account.username, e);
                self.binder.release(&binding).await;
                return SubTaskOutcome::failed(FailureKind::SessionLost);
            }
        };

        self.stats.add_session();

        let mut outcome = SubTaskOutcome {
            status: SubTaskStatus::Failed(FailureKind::SessionLost),
            proxy_id: Some(binding.proxy.id.clone()),
            profile_id: Some(binding.profile_id.clone()),
            account_status: None,
            log: vec![format!(
                "session opened via proxy {} ({})",
                binding.proxy.id, binding.proxy.region
            )],
            session_opened: true,
            warmed: false,
            follows_done: 0,
            follow_cursor: None,
            cookie_snapshot: None,
        };

        let mut login = LoginFlow::new(&self.config.base_url, &self.challenges);
        match login.run(&driver, account, cancel).await {
            LoginOutcome::LoggedIn => {
                outcome.log.push("logged in".into());
                self.run_task_flow(&driver, plan, &mut outcome, cancel).await;
            }
            LoginOutcome::Failed(kind) => {
                self.stats.record_challenge();
                outcome.status = SubTaskStatus::Failed(kind);
                outcome.account_status = kind.account_status();
                outcome.log.push(format!("login failed: {}", kind));

                // Capture the page for the dashboard's failure view.
                if let Ok(image) = driver.screenshot_b64().await {
                    outcome
                        .log
                        .push(format!("screenshot:base64:{}", image));
                }
            }
        }

        self.teardown(driver, &binding).await;

        info!(
            "Account {}: sub-task finished with {:?}",
            account.username, outcome.status
        );
        outcome
    }
}
