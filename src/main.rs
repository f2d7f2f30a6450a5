//! fleetdriver - Standalone daemon
//!
//! Polls the store for pending tasks and runs each through the task runner
//! until shutdown (ctrl-c).
//!
//! Environment variables:
//! - `FLEETDRIVER_SEED` - Path to a fleet seed file (accounts, proxies,
//!   tasks) loaded into the in-memory store at startup

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use fleetdriver::binder::{HttpProfileProvider, ProfileProxyBinder, ProxyPool};
use fleetdriver::browser::DriverConfig;
use fleetdriver::captcha::{CaptchaSolver, SolverApi};
use fleetdriver::challenge::ChallengeHandler;
use fleetdriver::flows::CancelToken;
use fleetdriver::model::{Account, ContentAssignment, Proxy, Task};
use fleetdriver::runner::{BrowserExecutor, ExecutorConfig, TaskRunner};
use fleetdriver::store::{MemStore, Store};
use fleetdriver::AppState;

/// Entities loaded into the in-memory store at startup.
#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct FleetSeed {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    proxies: Vec<Proxy>,
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    content: Vec<ContentAssignment>,
}

impl FleetSeed {
    fn load_into(self, store: &MemStore) -> Vec<Proxy> {
        info!(
            "Seeding store: {} accounts, {} proxies, {} tasks, {} content items",
            self.accounts.len(),
            self.proxies.len(),
            self.tasks.len(),
            self.content.len()
        );

        let pool_proxies = self.proxies.clone();
        for account in self.accounts {
            store.insert_account(account);
        }
        for proxy in self.proxies {
            store.insert_proxy(proxy);
        }
        for task in self.tasks {
            store.insert_task(task);
        }
        for item in self.content {
            store.insert_assignment(item);
        }
        pool_proxies
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = fleetdriver::init_logging();

    info!("Starting fleetdriver daemon");

    if let Some(dir) = fleetdriver::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let state = Arc::new(AppState::new());
    let config = state.config.read().await.clone();

    // Seed the in-memory store. Production deployments substitute the real
    // datastore behind the same trait pair.
    let mem = MemStore::new();
    let proxies = match std::env::var("FLEETDRIVER_SEED") {
        Ok(seed_path) => {
            let content = std::fs::read_to_string(&seed_path)
                .with_context(|| format!("reading seed file {}", seed_path))?;
            let seed: FleetSeed =
                serde_json::from_str(&content).context("parsing seed file")?;
            seed.load_into(&mem)
        }
        Err(_) => {
            warn!("FLEETDRIVER_SEED not set; starting with an empty store");
            Vec::new()
        }
    };

    let pool = Arc::new(ProxyPool::new(proxies));
    let provider = Arc::new(
        HttpProfileProvider::new(&config.provider_base_url)
            .context("initializing profile provider client")?,
    );
    let binder = Arc::new(ProfileProxyBinder::new(pool, provider));

    let solver: Option<Arc<dyn SolverApi>> = if config.captcha_api_key.is_empty() {
        warn!("No captcha API key configured; CAPTCHA challenges will fail sub-tasks");
        None
    } else {
        Some(Arc::new(
            CaptchaSolver::new(&config.captcha_api_key)
                .context("initializing captcha solver")?,
        ))
    };

    let challenges = Arc::new(ChallengeHandler::new(config.challenge.clone(), solver, None));

    let executor = Arc::new(BrowserExecutor::new(
        binder,
        challenges,
        state.stats.clone(),
        ExecutorConfig {
            base_url: config.base_url.clone(),
            pacing: config.pacing.clone(),
            driver: DriverConfig {
                action_timeout_secs: config.action_timeout_secs,
                ..DriverConfig::default()
            },
        },
    ));

    let store: Arc<dyn Store> = Arc::new(mem.clone());
    let runner = Arc::new(TaskRunner::new(
        store,
        executor,
        state.stats.clone(),
        config.concurrency_limit,
    ));

    state.is_running.store(true, Ordering::Relaxed);
    let cancel = CancelToken::new();

    // Ctrl-c flips the cancel token; in-flight sub-tasks stop at their next
    // state-machine checkpoint.
    {
        let cancel = cancel.clone();
        let is_running = state.is_running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested, cancelling in-flight work");
                is_running.store(false, Ordering::Relaxed);
                cancel.cancel();
            }
        });
    }

    info!(
        "Daemon running (poll every {}s, concurrency {})",
        config.task_poll_secs, config.concurrency_limit
    );

    // Poll-and-run loop; the pending list is re-read every tick so
    // dashboard-created tasks get picked up.
    while state.is_running.load(Ordering::Relaxed) {
        for task_id in mem.pending_task_ids() {
            if !state.is_running.load(Ordering::Relaxed) {
                break;
            }
            info!("Picking up task {}", task_id);
            match runner.run(&task_id, &cancel).await {
                Ok(status) => info!("Task {} finished: {:?}", task_id, status),
                Err(e) => error!("Task {} failed to run: {}", task_id, e),
            }
        }

        tokio::time::sleep(std::time::Duration::from_secs(config.task_poll_secs)).await;
    }

    let snapshot = state.stats.snapshot();
    info!(
        "Daemon stopped: {} sub-tasks completed, {} failed",
        snapshot.subtasks_completed, snapshot.subtasks_failed
    );
    Ok(())
}
