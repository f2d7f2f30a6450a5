//! Profile/proxy binding.
//!
//! Pairs each account with an anti-detect profile and a proxy for the
//! duration of one session. Profiles are created lazily and reused across
//! runs; proxies come from the shared pool with best-effort region affinity.

mod pool;
mod provider;

pub use pool::ProxyPool;
pub use provider::{HttpProfileProvider, ProfileProvider, ProviderError};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{Account, Proxy};

/// Binder-level errors, classified for the runner.
#[derive(Error, Debug)]
pub enum BindError {
    #[error("no active proxy available")]
    NoProxyAvailable,

    #[error("profile provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// A live account ↔ profile ↔ proxy binding for one session.
#[derive(Debug, Clone)]
pub struct Binding {
    pub account_id: String,
    pub profile_id: String,
    pub proxy: Proxy,
    /// CDP websocket endpoint of the started profile.
    pub endpoint: String,
}

/// Acquires and releases profile/proxy pairs. All pool mutation funnels
/// through here; per-account bindings are tracked so a second acquire for
/// the same account is a no-op returning the existing pair.
pub struct ProfileProxyBinder {
    pool: Arc<ProxyPool>,
    provider: Arc<dyn ProfileProvider>,
    active: Mutex<HashMap<String, Binding>>,
}

impl ProfileProxyBinder {
    pub fn new(pool: Arc<ProxyPool>, provider: Arc<dyn ProfileProvider>) -> Self {
        Self {
            pool,
            provider,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a profile/proxy pair for the account.
    ///
    /// Lazily creates the profile on first use, preferring a proxy in the
    /// same region as the account's prior proxy; when none is available a
    /// different region is force-assigned with a warning (region matching
    /// is best-effort, not a guarantee). Idempotent: an account already
    /// holding a healthy binding gets it back unchanged, and the proxy is
    /// only swapped when the held one has gone inactive.
    pub async fn acquire(&self, account: &Account) -> Result<Binding, BindError> {
        if let Some(existing) = self.active.lock().get(&account.id).cloned() {
            if self.pool.is_active(&existing.proxy.id) {
                return Ok(existing);
            }
        }

        let prior_region = account
            .proxy_id
            .as_deref()
            .and_then(|id| self.pool.region_of(id));

        // Reuse the account's own proxy when it is still active and free.
        let (proxy, region_matched) = match account
            .proxy_id
            .as_deref()
            .filter(|id| self.pool.is_active(id))
            .and_then(|id| self.pool.bind(id))
        {
            Some(proxy) => (proxy, true),
            None => self
                .pool
                .bind_preferring(prior_region.as_deref())
                .ok_or(BindError::NoProxyAvailable)?,
        };

        if !region_matched {
            warn!(
                "Account {} force-assigned proxy {} in region {} (preferred {})",
                account.username,
                proxy.id,
                proxy.region,
                prior_region.as_deref().unwrap_or("none")
            );
        }

        let profile_id = match &account.profile_id {
            Some(id) => {
                // Existing profile: carry the (possibly new) proxy config.
                if account.proxy_id.as_deref() != Some(proxy.id.as_str()) {
                    if let Err(e) = self.provider.update_profile_proxy(id, &proxy).await {
                        self.pool.release(&proxy.id);
                        return Err(e.into());
                    }
                }
                id.clone()
            }
            None => {
                let name = format!("fleet-{}", account.username);
                match self.provider.create_profile(&name, &proxy).await {
                    Ok(id) => id,
                    Err(e) => {
                        self.pool.release(&proxy.id);
                        return Err(e.into());
                    }
                }
            }
        };

        let endpoint = match self.provider.start(&profile_id).await {
            Ok(ep) => ep,
            Err(e) => {
                self.pool.release(&proxy.id);
                return Err(e.into());
            }
        };

        let binding = Binding {
            account_id: account.id.clone(),
            profile_id,
            proxy,
            endpoint,
        };

        info!(
            "Account {} bound to profile {} via proxy {} ({})",
            account.username, binding.profile_id, binding.proxy.id, binding.proxy.region
        );

        self.active
            .lock()
            .insert(account.id.clone(), binding.clone());
        Ok(binding)
    }

    /// Tear down a session binding: stop the profile's browser and return
    /// the proxy to the pool. The external profile is never deleted; it is
    /// reused on the account's next run.
    pub async fn release(&self, binding: &Binding) {
        if let Err(e) = self.provider.stop(&binding.profile_id).await {
            warn!(
                "Failed to stop profile {} cleanly: {}",
                binding.profile_id, e
            );
        }
        self.pool.release(&binding.proxy.id);
        self.active.lock().remove(&binding.account_id);

        info!(
            "Released binding for account {} (proxy {} returned to pool)",
            binding.account_id, binding.proxy.id
        );
    }

    /// Live bindings count, for diagnostics.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        created: AtomicUsize,
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
                stopped: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProfileProvider for FakeProvider {
        async fn create_profile(
            &self,
            name: &str,
            _proxy: &Proxy,
        ) -> Result<String, ProviderError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("profile-{}", name))
        }

        async fn start(&self, profile_id: &str) -> Result<String, ProviderError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(format!("ws://127.0.0.1:9222/{}", profile_id))
        }

        async fn stop(&self, _profile_id: &str) -> Result<(), ProviderError> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update_profile_proxy(
            &self,
            _profile_id: &str,
            _proxy: &Proxy,
        ) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn proxy(id: &str, region: &str) -> Proxy {
        Proxy {
            id: id.into(),
            host: "proxy.example.com".into(),
            port: 8080,
            scheme: "http".into(),
            username: None,
            password: None,
            region: region.into(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn acquire_is_idempotent_for_healthy_binding() {
        let pool = Arc::new(ProxyPool::new(vec![proxy("p1", "us"), proxy("p2", "us")]));
        let provider = Arc::new(FakeProvider::new());
        let binder = ProfileProxyBinder::new(pool.clone(), provider.clone());

        let account = Account::new("a1", "alice", "pw");
        let first = binder.acquire(&account).await.unwrap();
        let second = binder.acquire(&account).await.unwrap();

        assert_eq!(first.profile_id, second.profile_id);
        assert_eq!(first.proxy.id, second.proxy.id);
        assert_eq!(pool.bound_count(), 1);
        assert_eq!(provider.created.load(Ordering::SeqCst), 1);
        assert_eq!(provider.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn acquire_fails_cheap_without_proxies() {
        let pool = Arc::new(ProxyPool::new(vec![]));
        let provider = Arc::new(FakeProvider::new());
        let binder = ProfileProxyBinder::new(pool, provider.clone());

        let account = Account::new("a1", "alice", "pw");
        assert!(matches!(
            binder.acquire(&account).await,
            Err(BindError::NoProxyAvailable)
        ));
        // No browser work happened.
        assert_eq!(provider.created.load(Ordering::SeqCst), 0);
        assert_eq!(provider.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn release_returns_proxy_and_keeps_profile() {
        let pool = Arc::new(ProxyPool::new(vec![proxy("p1", "us")]));
        let provider = Arc::new(FakeProvider::new());
        let binder = ProfileProxyBinder::new(pool.clone(), provider.clone());

        let account = Account::new("a1", "alice", "pw");
        let binding = binder.acquire(&account).await.unwrap();
        binder.release(&binding).await;

        assert_eq!(pool.bound_count(), 0);
        assert_eq!(binder.active_count(), 0);
        assert_eq!(provider.stopped.load(Ordering::SeqCst), 1);

        // Rebinding reuses the profile recorded on the account.
        let mut account = account;
        account.profile_id = Some(binding.profile_id.clone());
        account.proxy_id = Some(binding.proxy.id.clone());
        let again = binder.acquire(&account).await.unwrap();
        assert_eq!(again.profile_id, binding.profile_id);
        assert_eq!(provider.created.load(Ordering::SeqCst), 1);
    }
}
