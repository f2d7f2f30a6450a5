//! Shared proxy pool.
//!
//! The pool and the profile directory are the only cross-account shared
//! state. All mutation goes through the binder, and the binder goes through
//! this single lock, so acquire/release are serialized and a proxy can never
//! be handed to two live sessions.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tracing::info;

use crate::model::Proxy;

struct PoolInner {
    proxies: HashMap<String, Proxy>,
    bound: HashSet<String>,
}

/// Registry of proxies with advisory 1:1 binding.
pub struct ProxyPool {
    inner: Mutex<PoolInner>,
}

impl ProxyPool {
    pub fn new(proxies: Vec<Proxy>) -> Self {
        info!("Proxy pool initialized with {} proxies", proxies.len());
        Self {
            inner: Mutex::new(PoolInner {
                proxies: proxies.into_iter().map(|p| (p.id.clone(), p)).collect(),
                bound: HashSet::new(),
            }),
        }
    }

    /// Bind a specific proxy if it is active and unbound.
    pub fn bind(&self, proxy_id: &str) -> Option<Proxy> {
        let mut inner = self.inner.lock();
        let proxy = inner.proxies.get(proxy_id)?.clone();
        if !proxy.is_active || inner.bound.contains(proxy_id) {
            return None;
        }
        inner.bound.insert(proxy_id.to_string());
        Some(proxy)
    }

    /// Bind the first active unbound proxy, preferring the given region.
    /// Returns the proxy and whether the region preference was satisfied.
    pub fn bind_preferring(&self, region: Option<&str>) -> Option<(Proxy, bool)> {
        let mut inner = self.inner.lock();

        let mut candidates: Vec<&Proxy> = inner
            .proxies
            .values()
            .filter(|p| p.is_active && !inner.bound.contains(&p.id))
            .collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        let chosen = match region {
            Some(r) => candidates
                .iter()
                .find(|p| p.region == r)
                .map(|p| ((*p).clone(), true))
                .or_else(|| candidates.first().map(|p| ((*p).clone(), false))),
            None => candidates.first().map(|p| ((*p).clone(), true)),
        };

        if let Some((proxy, _)) = &chosen {
            inner.bound.insert(proxy.id.clone());
        }
        chosen
    }

    /// Return a proxy to the pool.
    pub fn release(&self, proxy_id: &str) {
        self.inner.lock().bound.remove(proxy_id);
    }

    pub fn is_bound(&self, proxy_id: &str) -> bool {
        self.inner.lock().bound.contains(proxy_id)
    }

    pub fn is_active(&self, proxy_id: &str) -> bool {
        self.inner
            .lock()
            .proxies
            .get(proxy_id)
            .map(|p| p.is_active)
            .unwrap_or(false)
    }

    pub fn region_of(&self, proxy_id: &str) -> Option<String> {
        self.inner
            .lock()
            .proxies
            .get(proxy_id)
            .map(|p| p.region.clone())
    }

    pub fn get(&self, proxy_id: &str) -> Option<Proxy> {
        self.inner.lock().proxies.get(proxy_id).cloned()
    }

    pub fn bound_count(&self) -> usize {
        self.inner.lock().bound.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(id: &str, region: &str, active: bool) -> Proxy {
        Proxy {
            id: id.into(),
            host: "proxy.example.com".into(),
            port: 8080,
            scheme: "http".into(),
            username: None,
            password: None,
            region: region.into(),
            is_active: active,
        }
    }

    #[test]
    fn bind_respects_region_preference() {
        let pool = ProxyPool::new(vec![proxy("p1", "us", true), proxy("p2", "eu", true)]);
        let (chosen, matched) = pool.bind_preferring(Some("eu")).unwrap();
        assert_eq!(chosen.id, "p2");
        assert!(matched);
    }

    #[test]
    fn bind_falls_back_across_regions() {
        let pool = ProxyPool::new(vec![proxy("p1", "us", true)]);
        let (chosen, matched) = pool.bind_preferring(Some("eu")).unwrap();
        assert_eq!(chosen.id, "p1");
        assert!(!matched);
    }

    #[test]
    fn bound_proxy_is_not_rebindable() {
        let pool = ProxyPool::new(vec![proxy("p1", "us", true)]);
        assert!(pool.bind("p1").is_some());
        assert!(pool.bind("p1").is_none());
        assert!(pool.bind_preferring(None).is_none());
        pool.release("p1");
        assert!(pool.bind("p1").is_some());
    }

    #[test]
    fn inactive_proxy_is_skipped() {
        let pool = ProxyPool::new(vec![proxy("p1", "us", false)]);
        assert!(pool.bind("p1").is_none());
        assert!(pool.bind_preferring(None).is_none());
    }
}
