//! Cookie-collection flow.
//!
//! Visits a URL list to accumulate cookies, then snapshots the jar. The
//! snapshot is only marked valid when the session was authenticated; an
//! anonymous jar is still stored for inspection but flagged.

use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::browser::Surface;
use crate::model::FailureKind;

use super::{classify_driver_error, CancelToken};

/// Terminal result of one collection run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieOutcome {
    Collected {
        cookies_json: String,
        valid: bool,
        urls_visited: usize,
    },
    Failed(FailureKind),
}

/// Accumulates cookies for one account.
pub struct CookieFlow<'a> {
    base_url: &'a str,
}

impl<'a> CookieFlow<'a> {
    pub fn new(base_url: &'a str) -> Self {
        Self { base_url }
    }

    pub async fn run<S: Surface + ?Sized>(
        &self,
        surface: &S,
        urls: &[String],
        logged_in: bool,
        cancel: &CancelToken,
    ) -> CookieOutcome {
        let mut visited = 0usize;

        // The base URL always participates so the session cookie is present
        // even with an empty list.
        let mut all_urls = vec![self.base_url.to_string()];
        all_urls.extend(urls.iter().cloned());

        for url in &all_urls {
            if cancel.is_cancelled() {
                return CookieOutcome::Failed(FailureKind::Cancelled);
            }

            match surface.goto(url).await {
                Ok(()) => {
                    visited += 1;
                    let dwell = rand::thread_rng().gen_range(1000..3500);
                    tokio::time::sleep(Duration::from_millis(dwell)).await;
                }
                // A single dead URL should not lose the cookies already
                // accumulated; skip and continue.
                Err(e) => warn!("Cookies: visit to {} failed: {}", url, e),
            }
        }

        if visited == 0 {
            return CookieOutcome::Failed(FailureKind::Navigation);
        }

        match surface.cookies_json().await {
            Ok(cookies_json) => {
                info!(
                    "Cookies: captured jar after {} visits (valid: {})",
                    visited, logged_in
                );
                CookieOutcome::Collected {
                    cookies_json,
                    valid: logged_in,
                    urls_visited: visited,
                }
            }
            Err(e) => CookieOutcome::Failed(classify_driver_error(&e)),
        }
    }
}
