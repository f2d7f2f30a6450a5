//! Warm-up flow.
//!
//! A low-risk browsing session: feed and explore pages with paced scrolling,
//! bounded by the task's page count. Each step retries once; the outcome
//! carries how far the session got.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::browser::Surface;
use crate::challenge::ChallengeHandler;
use crate::model::FailureKind;

use super::{classify_driver_error, CancelToken};

/// Terminal result of one warm-up session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupOutcome {
    Completed { pages_browsed: usize },
    Failed(FailureKind),
}

/// Browses the site the way an idle user would.
pub struct WarmupFlow<'a> {
    base_url: &'a str,
    challenges: &'a ChallengeHandler,
}

impl<'a> WarmupFlow<'a> {
    pub fn new(base_url: &'a str, challenges: &'a ChallengeHandler) -> Self {
        Self {
            base_url,
            challenges,
        }
    }

    /// Browse `pages` pages, alternating feed scrolls and explore visits.
    pub async fn run<S: Surface + ?Sized>(
        &self,
        surface: &S,
        pages: usize,
        cancel: &CancelToken,
    ) -> WarmupOutcome {
        let pages = pages.max(1);
        let mut browsed = 0usize;

        if let Err(e) = surface.goto(self.base_url).await {
            return WarmupOutcome::Failed(classify_driver_error(&e));
        }
        if let Err(e) = self.challenges.dismiss_cookie_banner(surface).await {
            return WarmupOutcome::Failed(classify_driver_error(&e));
        }

        for page in 0..pages {
            if cancel.is_cancelled() {
                return WarmupOutcome::Failed(FailureKind::Cancelled);
            }

            let step = async {
                if page % 2 == 1 && surface.exists("nav.explore").await? {
                    surface.click("nav.explore").await?;
                } else if page > 0 {
                    surface.goto(self.base_url).await?;
                }

                // A few paced scroll bursts with reading pauses.
                let bursts = rand::thread_rng().gen_range(2..5);
                for _ in 0..bursts {
                    let delta = rand::thread_rng().gen_range(400..1200);
                    surface.scroll(delta).await?;
                    let dwell = rand::thread_rng().gen_range(1500..5000);
                    tokio::time::sleep(Duration::from_millis(dwell)).await;
                }
                Ok::<(), crate::browser::DriverError>(())
            };

            match step.await {
                Ok(()) => {
                    browsed += 1;
                    debug!("Warmup: page {}/{} browsed", browsed, pages);
                }
                Err(first_err) => {
                    // One retry per step; the page may just have been slow.
                    warn!("Warmup: step failed ({}), retrying once", first_err);
                    if let Err(e) = surface.goto(self.base_url).await {
                        return WarmupOutcome::Failed(classify_driver_error(&e));
                    }
                    match surface.scroll(600).await {
                        Ok(()) => browsed += 1,
                        Err(e) => return WarmupOutcome::Failed(classify_driver_error(&e)),
                    }
                }
            }
        }

        info!("Warmup: browsed {} pages", browsed);
        WarmupOutcome::Completed {
            pages_browsed: browsed,
        }
    }
}
