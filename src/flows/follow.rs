//! Follow flow.
//!
//! Walks the task's target queue from the account's cursor, following up to
//! the per-account limit. Progress (count + cursor) is part of the outcome
//! even on failure, so a rerun resumes where this one stopped instead of
//! starting over.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::browser::Surface;
use crate::model::FailureKind;

use super::{classify_driver_error, CancelToken};

/// How far the run got, regardless of how it ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowProgress {
    pub followed: usize,
    /// Last target successfully processed; the rerun starts after it.
    pub cursor: Option<String>,
}

/// Terminal result of one follow session, always carrying progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowOutcome {
    Completed(FollowProgress),
    Failed(FollowProgress, FailureKind),
}

impl FollowOutcome {
    pub fn progress(&self) -> &FollowProgress {
        match self {
            Self::Completed(p) | Self::Failed(p, _) => p,
        }
    }
}

/// Follows targets from a queue for one account.
pub struct FollowFlow<'a> {
    base_url: &'a str,
    /// Pause range between profiles, in milliseconds.
    pause_ms: (u64, u64),
    /// Pause before retrying a failed target, in milliseconds.
    retry_pause_ms: u64,
}

impl<'a> FollowFlow<'a> {
    pub fn new(base_url: &'a str) -> Self {
        Self {
            base_url,
            pause_ms: (2000, 6000),
            retry_pause_ms: 1200,
        }
    }

    pub fn with_pause_ms(mut self, min: u64, max: u64) -> Self {
        self.pause_ms = (min, max.max(min + 1));
        self.retry_pause_ms = self.retry_pause_ms.min(max);
        self
    }

    /// Queue positions after the cursor, in order.
    fn remaining<'t>(targets: &'t [String], cursor: Option<&str>) -> &'t [String] {
        match cursor {
            Some(cursor) => match targets.iter().position(|t| t == cursor) {
                Some(idx) => &targets[idx + 1..],
                // Cursor target no longer queued: start over rather than
                // guessing a position.
                None => targets,
            },
            None => targets,
        }
    }

    pub async fn run<S: Surface + ?Sized>(
        &self,
        surface: &S,
        targets: &[String],
        cursor: Option<&str>,
        limit: usize,
        cancel: &CancelToken,
    ) -> FollowOutcome {
        let mut progress = FollowProgress {
            followed: 0,
            cursor: cursor.map(String::from),
        };
        let limit = if limit == 0 { targets.len() } else { limit };

        for target in Self::remaining(targets, cursor) {
            if progress.followed >= limit {
                break;
            }
            if cancel.is_cancelled() {
                return FollowOutcome::Failed(progress, FailureKind::Cancelled);
            }

            let mut attempts = 0;
            let followed = loop {
                attempts += 1;
                let step = async {
                    let url = format!("{}/{}/", self.base_url, target);
                    surface.goto(&url).await?;

                    // Already following counts as processed, not as a follow.
                    if surface.exists("profile.following_marker").await? {
                        debug!("Follow: already following {}", target);
                        return Ok(false);
                    }

                    surface.click("profile.follow_button").await?;

                    // The button flips to "Following"/"Requested" on success.
                    if surface.wait_for("profile.following_marker", 8).await? {
                        Ok(true)
                    } else {
                        Err(crate::browser::DriverError::ElementNotFound(
                            "profile.following_marker".into(),
                        ))
                    }
                };

                match step.await {
                    Ok(did_follow) => break Ok(did_follow),
                    // One retry per target; then the run fails with
                    // whatever progress was already committed.
                    Err(e) if attempts <= 1 => {
                        warn!("Follow: {} failed ({}), retrying once", target, e);
                        tokio::time::sleep(Duration::from_millis(self.retry_pause_ms)).await;
                    }
                    Err(e) => break Err(e),
                }
            };

            match followed {
                Ok(did_follow) => {
                    if did_follow {
                        progress.followed += 1;
                    }
                    progress.cursor = Some(target.clone());
                    debug!(
                        "Follow: {}/{} done, cursor at {}",
                        progress.followed, limit, target
                    );
                }
                Err(e) => {
                    warn!("Follow: giving up at {} after retry: {}", target, e);
                    return FollowOutcome::Failed(progress, classify_driver_error(&e));
                }
            }

            // Pacing between profiles.
            let pause = rand::thread_rng().gen_range(self.pause_ms.0..self.pause_ms.1);
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }

        info!(
            "Follow: completed with {} follows, cursor {:?}",
            progress.followed, progress.cursor
        );
        FollowOutcome::Completed(progress)
    }
}
