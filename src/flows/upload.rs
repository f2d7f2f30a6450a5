//! Upload flow.
//!
//! `NavigateToComposer → FileSelected → Cropped → MetadataFilled → Posted →
//! Verified`. Every transition retries a bounded number of times (each
//! attempt re-walks the selector fallback chain) before failing the
//! sub-task with a classified reason. Verified requires the explicit
//! "shared" confirmation; posting without observing it is PostNotConfirmed,
//! never success.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::{DriverError, Surface};
use crate::challenge::ChallengeHandler;
use crate::model::{ContentAssignment, FailureKind, TaskConfig};

use super::{classify_driver_error, CancelToken};

/// Retries per transition before the sub-task fails.
const TRANSITION_RETRIES: usize = 2;

/// Upload state machine positions, in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    NavigateToComposer,
    FileSelected,
    Cropped,
    MetadataFilled,
    Posted,
    Verified,
}

/// Terminal result of one upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Published,
    Failed(FailureKind),
}

/// Caption/location/mentions resolved for one post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMetadata {
    pub caption: Option<String>,
    pub location: Option<String>,
    pub mentions: Vec<String>,
}

impl UploadMetadata {
    /// Apply the metadata priority order: explicit per-item values, else
    /// the task's default template, else nothing. A prior item's values are
    /// never inherited.
    pub fn resolve(assignment: &ContentAssignment, task_config: &TaskConfig) -> Self {
        Self {
            caption: assignment
                .caption
                .clone()
                .or_else(|| task_config.default_caption.clone()),
            location: assignment
                .location
                .clone()
                .or_else(|| task_config.default_location.clone()),
            mentions: if assignment.mentions.is_empty() {
                task_config.default_mentions.clone()
            } else {
                assignment.mentions.clone()
            },
        }
    }

    /// Caption text as typed, with mentions appended.
    pub fn caption_text(&self) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(caption) = &self.caption {
            parts.push(caption.clone());
        }
        for mention in &self.mentions {
            parts.push(format!("@{}", mention.trim_start_matches('@')));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Publishes one media file for one account.
pub struct UploadFlow<'a> {
    base_url: &'a str,
    challenges: &'a ChallengeHandler,
    /// Window for the "shared" confirmation after posting.
    confirm_secs: u64,
    state: UploadState,
}

impl<'a> UploadFlow<'a> {
    pub fn new(base_url: &'a str, challenges: &'a ChallengeHandler) -> Self {
        Self {
            base_url,
            challenges,
            confirm_secs: 30,
            state: UploadState::NavigateToComposer,
        }
    }

    pub fn with_confirm_secs(mut self, secs: u64) -> Self {
        self.confirm_secs = secs;
        self
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    fn transition(&mut self, next: UploadState) {
        debug!("Upload: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Retry a transition attempt a bounded number of times. Each attempt
    /// re-resolves its selectors, so fallback locators get their turn.
    async fn attempt<F, Fut>(&self, mut run: F) -> Result<(), DriverError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(), DriverError>>,
    {
        let mut last_err = None;
        for attempt in 0..=TRANSITION_RETRIES {
            match run().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!("Upload transition attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(800)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| DriverError::Timeout("transition retries".into())))
    }

    /// Run the machine to a terminal state.
    pub async fn run<S: Surface + ?Sized>(
        &mut self,
        surface: &S,
        media_path: &str,
        metadata: &UploadMetadata,
        cancel: &CancelToken,
    ) -> UploadOutcome {
        if cancel.is_cancelled() {
            return UploadOutcome::Failed(FailureKind::Cancelled);
        }

        // NavigateToComposer
        if let Err(e) = surface.goto(self.base_url).await {
            return UploadOutcome::Failed(classify_driver_error(&e));
        }
        if self
            .attempt(|| async move { surface.click("composer.open").await })
            .await
            .is_err()
        {
            warn!("Upload: composer entry not found");
            return UploadOutcome::Failed(FailureKind::ComposerNotFound);
        }

        // FileSelected
        let file_ready = surface
            .wait_for("composer.file_input", 10)
            .await
            .unwrap_or(false);
        if !file_ready {
            warn!("Upload: file input never appeared");
            return UploadOutcome::Failed(FailureKind::FileDialogTimeout);
        }
        if self
            .attempt(|| async move { surface.upload_file("composer.file_input", media_path).await })
            .await
            .is_err()
        {
            warn!("Upload: file attach failed for {}", media_path);
            return UploadOutcome::Failed(FailureKind::FileDialogTimeout);
        }
        self.transition(UploadState::FileSelected);

        if cancel.is_cancelled() {
            return UploadOutcome::Failed(FailureKind::Cancelled);
        }

        // Cropped: the crop and filter dialogs both advance via "next".
        for step in 0..2 {
            let advanced = self
                .attempt(|| async move {
                    if surface.wait_for("composer.crop_next", 10).await? {
                        surface.click("composer.crop_next").await
                    } else {
                        Err(DriverError::ElementNotFound("composer.crop_next".into()))
                    }
                })
                .await;
            if advanced.is_err() {
                warn!("Upload: crop step {} failed", step + 1);
                return UploadOutcome::Failed(FailureKind::CropStepFailed);
            }
        }
        self.transition(UploadState::Cropped);

        if cancel.is_cancelled() {
            return UploadOutcome::Failed(FailureKind::Cancelled);
        }

        // MetadataFilled
        if let Some(caption) = metadata.caption_text() {
            if let Err(e) = self
                .attempt(|| {
                    let caption = caption.clone();
                    async move {
                        surface
                            .type_text("composer.caption_input", &caption)
                            .await
                    }
                })
                .await
            {
                warn!("Upload: caption entry failed: {}", e);
                return UploadOutcome::Failed(classify_driver_error(&e));
            }
        }

        if let Some(location) = &metadata.location {
            // Location is best-effort: the picker is flaky and a missing
            // location does not invalidate the post.
            let placed = self
                .attempt(|| {
                    let location = location.clone();
                    async move {
                        surface
                            .type_text("composer.location_input", &location)
                            .await?;
                        if surface
                            .wait_for("composer.location_first_result", 5)
                            .await?
                        {
                            surface.click("composer.location_first_result").await
                        } else {
                            Err(DriverError::ElementNotFound(
                                "composer.location_first_result".into(),
                            ))
                        }
                    }
                })
                .await;
            if placed.is_err() {
                warn!("Upload: location '{}' could not be set, continuing", location);
            }
        }
        self.transition(UploadState::MetadataFilled);

        if cancel.is_cancelled() {
            return UploadOutcome::Failed(FailureKind::Cancelled);
        }

        // Posted
        if let Err(e) = self
            .attempt(|| async move { surface.click("composer.share").await })
            .await
        {
            warn!("Upload: share click failed: {}", e);
            return UploadOutcome::Failed(classify_driver_error(&e));
        }
        self.transition(UploadState::Posted);

        // Verified: only the explicit confirmation counts. UI timing races
        // after posting must not turn into false positives.
        match surface
            .wait_for("composer.shared_confirmation", self.confirm_secs)
            .await
        {
            Ok(true) => {
                self.transition(UploadState::Verified);
                info!("Upload: post confirmed shared");
                UploadOutcome::Published
            }
            Ok(false) => {
                warn!(
                    "Upload: no shared confirmation within {}s",
                    self.confirm_secs
                );
                UploadOutcome::Failed(FailureKind::PostNotConfirmed)
            }
            Err(e) => UploadOutcome::Failed(classify_driver_error(&e)),
        }
    }
}
