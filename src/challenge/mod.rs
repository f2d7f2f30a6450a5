//! In-flow obstacle handling.
//!
//! Flows call these helpers at fixed checkpoints. Every check returns a
//! typed outcome the enclosing state machine branches on; expected
//! obstacles are values, never errors, so a missing banner costs one cheap
//! probe and nothing else.

mod mailbox;

pub use mailbox::{Mailbox, MailboxError};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::browser::{DriverError, Surface};
use crate::captcha::{CaptchaChallenge, SolverApi};
use crate::model::MailboxCredentials;

/// What a challenge check concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// Obstacle handled; the flow proceeds.
    Resolved,
    /// Nothing to handle at this checkpoint.
    NotPresent,
    /// Code never arrived within the configured window.
    VerificationTimeout,
    /// Solver failed or no solver configured.
    CaptchaUnresolved,
    PhoneVerificationRequired,
    HumanVerificationRequired,
    /// Suspension banner or forced logout detected.
    Suspended,
}

/// Challenge handling bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeConfig {
    /// Window for a verification code to arrive, in seconds.
    pub verification_window_secs: u64,
    /// Mailbox poll interval, in seconds.
    pub mailbox_poll_secs: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            verification_window_secs: 120,
            mailbox_poll_secs: 5,
        }
    }
}

/// State-independent challenge checks shared by login and upload flows.
pub struct ChallengeHandler {
    config: ChallengeConfig,
    solver: Option<Arc<dyn SolverApi>>,
    mailbox: Option<Arc<dyn Mailbox>>,
}

impl ChallengeHandler {
    pub fn new(
        config: ChallengeConfig,
        solver: Option<Arc<dyn SolverApi>>,
        mailbox: Option<Arc<dyn Mailbox>>,
    ) -> Self {
        Self {
            config,
            solver,
            mailbox,
        }
    }

    /// Dismiss the cookie-consent banner if shown. Idempotent and safe to
    /// call when absent.
    pub async fn dismiss_cookie_banner<S: Surface + ?Sized>(
        &self,
        surface: &S,
    ) -> Result<ChallengeOutcome, DriverError> {
        if !surface.exists("challenge.cookie_accept").await? {
            return Ok(ChallengeOutcome::NotPresent);
        }
        surface.click("challenge.cookie_accept").await?;
        debug!("Cookie consent dismissed");
        Ok(ChallengeOutcome::Resolved)
    }

    /// Dismiss "save login info" / "not now" dialogs opportunistically.
    /// Never blocks the flow; a failed click is treated as not present.
    pub async fn dismiss_save_info<S: Surface + ?Sized>(
        &self,
        surface: &S,
    ) -> Result<ChallengeOutcome, DriverError> {
        if !surface.exists("challenge.save_info_dismiss").await? {
            return Ok(ChallengeOutcome::NotPresent);
        }
        if surface.click("challenge.save_info_dismiss").await.is_ok() {
            debug!("Save-login-info dialog dismissed");
            return Ok(ChallengeOutcome::Resolved);
        }
        Ok(ChallengeOutcome::NotPresent)
    }

    /// Handle an email/SMS one-time-code prompt: poll the mailbox within
    /// the configured window, type and submit the code.
    pub async fn resolve_code_prompt<S: Surface + ?Sized>(
        &self,
        surface: &S,
        credentials: Option<&MailboxCredentials>,
    ) -> Result<ChallengeOutcome, DriverError> {
        if !surface.exists("challenge.code_input").await? {
            return Ok(ChallengeOutcome::NotPresent);
        }

        let (mailbox, credentials) = match (self.mailbox.as_ref(), credentials) {
            (Some(m), Some(c)) => (m, c),
            _ => {
                warn!("Verification code prompted but no mailbox is configured");
                return Ok(ChallengeOutcome::VerificationTimeout);
            }
        };

        info!(
            "Verification code prompted, polling mailbox for up to {}s",
            self.config.verification_window_secs
        );

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.verification_window_secs);

        let code = loop {
            match mailbox.fetch_verification_code(credentials).await {
                Ok(Some(code)) => break code,
                Ok(None) => {}
                Err(e) => warn!("Mailbox poll failed: {}", e),
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "No verification code within {}s",
                    self.config.verification_window_secs
                );
                return Ok(ChallengeOutcome::VerificationTimeout);
            }

            tokio::time::sleep(Duration::from_secs(self.config.mailbox_poll_secs)).await;
        };

        surface.type_text("challenge.code_input", &code).await?;
        surface.click("challenge.code_submit").await?;
        info!("Verification code submitted");
        Ok(ChallengeOutcome::Resolved)
    }

    /// Handle a CAPTCHA prompt by delegating to the external solver and
    /// injecting the token back into the page.
    pub async fn resolve_captcha<S: Surface + ?Sized>(
        &self,
        surface: &S,
    ) -> Result<ChallengeOutcome, DriverError> {
        if !surface.exists("challenge.captcha_frame").await? {
            return Ok(ChallengeOutcome::NotPresent);
        }

        let Some(solver) = self.solver.as_ref() else {
            warn!("CAPTCHA present but no solver is configured");
            return Ok(ChallengeOutcome::CaptchaUnresolved);
        };

        let sitekey = surface
            .attr_of("challenge.captcha_sitekey", "data-sitekey")
            .await?;
        let Some(sitekey) = sitekey else {
            warn!("CAPTCHA frame present but sitekey not found");
            return Ok(ChallengeOutcome::CaptchaUnresolved);
        };

        let page_url = surface.current_url().await?;
        let challenge = CaptchaChallenge::recaptcha_v2(&sitekey, &page_url);

        match solver.solve(&challenge).await {
            Ok(solved) => {
                let token = serde_json::to_string(&solved.token)
                    .unwrap_or_else(|_| "\"\"".into());
                // Fill the response textarea and fire the site callback.
                let inject = format!(
                    r#"(function() {{
                        const token = {token};
                        const area = document.querySelector('textarea[name="g-recaptcha-response"]');
                        if (area) {{
                            area.value = token;
                            area.dispatchEvent(new Event('change', {{ bubbles: true }}));
                        }}
                        if (window.___grecaptcha_cfg) {{
                            for (const client of Object.values(window.___grecaptcha_cfg.clients || {{}})) {{
                                for (const value of Object.values(client)) {{
                                    if (value && typeof value === 'object' && typeof value.callback === 'function') {{
                                        value.callback(token);
                                        return true;
                                    }}
                                }}
                            }}
                        }}
                        return !!area;
                    }})()"#
                );
                surface.eval(&inject).await?;
                info!("CAPTCHA token injected (solved in {}ms)", solved.solve_time_ms);
                Ok(ChallengeOutcome::Resolved)
            }
            Err(e) => {
                warn!("CAPTCHA solve failed: {}", e);
                Ok(ChallengeOutcome::CaptchaUnresolved)
            }
        }
    }

    /// Detect account-level obstacles: suspension banners, forced logout,
    /// phone/human verification walls. Purely read-only.
    pub async fn detect_account_obstacles<S: Surface + ?Sized>(
        &self,
        surface: &S,
    ) -> Result<ChallengeOutcome, DriverError> {
        if surface.exists("login.suspended_banner").await? {
            return Ok(ChallengeOutcome::Suspended);
        }
        if surface.exists("challenge.phone_verification").await? {
            return Ok(ChallengeOutcome::PhoneVerificationRequired);
        }
        if surface.exists("challenge.human_verification").await? {
            return Ok(ChallengeOutcome::HumanVerificationRequired);
        }
        if surface.exists("challenge.forced_logout").await? {
            return Ok(ChallengeOutcome::Suspended);
        }
        Ok(ChallengeOutcome::NotPresent)
    }
}
