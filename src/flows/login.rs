//! Login flow.
//!
//! `Start → CredentialsSubmitted → {Challenge | LoggedIn | IncorrectPassword
//! | Suspended}`; challenge branches resolve back to LoggedIn or a terminal
//! failure. Terminal failures map 1:1 onto account statuses downstream;
//! LoggedIn mutates nothing here.

use tracing::{debug, info, warn};

use crate::browser::Surface;
use crate::challenge::{ChallengeHandler, ChallengeOutcome};
use crate::model::{Account, FailureKind};

use super::{classify_driver_error, CancelToken};

/// Login state machine positions, in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Start,
    CredentialsSubmitted,
    Challenge,
    LoggedIn,
    IncorrectPassword,
    Suspended,
    VerificationTimeout,
    CaptchaUnresolved,
    PhoneVerificationRequired,
    HumanVerificationRequired,
    Cancelled,
}

/// Terminal result of one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    LoggedIn,
    Failed(FailureKind),
}

/// Authenticates one account against the target site.
pub struct LoginFlow<'a> {
    base_url: &'a str,
    challenges: &'a ChallengeHandler,
    /// Window for the logged-in marker to appear after submission.
    settle_secs: u64,
    state: LoginState,
}

impl<'a> LoginFlow<'a> {
    pub fn new(base_url: &'a str, challenges: &'a ChallengeHandler) -> Self {
        Self {
            base_url,
            challenges,
            settle_secs: 15,
            state: LoginState::Start,
        }
    }

    pub fn with_settle_secs(mut self, secs: u64) -> Self {
        self.settle_secs = secs;
        self
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    fn transition(&mut self, next: LoginState, account: &Account) {
        debug!(
            "Login[{}]: {:?} -> {:?}",
            account.username, self.state, next
        );
        self.state = next;
    }

    /// Run the machine to a terminal state.
    pub async fn run<S: Surface + ?Sized>(
        &mut self,
        surface: &S,
        account: &Account,
        cancel: &CancelToken,
    ) -> LoginOutcome {
        if cancel.is_cancelled() {
            self.transition(LoginState::Cancelled, account);
            return LoginOutcome::Failed(FailureKind::Cancelled);
        }

        let login_url = format!("{}/accounts/login/", self.base_url);
        if let Err(e) = surface.goto(&login_url).await {
            warn!("Login[{}]: navigation failed: {}", account.username, e);
            return LoginOutcome::Failed(classify_driver_error(&e));
        }

        if let Err(e) = self.challenges.dismiss_cookie_banner(surface).await {
            return LoginOutcome::Failed(classify_driver_error(&e));
        }

        // A still-valid profile session skips the form entirely.
        match surface.exists("login.logged_in_marker").await {
            Ok(true) => {
                info!("Login[{}]: session already authenticated", account.username);
                self.transition(LoginState::LoggedIn, account);
                return LoginOutcome::LoggedIn;
            }
            Ok(false) => {}
            Err(e) => return LoginOutcome::Failed(classify_driver_error(&e)),
        }

        // Submit credentials.
        let submitted = async {
            surface
                .type_text("login.username", &account.username)
                .await?;
            surface
                .type_text("login.password", &account.password)
                .await?;
            surface.click("login.submit").await
        }
        .await;

        if let Err(e) = submitted {
            warn!(
                "Login[{}]: credential submission failed: {}",
                account.username, e
            );
            return LoginOutcome::Failed(classify_driver_error(&e));
        }
        self.transition(LoginState::CredentialsSubmitted, account);

        if cancel.is_cancelled() {
            self.transition(LoginState::Cancelled, account);
            return LoginOutcome::Failed(FailureKind::Cancelled);
        }

        // Fast terminal checks before waiting on the logged-in marker.
        match surface.exists("login.error_banner").await {
            Ok(true) => {
                info!("Login[{}]: incorrect password", account.username);
                self.transition(LoginState::IncorrectPassword, account);
                return LoginOutcome::Failed(FailureKind::IncorrectPassword);
            }
            Ok(false) => {}
            Err(e) => return LoginOutcome::Failed(classify_driver_error(&e)),
        }

        match self.challenges.detect_account_obstacles(surface).await {
            Ok(ChallengeOutcome::Suspended) => {
                info!("Login[{}]: account suspended", account.username);
                self.transition(LoginState::Suspended, account);
                return LoginOutcome::Failed(FailureKind::Suspended);
            }
            Ok(ChallengeOutcome::PhoneVerificationRequired) => {
                self.transition(LoginState::PhoneVerificationRequired, account);
                return LoginOutcome::Failed(FailureKind::PhoneVerificationRequired);
            }
            Ok(ChallengeOutcome::HumanVerificationRequired) => {
                self.transition(LoginState::HumanVerificationRequired, account);
                return LoginOutcome::Failed(FailureKind::HumanVerificationRequired);
            }
            Ok(_) => {}
            Err(e) => return LoginOutcome::Failed(classify_driver_error(&e)),
        }

        // Challenge branch: captcha first, then the code prompt.
        match self.challenges.resolve_captcha(surface).await {
            Ok(ChallengeOutcome::NotPresent) => {}
            Ok(ChallengeOutcome::Resolved) => {
                self.transition(LoginState::Challenge, account);
            }
            Ok(ChallengeOutcome::CaptchaUnresolved) => {
                self.transition(LoginState::CaptchaUnresolved, account);
                return LoginOutcome::Failed(FailureKind::CaptchaUnresolved);
            }
            Ok(other) => {
                warn!(
                    "Login[{}]: unexpected captcha outcome {:?}",
                    account.username, other
                );
            }
            Err(e) => return LoginOutcome::Failed(classify_driver_error(&e)),
        }

        match self
            .challenges
            .resolve_code_prompt(surface, account.mailbox.as_ref())
            .await
        {
            Ok(ChallengeOutcome::NotPresent) => {}
            Ok(ChallengeOutcome::Resolved) => {
                self.transition(LoginState::Challenge, account);
            }
            Ok(ChallengeOutcome::VerificationTimeout) => {
                self.transition(LoginState::VerificationTimeout, account);
                return LoginOutcome::Failed(FailureKind::VerificationTimeout);
            }
            Ok(other) => {
                warn!(
                    "Login[{}]: unexpected code outcome {:?}",
                    account.username, other
                );
            }
            Err(e) => return LoginOutcome::Failed(classify_driver_error(&e)),
        }

        // Post-login dialogs are never allowed to block.
        if let Err(e) = self.challenges.dismiss_save_info(surface).await {
            debug!("Login[{}]: save-info dismissal: {}", account.username, e);
        }

        // Confirm we actually landed in the app.
        match surface
            .wait_for("login.logged_in_marker", self.settle_secs)
            .await
        {
            Ok(true) => {
                info!("Login[{}]: logged in", account.username);
                self.transition(LoginState::LoggedIn, account);
                LoginOutcome::LoggedIn
            }
            Ok(false) => {
                // The marker never appeared; re-check for a late banner
                // before classifying.
                if let Ok(true) = surface.exists("login.error_banner").await {
                    self.transition(LoginState::IncorrectPassword, account);
                    return LoginOutcome::Failed(FailureKind::IncorrectPassword);
                }
                if let Ok(ChallengeOutcome::Suspended) =
                    self.challenges.detect_account_obstacles(surface).await
                {
                    self.transition(LoginState::Suspended, account);
                    return LoginOutcome::Failed(FailureKind::Suspended);
                }
                warn!(
                    "Login[{}]: no logged-in marker within {}s",
                    account.username, self.settle_secs
                );
                LoginOutcome::Failed(FailureKind::ElementNotFound)
            }
            Err(e) => LoginOutcome::Failed(classify_driver_error(&e)),
        }
    }
}
