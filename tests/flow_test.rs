//! Flow state-machine tests against a scripted page surface.
//!
//! No browser: the fake surface plays back element presence the way the
//! real site would, so the login/upload/follow/cookie machines can be
//! driven through their terminal states deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;

use fleetdriver::browser::{DriverError, Surface};
use fleetdriver::captcha::{CaptchaChallenge, CaptchaError, CaptchaToken, SolverApi};
use fleetdriver::challenge::{ChallengeConfig, ChallengeHandler, Mailbox, MailboxError};
use fleetdriver::flows::{
    CancelToken, CookieFlow, CookieOutcome, FollowFlow, FollowOutcome, LoginFlow, LoginOutcome,
    UploadFlow, UploadMetadata, UploadOutcome,
};
use fleetdriver::model::{Account, FailureKind, MailboxCredentials};

/// Scripted page surface: a set of currently-present logical elements plus
/// rules for elements that appear or vanish when something is clicked.
#[derive(Default)]
struct FakeSurface {
    present: Mutex<HashSet<String>>,
    /// logical clicked -> elements added
    add_on_click: HashMap<String, Vec<String>>,
    /// logical clicked -> elements removed
    remove_on_click: HashMap<String, Vec<String>>,
    /// URL substrings whose navigation fails
    fail_goto_containing: Vec<String>,
    /// Elements cleared on every navigation (per-page state)
    clear_on_goto: Vec<String>,
    attrs: HashMap<(String, String), String>,
    cookies_json: String,

    visited: Mutex<Vec<String>>,
    clicked: Mutex<Vec<String>>,
    typed: Mutex<Vec<(String, String)>>,
    uploaded: Mutex<Vec<(String, String)>>,
}

impl FakeSurface {
    fn with_present(elements: &[&str]) -> Self {
        Self {
            present: Mutex::new(elements.iter().map(|e| e.to_string()).collect()),
            cookies_json: "[]".into(),
            ..Default::default()
        }
    }

    fn add_rule(&mut self, clicked: &str, appears: &[&str]) {
        self.add_on_click
            .entry(clicked.to_string())
            .or_default()
            .extend(appears.iter().map(|e| e.to_string()));
    }

    fn typed_into(&self, logical: &str) -> Option<String> {
        self.typed
            .lock()
            .iter()
            .find(|(name, _)| name == logical)
            .map(|(_, text)| text.clone())
    }
}

#[async_trait]
impl Surface for FakeSurface {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        if self
            .fail_goto_containing
            .iter()
            .any(|needle| url.contains(needle))
        {
            return Err(DriverError::NavigationFailed(format!("dead url {}", url)));
        }
        self.visited.lock().push(url.to_string());
        let mut present = self.present.lock();
        for name in &self.clear_on_goto {
            present.remove(name);
        }
        Ok(())
    }

    async fn exists(&self, logical: &str) -> Result<bool, DriverError> {
        Ok(self.present.lock().contains(logical))
    }

    async fn wait_for(&self, logical: &str, _timeout_secs: u64) -> Result<bool, DriverError> {
        self.exists(logical).await
    }

    async fn click(&self, logical: &str) -> Result<(), DriverError> {
        if !self.present.lock().contains(logical) {
            return Err(DriverError::ElementNotFound(logical.to_string()));
        }
        self.clicked.lock().push(logical.to_string());

        let mut present = self.present.lock();
        if let Some(added) = self.add_on_click.get(logical) {
            for name in added {
                present.insert(name.clone());
            }
        }
        if let Some(removed) = self.remove_on_click.get(logical) {
            for name in removed {
                present.remove(name);
            }
        }
        Ok(())
    }

    async fn type_text(&self, logical: &str, text: &str) -> Result<(), DriverError> {
        if !self.present.lock().contains(logical) {
            return Err(DriverError::ElementNotFound(logical.to_string()));
        }
        self.typed.lock().push((logical.to_string(), text.to_string()));
        Ok(())
    }

    async fn upload_file(&self, logical: &str, path: &str) -> Result<(), DriverError> {
        if !self.present.lock().contains(logical) {
            return Err(DriverError::ElementNotFound(logical.to_string()));
        }
        self.uploaded
            .lock()
            .push((logical.to_string(), path.to_string()));
        Ok(())
    }

    async fn text_of(&self, logical: &str) -> Result<Option<String>, DriverError> {
        Ok(self
            .present
            .lock()
            .contains(logical)
            .then(|| String::new()))
    }

    async fn attr_of(&self, logical: &str, attr: &str) -> Result<Option<String>, DriverError> {
        Ok(self
            .attrs
            .get(&(logical.to_string(), attr.to_string()))
            .cloned())
    }

    async fn scroll(&self, _delta_y: i32) -> Result<(), DriverError> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self
            .visited
            .lock()
            .last()
            .cloned()
            .unwrap_or_else(|| "about:blank".into()))
    }

    async fn eval(&self, _script: &str) -> Result<serde_json::Value, DriverError> {
        Ok(serde_json::Value::Bool(true))
    }

    async fn cookies_json(&self) -> Result<String, DriverError> {
        Ok(self.cookies_json.clone())
    }
}

struct FailingSolver;

#[async_trait]
impl SolverApi for FailingSolver {
    async fn solve(&self, _challenge: &CaptchaChallenge) -> Result<CaptchaToken, CaptchaError> {
        Err(CaptchaError::ApiError("no workers available".into()))
    }
}

struct SilentMailbox;

#[async_trait]
impl Mailbox for SilentMailbox {
    async fn fetch_verification_code(
        &self,
        _credentials: &MailboxCredentials,
    ) -> Result<Option<String>, MailboxError> {
        Ok(None)
    }
}

const BASE: &str = "https://site.example";

fn handler() -> ChallengeHandler {
    ChallengeHandler::new(ChallengeConfig::default(), None, None)
}

fn account() -> Account {
    Account::new("a1", "alice", "hunter2")
}

// ---------- Login flow ----------

#[tokio::test]
async fn login_reaches_logged_in() {
    let mut surface =
        FakeSurface::with_present(&["login.username", "login.password", "login.submit"]);
    surface.add_rule("login.submit", &["login.logged_in_marker"]);

    let challenges = handler();
    let mut flow = LoginFlow::new(BASE, &challenges);
    let outcome = flow.run(&surface, &account(), &CancelToken::new()).await;

    assert_eq!(outcome, LoginOutcome::LoggedIn);
    assert_eq!(surface.typed_into("login.username").as_deref(), Some("alice"));
    assert_eq!(
        surface.typed_into("login.password").as_deref(),
        Some("hunter2")
    );
}

#[tokio::test]
async fn login_classifies_incorrect_password() {
    let mut surface =
        FakeSurface::with_present(&["login.username", "login.password", "login.submit"]);
    surface.add_rule("login.submit", &["login.error_banner"]);

    let challenges = handler();
    let mut flow = LoginFlow::new(BASE, &challenges);
    let outcome = flow.run(&surface, &account(), &CancelToken::new()).await;

    assert_eq!(
        outcome,
        LoginOutcome::Failed(FailureKind::IncorrectPassword)
    );
}

#[tokio::test]
async fn login_classifies_suspension() {
    let mut surface =
        FakeSurface::with_present(&["login.username", "login.password", "login.submit"]);
    surface.add_rule("login.submit", &["login.suspended_banner"]);

    let challenges = handler();
    let mut flow = LoginFlow::new(BASE, &challenges);
    let outcome = flow.run(&surface, &account(), &CancelToken::new()).await;

    assert_eq!(outcome, LoginOutcome::Failed(FailureKind::Suspended));
}

#[tokio::test]
async fn login_captcha_without_solver_fails_classified() {
    let mut surface =
        FakeSurface::with_present(&["login.username", "login.password", "login.submit"]);
    surface.add_rule("login.submit", &["challenge.captcha_frame"]);

    let challenges = handler();
    let mut flow = LoginFlow::new(BASE, &challenges);
    let outcome = flow.run(&surface, &account(), &CancelToken::new()).await;

    assert_eq!(
        outcome,
        LoginOutcome::Failed(FailureKind::CaptchaUnresolved)
    );
}

#[tokio::test]
async fn login_captcha_solver_failure_fails_classified() {
    let mut surface =
        FakeSurface::with_present(&["login.username", "login.password", "login.submit"]);
    surface.add_rule("login.submit", &["challenge.captcha_frame"]);
    surface.attrs.insert(
        (
            "challenge.captcha_sitekey".to_string(),
            "data-sitekey".to_string(),
        ),
        "sitekey-123".to_string(),
    );

    let challenges = ChallengeHandler::new(
        ChallengeConfig::default(),
        Some(Arc::new(FailingSolver)),
        None,
    );
    let mut flow = LoginFlow::new(BASE, &challenges);
    let outcome = flow.run(&surface, &account(), &CancelToken::new()).await;

    assert_eq!(
        outcome,
        LoginOutcome::Failed(FailureKind::CaptchaUnresolved)
    );
}

#[tokio::test]
async fn verification_timeout_is_bounded_by_configured_window() {
    let mut surface =
        FakeSurface::with_present(&["login.username", "login.password", "login.submit"]);
    surface.add_rule("login.submit", &["challenge.code_input"]);

    let config = ChallengeConfig {
        verification_window_secs: 2,
        mailbox_poll_secs: 1,
    };
    let challenges = ChallengeHandler::new(config, None, Some(Arc::new(SilentMailbox)));

    let mut account = account();
    account.mailbox = Some(MailboxCredentials {
        address: "alice@mail.example".into(),
        password: "pw".into(),
    });

    let mut flow = LoginFlow::new(BASE, &challenges);
    let started = Instant::now();
    let outcome = flow.run(&surface, &account, &CancelToken::new()).await;
    let elapsed = started.elapsed();

    assert_eq!(
        outcome,
        LoginOutcome::Failed(FailureKind::VerificationTimeout)
    );
    // Bounded by the window plus one poll interval of slack, no indefinite
    // retrying.
    assert!(elapsed.as_secs_f64() >= 1.9, "elapsed {:?}", elapsed);
    assert!(elapsed.as_secs_f64() < 5.0, "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn already_authenticated_session_skips_form() {
    let surface = FakeSurface::with_present(&["login.logged_in_marker"]);

    let challenges = handler();
    let mut flow = LoginFlow::new(BASE, &challenges);
    let outcome = flow.run(&surface, &account(), &CancelToken::new()).await;

    assert_eq!(outcome, LoginOutcome::LoggedIn);
    assert!(surface.typed.lock().is_empty());
}

// ---------- Upload flow ----------

fn upload_surface() -> FakeSurface {
    let mut surface = FakeSurface::with_present(&["composer.open"]);
    surface.add_rule(
        "composer.open",
        &["composer.file_input", "composer.crop_next"],
    );
    // Two "next" clicks lead to the metadata screen.
    surface.add_rule(
        "composer.crop_next",
        &["composer.caption_input", "composer.share"],
    );
    surface.add_rule("composer.share", &["composer.shared_confirmation"]);
    surface
}

#[tokio::test]
async fn upload_publishes_with_confirmation() {
    let surface = upload_surface();
    let challenges = handler();

    let metadata = UploadMetadata {
        caption: Some("first post".into()),
        location: None,
        mentions: vec!["friend".into()],
    };
    let mut flow = UploadFlow::new(BASE, &challenges);
    let outcome = flow
        .run(&surface, "/media/clip.mp4", &metadata, &CancelToken::new())
        .await;

    assert_eq!(outcome, UploadOutcome::Published);
    assert_eq!(
        surface.uploaded.lock().as_slice(),
        &[(
            "composer.file_input".to_string(),
            "/media/clip.mp4".to_string()
        )]
    );
    assert_eq!(
        surface.typed_into("composer.caption_input").as_deref(),
        Some("first post @friend")
    );
}

#[tokio::test]
async fn upload_without_confirmation_is_not_success() {
    let mut surface = upload_surface();
    // The share click goes through but no confirmation ever shows.
    surface.add_on_click.remove("composer.share");

    let challenges = handler();
    let mut flow = UploadFlow::new(BASE, &challenges).with_confirm_secs(1);
    let outcome = flow
        .run(
            &surface,
            "/media/clip.mp4",
            &UploadMetadata::default(),
            &CancelToken::new(),
        )
        .await;

    assert_eq!(outcome, UploadOutcome::Failed(FailureKind::PostNotConfirmed));
    // Share was clicked, so the absence of the indicator is the only thing
    // standing between this and a false positive.
    assert!(surface
        .clicked
        .lock()
        .iter()
        .any(|c| c == "composer.share"));
}

#[tokio::test]
async fn upload_missing_composer_is_classified() {
    let surface = FakeSurface::with_present(&[]);
    let challenges = handler();

    let mut flow = UploadFlow::new(BASE, &challenges);
    let outcome = flow
        .run(
            &surface,
            "/media/clip.mp4",
            &UploadMetadata::default(),
            &CancelToken::new(),
        )
        .await;

    assert_eq!(outcome, UploadOutcome::Failed(FailureKind::ComposerNotFound));
}

// ---------- Follow flow ----------

fn follow_surface() -> FakeSurface {
    let mut surface = FakeSurface::with_present(&["profile.follow_button"]);
    surface.add_rule("profile.follow_button", &["profile.following_marker"]);
    surface.clear_on_goto = vec!["profile.following_marker".into()];
    surface
}

fn targets(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("user{}", i)).collect()
}

#[tokio::test]
async fn follow_preserves_progress_on_mid_queue_failure() {
    let mut surface = follow_surface();
    // user8's profile never loads, on either attempt.
    surface.fail_goto_containing = vec!["/user8/".into()];

    let flow = FollowFlow::new(BASE).with_pause_ms(1, 5);
    let outcome = flow
        .run(&surface, &targets(20), None, 20, &CancelToken::new())
        .await;

    let FollowOutcome::Failed(progress, kind) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(progress.followed, 7);
    assert_eq!(progress.cursor.as_deref(), Some("user7"));
    assert_eq!(kind, FailureKind::Navigation);
}

#[tokio::test]
async fn follow_resumes_from_cursor_not_from_zero() {
    let surface = follow_surface();

    let flow = FollowFlow::new(BASE).with_pause_ms(1, 5);
    let outcome = flow
        .run(
            &surface,
            &targets(20),
            Some("user7"),
            20,
            &CancelToken::new(),
        )
        .await;

    let FollowOutcome::Completed(progress) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    // 13 remaining targets after the cursor.
    assert_eq!(progress.followed, 13);
    assert_eq!(progress.cursor.as_deref(), Some("user20"));

    // The first profile visited is the one after the cursor.
    let first_visit = surface.visited.lock().first().cloned().unwrap();
    assert!(first_visit.contains("/user8/"), "visited {}", first_visit);
}

#[tokio::test]
async fn follow_respects_per_account_limit() {
    let surface = follow_surface();

    let flow = FollowFlow::new(BASE).with_pause_ms(1, 5);
    let outcome = flow
        .run(&surface, &targets(20), None, 5, &CancelToken::new())
        .await;

    let FollowOutcome::Completed(progress) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(progress.followed, 5);
    assert_eq!(progress.cursor.as_deref(), Some("user5"));
}

// ---------- Cookie flow ----------

#[tokio::test]
async fn cookie_flow_captures_jar() {
    let mut surface = FakeSurface::with_present(&[]);
    surface.cookies_json = r#"[{"name":"sessionid","value":"abc"}]"#.into();

    let flow = CookieFlow::new(BASE);
    let outcome = flow
        .run(
            &surface,
            &["https://site.example/about".to_string()],
            true,
            &CancelToken::new(),
        )
        .await;

    let CookieOutcome::Collected {
        cookies_json,
        valid,
        urls_visited,
    } = outcome
    else {
        panic!("expected collection, got {:?}", outcome);
    };
    assert!(valid);
    assert_eq!(urls_visited, 2);
    assert!(cookies_json.contains("sessionid"));
}

#[tokio::test]
async fn cookie_flow_skips_dead_urls_without_losing_jar() {
    let mut surface = FakeSurface::with_present(&[]);
    surface.cookies_json = "[]".into();
    surface.fail_goto_containing = vec!["/dead".into()];

    let flow = CookieFlow::new(BASE);
    let outcome = flow
        .run(
            &surface,
            &["https://site.example/dead".to_string()],
            false,
            &CancelToken::new(),
        )
        .await;

    let CookieOutcome::Collected {
        valid,
        urls_visited,
        ..
    } = outcome
    else {
        panic!("expected collection, got {:?}", outcome);
    };
    assert!(!valid);
    assert_eq!(urls_visited, 1);
}
