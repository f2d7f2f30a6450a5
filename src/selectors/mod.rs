//! Selector resolution.
//!
//! The target UI renames classes and shuffles DOM structure constantly, so
//! flow logic never touches raw selectors. Each logical element maps to an
//! ordered list of locator strategies (primary, localized text fallback,
//! structural fallback, attribute fallback) tried in order. Callers branch
//! on "found / not found"; the resolver never errors for an absent element.
//! UI churn is absorbed by editing this table, not the state machines.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;

static PRODUCTION_TABLE: Lazy<SelectorTable> = Lazy::new(SelectorTable::default);

/// One locator strategy for a logical element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Plain CSS selector.
    Css(&'static str),
    /// Element containing exact visible text (case-insensitive), scoped by
    /// a CSS pre-filter.
    Text(&'static str, &'static str),
    /// aria-label attribute match.
    AriaLabel(&'static str),
}

impl Locator {
    /// CSS expression understood by `document.querySelector`. Text locators
    /// are resolved by the driver with an XPath-style scan instead.
    pub fn as_css(&self) -> Option<String> {
        match self {
            Self::Css(sel) => Some((*sel).to_string()),
            Self::AriaLabel(label) => Some(format!("[aria-label=\"{}\"]", label)),
            Self::Text(..) => None,
        }
    }
}

/// Ordered locator table keyed by logical element name.
#[derive(Debug, Clone)]
pub struct SelectorTable {
    entries: HashMap<&'static str, Vec<Locator>>,
    /// Per-attempt resolution timeout.
    pub attempt_timeout: Duration,
}

impl SelectorTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            attempt_timeout: Duration::from_millis(1500),
        }
    }

    pub fn insert(&mut self, name: &'static str, locators: Vec<Locator>) {
        self.entries.insert(name, locators);
    }

    /// Locators for a logical element, in fallback order.
    pub fn locators(&self, name: &str) -> &[Locator] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn knows(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// The production table, built once and cloned per session.
    pub fn shared() -> &'static SelectorTable {
        &PRODUCTION_TABLE
    }
}

impl Default for SelectorTable {
    /// The production table for the target site. Ordering matters: primary
    /// selectors first, localized text variants next, structural guesses
    /// last.
    fn default() -> Self {
        let mut table = Self::empty();

        // Login page
        table.insert(
            "login.username",
            vec![
                Locator::Css("input[name='username']"),
                Locator::Css("input[autocomplete='username']"),
                Locator::AriaLabel("Phone number, username, or email"),
            ],
        );
        table.insert(
            "login.password",
            vec![
                Locator::Css("input[name='password']"),
                Locator::Css("input[type='password']"),
            ],
        );
        table.insert(
            "login.submit",
            vec![
                Locator::Css("button[type='submit']"),
                Locator::Text("button", "log in"),
            ],
        );
        table.insert(
            "login.error_banner",
            vec![
                Locator::Css("#slfErrorAlert"),
                Locator::Text("div[role='alert']", "password was incorrect"),
                Locator::Text("p", "password was incorrect"),
            ],
        );
        table.insert(
            "login.suspended_banner",
            vec![
                Locator::Text("h2", "account has been suspended"),
                Locator::Text("div", "account has been disabled"),
            ],
        );
        table.insert(
            "login.logged_in_marker",
            vec![
                Locator::Css("svg[aria-label='Home']"),
                Locator::Css("a[href='/']"),
                Locator::AriaLabel("Home"),
            ],
        );

        // Challenges
        table.insert(
            "challenge.cookie_accept",
            vec![
                Locator::Text("button", "allow all cookies"),
                Locator::Text("button", "accept all"),
                Locator::Css("button[data-cookiebanner='accept_button']"),
            ],
        );
        table.insert(
            "challenge.code_input",
            vec![
                Locator::Css("input[name='verificationCode']"),
                Locator::Css("input[name='security_code']"),
                Locator::AriaLabel("Security code"),
            ],
        );
        table.insert(
            "challenge.code_submit",
            vec![
                Locator::Text("button", "confirm"),
                Locator::Text("button", "submit"),
                Locator::Css("button[type='button']"),
            ],
        );
        table.insert(
            "challenge.captcha_frame",
            vec![
                Locator::Css("iframe[src*='recaptcha']"),
                Locator::Css("iframe[src*='hcaptcha']"),
                Locator::Css("#captcha"),
            ],
        );
        table.insert(
            "challenge.captcha_sitekey",
            vec![Locator::Css("[data-sitekey]")],
        );
        table.insert(
            "challenge.save_info_dismiss",
            vec![
                Locator::Text("button", "not now"),
                Locator::Css("div[role='dialog'] button:nth-of-type(2)"),
            ],
        );
        table.insert(
            "challenge.phone_verification",
            vec![
                Locator::Text("h2", "confirm your phone number"),
                Locator::Css("input[name='phone_number']"),
            ],
        );
        table.insert(
            "challenge.human_verification",
            vec![
                Locator::Text("h2", "confirm it's you"),
                Locator::Text("div", "suspicious login attempt"),
            ],
        );
        table.insert(
            "challenge.forced_logout",
            vec![
                Locator::Text("div", "you've been logged out"),
                Locator::Css("form[action*='login'] input[name='username']"),
            ],
        );

        // Composer / upload
        table.insert(
            "composer.open",
            vec![
                Locator::Css("svg[aria-label='New post']"),
                Locator::AriaLabel("New post"),
                Locator::Text("span", "create"),
            ],
        );
        table.insert(
            "composer.file_input",
            vec![
                Locator::Css("input[type='file'][accept*='video']"),
                Locator::Css("form[method='POST'] input[type='file']"),
                Locator::Css("input[type='file']"),
            ],
        );
        table.insert(
            "composer.crop_next",
            vec![
                Locator::Text("button", "next"),
                Locator::Css("div[role='dialog'] button"),
            ],
        );
        table.insert(
            "composer.caption_input",
            vec![
                Locator::AriaLabel("Write a caption..."),
                Locator::Css("div[contenteditable='true']"),
                Locator::Css("textarea[aria-label*='caption']"),
            ],
        );
        table.insert(
            "composer.location_input",
            vec![
                Locator::Css("input[name='creation-location-input']"),
                Locator::AriaLabel("Add location"),
            ],
        );
        table.insert(
            "composer.location_first_result",
            vec![Locator::Css("div[role='listbox'] > div:first-child")],
        );
        table.insert(
            "composer.share",
            vec![
                Locator::Text("button", "share"),
                Locator::Text("div[role='button']", "share"),
            ],
        );
        table.insert(
            "composer.shared_confirmation",
            vec![
                Locator::Text("span", "your post has been shared"),
                Locator::Text("div", "post shared"),
                Locator::Css("img[alt*='Animated checkmark']"),
            ],
        );

        // Warm-up / follow
        table.insert(
            "nav.explore",
            vec![
                Locator::Css("a[href='/explore/']"),
                Locator::AriaLabel("Explore"),
            ],
        );
        table.insert(
            "profile.follow_button",
            vec![
                Locator::Text("button", "follow"),
                Locator::Css("header button:first-of-type"),
            ],
        );
        table.insert(
            "profile.following_marker",
            vec![
                Locator::Text("button", "following"),
                Locator::Text("button", "requested"),
            ],
        );

        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_element_has_no_locators() {
        let table = SelectorTable::default();
        assert!(table.locators("no.such.element").is_empty());
        assert!(!table.knows("no.such.element"));
    }

    #[test]
    fn fallback_order_is_preserved() {
        let table = SelectorTable::default();
        let locators = table.locators("login.username");
        assert!(locators.len() >= 2);
        assert_eq!(locators[0], Locator::Css("input[name='username']"));
    }

    #[test]
    fn aria_label_renders_as_css() {
        let loc = Locator::AriaLabel("Home");
        assert_eq!(loc.as_css().unwrap(), "[aria-label=\"Home\"]");
        assert!(Locator::Text("button", "share").as_css().is_none());
    }
}
