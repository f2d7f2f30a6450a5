//! Browser session driving.
//!
//! One [`SessionDriver`] owns one CDP connection to an anti-detect profile
//! started by the external provider, bound to exactly one account for the
//! lifetime of a sub-task. Flows never see raw selectors or CDP types; they
//! talk to the [`Surface`] seam in terms of logical element names so the
//! state machines survive UI churn and can be exercised against scripted
//! fakes in tests.

mod driver;
mod errors;

pub use driver::{DriverConfig, SessionDriver};
pub use errors::DriverError;

use async_trait::async_trait;

/// The page surface a flow drives, keyed by logical element names from the
/// selector table. "Not found" is a value, not an error; only transport
/// failures (navigation, lost connection, timeout) surface as errors.
#[async_trait]
pub trait Surface: Send {
    /// Navigate and wait for the load to settle.
    async fn goto(&self, url: &str) -> Result<(), DriverError>;

    /// Whether the logical element currently resolves on the page.
    async fn exists(&self, logical: &str) -> Result<bool, DriverError>;

    /// Poll for the logical element to appear within the given window.
    async fn wait_for(&self, logical: &str, timeout_secs: u64) -> Result<bool, DriverError>;

    /// Paced click on the logical element. Errors if it never resolves.
    async fn click(&self, logical: &str) -> Result<(), DriverError>;

    /// Paced keystroke-by-keystroke typing into the logical element.
    async fn type_text(&self, logical: &str, text: &str) -> Result<(), DriverError>;

    /// Attach a local file to the logical file-input element.
    async fn upload_file(&self, logical: &str, path: &str) -> Result<(), DriverError>;

    /// Visible text of the logical element, if it resolves.
    async fn text_of(&self, logical: &str) -> Result<Option<String>, DriverError>;

    /// Attribute value on the logical element, if it resolves.
    async fn attr_of(&self, logical: &str, attr: &str)
        -> Result<Option<String>, DriverError>;

    /// Paced scroll by the given wheel delta.
    async fn scroll(&self, delta_y: i32) -> Result<(), DriverError>;

    /// Current page URL.
    async fn current_url(&self) -> Result<String, DriverError>;

    /// Run a script on the page. Reserved for the challenge handler's token
    /// injection; flows branch on logical elements instead.
    async fn eval(&self, script: &str) -> Result<serde_json::Value, DriverError>;

    /// Serialized cookie jar for the current context.
    async fn cookies_json(&self) -> Result<String, DriverError>;
}
