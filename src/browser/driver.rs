//! Session driver bound to one account's anti-detect profile.
//!
//! The profile provider launches the fingerprint-isolated browser and hands
//! back a CDP websocket endpoint; the driver connects to it, owns the single
//! page it works on, and dispatches all input through paced CDP events so
//! nothing on the page can distinguish the session from manual use.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::pacing::Pacer;
use crate::selectors::{Locator, SelectorTable};

use super::{DriverError, Surface};

/// Driver configuration carried in from the app config.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Bound for navigation and script execution.
    pub action_timeout_secs: u64,
    /// Poll interval while waiting for an element to appear.
    pub wait_poll_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: 30,
            wait_poll_ms: 500,
        }
    }
}

/// One browser-automation context bound to one account/profile.
pub struct SessionDriver {
    /// Display label (account username).
    pub label: String,
    browser: Arc<RwLock<Option<Browser>>>,
    page: Arc<RwLock<Option<Page>>>,
    handler_task: Option<tokio::task::JoinHandle<()>>,
    table: SelectorTable,
    pacer: Pacer,
    config: DriverConfig,
    alive: Arc<AtomicBool>,
    action_count: Arc<AtomicU64>,
}

impl SessionDriver {
    /// Connect to a profile's CDP endpoint and take over its first page.
    pub async fn connect(
        endpoint: &str,
        label: &str,
        table: SelectorTable,
        pacer: Pacer,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        info!("Session {} connecting to profile endpoint", label);

        let (browser, mut handler) = Browser::connect(endpoint)
            .await
            .map_err(|e| DriverError::ConnectFailed(e.to_string()))?;

        // Drive the CDP event stream; when it ends the browser is gone.
        let alive = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive.clone();
        let label_for_handler = label.to_string();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Session {} browser event: {:?}", label_for_handler, event);
            }
            warn!(
                "Session {} browser disconnected (event handler ended)",
                label_for_handler
            );
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        // Use the profile's existing tab; close stray blanks.
        let page = {
            let mut pages = browser
                .pages()
                .await
                .map_err(|e| DriverError::ConnectFailed(e.to_string()))?;

            let main_page = if !pages.is_empty() {
                pages.remove(0)
            } else {
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| DriverError::ConnectFailed(e.to_string()))?
            };

            for extra in pages {
                debug!("Closing extra blank tab");
                let _ = extra.close().await;
            }

            main_page
        };

        info!("Session {} connected", label);

        Ok(Self {
            label: label.to_string(),
            browser: Arc::new(RwLock::new(Some(browser))),
            page: Arc::new(RwLock::new(Some(page))),
            handler_task: Some(handler_task),
            table,
            pacer,
            config,
            alive,
            action_count: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn action_count(&self) -> u64 {
        self.action_count.load(Ordering::Relaxed)
    }

    /// PNG screenshot of the current page, base64-encoded for log capture.
    pub async fn screenshot_b64(&self) -> Result<String, DriverError> {
        use base64::Engine;

        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| DriverError::ConnectionLost("No active page".into()))?;

        let bytes = self
            .bounded(
                page.screenshot(
                    ScreenshotParams::builder()
                        .format(CaptureScreenshotFormat::Png)
                        .build(),
                ),
                "screenshot",
            )
            .await?
            .map_err(|e| DriverError::JavaScriptError(e.to_string()))?;

        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Disconnect from the profile. Tearing the browser itself down is the
    /// provider's job (`stop(profile_id)`); the driver only drops its CDP
    /// connection and stops the event loop.
    pub async fn close(mut self) {
        self.alive.store(false, Ordering::Relaxed);

        {
            let mut page = self.page.write().await;
            page.take();
        }
        {
            let mut browser = self.browser.write().await;
            browser.take();
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }

        info!("Session {} disconnected", self.label);
    }

    /// Run a driver future under the configured action timeout.
    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = T>,
        what: &str,
    ) -> Result<T, DriverError> {
        tokio::time::timeout(Duration::from_secs(self.config.action_timeout_secs), fut)
            .await
            .map_err(|_| {
                DriverError::Timeout(format!(
                    "{} timed out after {}s",
                    what, self.config.action_timeout_secs
                ))
            })
    }

    async fn run_js(&self, script: &str) -> Result<serde_json::Value, DriverError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| DriverError::ConnectionLost("No active page".into()))?;

        let result = self
            .bounded(page.evaluate(script), "script execution")
            .await?
            .map_err(|e| DriverError::JavaScriptError(e.to_string()))?;

        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Script returning the viewport center of the first match for one
    /// locator, or null. Selector strings are JSON-escaped into the script.
    fn locator_probe(locator: &Locator) -> String {
        match locator {
            Locator::Css(_) | Locator::AriaLabel(_) => {
                let sel = serde_json::to_string(&locator.as_css().unwrap_or_default())
                    .unwrap_or_else(|_| "\"\"".into());
                format!(
                    r#"(function() {{
                        const el = document.querySelector({sel});
                        if (!el) return null;
                        const r = el.getBoundingClientRect();
                        if (r.width === 0 && r.height === 0) return null;
                        return {{ x: r.left + r.width / 2, y: r.top + r.height / 2 }};
                    }})()"#
                )
            }
            Locator::Text(scope, text) => {
                let scope = serde_json::to_string(scope).unwrap_or_else(|_| "\"*\"".into());
                let text = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".into());
                format!(
                    r#"(function() {{
                        const needle = {text}.toLowerCase();
                        for (const el of document.querySelectorAll({scope})) {{
                            const t = (el.innerText || '').toLowerCase();
                            if (!t.includes(needle)) continue;
                            const r = el.getBoundingClientRect();
                            if (r.width === 0 && r.height === 0) continue;
                            return {{ x: r.left + r.width / 2, y: r.top + r.height / 2 }};
                        }}
                        return null;
                    }})()"#
                )
            }
        }
    }

    /// Try each locator in fallback order; first hit wins. Returns the
    /// element's viewport center so input can be dispatched positionally.
    async fn resolve_point(&self, logical: &str) -> Result<Option<(f64, f64)>, DriverError> {
        for locator in self.table.locators(logical) {
            let probe = Self::locator_probe(locator);
            let value = match tokio::time::timeout(self.table.attempt_timeout, self.run_js(&probe))
                .await
            {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => return Err(e),
                // Per-attempt timeout: fall through to the next locator.
                Err(_) => continue,
            };

            if let (Some(x), Some(y)) = (
                value.get("x").and_then(|v| v.as_f64()),
                value.get("y").and_then(|v| v.as_f64()),
            ) {
                return Ok(Some((x, y)));
            }
        }
        Ok(None)
    }

    /// Same walk, returning a script expression that re-locates the element
    /// for read operations (text, attributes).
    async fn resolve_value(
        &self,
        logical: &str,
        extract: &str,
    ) -> Result<Option<serde_json::Value>, DriverError> {
        for locator in self.table.locators(logical) {
            let script = match locator {
                Locator::Css(_) | Locator::AriaLabel(_) => {
                    let sel = serde_json::to_string(&locator.as_css().unwrap_or_default())
                        .unwrap_or_else(|_| "\"\"".into());
                    format!(
                        r#"(function() {{
                            const el = document.querySelector({sel});
                            if (!el) return null;
                            return ({extract})(el);
                        }})()"#
                    )
                }
                Locator::Text(scope, text) => {
                    let scope = serde_json::to_string(scope).unwrap_or_else(|_| "\"*\"".into());
                    let text = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".into());
                    format!(
                        r#"(function() {{
                            const needle = {text}.toLowerCase();
                            for (const el of document.querySelectorAll({scope})) {{
                                if (((el.innerText || '').toLowerCase()).includes(needle)) {{
                                    return ({extract})(el);
                                }}
                            }}
                            return null;
                        }})()"#
                    )
                }
            };

            let value = match tokio::time::timeout(self.table.attempt_timeout, self.run_js(&script))
                .await
            {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => return Err(e),
                Err(_) => continue,
            };

            if !value.is_null() {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Paced pointer move along a bezier path, then a jittered click.
    async fn click_at(&self, x: f64, y: f64) -> Result<(), DriverError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| DriverError::ConnectionLost("No active page".into()))?;

        for point in self.pacer.pointer_path(x, y) {
            let move_event = DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MouseMoved)
                .x(point.x)
                .y(point.y)
                .button(MouseButton::None)
                .build()
                .unwrap();
            let _ = page.execute(move_event).await;
            tokio::time::sleep(point.delay).await;
        }

        let (jx, jy) = self.pacer.click_jitter();
        let (click_x, click_y) = (x + jx, y + jy);

        tokio::time::sleep(self.pacer.pre_action_delay()).await;

        let mouse_down = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(click_x)
            .y(click_y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .unwrap();
        page.execute(mouse_down)
            .await
            .map_err(|e| DriverError::JavaScriptError(format!("CDP mouseDown failed: {}", e)))?;

        tokio::time::sleep(self.pacer.click_hold()).await;

        let mouse_up = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(click_x)
            .y(click_y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .unwrap();
        page.execute(mouse_up)
            .await
            .map_err(|e| DriverError::JavaScriptError(format!("CDP mouseUp failed: {}", e)))?;

        self.action_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl Surface for SessionDriver {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| DriverError::ConnectionLost("No active page".into()))?;

        debug!("Session {} navigating to: {}", self.label, url);
        self.bounded(page.goto(url), "navigation")
            .await?
            .map_err(|e| DriverError::NavigationFailed(e.to_string()))?;

        self.bounded(page.wait_for_navigation(), "navigation settle")
            .await?
            .map_err(|e| DriverError::NavigationFailed(e.to_string()))?;

        Ok(())
    }

    async fn exists(&self, logical: &str) -> Result<bool, DriverError> {
        Ok(self.resolve_point(logical).await?.is_some())
    }

    async fn wait_for(&self, logical: &str, timeout_secs: u64) -> Result<bool, DriverError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
        loop {
            if self.resolve_point(logical).await?.is_some() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(self.config.wait_poll_ms)).await;
        }
    }

    async fn click(&self, logical: &str) -> Result<(), DriverError> {
        let (x, y) = self
            .resolve_point(logical)
            .await?
            .ok_or_else(|| DriverError::ElementNotFound(logical.to_string()))?;
        self.click_at(x, y).await
    }

    async fn type_text(&self, logical: &str, text: &str) -> Result<(), DriverError> {
        // Focus with a real click first.
        self.click(logical).await?;

        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| DriverError::ConnectionLost("No active page".into()))?;

        for keystroke in self.pacer.typing_schedule(text) {
            tokio::time::sleep(keystroke.delay).await;

            let key_down = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyDown)
                .text(keystroke.ch.to_string())
                .build()
                .unwrap();
            page.execute(key_down)
                .await
                .map_err(|e| DriverError::JavaScriptError(format!("CDP keyDown failed: {}", e)))?;

            let key_up = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyUp)
                .build()
                .unwrap();
            page.execute(key_up)
                .await
                .map_err(|e| DriverError::JavaScriptError(format!("CDP keyUp failed: {}", e)))?;
        }

        Ok(())
    }

    async fn upload_file(&self, logical: &str, path: &str) -> Result<(), DriverError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| DriverError::ConnectionLost("No active page".into()))?;

        // File inputs are located by CSS only; text scanning cannot address
        // hidden inputs.
        for locator in self.table.locators(logical) {
            let Some(css) = locator.as_css() else { continue };
            let element = match page.find_element(&css).await {
                Ok(el) => el,
                Err(_) => continue,
            };

            let params = SetFileInputFilesParams::builder()
                .files(vec![path.to_string()])
                .backend_node_id(element.backend_node_id)
                .build()
                .map_err(DriverError::UploadFailed)?;

            page.execute(params)
                .await
                .map_err(|e| DriverError::UploadFailed(e.to_string()))?;

            self.action_count.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        Err(DriverError::ElementNotFound(logical.to_string()))
    }

    async fn text_of(&self, logical: &str) -> Result<Option<String>, DriverError> {
        let value = self
            .resolve_value(logical, "el => el.innerText || el.value || ''")
            .await?;
        Ok(value.and_then(|v| v.as_str().map(|s| s.to_string())))
    }

    async fn attr_of(
        &self,
        logical: &str,
        attr: &str,
    ) -> Result<Option<String>, DriverError> {
        let attr_json = serde_json::to_string(attr).unwrap_or_else(|_| "\"\"".into());
        let extract = format!("el => el.getAttribute({attr_json})");
        let value = self.resolve_value(logical, &extract).await?;
        Ok(value.and_then(|v| v.as_str().map(|s| s.to_string())))
    }

    async fn scroll(&self, delta_y: i32) -> Result<(), DriverError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| DriverError::ConnectionLost("No active page".into()))?;

        for (step, delay) in self.pacer.scroll_steps(delta_y) {
            let scroll = DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MouseWheel)
                .x(400.0)
                .y(300.0)
                .button(MouseButton::None)
                .delta_x(0.0)
                .delta_y(step as f64)
                .build()
                .unwrap();
            page.execute(scroll)
                .await
                .map_err(|e| DriverError::JavaScriptError(format!("CDP scroll failed: {}", e)))?;
            tokio::time::sleep(delay).await;
        }

        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| DriverError::ConnectionLost("No active page".into()))?;

        page.url()
            .await
            .map_err(|e| DriverError::ConnectionLost(e.to_string()))?
            .ok_or_else(|| DriverError::ConnectionLost("No URL".into()))
    }

    async fn eval(&self, script: &str) -> Result<serde_json::Value, DriverError> {
        self.run_js(script).await
    }

    async fn cookies_json(&self) -> Result<String, DriverError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or_else(|| DriverError::ConnectionLost("No active page".into()))?;

        let cookies = self
            .bounded(page.get_cookies(), "cookie read")
            .await?
            .map_err(|e| DriverError::JavaScriptError(e.to_string()))?;

        serde_json::to_string(&cookies)
            .map_err(|e| DriverError::JavaScriptError(format!("cookie serialization: {}", e)))
    }
}
