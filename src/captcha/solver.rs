//! CAPTCHA solver client.
//!
//! Thin HTTP client for a 2Captcha-compatible solving service:
//! createTask, then poll getTaskResult until the token is ready or the
//! solve window closes. Flows consume it through the [`SolverApi`] trait so
//! tests can script outcomes.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use super::types::*;

/// Solver service base URL (2Captcha-compatible API)
const SOLVER_API: &str = "https://api.2captcha.com";

/// External solver collaborator seam.
#[async_trait]
pub trait SolverApi: Send + Sync {
    async fn solve(&self, challenge: &CaptchaChallenge) -> Result<CaptchaToken, CaptchaError>;
}

/// CAPTCHA solver using a 2Captcha-compatible service
pub struct CaptchaSolver {
    api_key: String,
    client: Client,
    poll_interval: Duration,
    max_solve_time: Duration,
}

impl CaptchaSolver {
    /// Create a new CAPTCHA solver
    pub fn new(api_key: &str) -> Result<Self, CaptchaError> {
        if api_key.is_empty() {
            return Err(CaptchaError::ApiKeyMissing);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CaptchaError::NetworkError(e.to_string()))?;

        Ok(Self {
            api_key: api_key.to_string(),
            client,
            poll_interval: Duration::from_secs(5),
            max_solve_time: Duration::from_secs(120),
        })
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set maximum solve time
    pub fn with_max_solve_time(mut self, timeout: Duration) -> Self {
        self.max_solve_time = timeout;
        self
    }

    /// Get account balance from the solver service
    pub async fn get_balance(&self) -> Result<f64, CaptchaError> {
        let url = format!(
            "https://2captcha.com/res.php?key={}&action=getbalance&json=1",
            self.api_key
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CaptchaError::NetworkError(e.to_string()))?;

        let text = response
            .text()
            .await
            .map_err(|e| CaptchaError::NetworkError(e.to_string()))?;

        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
            if let Some(balance) = json.get("request").and_then(|v| v.as_str()) {
                return balance
                    .parse()
                    .map_err(|_| CaptchaError::InvalidResponse(text));
            }
            if let Some(balance) = json.get("balance").and_then(|v| v.as_f64()) {
                return Ok(balance);
            }
        }

        text.trim()
            .parse()
            .map_err(|_| CaptchaError::InvalidResponse(text))
    }

    /// Create a task with the solver service
    async fn create_task(&self, challenge: &CaptchaChallenge) -> Result<i64, CaptchaError> {
        let url = format!("{}/createTask", SOLVER_API);

        let task = match challenge.captcha_type {
            CaptchaType::RecaptchaV2 => SolverTask::RecaptchaV2Proxyless {
                website_url: challenge.page_url.clone(),
                website_key: challenge.sitekey.clone(),
            },
            CaptchaType::RecaptchaV3 => SolverTask::RecaptchaV3Proxyless {
                website_url: challenge.page_url.clone(),
                website_key: challenge.sitekey.clone(),
                page_action: challenge
                    .action
                    .clone()
                    .unwrap_or_else(|| "verify".to_string()),
                min_score: challenge.min_score.unwrap_or(0.5),
            },
            CaptchaType::Turnstile => SolverTask::TurnstileProxyless {
                website_url: challenge.page_url.clone(),
                website_key: challenge.sitekey.clone(),
            },
            CaptchaType::HCaptcha => SolverTask::HCaptchaProxyless {
                website_url: challenge.page_url.clone(),
                website_key: challenge.sitekey.clone(),
            },
        };

        let create_request = SolverCreateTask {
            client_key: self.api_key.clone(),
            task,
        };

        debug!(
            "Solver createTask: type={:?}, url={}, sitekey={}...",
            challenge.captcha_type,
            &challenge.page_url[..challenge.page_url.len().min(80)],
            &challenge.sitekey[..challenge.sitekey.len().min(20)]
        );

        let response = self
            .client
            .post(&url)
            .json(&create_request)
            .send()
            .await
            .map_err(|e| CaptchaError::NetworkError(e.to_string()))?;

        let response_text = response
            .text()
            .await
            .map_err(|e| CaptchaError::NetworkError(e.to_string()))?;

        let result: SolverCreateResponse = serde_json::from_str(&response_text).map_err(|e| {
            CaptchaError::InvalidResponse(format!(
                "Parse error: {} - Response: {}",
                e,
                &response_text[..response_text.len().min(200)]
            ))
        })?;

        if result.error_id != 0 {
            let error_msg = format!(
                "errorId={}, code={}, desc={}",
                result.error_id,
                result.error_code.as_deref().unwrap_or("none"),
                result.error_description.as_deref().unwrap_or("none")
            );
            info!("Solver task creation failed: {}", error_msg);
            return Err(CaptchaError::TaskCreationFailed(error_msg));
        }

        let task_id = result
            .task_id
            .ok_or_else(|| CaptchaError::InvalidResponse("No task ID in response".into()))?;
        debug!("Solver task created: ID={}", task_id);
        Ok(task_id)
    }

    /// Get task result from the solver service
    async fn get_result(&self, task_id: i64) -> Result<Option<String>, CaptchaError> {
        let url = format!("{}/getTaskResult", SOLVER_API);

        let request = SolverGetResult {
            client_key: self.api_key.clone(),
            task_id,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CaptchaError::NetworkError(e.to_string()))?;

        let result: SolverResultResponse = response
            .json()
            .await
            .map_err(|e| CaptchaError::InvalidResponse(e.to_string()))?;

        if result.error_id != 0 {
            let error_msg = result
                .error_description
                .or(result.error_code)
                .unwrap_or_else(|| format!("Error ID: {}", result.error_id));
            return Err(CaptchaError::ApiError(error_msg));
        }

        if result.is_processing() {
            return Ok(None);
        }

        if result.is_ready() {
            if let Some(token) = result.get_token() {
                return Ok(Some(token.to_string()));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl SolverApi for CaptchaSolver {
    /// Solve a CAPTCHA: create a task and poll until ready or timed out.
    async fn solve(&self, challenge: &CaptchaChallenge) -> Result<CaptchaToken, CaptchaError> {
        let start = Instant::now();

        info!(
            "Solving {:?} CAPTCHA for {}",
            challenge.captcha_type, challenge.page_url
        );

        let task_id = self.create_task(challenge).await?;
        let deadline = Instant::now() + self.max_solve_time;

        loop {
            if Instant::now() > deadline {
                return Err(CaptchaError::Timeout(self.max_solve_time.as_secs()));
            }

            tokio::time::sleep(self.poll_interval).await;

            match self.get_result(task_id).await? {
                Some(token) => {
                    let solve_time_ms = start.elapsed().as_millis() as u64;
                    info!("CAPTCHA solved in {}ms", solve_time_ms);
                    return Ok(CaptchaToken {
                        token,
                        solve_time_ms,
                    });
                }
                None => {
                    debug!("Solver task {} still processing...", task_id);
                }
            }
        }
    }
}
