//! CAPTCHA types and solver-service API models

use serde::{Deserialize, Serialize};

/// Supported CAPTCHA types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaType {
    RecaptchaV2,
    RecaptchaV3,
    Turnstile,
    HCaptcha,
}

impl CaptchaType {
    /// Token time-to-live in seconds
    pub fn token_ttl_secs(&self) -> u64 {
        match self {
            Self::RecaptchaV2 => 120,
            Self::RecaptchaV3 => 120,
            Self::Turnstile => 300,
            Self::HCaptcha => 120,
        }
    }

    /// Safe TTL with margin for network delays
    pub fn safe_token_ttl_secs(&self) -> u64 {
        const SAFETY_MARGIN: u64 = 15;
        self.token_ttl_secs().saturating_sub(SAFETY_MARGIN)
    }
}

/// A CAPTCHA discovered in-flow, described for the external solver.
#[derive(Debug, Clone)]
pub struct CaptchaChallenge {
    pub captcha_type: CaptchaType,
    pub sitekey: String,
    pub page_url: String,
    pub action: Option<String>,
    pub min_score: Option<f64>,
}

impl CaptchaChallenge {
    pub fn recaptcha_v2(sitekey: &str, page_url: &str) -> Self {
        Self {
            captcha_type: CaptchaType::RecaptchaV2,
            sitekey: sitekey.to_string(),
            page_url: page_url.to_string(),
            action: None,
            min_score: None,
        }
    }

    pub fn recaptcha_v3(sitekey: &str, page_url: &str, action: &str, min_score: f64) -> Self {
        Self {
            captcha_type: CaptchaType::RecaptchaV3,
            sitekey: sitekey.to_string(),
            page_url: page_url.to_string(),
            action: Some(action.to_string()),
            min_score: Some(min_score),
        }
    }

    pub fn hcaptcha(sitekey: &str, page_url: &str) -> Self {
        Self {
            captcha_type: CaptchaType::HCaptcha,
            sitekey: sitekey.to_string(),
            page_url: page_url.to_string(),
            action: None,
            min_score: None,
        }
    }
}

/// A solved token with timing
#[derive(Debug, Clone)]
pub struct CaptchaToken {
    pub token: String,
    pub solve_time_ms: u64,
}

/// CAPTCHA solver errors
#[derive(Debug, thiserror::Error)]
pub enum CaptchaError {
    #[error("API key missing")]
    ApiKeyMissing,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Task creation failed: {0}")]
    TaskCreationFailed(String),

    #[error("Solver API error: {0}")]
    ApiError(String),

    #[error("Solve timed out after {0}s")]
    Timeout(u64),
}

/// createTask request payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverCreateTask {
    pub client_key: String,
    pub task: SolverTask,
}

/// Task variants understood by the solver service
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum SolverTask {
    #[serde(rename = "RecaptchaV2TaskProxyless")]
    #[serde(rename_all = "camelCase")]
    RecaptchaV2Proxyless {
        website_url: String,
        website_key: String,
    },

    #[serde(rename = "RecaptchaV3TaskProxyless")]
    #[serde(rename_all = "camelCase")]
    RecaptchaV3Proxyless {
        website_url: String,
        website_key: String,
        page_action: String,
        min_score: f64,
    },

    #[serde(rename = "TurnstileTaskProxyless")]
    #[serde(rename_all = "camelCase")]
    TurnstileProxyless {
        website_url: String,
        website_key: String,
    },

    #[serde(rename = "HCaptchaTaskProxyless")]
    #[serde(rename_all = "camelCase")]
    HCaptchaProxyless {
        website_url: String,
        website_key: String,
    },
}

/// createTask response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverCreateResponse {
    #[serde(default)]
    pub error_id: i64,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
    pub task_id: Option<i64>,
}

/// getTaskResult request payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverGetResult {
    pub client_key: String,
    pub task_id: i64,
}

/// getTaskResult response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverResultResponse {
    #[serde(default)]
    pub error_id: i64,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
    pub status: Option<String>,
    pub solution: Option<SolverSolution>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverSolution {
    pub g_recaptcha_response: Option<String>,
    pub token: Option<String>,
}

impl SolverResultResponse {
    pub fn is_processing(&self) -> bool {
        self.status.as_deref() == Some("processing")
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_deref() == Some("ready")
    }

    pub fn get_token(&self) -> Option<&str> {
        self.solution
            .as_ref()
            .and_then(|s| s.g_recaptcha_response.as_deref().or(s.token.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_constructors() {
        let challenge = CaptchaChallenge::recaptcha_v3("key", "https://example.com", "login", 0.5);
        assert_eq!(challenge.captcha_type, CaptchaType::RecaptchaV3);
        assert_eq!(challenge.action.as_deref(), Some("login"));
    }

    #[test]
    fn result_token_prefers_recaptcha_field() {
        let response = SolverResultResponse {
            error_id: 0,
            error_code: None,
            error_description: None,
            status: Some("ready".into()),
            solution: Some(SolverSolution {
                g_recaptcha_response: Some("tok-a".into()),
                token: Some("tok-b".into()),
            }),
        };
        assert!(response.is_ready());
        assert_eq!(response.get_token(), Some("tok-a"));
    }

    #[test]
    fn safe_ttl_subtracts_margin() {
        assert_eq!(CaptchaType::RecaptchaV2.safe_token_ttl_secs(), 105);
    }
}
