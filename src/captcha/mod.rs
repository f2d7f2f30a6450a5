//! CAPTCHA solving via an external solver service.

mod solver;
mod types;

pub use solver::{CaptchaSolver, SolverApi};
pub use types::{CaptchaChallenge, CaptchaError, CaptchaToken, CaptchaType};
