//! Human-pacing primitives.
//!
//! Pure timing/geometry generators consumed by the session driver: delay
//! sampling from configured ranges, keystroke schedules with variable speed
//! and occasional "thinking" pauses, cubic-bezier pointer paths with
//! overshoot, and stepped scroll plans with jitter. Pacing never retries
//! anything; it only shapes when and where raw actions land.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Delay ranges for paced interactions, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingConfig {
    /// Pause before any terminal action (click, submit).
    pub pre_action_min_ms: u64,
    pub pre_action_max_ms: u64,
    /// Delay between keystrokes.
    pub keystroke_min_ms: u64,
    pub keystroke_max_ms: u64,
    /// Longer pause injected between words and occasionally mid-word.
    pub pause_min_ms: u64,
    pub pause_max_ms: u64,
    /// Chance of a longer pause on any keystroke (0.0 - 1.0).
    pub pause_chance: f64,
    /// Delay between scroll wheel steps.
    pub scroll_step_min_ms: u64,
    pub scroll_step_max_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            pre_action_min_ms: 150,
            pre_action_max_ms: 600,
            keystroke_min_ms: 60,
            keystroke_max_ms: 180,
            pause_min_ms: 200,
            pause_max_ms: 500,
            pause_chance: 0.08,
            scroll_step_min_ms: 80,
            scroll_step_max_ms: 200,
        }
    }
}

/// One planned keystroke.
#[derive(Debug, Clone, PartialEq)]
pub struct Keystroke {
    pub ch: char,
    /// Delay before this keystroke is dispatched.
    pub delay: Duration,
}

/// A point on a pointer path with the dwell time before moving on.
#[derive(Debug, Clone, Copy)]
pub struct PathPoint {
    pub x: f64,
    pub y: f64,
    pub delay: Duration,
}

/// Stateless pacing generator.
#[derive(Debug, Clone)]
pub struct Pacer {
    config: PacingConfig,
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// Pause before a terminal action.
    pub fn pre_action_delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        Duration::from_millis(
            rng.gen_range(self.config.pre_action_min_ms..=self.config.pre_action_max_ms),
        )
    }

    /// Keystroke schedule for a full string. Spaces and a small random share
    /// of other characters get the longer "thinking" pause.
    pub fn typing_schedule(&self, text: &str) -> Vec<Keystroke> {
        let mut rng = rand::thread_rng();
        text.chars()
            .map(|ch| {
                let base =
                    rng.gen_range(self.config.keystroke_min_ms..=self.config.keystroke_max_ms);
                let ms = if ch == ' ' || rng.gen_bool(self.config.pause_chance) {
                    rng.gen_range(self.config.pause_min_ms..=self.config.pause_max_ms)
                } else {
                    base
                };
                Keystroke {
                    ch,
                    delay: Duration::from_millis(ms),
                }
            })
            .collect()
    }

    /// Cubic-bezier pointer path from a random start to the target, with
    /// slight overshoot on the far control point and ease-in/out dwell
    /// times (fast through the middle, slower at both ends).
    pub fn pointer_path(&self, target_x: f64, target_y: f64) -> Vec<PathPoint> {
        let mut rng = rand::thread_rng();

        let start_x: f64 = rng.gen_range(100.0..800.0);
        let start_y: f64 = rng.gen_range(100.0..500.0);

        let overshoot = rng.gen_range(0.0..15.0);
        let cp1_x = start_x + (target_x - start_x) * 0.25 + rng.gen_range(-50.0..50.0);
        let cp1_y = start_y + (target_y - start_y) * 0.25 + rng.gen_range(-40.0..40.0);
        let cp2_x = target_x + overshoot * rng.gen_range(-1.0..1.0);
        let cp2_y = target_y + overshoot * rng.gen_range(-1.0..1.0);

        let distance = ((target_x - start_x).powi(2) + (target_y - start_y).powi(2)).sqrt();
        let steps = (15.0 + distance / 30.0).min(40.0) as i32;

        (0..=steps)
            .map(|i| {
                let t = i as f64 / steps as f64;
                let mt = 1.0 - t;

                let x = mt.powi(3) * start_x
                    + 3.0 * mt.powi(2) * t * cp1_x
                    + 3.0 * mt * t.powi(2) * cp2_x
                    + t.powi(3) * target_x;
                let y = mt.powi(3) * start_y
                    + 3.0 * mt.powi(2) * t * cp1_y
                    + 3.0 * mt * t.powi(2) * cp2_y
                    + t.powi(3) * target_y;

                let speed_factor = 1.0 - (2.0 * t - 1.0).abs();
                let delay_ms =
                    (8.0 + 12.0 * (1.0 - speed_factor) + rng.gen_range(0.0..5.0)) as u64;

                PathPoint {
                    x,
                    y,
                    delay: Duration::from_millis(delay_ms),
                }
            })
            .collect()
    }

    /// Click offset jitter: humans don't hit pixel centers.
    pub fn click_jitter(&self) -> (f64, f64) {
        let mut rng = rand::thread_rng();
        (rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0))
    }

    /// Hold duration between mouse down and up.
    pub fn click_hold(&self) -> Duration {
        Duration::from_millis(rand::thread_rng().gen_range(40..120))
    }

    /// Scroll plan: total delta split into a few jittered wheel steps.
    pub fn scroll_steps(&self, delta_y: i32) -> Vec<(i32, Duration)> {
        let mut rng = rand::thread_rng();
        let steps = 3 + rng.gen_range(0..3);
        let per_step = delta_y / steps;

        (0..steps)
            .map(|_| {
                let jitter = rng.gen_range(-20..20);
                let ms = rng
                    .gen_range(self.config.scroll_step_min_ms..=self.config.scroll_step_max_ms);
                (per_step + jitter, Duration::from_millis(ms))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_schedule_covers_all_chars() {
        let pacer = Pacer::new(PacingConfig::default());
        let schedule = pacer.typing_schedule("hello world");
        let typed: String = schedule.iter().map(|k| k.ch).collect();
        assert_eq!(typed, "hello world");
    }

    #[test]
    fn keystroke_delays_stay_in_range() {
        let config = PacingConfig::default();
        let pacer = Pacer::new(config.clone());
        for ks in pacer.typing_schedule("abcdefgh") {
            let ms = ks.delay.as_millis() as u64;
            assert!(ms >= config.keystroke_min_ms);
            assert!(ms <= config.pause_max_ms);
        }
    }

    #[test]
    fn pointer_path_ends_at_target() {
        let pacer = Pacer::new(PacingConfig::default());
        let path = pacer.pointer_path(640.0, 360.0);
        let last = path.last().unwrap();
        assert!((last.x - 640.0).abs() < 0.01);
        assert!((last.y - 360.0).abs() < 0.01);
        assert!(path.len() >= 15);
    }

    #[test]
    fn scroll_steps_sum_close_to_delta() {
        let pacer = Pacer::new(PacingConfig::default());
        let steps = pacer.scroll_steps(600);
        let total: i32 = steps.iter().map(|(d, _)| d).sum();
        // Jitter is bounded at 20 per step.
        assert!((total - 600).abs() <= 20 * steps.len() as i32 + 600 % steps.len() as i32);
    }
}
