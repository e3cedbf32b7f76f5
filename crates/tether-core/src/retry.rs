//! Reconnect backoff configuration and delay calculation.
//!
//! The schedule is a capped exponential: the delay before attempt `n` is
//! `min(max_delay, base * multiplier^min(n, exponent_cap))`. Without jitter
//! the sequence is non-decreasing and bounded, which is what the reconnect
//! state machine relies on. A jittered variant exists for deployments that
//! want to spread simultaneous reconnect storms; the caller supplies the
//! randomness so this module stays deterministic and testable.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default backoff multiplier.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
/// Default cap on the backoff exponent.
pub const DEFAULT_EXPONENT_CAP: u32 = 6;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0; 0 disables jitter).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.0;

/// Parameters for the reconnect backoff schedule.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Base delay before the first retry in ms (default: 500).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Growth factor applied per attempt (default: 2.0).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Cap on the exponent so delay growth levels off (default: 6).
    #[serde(default = "default_exponent_cap")]
    pub exponent_cap: u32,
    /// Maximum delay between retries in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0 (default: 0, disabled).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}
fn default_exponent_cap() -> u32 {
    DEFAULT_EXPONENT_CAP
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
            exponent_cap: DEFAULT_EXPONENT_CAP,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    /// Delay before the given zero-based attempt, without jitter.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        backoff_delay_ms(
            attempt,
            self.base_delay_ms,
            self.multiplier,
            self.exponent_cap,
            self.max_delay_ms,
        )
    }

    /// Delay before the given attempt as a [`std::time::Duration`], applying
    /// jitter when `jitter_factor > 0`. `random` must be in `[0.0, 1.0)`.
    #[must_use]
    pub fn delay(&self, attempt: u32, random: f64) -> std::time::Duration {
        let ms = if self.jitter_factor > 0.0 {
            backoff_delay_ms_with_random(
                attempt,
                self.base_delay_ms,
                self.multiplier,
                self.exponent_cap,
                self.max_delay_ms,
                self.jitter_factor,
                random,
            )
        } else {
            self.delay_ms(attempt)
        };
        std::time::Duration::from_millis(ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate the capped exponential backoff delay.
///
/// Formula: `min(max_delay, base * multiplier^min(attempt, exponent_cap))`
///
/// The exponent cap bounds the growth of the multiplier term before the
/// absolute cap applies, so the result stays well inside `u64` range for any
/// attempt number.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay_ms(
    attempt: u32,
    base_delay_ms: u64,
    multiplier: f64,
    exponent_cap: u32,
    max_delay_ms: u64,
) -> u64 {
    let exponent = attempt.min(exponent_cap);
    let exponential = (base_delay_ms as f64) * multiplier.max(1.0).powi(exponent as i32);
    let capped = exponential.min(max_delay_ms as f64);
    capped.round() as u64
}

/// Backoff delay with explicit randomness.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG. Jitter is
/// symmetric: a factor of 0.2 shifts the deterministic delay by up to ±20%.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay_ms_with_random(
    attempt: u32,
    base_delay_ms: u64,
    multiplier: f64,
    exponent_cap: u32,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let capped = backoff_delay_ms(attempt, base_delay_ms, multiplier, exponent_cap, max_delay_ms);

    // Maps random [0,1) to a [-jitter, +jitter] scale factor.
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
