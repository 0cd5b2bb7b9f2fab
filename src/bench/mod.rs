//! XOR sequence benchmark.
//!
//! Each input row is a random bit string split into two halves; the target
//! at position `t` is `first[t] xor second[t]`. A small embedding model is
//! trained with one optimizer variant until the loss drops below the win
//! threshold or the step budget runs out.

mod trial;
mod xor;

pub use trial::{trial, TrialReport};
pub use xor::{XorBatch, XorModel, XorSequenceTask};

use serde::{Deserialize, Serialize};

use crate::config::GroupConfig;
use crate::error::{OptimError, Result};
use crate::variant::Variant;

/// Loss below which a run counts as solved.
pub const WIN_LOSS: f64 = 0.1;

pub fn win(loss: f64) -> bool {
    loss < WIN_LOSS
}

/// Benchmark settings. Every field has a default, so a JSON file only needs
/// the fields it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub variant: Variant,
    /// Bits per row; split into two halves of `length / 2`.
    pub length: usize,
    /// Embedding width.
    pub size: usize,
    pub batch: usize,
    /// Step budget per attempt.
    pub steps: usize,
    pub seed: u64,
    /// Attempts before the trial is declared failed.
    pub failure_threshold: usize,
    /// Learning-rate multiplier applied after each failed attempt.
    pub retry_lr_factor: f64,
    /// Optimizer hyperparameters; `optimizer.lr` is the first attempt's rate.
    pub optimizer: GroupConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            variant: Variant::LaProp,
            length: 16,
            size: 16,
            batch: 32,
            steps: 5_000,
            seed: 0x1239121,
            failure_threshold: 10,
            retry_lr_factor: 0.5,
            optimizer: GroupConfig::new(0.01),
        }
    }
}

impl BenchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.length < 2 || self.length % 2 != 0 {
            return Err(OptimError::config(format!(
                "length must be even and at least 2, got {}",
                self.length
            )));
        }
        if self.size == 0 || self.batch == 0 {
            return Err(OptimError::config("size and batch must be positive"));
        }
        if self.failure_threshold == 0 {
            return Err(OptimError::config("failure_threshold must be at least 1"));
        }
        if !self.retry_lr_factor.is_finite() || self.retry_lr_factor <= 0.0 {
            return Err(OptimError::config("retry_lr_factor must be positive"));
        }
        self.optimizer.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win_is_strict() {
        assert!(win(0.099));
        assert!(!win(0.1));
        assert!(!win(f64::NAN));
    }

    #[test]
    fn config_from_partial_json() {
        let cfg: BenchConfig =
            serde_json::from_str(r#"{"variant": "AdamW", "steps": 10, "optimizer": {"lr": 0.003}}"#).unwrap();
        assert_eq!(cfg.variant, Variant::AdamW);
        assert_eq!(cfg.steps, 10);
        assert_eq!(cfg.optimizer.lr, 0.003);
        assert_eq!(cfg.failure_threshold, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn odd_length_is_rejected() {
        let cfg = BenchConfig {
            length: 7,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(OptimError::Configuration(_))));
    }
}
