// Group hyperparameters
//
// Every parameter group carries one GroupConfig. It is fixed once the
// optimizer is built; the counters that do change while stepping (k,
// lr_max, weight_sum, train_mode) live in GroupProgress instead.
//
// DEFAULTS:
//   lr = 0.0025, betas = (0.9, 0.999, 0.999), alpha = 2.0, eps = 1e-8,
//   weight_decay = 0, warmup_steps = 1, no beta3/alpha warmup,
//   foreach = true, weight_lr_power = 2.0, r = 0.0

use serde::{Deserialize, Serialize};

use crate::error::{OptimError, Result};
use crate::moments::Denominator;

/// Decay coefficients.
///
/// `beta1` drives the fast average (or the schedule-free interpolation),
/// `beta2` the squared-gradient average and `beta3` the slow average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Betas {
    pub beta1: f64,
    pub beta2: f64,
    pub beta3: f64,
}

impl Default for Betas {
    fn default() -> Self {
        Betas {
            beta1: 0.9,
            beta2: 0.999,
            beta3: 0.999,
        }
    }
}

/// Two coefficients: the slow average reuses `beta2`.
impl From<(f64, f64)> for Betas {
    fn from((beta1, beta2): (f64, f64)) -> Self {
        Betas {
            beta1,
            beta2,
            beta3: beta2,
        }
    }
}

impl From<(f64, f64, f64)> for Betas {
    fn from((beta1, beta2, beta3): (f64, f64, f64)) -> Self {
        Betas {
            beta1,
            beta2,
            beta3,
        }
    }
}

/// Which moment(s) LaProp hands to the parameter update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaPropDirection {
    /// Only `exp_avg_slow`; the fast average is tracked but not applied.
    #[default]
    Slow,
    /// `exp_avg_fast + alpha * exp_avg_slow`.
    Blend,
}

/// Hyperparameters shared by every parameter of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub lr: f64,
    pub betas: Betas,
    /// Mixing weight of the slow average in [`LaPropDirection::Blend`].
    pub alpha: f64,
    pub eps: f64,
    /// Steps over which beta3 warms up from beta1 in half-life space.
    pub beta3_warmup: Option<u64>,
    /// Steps over which alpha warms up linearly from 0.
    pub alpha_warmup: Option<u64>,
    pub weight_decay: f64,
    /// Linear learning-rate warmup length; 1 means no warmup.
    pub warmup_steps: u64,
    /// Run each phase over the whole active batch instead of per parameter.
    pub foreach: bool,
    /// Schedule-free averaging weight is `lr_max^weight_lr_power * step^r`.
    pub weight_lr_power: f64,
    pub r: f64,
    pub direction: LaPropDirection,
    pub denominator: Denominator,
}

impl Default for GroupConfig {
    fn default() -> Self {
        GroupConfig {
            lr: 0.0025,
            betas: Betas::default(),
            alpha: 2.0,
            eps: 1e-8,
            beta3_warmup: None,
            alpha_warmup: None,
            weight_decay: 0.0,
            warmup_steps: 1,
            foreach: true,
            weight_lr_power: 2.0,
            r: 0.0,
            direction: LaPropDirection::Slow,
            denominator: Denominator::Sqrt,
        }
    }
}

impl GroupConfig {
    pub fn new(lr: f64) -> Self {
        GroupConfig {
            lr,
            ..Default::default()
        }
    }

    pub fn lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    /// Set the decay coefficients from a 2- or 3-tuple.
    pub fn betas(mut self, betas: impl Into<Betas>) -> Self {
        self.betas = betas.into();
        self
    }

    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn beta3_warmup(mut self, steps: u64) -> Self {
        self.beta3_warmup = Some(steps);
        self
    }

    pub fn alpha_warmup(mut self, steps: u64) -> Self {
        self.alpha_warmup = Some(steps);
        self
    }

    pub fn weight_decay(mut self, wd: f64) -> Self {
        self.weight_decay = wd;
        self
    }

    pub fn warmup_steps(mut self, steps: u64) -> Self {
        self.warmup_steps = steps;
        self
    }

    pub fn foreach(mut self, foreach: bool) -> Self {
        self.foreach = foreach;
        self
    }

    pub fn weight_lr_power(mut self, power: f64) -> Self {
        self.weight_lr_power = power;
        self
    }

    pub fn r(mut self, r: f64) -> Self {
        self.r = r;
        self
    }

    pub fn direction(mut self, direction: LaPropDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn denominator(mut self, denominator: Denominator) -> Self {
        self.denominator = denominator;
        self
    }

    /// Reject hyperparameters no variant can step with.
    pub fn validate(&self) -> Result<()> {
        if !self.lr.is_finite() || self.lr < 0.0 {
            return Err(OptimError::config(format!(
                "lr must be finite and non-negative, got {}",
                self.lr
            )));
        }
        let Betas {
            beta1,
            beta2,
            beta3,
        } = self.betas;
        for (name, beta) in [("beta1", beta1), ("beta2", beta2), ("beta3", beta3)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(OptimError::config(format!(
                    "{name} must be in [0, 1), got {beta}"
                )));
            }
        }
        // A zero gradient entry divides by eps alone.
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(OptimError::config(format!(
                "eps must be finite and positive, got {}",
                self.eps
            )));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(OptimError::config(format!(
                "weight_decay must be finite and non-negative, got {}",
                self.weight_decay
            )));
        }
        if self.warmup_steps < 1 {
            return Err(OptimError::config("warmup_steps must be at least 1"));
        }
        if self.beta3_warmup == Some(0) {
            return Err(OptimError::config("beta3_warmup must be at least 1 when set"));
        }
        if self.alpha_warmup == Some(0) {
            return Err(OptimError::config("alpha_warmup must be at least 1 when set"));
        }
        if !self.alpha.is_finite() {
            return Err(OptimError::config("alpha must be finite"));
        }
        if !self.weight_lr_power.is_finite() || self.weight_lr_power < 0.0 {
            return Err(OptimError::config(
                "weight_lr_power must be finite and non-negative",
            ));
        }
        if !self.r.is_finite() {
            return Err(OptimError::config("r must be finite"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = GroupConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.betas, Betas::from((0.9, 0.999, 0.999)));
        assert_eq!(cfg.warmup_steps, 1);
    }

    #[test]
    fn two_betas_reuse_beta2_for_slow_average() {
        let cfg = GroupConfig::new(0.01).betas((0.8, 0.95));
        assert_eq!(cfg.betas.beta3, 0.95);
    }

    #[test]
    fn rejects_bad_hyperparameters() {
        let bad = [
            GroupConfig::new(-1.0),
            GroupConfig::new(f64::NAN),
            GroupConfig::default().warmup_steps(0),
            GroupConfig::default().betas((1.0, 0.9)),
            GroupConfig::default().betas((0.9, 0.9, -0.1)),
            GroupConfig::default().eps(-1e-8),
            GroupConfig::default().eps(0.0),
            GroupConfig::default().eps(f64::INFINITY),
            GroupConfig::default().weight_decay(-0.1),
            GroupConfig::default().beta3_warmup(0),
            GroupConfig::default().alpha_warmup(0),
        ];
        for cfg in bad {
            assert!(
                matches!(cfg.validate(), Err(OptimError::Configuration(_))),
                "{cfg:?} should be rejected"
            );
        }
    }

    #[test]
    fn zero_beta3_is_allowed() {
        assert!(GroupConfig::default().betas((0.0, 0.9, 0.0)).validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: GroupConfig =
            serde_json::from_str(r#"{"lr": 0.01, "betas": {"beta1": 0.0}, "direction": "blend"}"#)
                .unwrap();
        assert_eq!(cfg.lr, 0.01);
        assert_eq!(cfg.betas.beta1, 0.0);
        assert_eq!(cfg.betas.beta2, 0.999);
        assert_eq!(cfg.direction, LaPropDirection::Blend);
        assert_eq!(cfg.eps, 1e-8);
    }
}
