// LaProp — Momentum over normalized gradients, on two time scales
//
// Adam averages raw gradients and divides by the second moment afterwards.
// LaProp divides FIRST and averages the normalized gradient:
//
//   v      = β2' v + (1 - β2') g²                 denom = √v + ε
//   m_fast = β1' m_fast + (1 - β1') g / denom     (skipped when β1 = 0)
//   m_slow = β3' m_slow + (1 - β3') g / denom
//   θ      = θ (1 - lr λ) - lr m_slow
//
// The primes mark coefficients debiased for step k + 1 (see moments.rs), so
// no bias correction is applied to the averages afterwards.
//
// Both averages are always tracked. By default only the slow one reaches
// the parameters; LaPropDirection::Blend applies m_fast + α m_slow instead.
// With β1 = 0 the fast average is never allocated and its value is the
// normalized gradient itself.
//
// WARMUPS (all optional, all evaluated at the current k):
//   lr:    linear from 0 over warmup_steps (evaluated at k + 1)
//   α:     linear from 0 over alpha_warmup
//   β3:    from β1 in half-life space over beta3_warmup
//
// HYPERPARAMETERS (defaults):
//   lr = 0.0025, betas = (0.9, 0.999, 0.999), α = 2.0, ε = 1e-8, λ = 0

use crate::config::{GroupConfig, LaPropDirection};
use crate::error::Result;
use crate::foreach::{as_slices, zip_map};
use crate::moments::{beta_debias, normalize, update_normalized_moment, update_second_moment};
use crate::optimizer::{
    buffers, buffers_mut, ActiveBatch, Direction, GroupProgress, StepScalars, UpdateStrategy,
};
use crate::param::Param;
use crate::schedule::{linear_half_life_warmup, linear_warmup, scheduled_lr};
use crate::state::{ParamState, StateName};

/// LaProp with a fast and a slow normalized-gradient average.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaProp;

impl UpdateStrategy for LaProp {
    fn name(&self) -> &'static str {
        "ForeachLaProp"
    }

    fn prepare_state(&self, config: &GroupConfig, param: &Param, state: &mut ParamState) {
        let shape = param.shape();
        if config.betas.beta1 != 0.0 {
            state.ensure_zeros(StateName::ExpAvgFast, shape);
        } else {
            state.skip(StateName::ExpAvgFast);
        }
        state.ensure_zeros(StateName::ExpAvgSlow, shape);
        state.ensure_zeros(StateName::ExpAvgSq, shape);
    }

    fn schedule(&self, config: &GroupConfig, progress: &GroupProgress) -> StepScalars {
        let k = progress.k;
        let betas = config.betas;

        let alpha = match config.alpha_warmup {
            Some(w) => linear_warmup(k, config.alpha, 0.0, w),
            None => config.alpha,
        };
        let beta3 = match config.beta3_warmup {
            Some(w) => linear_half_life_warmup(k, betas.beta3, betas.beta1, w),
            None => betas.beta3,
        };

        StepScalars {
            lr: -scheduled_lr(config.lr, k + 1, config.warmup_steps),
            beta1: beta_debias(betas.beta1, k + 1),
            beta2: beta_debias(betas.beta2, k + 1),
            beta3: beta_debias(beta3, k + 1),
            alpha,
            ..StepScalars::carry(progress)
        }
    }

    fn compute_direction(
        &self,
        config: &GroupConfig,
        scalars: &StepScalars,
        batch: &mut ActiveBatch<'_>,
    ) -> Result<Direction> {
        let grads = as_slices(&batch.grads);

        let denom_bufs = {
            let mut sq = buffers_mut(&mut batch.states, StateName::ExpAvgSq)?;
            update_second_moment(&mut sq, &grads, scalars.beta2, config.eps, config.denominator)?
        };
        let denoms = as_slices(&denom_bufs);

        let has_fast = config.betas.beta1 != 0.0;
        if has_fast {
            let mut fast = buffers_mut(&mut batch.states, StateName::ExpAvgFast)?;
            update_normalized_moment(&mut fast, &grads, &denoms, scalars.beta1)?;
        }
        {
            let mut slow = buffers_mut(&mut batch.states, StateName::ExpAvgSlow)?;
            update_normalized_moment(&mut slow, &grads, &denoms, scalars.beta3)?;
        }

        match config.direction {
            LaPropDirection::Slow => Ok(Direction::State(StateName::ExpAvgSlow)),
            LaPropDirection::Blend => {
                let slow = buffers(&batch.states, StateName::ExpAvgSlow)?;
                let alpha = scalars.alpha;
                let blended = if has_fast {
                    let fast = buffers(&batch.states, StateName::ExpAvgFast)?;
                    zip_map("laprop blend", &fast, &slow, |f, s| f + alpha * s)?
                } else {
                    let fast = normalize(&grads, &denoms)?;
                    zip_map("laprop blend", &as_slices(&fast), &slow, |f, s| f + alpha * s)?
                };
                Ok(Direction::Computed(blended))
            }
        }
    }
}
