// AdamW — Adaptive Moment Estimation with decoupled weight decay
//
// Adam maintains TWO moving averages per parameter:
//
//   m (exp_avg):    exponential average of gradients (direction)
//   v (exp_avg_sq): exponential average of squared gradients (magnitude)
//
// Update rule, with coefficients debiased for step k + 1:
//   m = β1' m + (1 - β1') g
//   v = β2' v + (1 - β2') g²
//   θ = θ (1 - lr λ) - lr m / (√v + ε)
//
// Because β' is already debiased, m and v need no 1 / (1 - β^t) rescaling.
// Weight decay is applied to the parameter directly (decoupled), not
// mixed into the gradient. With β1 = 0 no exp_avg buffer is kept and the
// raw gradient takes its place.
//
// HYPERPARAMETERS: lr, betas.beta1, betas.beta2, eps, weight_decay,
// warmup_steps. betas.beta3 and alpha are ignored.

use crate::config::GroupConfig;
use crate::error::Result;
use crate::foreach::as_slices;
use crate::moments::{beta_debias, normalize, update_moment, update_second_moment};
use crate::optimizer::{
    buffers, buffers_mut, ActiveBatch, Direction, GroupProgress, StepScalars, UpdateStrategy,
};
use crate::param::Param;
use crate::schedule::scheduled_lr;
use crate::state::{ParamState, StateName};

/// AdamW over debiased moment estimates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdamW;

impl UpdateStrategy for AdamW {
    fn name(&self) -> &'static str {
        "ForeachAdamW"
    }

    fn prepare_state(&self, config: &GroupConfig, param: &Param, state: &mut ParamState) {
        if config.betas.beta1 != 0.0 {
            state.ensure_zeros(StateName::ExpAvg, param.shape());
        } else {
            state.skip(StateName::ExpAvg);
        }
        state.ensure_zeros(StateName::ExpAvgSq, param.shape());
    }

    fn schedule(&self, config: &GroupConfig, progress: &GroupProgress) -> StepScalars {
        let step = progress.k + 1;
        StepScalars {
            lr: -scheduled_lr(config.lr, step, config.warmup_steps),
            beta1: beta_debias(config.betas.beta1, step),
            beta2: beta_debias(config.betas.beta2, step),
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

        let dirs = if config.betas.beta1 != 0.0 {
            {
                let mut m = buffers_mut(&mut batch.states, StateName::ExpAvg)?;
                update_moment(&mut m, &grads, scalars.beta1)?;
            }
            let m = buffers(&batch.states, StateName::ExpAvg)?;
            normalize(&m, &denoms)?
        } else {
            normalize(&grads, &denoms)?
        };
        Ok(Direction::Computed(dirs))
    }
}
