// Schedule-free AdamW — Interpolated iterates instead of a learning-rate schedule
//
// Based on "The Road Less Scheduled" (Defazio et al., 2024). Two sequences
// are kept per parameter:
//
//   z  the base SGD-style iterate (state buffer, starts as a copy of θ)
//   x  a weighted average of all z seen so far
//
// Training evaluates gradients at y = (1 - β1) z + β1 x, and y is what the
// parameter holds while in train mode. x is never stored: y is updated in
// place so that it tracks the same interpolation.
//
// ONE STEP (coefficients debiased for step = k + 1):
//   v      = β2' v + (1 - β2') g²
//   ĝ      = g / (√v + ε) + λ y
//   lr     = warmup(lr, step)
//   lr_max = max(lr_max, lr)
//   w      = lr_max^weight_lr_power · step^r
//   c      = w / (weight_sum + w)
//   y      = lerp(y, z, c) + ĝ · lr · (β1 (1 - c) - 1)
//   z      = z - lr · ĝ
//
// TRAIN / EVAL:
//   eval():  θ = lerp(y, z, 1 - 1/β1)    moves the parameter to x
//   train(): θ = lerp(x, z, 1 - β1)      moves it back to y
//
// Weight decay is taken at y and folded into ĝ, so this variant does not go
// through the shared decoupled-decay update.

use crate::config::GroupConfig;
use crate::error::{OptimError, Result};
use crate::foreach::as_slices;
use crate::moments::{beta_debias, normalize, update_second_moment};
use crate::optimizer::{buffers_mut, ActiveBatch, Direction, GroupProgress, StepScalars, UpdateStrategy};
use crate::param::Param;
use crate::schedule::scheduled_lr;
use crate::state::{ParamState, StateBuffer, StateName};

/// Schedule-free AdamW.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleFreeAdamW;

impl UpdateStrategy for ScheduleFreeAdamW {
    fn name(&self) -> &'static str {
        "ForeachSFAdamW"
    }

    fn prepare_state(&self, _config: &GroupConfig, param: &Param, state: &mut ParamState) {
        state.ensure_with(StateName::Z, || StateBuffer::copy_of(param));
        state.ensure_zeros(StateName::ExpAvgSq, param.shape());
    }

    fn schedule(&self, config: &GroupConfig, progress: &GroupProgress) -> StepScalars {
        let step = progress.k + 1;
        let lr = scheduled_lr(config.lr, step, config.warmup_steps);
        let lr_max = progress.lr_max.max(lr);
        let weight = lr_max.powf(config.weight_lr_power) * (step.max(1) as f64).powf(config.r);
        let weight_sum = progress.weight_sum + weight;
        let ckp1 = if weight_sum == 0.0 {
            0.0
        } else {
            weight / weight_sum
        };

        StepScalars {
            lr: -lr,
            beta1: config.betas.beta1,
            beta2: beta_debias(config.betas.beta2, step),
            lr_max,
            weight_sum,
            ckp1,
            ..Default::default()
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
        let mut dirs = normalize(&grads, &as_slices(&denom_bufs))?;

        let wd = config.weight_decay;
        if wd != 0.0 {
            for (dir, param) in dirs.iter_mut().zip(batch.params.iter()) {
                param.with_data(|y| {
                    for (d, &y) in dir.iter_mut().zip(y.iter()) {
                        *d += wd * y;
                    }
                });
            }
        }
        Ok(Direction::Computed(dirs))
    }

    fn consume(
        &self,
        _config: &GroupConfig,
        scalars: &StepScalars,
        batch: &mut ActiveBatch<'_>,
        direction: Direction,
    ) -> Result<()> {
        let grads = direction.into_buffers(&batch.states)?;
        if grads.len() != batch.len() {
            return Err(OptimError::shape(
                "schedule-free batch",
                &[batch.len()],
                &[grads.len()],
            ));
        }
        for (param, g) in batch.params.iter().zip(grads.iter()) {
            if g.len() != param.numel() {
                return Err(OptimError::shape("schedule-free direction", param.shape(), &[g.len()]));
            }
        }

        let lr = -scalars.lr;
        let ckp1 = scalars.ckp1;
        let grad_scale = lr * (scalars.beta1 * (1.0 - ckp1) - 1.0);
        let mut zs = buffers_mut(&mut batch.states, StateName::Z)?;
        for ((param, z), g) in batch.params.iter().zip(zs.iter_mut()).zip(grads.iter()) {
            param.with_data_mut(|y| {
                for ((y, z), &g) in y.iter_mut().zip(z.iter_mut()).zip(g.iter()) {
                    *y += (*z - *y) * ckp1;
                    *y += g * grad_scale;
                    *z -= lr * g;
                }
            });
        }
        Ok(())
    }

    fn transition(&self, config: &GroupConfig, param: &Param, state: &ParamState, to_train: bool) {
        let beta1 = config.betas.beta1;
        if beta1 <= 0.0 {
            return;
        }
        let Some(z) = state.get(StateName::Z) else {
            return;
        };
        let weight = if to_train {
            1.0 - beta1
        } else {
            1.0 - 1.0 / beta1
        };
        param.with_data_mut(|p| {
            for (p, &z) in p.iter_mut().zip(z.data().iter()) {
                *p += (z - *p) * weight;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn step(cfg: &GroupConfig, progress: &mut GroupProgress, p: &Param, state: &mut ParamState, g: Vec<f64>) {
        let sf = ScheduleFreeAdamW;
        sf.prepare_state(cfg, p, state);
        let scalars = sf.schedule(cfg, progress);
        let mut batch = ActiveBatch::default();
        batch.push(p, g, state);
        let dir = sf.compute_direction(cfg, &scalars, &mut batch).unwrap();
        sf.consume(cfg, &scalars, &mut batch, dir).unwrap();
        sf.advance(progress, &scalars);
    }

    #[test]
    fn z_starts_as_parameter_copy() {
        let p = Param::new(vec![1.5, -2.0], vec![2]).unwrap();
        let mut state = ParamState::default();
        ScheduleFreeAdamW.prepare_state(&GroupConfig::default(), &p, &mut state);
        assert_eq!(state.get(StateName::Z).unwrap().data(), &[1.5, -2.0]);
    }

    #[test]
    fn first_step_takes_plain_normalized_step() {
        // ckp1 = 1 on the first step, so y jumps to z and then moves by -lr * g / |g|.
        let cfg = GroupConfig::new(0.1).eps(1e-12);
        let p = Param::new(vec![1.0], vec![1]).unwrap();
        let mut state = ParamState::default();
        let mut progress = GroupProgress::default();
        step(&cfg, &mut progress, &p, &mut state, vec![5.0]);

        assert_abs_diff_eq!(p.to_vec()[0], 0.9, epsilon = 1e-9);
        assert_abs_diff_eq!(state.get(StateName::Z).unwrap().data()[0], 0.9, epsilon = 1e-9);
        assert_eq!(progress.k, 1);
        assert_abs_diff_eq!(progress.lr_max, 0.1);
        assert_abs_diff_eq!(progress.weight_sum, 0.01, epsilon = 1e-15);
    }

    #[test]
    fn weights_accumulate_with_lr_max() {
        let cfg = GroupConfig::new(0.2).warmup_steps(2);
        let sf = ScheduleFreeAdamW;
        let s1 = sf.schedule(&cfg, &GroupProgress::default());
        assert_abs_diff_eq!(s1.lr, -0.1, epsilon = 1e-15);
        assert_abs_diff_eq!(s1.ckp1, 1.0);

        let mut progress = GroupProgress::default();
        sf.advance(&mut progress, &s1);
        let s2 = sf.schedule(&cfg, &progress);
        assert_abs_diff_eq!(s2.lr_max, 0.2);
        // weights 0.01 then 0.04
        assert_abs_diff_eq!(s2.weight_sum, 0.05, epsilon = 1e-15);
        assert_abs_diff_eq!(s2.ckp1, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn zero_lr_gives_zero_interpolation_weight() {
        let s = ScheduleFreeAdamW.schedule(&GroupConfig::new(0.0), &GroupProgress::default());
        assert_eq!(s.ckp1, 0.0);
        assert_eq!(s.weight_sum, 0.0);
    }

    #[test]
    fn eval_then_train_restores_parameter() {
        let cfg = GroupConfig::new(0.05).betas((0.9, 0.99));
        let p = Param::new(vec![0.3, -0.7], vec![2]).unwrap();
        let mut state = ParamState::default();
        let mut progress = GroupProgress::default();
        for g in [vec![1.0, -1.0], vec![0.5, 0.2], vec![-0.3, 0.9]] {
            step(&cfg, &mut progress, &p, &mut state, g);
        }
        let y = p.to_vec();
        ScheduleFreeAdamW.transition(&cfg, &p, &state, false);
        let x = p.to_vec();
        assert_ne!(x, y);
        ScheduleFreeAdamW.transition(&cfg, &p, &state, true);
        let back = p.to_vec();
        assert_abs_diff_eq!(back[0], y[0], epsilon = 1e-12);
        assert_abs_diff_eq!(back[1], y[1], epsilon = 1e-12);
    }

    #[test]
    fn weight_decay_is_taken_at_y() {
        let cfg = GroupConfig::new(0.1).eps(1e-12).weight_decay(0.5);
        let p = Param::new(vec![2.0], vec![1]).unwrap();
        let mut state = ParamState::default();
        let mut progress = GroupProgress::default();
        step(&cfg, &mut progress, &p, &mut state, vec![1.0]);
        // ĝ = 1 + 0.5 * 2 = 2, first step: y = z = 2 - 0.1 * 2
        assert_abs_diff_eq!(p.to_vec()[0], 1.8, epsilon = 1e-9);
    }
}
