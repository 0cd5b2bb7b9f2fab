// StatefulOptimizer — Parameter groups, lazy per-parameter state, train/eval
//
// The optimizer references parameters (it never owns their values) and
// keeps, per parameter group:
//
//   params     the registered parameters, in registration order
//   state      one ParamState per parameter, index-aligned with params
//   config     fixed hyperparameters (GroupConfig)
//   progress   k, lr_max, weight_sum, train_mode
//
// STEP:
//
//   1. Every group is checked before any is stepped. A group in eval mode
//      fails the whole call with a Mode error, gradients or not, and an
//      existing buffer whose shape disagrees with its active parameter
//      fails it with ShapeMismatch. Nothing has been touched yet.
//   2. Groups are stepped in creation order. A group without gradients is
//      skipped entirely: no state is allocated and k does not move.
//   3. Otherwise the variant prepares state for the active parameters,
//      resolves the step scalars, computes and consumes a direction (one
//      batch, or one batch per parameter without `foreach`) and advances k.
//
// An error inside a group step leaves k unchanged. State buffers that were
// allocated before the error stay allocated; they are zero and allocation
// is idempotent.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::config::GroupConfig;
use crate::error::{OptimError, Result};
use crate::optimizer::{
    ActiveBatch, GroupProgress, Optimizer, OptimizerState, Stateful, UpdateStrategy,
};
use crate::param::{Param, ParamId};
use crate::state::{ParamState, StateBuffer, StateName};
use crate::variant::Variant;

/// Parameters plus the hyperparameters they should be trained with.
#[derive(Debug, Clone)]
pub struct ParamGroupSpec {
    pub params: Vec<Param>,
    pub config: GroupConfig,
}

impl ParamGroupSpec {
    pub fn new(params: Vec<Param>, config: GroupConfig) -> Self {
        ParamGroupSpec { params, config }
    }
}

/// A registered parameter group.
#[derive(Debug)]
pub struct ParamGroup {
    params: Vec<Param>,
    state: Vec<ParamState>,
    config: GroupConfig,
    progress: GroupProgress,
}

impl ParamGroup {
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn progress(&self) -> &GroupProgress {
        &self.progress
    }

    /// State of the `i`-th parameter, index-aligned with [`params`](Self::params).
    pub fn states(&self) -> &[ParamState] {
        &self.state
    }

    /// Buffers of parameters with a pending gradient must match their shape.
    fn check_active_shapes(&self) -> Result<()> {
        for (param, state) in self.params.iter().zip(&self.state) {
            if param.has_grad() {
                state.check_shapes(param.shape())?;
            }
        }
        Ok(())
    }
}

/// The shared optimizer engine, parameterised by a [`Variant`].
///
/// ```
/// use shrew_foreach::{GroupConfig, Optimizer, Param, StatefulOptimizer, Variant};
///
/// let w = Param::new(vec![1.0, -1.0], vec![2]).unwrap();
/// let mut opt = StatefulOptimizer::new(Variant::LaProp, vec![w.clone()], GroupConfig::new(0.1)).unwrap();
///
/// w.set_grad(vec![0.5, -0.5]).unwrap();
/// opt.step().unwrap();
/// assert!(w.to_vec()[0] < 1.0);
/// ```
#[derive(Debug)]
pub struct StatefulOptimizer {
    variant: Variant,
    groups: Vec<ParamGroup>,
    index: HashMap<ParamId, (usize, usize)>,
}

impl StatefulOptimizer {
    /// One group holding every parameter.
    pub fn new(variant: Variant, params: Vec<Param>, config: GroupConfig) -> Result<Self> {
        Self::with_groups(variant, vec![ParamGroupSpec::new(params, config)])
    }

    /// Several groups with their own hyperparameters. A parameter may belong
    /// to one group only.
    pub fn with_groups(variant: Variant, specs: Vec<ParamGroupSpec>) -> Result<Self> {
        let mut groups = Vec::with_capacity(specs.len());
        let mut index = HashMap::new();

        for (g, spec) in specs.into_iter().enumerate() {
            spec.config.validate()?;
            for (i, param) in spec.params.iter().enumerate() {
                if index.insert(param.id(), (g, i)).is_some() {
                    return Err(OptimError::config(format!(
                        "parameter {} is registered more than once",
                        param.id().value()
                    )));
                }
            }
            let n = spec.params.len();
            groups.push(ParamGroup {
                params: spec.params,
                state: vec![ParamState::default(); n],
                config: spec.config,
                progress: GroupProgress::default(),
            });
        }

        debug!(variant = %variant, groups = groups.len(), params = index.len(), "optimizer created");
        Ok(StatefulOptimizer {
            variant,
            groups,
            index,
        })
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    /// Completed steps of group `group`.
    pub fn step_count(&self, group: usize) -> Option<u64> {
        self.groups.get(group).map(|g| g.progress.k)
    }

    /// State of a registered parameter, `None` for a foreign one.
    pub fn state(&self, param: &Param) -> Option<&ParamState> {
        let &(g, i) = self.index.get(&param.id())?;
        Some(&self.groups[g].state[i])
    }

    /// Mutable state of a registered parameter. Slots start unallocated;
    /// the first step that sees a gradient fills them.
    pub fn state_for(&mut self, param: &Param) -> Option<&mut ParamState> {
        let &(g, i) = self.index.get(&param.id())?;
        Some(&mut self.groups[g].state[i])
    }

    /// Put every group in evaluation mode.
    pub fn eval(&mut self) {
        self.set_mode(false);
    }

    /// Put every group back in training mode.
    pub fn train(&mut self) {
        self.set_mode(true);
    }

    fn set_mode(&mut self, to_train: bool) {
        let variant = self.variant;
        for (g, group) in self.groups.iter_mut().enumerate() {
            if group.progress.train_mode == to_train {
                continue;
            }
            for (param, state) in group.params.iter().zip(group.state.iter()) {
                variant.transition(&group.config, param, state, to_train);
            }
            group.progress.train_mode = to_train;
            debug!(group = g, train_mode = to_train, "mode changed");
        }
    }
}

fn step_group(variant: Variant, index: usize, group: &mut ParamGroup) -> Result<()> {
    let ParamGroup {
        params,
        state,
        config,
        progress,
    } = group;

    let mut batch = ActiveBatch::default();
    for (param, st) in params.iter().zip(state.iter_mut()) {
        let Some(grad) = param.grad() else {
            continue;
        };
        variant.prepare_state(config, param, st);
        batch.push(param, grad, st);
    }

    if batch.is_empty() {
        trace!(group = index, "no gradients, group skipped");
        return Ok(());
    }

    let scalars = variant.schedule(config, progress);
    debug!(
        group = index,
        k = progress.k,
        active = batch.len(),
        lr = -scalars.lr,
        foreach = config.foreach,
        "group step"
    );

    let batches = if config.foreach {
        vec![batch]
    } else {
        batch.into_singletons()
    };
    for mut batch in batches {
        let direction = variant.compute_direction(config, &scalars, &mut batch)?;
        variant.consume(config, &scalars, &mut batch, direction)?;
    }

    variant.advance(progress, &scalars);
    Ok(())
}

impl Optimizer for StatefulOptimizer {
    fn step(&mut self) -> Result<()> {
        for (g, group) in self.groups.iter().enumerate() {
            if !group.progress.train_mode {
                warn!(group = g, "step called while in eval mode");
                return Err(OptimError::Mode { group: g });
            }
            group.check_active_shapes()?;
        }

        let variant = self.variant;
        for (g, group) in self.groups.iter_mut().enumerate() {
            step_group(variant, g, group)?;
        }
        Ok(())
    }

    fn zero_grad(&self) {
        for group in &self.groups {
            for param in &group.params {
                param.zero_grad();
            }
        }
    }

    fn learning_rate(&self) -> f64 {
        self.groups.first().map_or(0.0, |g| g.config.lr)
    }
}

// Stateful — Save/restore counters and state buffers

fn buffer_key(group: usize, param: usize, name: StateName) -> String {
    format!("g{group}.p{param}.{name}")
}

fn step_counter(sd: &OptimizerState, key: &str) -> Result<u64> {
    let k = sd.require_scalar(key)?;
    if !k.is_finite() || k < 0.0 || k.fract() != 0.0 || k >= u64::MAX as f64 {
        return Err(OptimError::StateDict(format!(
            "{key} must be a non-negative integer, got {k}"
        )));
    }
    Ok(k as u64)
}

impl Stateful for StatefulOptimizer {
    fn state_dict(&self) -> OptimizerState {
        let mut sd = OptimizerState::new(self.variant.name());
        sd.set_scalar("groups", self.groups.len() as f64);

        for (g, group) in self.groups.iter().enumerate() {
            let p = &group.progress;
            sd.set_scalar(format!("g{g}.k"), p.k as f64);
            sd.set_scalar(format!("g{g}.lr_max"), p.lr_max);
            sd.set_scalar(format!("g{g}.weight_sum"), p.weight_sum);
            sd.set_scalar(format!("g{g}.train_mode"), if p.train_mode { 1.0 } else { 0.0 });

            for (i, state) in group.state.iter().enumerate() {
                for (name, buf) in state.iter() {
                    sd.set_buffer(buffer_key(g, i, name), buf.data().to_vec());
                }
            }
        }
        sd
    }

    /// Restore counters, buffers and each group's `train_mode`.
    ///
    /// Parameters are never moved. A checkpoint pairs with the parameter
    /// values saved next to it, which for a schedule-free group saved in
    /// eval mode are the evaluation point; `train()` afterwards moves them
    /// back.
    fn load_state_dict(&mut self, sd: &OptimizerState) -> Result<()> {
        if sd.optimizer_type != self.variant.name() {
            return Err(OptimError::StateDict(format!(
                "cannot load {} state into {}",
                sd.optimizer_type,
                self.variant.name()
            )));
        }
        let n_groups = sd.require_scalar("groups")?;
        if n_groups != self.groups.len() as f64 {
            return Err(OptimError::StateDict(format!(
                "checkpoint has {n_groups} groups, optimizer has {}",
                self.groups.len()
            )));
        }

        // Build everything first so a bad checkpoint leaves us untouched.
        let mut restored = Vec::with_capacity(self.groups.len());
        for (g, group) in self.groups.iter().enumerate() {
            let progress = GroupProgress {
                k: step_counter(sd, &format!("g{g}.k"))?,
                lr_max: sd.require_scalar(&format!("g{g}.lr_max"))?,
                weight_sum: sd.require_scalar(&format!("g{g}.weight_sum"))?,
                train_mode: sd.require_scalar(&format!("g{g}.train_mode"))? != 0.0,
            };

            let mut states = Vec::with_capacity(group.params.len());
            for (i, param) in group.params.iter().enumerate() {
                let mut state = ParamState::default();
                for name in StateName::ALL {
                    if let Some(data) = sd.get_buffer(&buffer_key(g, i, name)) {
                        let buf = StateBuffer::from_vec(param.shape(), data.clone())?;
                        state.insert(name, buf);
                    }
                }
                states.push(state);
            }
            restored.push((progress, states));
        }

        for (group, (progress, states)) in self.groups.iter_mut().zip(restored) {
            group.progress = progress;
            group.state = states;
        }
        debug!(variant = %self.variant, "optimizer state restored");
        Ok(())
    }
}
