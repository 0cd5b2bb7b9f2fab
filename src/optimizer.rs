// Optimizer traits — The interfaces every optimizer and variant implement
//
// Three traits live here:
//
//   Optimizer       what a training loop calls: step(), zero_grad()
//   Stateful        checkpoint save/restore through OptimizerState
//   UpdateStrategy  what a variant plugs into the shared stepping loop
//
// Parameters are updated IN PLACE. A Param is a shared handle, so the model
// that owns the other handle sees the new values as soon as step() returns.
//
// ONE GROUP STEP, AS SEEN BY A STRATEGY:
//
//   prepare_state      once per active parameter, allocates lazily
//   schedule           once per group, pure function of (config, progress)
//   compute_direction  once per batch, updates moments, returns a direction
//   consume            once per batch, writes the parameters
//   advance            once per group, k += 1 and commit lr_max/weight_sum
//
// With `foreach` enabled the batch is every active parameter of the group;
// without it, every active parameter forms its own batch of one. Because
// buffers of distinct parameters never alias, both give identical results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::GroupConfig;
use crate::error::{OptimError, Result};
use crate::foreach::as_slices;
use crate::param::Param;
use crate::state::{ParamState, StateName};
use crate::update::apply_update;

/// Trait that all optimizers implement.
///
/// Gradients are read from the parameters themselves (see
/// [`Param::set_grad`]); a parameter without a gradient is left alone.
pub trait Optimizer {
    /// Perform one optimization step over every parameter group.
    fn step(&mut self) -> Result<()>;

    /// Drop the pending gradient of every registered parameter.
    fn zero_grad(&self);

    /// Configured learning rate of the first group, before warmup.
    fn learning_rate(&self) -> f64;
}

// OptimizerState — Serializable state dictionary for checkpoint save/load

/// A serializable snapshot of an optimizer's internal state.
///
/// Scalars hold the per-group counters, buffers hold flattened state
/// tensors. Keys encode the group and parameter index, e.g. `g0.k` or
/// `g1.p3.exp_avg_sq`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Variant name, checked on load.
    pub optimizer_type: String,
    pub scalars: HashMap<String, f64>,
    pub buffers: HashMap<String, Vec<f64>>,
}

impl OptimizerState {
    pub fn new(optimizer_type: impl Into<String>) -> Self {
        OptimizerState {
            optimizer_type: optimizer_type.into(),
            scalars: HashMap::new(),
            buffers: HashMap::new(),
        }
    }

    pub fn set_scalar(&mut self, key: impl Into<String>, value: f64) {
        self.scalars.insert(key.into(), value);
    }

    pub fn set_buffer(&mut self, key: impl Into<String>, data: Vec<f64>) {
        self.buffers.insert(key.into(), data);
    }

    pub fn get_scalar(&self, key: &str) -> Option<f64> {
        self.scalars.get(key).copied()
    }

    /// A scalar that must be present.
    pub fn require_scalar(&self, key: &str) -> Result<f64> {
        self.get_scalar(key)
            .ok_or_else(|| OptimError::StateDict(format!("missing scalar `{key}`")))
    }

    pub fn get_buffer(&self, key: &str) -> Option<&Vec<f64>> {
        self.buffers.get(key)
    }
}

/// Trait for optimizers that can save and restore their internal state.
///
/// This covers the moment buffers and step counters, so training can
/// resume exactly where it left off. Model weights are not included.
pub trait Stateful {
    fn state_dict(&self) -> OptimizerState;

    /// Restore from a previously saved dictionary.
    ///
    /// Fails without touching the optimizer if the dictionary belongs to a
    /// different variant, lacks a counter, or holds a buffer whose length
    /// disagrees with its parameter.
    fn load_state_dict(&mut self, state: &OptimizerState) -> Result<()>;
}

// Per-group counters and per-step scalars

/// The part of a group that changes while stepping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupProgress {
    /// Completed steps. Never decremented.
    pub k: u64,
    /// Largest warmed-up learning rate seen so far (-1 before any step).
    pub lr_max: f64,
    /// Running sum of schedule-free averaging weights.
    pub weight_sum: f64,
    pub train_mode: bool,
}

impl Default for GroupProgress {
    fn default() -> Self {
        GroupProgress {
            k: 0,
            lr_max: -1.0,
            weight_sum: 0.0,
            train_mode: true,
        }
    }
}

/// Scalars resolved once per group step by [`UpdateStrategy::schedule`].
///
/// Betas are already debiased for step `k + 1` and warmed up. A variant
/// leaves the fields it does not use at their defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepScalars {
    /// Signed step size for [`apply_update`]; negative for descent.
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub beta3: f64,
    pub alpha: f64,
    /// Values `advance` commits to the group's progress.
    pub lr_max: f64,
    pub weight_sum: f64,
    /// Schedule-free interpolation weight `weight / weight_sum`.
    pub ckp1: f64,
}

impl StepScalars {
    /// Scalars that leave `lr_max` and `weight_sum` where they are.
    pub fn carry(progress: &GroupProgress) -> Self {
        StepScalars {
            lr_max: progress.lr_max,
            weight_sum: progress.weight_sum,
            ..Default::default()
        }
    }
}

// Active batch

/// The parameters of one group that have a gradient this step, with their
/// gradients and state. The three vectors are index-aligned.
#[derive(Default)]
pub struct ActiveBatch<'a> {
    pub params: Vec<&'a Param>,
    pub grads: Vec<Vec<f64>>,
    pub states: Vec<&'a mut ParamState>,
}

impl<'a> ActiveBatch<'a> {
    pub fn push(&mut self, param: &'a Param, grad: Vec<f64>, state: &'a mut ParamState) {
        self.params.push(param);
        self.grads.push(grad);
        self.states.push(state);
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Split into one batch per parameter.
    pub fn into_singletons(self) -> Vec<ActiveBatch<'a>> {
        self.params
            .into_iter()
            .zip(self.grads)
            .zip(self.states)
            .map(|((param, grad), state)| ActiveBatch {
                params: vec![param],
                grads: vec![grad],
                states: vec![state],
            })
            .collect()
    }
}

/// Borrow the `name` buffer of every state in the batch mutably.
pub fn buffers_mut<'b>(
    states: &'b mut [&mut ParamState],
    name: StateName,
) -> Result<Vec<&'b mut [f64]>> {
    states
        .iter_mut()
        .map(|s| s.buffer_mut(name).map(|b| b.data_mut()))
        .collect()
}

/// Borrow the `name` buffer of every state in the batch.
pub fn buffers<'b>(states: &'b [&mut ParamState], name: StateName) -> Result<Vec<&'b [f64]>> {
    states
        .iter()
        .map(|s| {
            s.get(name)
                .map(|b| b.data())
                .ok_or(OptimError::MissingState(name.as_str()))
        })
        .collect()
}

/// What `consume` applies to the parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Direction {
    /// Use a state buffer as is.
    State(StateName),
    /// Freshly computed, one buffer per batch entry.
    Computed(Vec<Vec<f64>>),
}

impl Direction {
    /// Owned copies of the direction buffers.
    pub fn into_buffers(self, states: &[&mut ParamState]) -> Result<Vec<Vec<f64>>> {
        match self {
            Direction::State(name) => Ok(buffers(states, name)?
                .into_iter()
                .map(<[f64]>::to_vec)
                .collect()),
            Direction::Computed(bufs) => Ok(bufs),
        }
    }
}

/// The per-group update logic of one optimizer variant.
pub trait UpdateStrategy {
    /// Name recorded in checkpoints.
    fn name(&self) -> &'static str;

    /// Allocate (or skip) the buffers this variant keeps for `param`.
    /// Slots that are already decided are left alone.
    fn prepare_state(&self, config: &GroupConfig, param: &Param, state: &mut ParamState);

    /// Resolve learning rate, betas and weights for step `progress.k + 1`.
    fn schedule(&self, config: &GroupConfig, progress: &GroupProgress) -> StepScalars;

    /// Update the moment buffers of `batch` and return the update direction.
    fn compute_direction(
        &self,
        config: &GroupConfig,
        scalars: &StepScalars,
        batch: &mut ActiveBatch<'_>,
    ) -> Result<Direction>;

    /// Write the parameters. The default applies `direction` with decoupled
    /// weight decay.
    fn consume(
        &self,
        config: &GroupConfig,
        scalars: &StepScalars,
        batch: &mut ActiveBatch<'_>,
        direction: Direction,
    ) -> Result<()> {
        match direction {
            Direction::State(name) => {
                let dirs = buffers(&batch.states, name)?;
                apply_update(&batch.params, &dirs, scalars.lr, config.weight_decay)
            }
            Direction::Computed(bufs) => apply_update(
                &batch.params,
                &as_slices(&bufs),
                scalars.lr,
                config.weight_decay,
            ),
        }
    }

    /// Close a completed group step.
    fn advance(&self, progress: &mut GroupProgress, scalars: &StepScalars) {
        progress.k += 1;
        progress.lr_max = scalars.lr_max;
        progress.weight_sum = scalars.weight_sum;
    }

    /// Move `param` between its training and evaluation point. Most
    /// variants train and evaluate at the same point.
    fn transition(&self, _config: &GroupConfig, _param: &Param, _state: &ParamState, _to_train: bool) {}
}
