// Per-parameter optimizer state
//
// Every registered parameter owns a ParamState: one slot per state name.
// A slot starts Unallocated and is filled the first time a step sees a
// gradient for that parameter. A slot can also be Skipped, which means the
// variant decided not to keep that buffer at all (its decay coefficient is
// zero) and the update code must treat the term as a pass-through.
//
// Buffers always have the parameter's shape. Nothing ever reshapes them;
// `check_shapes` exists to catch a corrupted checkpoint restore.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OptimError, Result};
use crate::param::{numel, Param};

/// Names of the buffers a variant may keep for a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateName {
    ExpAvg,
    ExpAvgFast,
    ExpAvgSlow,
    ExpAvgSq,
    Z,
}

impl StateName {
    pub const ALL: [StateName; 5] = [
        StateName::ExpAvg,
        StateName::ExpAvgFast,
        StateName::ExpAvgSlow,
        StateName::ExpAvgSq,
        StateName::Z,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateName::ExpAvg => "exp_avg",
            StateName::ExpAvgFast => "exp_avg_fast",
            StateName::ExpAvgSlow => "exp_avg_slow",
            StateName::ExpAvgSq => "exp_avg_sq",
            StateName::Z => "z",
        }
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dense f64 buffer with a fixed shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateBuffer {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl StateBuffer {
    pub fn zeros(shape: &[usize]) -> Self {
        StateBuffer {
            shape: shape.to_vec(),
            data: vec![0.0; numel(shape)],
        }
    }

    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Result<Self> {
        if data.len() != numel(shape) {
            return Err(OptimError::shape("state buffer", shape, &[data.len()]));
        }
        Ok(StateBuffer {
            shape: shape.to_vec(),
            data,
        })
    }

    /// A buffer holding a copy of the parameter's current values.
    pub fn copy_of(param: &Param) -> Self {
        StateBuffer {
            shape: param.shape().to_vec(),
            data: param.to_vec(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// Storage slot for one named buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Slot {
    /// Not created yet.
    #[default]
    Unallocated,
    /// Deliberately not kept; the term is an identity pass-through.
    Skipped,
    Buffer(StateBuffer),
}

impl Slot {
    pub fn buffer(&self) -> Option<&StateBuffer> {
        match self {
            Slot::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn buffer_mut(&mut self) -> Option<&mut StateBuffer> {
        match self {
            Slot::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_unallocated(&self) -> bool {
        matches!(self, Slot::Unallocated)
    }
}

/// All state kept for one parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamState {
    exp_avg: Slot,
    exp_avg_fast: Slot,
    exp_avg_slow: Slot,
    exp_avg_sq: Slot,
    z: Slot,
}

impl ParamState {
    pub fn slot(&self, name: StateName) -> &Slot {
        match name {
            StateName::ExpAvg => &self.exp_avg,
            StateName::ExpAvgFast => &self.exp_avg_fast,
            StateName::ExpAvgSlow => &self.exp_avg_slow,
            StateName::ExpAvgSq => &self.exp_avg_sq,
            StateName::Z => &self.z,
        }
    }

    pub fn slot_mut(&mut self, name: StateName) -> &mut Slot {
        match name {
            StateName::ExpAvg => &mut self.exp_avg,
            StateName::ExpAvgFast => &mut self.exp_avg_fast,
            StateName::ExpAvgSlow => &mut self.exp_avg_slow,
            StateName::ExpAvgSq => &mut self.exp_avg_sq,
            StateName::Z => &mut self.z,
        }
    }

    /// The allocated buffer for `name`, if any.
    pub fn get(&self, name: StateName) -> Option<&StateBuffer> {
        self.slot(name).buffer()
    }

    /// Mutable access to an allocated buffer.
    pub fn buffer_mut(&mut self, name: StateName) -> Result<&mut StateBuffer> {
        self.slot_mut(name)
            .buffer_mut()
            .ok_or(OptimError::MissingState(name.as_str()))
    }

    /// Allocate a zero buffer for `name` unless the slot is already decided.
    pub fn ensure_zeros(&mut self, name: StateName, shape: &[usize]) {
        self.ensure_with(name, || StateBuffer::zeros(shape));
    }

    /// Allocate `init()` for `name` unless the slot is already decided.
    pub fn ensure_with(&mut self, name: StateName, init: impl FnOnce() -> StateBuffer) {
        let slot = self.slot_mut(name);
        if slot.is_unallocated() {
            *slot = Slot::Buffer(init());
        }
    }

    /// Mark `name` as intentionally absent unless it is already decided.
    pub fn skip(&mut self, name: StateName) {
        let slot = self.slot_mut(name);
        if slot.is_unallocated() {
            *slot = Slot::Skipped;
        }
    }

    pub fn insert(&mut self, name: StateName, buffer: StateBuffer) {
        *self.slot_mut(name) = Slot::Buffer(buffer);
    }

    /// Allocated buffers in a fixed name order.
    pub fn iter(&self) -> impl Iterator<Item = (StateName, &StateBuffer)> + '_ {
        StateName::ALL
            .into_iter()
            .filter_map(move |name| self.get(name).map(|b| (name, b)))
    }

    /// True when no slot has been decided yet.
    pub fn is_empty(&self) -> bool {
        StateName::ALL
            .into_iter()
            .all(|name| self.slot(name).is_unallocated())
    }

    /// Every allocated buffer must have the parameter's shape.
    pub fn check_shapes(&self, shape: &[usize]) -> Result<()> {
        for (name, buf) in self.iter() {
            if buf.shape() != shape {
                return Err(OptimError::shape(
                    format!("state `{name}`"),
                    shape,
                    buf.shape(),
                ));
            }
        }
        Ok(())
    }
}
