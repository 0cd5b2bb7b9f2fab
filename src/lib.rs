//! # shrew-foreach
//!
//! Stateful optimizers that update a whole parameter group per step.
//!
//! A training loop looks like:
//!
//! 1. `loss = model.forward_backward(batch)`, which stores a gradient on
//!    every [`Param`]
//! 2. `optimizer.step()`, which updates the parameters in place
//! 3. `optimizer.zero_grad()`
//!
//! Per-parameter state (moment estimates, schedule-free iterates) is created
//! lazily the first time a parameter has a gradient, and every group keeps
//! its own step counter, warmup schedule and train/eval mode.
//!
//! Implemented variants:
//! - **LaProp**: momentum over normalized gradients, fast and slow averages
//! - **AdamW**: Adam with decoupled weight decay
//! - **ScheduleFreeAdamW**: schedule-free interpolation of AdamW iterates
//!
//! The [`bench`] module trains a small model on an XOR sequence task to
//! compare variants.

pub mod adamw;
pub mod bench;
pub mod config;
pub mod error;
pub mod foreach;
pub mod laprop;
pub mod moments;
pub mod optimizer;
pub mod param;
pub mod schedule;
pub mod schedule_free;
pub mod state;
pub mod stateful;
pub mod update;
pub mod variant;

pub use config::{Betas, GroupConfig, LaPropDirection};
pub use error::{OptimError, Result};
pub use moments::{beta_debias, Denominator};
pub use optimizer::{
    ActiveBatch, Direction, GroupProgress, Optimizer, OptimizerState, Stateful, StepScalars,
    UpdateStrategy,
};
pub use param::{Param, ParamId};
pub use schedule::{linear_half_life_warmup, linear_warmup};
pub use state::{ParamState, Slot, StateBuffer, StateName};
pub use stateful::{ParamGroup, ParamGroupSpec, StatefulOptimizer};
pub use update::apply_update;
pub use variant::Variant;
