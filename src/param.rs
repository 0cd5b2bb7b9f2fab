// Param — A shared, in-place mutable parameter buffer with a stable identity
//
// Parameters are owned by the model and only referenced by the optimizer.
// Cloning a Param clones the handle, not the data: every clone sees the same
// storage, so an in-place update made by the optimizer is visible to the
// model that holds the other handle.
//
// Each Param also carries an optional gradient slot. Whatever computes
// gradients (autograd, a hand-written backward pass) fills it with
// `set_grad`; the optimizer only reads it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{OptimError, Result};

/// Process-unique identity of a parameter, used as the optimizer state key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(usize);

impl ParamId {
    fn next() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(1);
        ParamId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> usize {
        self.0
    }
}

struct ParamImpl {
    id: ParamId,
    shape: Vec<usize>,
    data: RwLock<Vec<f64>>,
    grad: RwLock<Option<Vec<f64>>>,
}

/// Handle to a model parameter.
///
/// Equality and hashing go through [`ParamId`], never through the values.
#[derive(Clone)]
pub struct Param(Arc<ParamImpl>);

/// Number of elements implied by a shape (a rank-0 shape holds one value).
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

impl Param {
    /// Wrap `data` as a parameter of the given shape.
    pub fn new(data: Vec<f64>, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        if data.len() != numel(&shape) {
            return Err(OptimError::shape(
                "parameter data",
                &shape,
                &[data.len()],
            ));
        }
        Ok(Param(Arc::new(ParamImpl {
            id: ParamId::next(),
            shape,
            data: RwLock::new(data),
            grad: RwLock::new(None),
        })))
    }

    /// A zero-filled parameter.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let n = numel(&shape);
        Param(Arc::new(ParamImpl {
            id: ParamId::next(),
            shape,
            data: RwLock::new(vec![0.0; n]),
            grad: RwLock::new(None),
        }))
    }

    pub fn id(&self) -> ParamId {
        self.0.id
    }

    pub fn shape(&self) -> &[usize] {
        &self.0.shape
    }

    pub fn numel(&self) -> usize {
        numel(&self.0.shape)
    }

    /// Copy of the current values.
    pub fn to_vec(&self) -> Vec<f64> {
        self.with_data(|d| d.to_vec())
    }

    /// Run `f` over a read view of the values.
    pub fn with_data<R>(&self, f: impl FnOnce(&[f64]) -> R) -> R {
        let guard = self.0.data.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Run `f` over a mutable view of the values.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [f64]) -> R) -> R {
        let mut guard = self.0.data.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Overwrite the values in place.
    pub fn update_data_inplace(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.numel() {
            return Err(OptimError::shape(
                "parameter update",
                self.shape(),
                &[values.len()],
            ));
        }
        self.with_data_mut(|d| d.copy_from_slice(values));
        Ok(())
    }

    /// Store a gradient for the next optimizer step.
    pub fn set_grad(&self, grad: Vec<f64>) -> Result<()> {
        if grad.len() != self.numel() {
            return Err(OptimError::shape("gradient", self.shape(), &[grad.len()]));
        }
        *self.0.grad.write().unwrap_or_else(PoisonError::into_inner) = Some(grad);
        Ok(())
    }

    /// Copy of the pending gradient, if any.
    pub fn grad(&self) -> Option<Vec<f64>> {
        self.0
            .grad
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_grad(&self) -> bool {
        self.0
            .grad
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drop the pending gradient.
    pub fn zero_grad(&self) {
        *self.0.grad.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// True when every value is finite.
    pub fn is_finite(&self) -> bool {
        self.with_data(|d| d.iter().all(|v| v.is_finite()))
    }
}

impl PartialEq for Param {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Param {}

impl Hash for Param {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param")
            .field("id", &self.0.id.value())
            .field("shape", &self.0.shape)
            .field("has_grad", &self.has_grad())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_storage_and_identity() {
        let p = Param::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]).unwrap();
        let q = p.clone();
        q.with_data_mut(|d| d[0] = 10.0);
        assert_eq!(p.to_vec(), vec![10.0, 2.0, 3.0, 4.0]);
        assert_eq!(p, q);
        assert_ne!(p, Param::zeros(vec![2, 2]));
    }

    #[test]
    fn new_rejects_wrong_element_count() {
        let err = Param::new(vec![1.0, 2.0, 3.0], vec![2, 2]).unwrap_err();
        assert!(matches!(err, OptimError::ShapeMismatch { .. }));
    }

    #[test]
    fn gradient_slot_lifecycle() {
        let p = Param::zeros(vec![3]);
        assert!(!p.has_grad());
        assert!(p.set_grad(vec![1.0, 2.0]).is_err());
        p.set_grad(vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(p.grad(), Some(vec![1.0, 2.0, 3.0]));
        p.zero_grad();
        assert!(p.grad().is_none());
    }

    #[test]
    fn scalar_shape_holds_one_value() {
        let p = Param::zeros(Vec::<usize>::new());
        assert_eq!(p.numel(), 1);
    }
}
