// Parameter update — The only place the optimizer writes to model parameters
//
//   θ = θ * (1 + lr * weight_decay) + direction * lr
//
// `lr` arrives already negated (a descent step is a negative number), so
// the direction is simply added. With the same sign the decay factor
// becomes 1 - |lr| * weight_decay: decoupled weight decay that shrinks the
// parameter itself instead of being folded into the gradient.

use crate::error::{OptimError, Result};
use crate::param::Param;

/// Apply `direction[i]` to `params[i]` in place for every pair.
pub fn apply_update(params: &[&Param], direction: &[&[f64]], lr: f64, weight_decay: f64) -> Result<()> {
    if params.len() != direction.len() {
        return Err(OptimError::shape(
            "update batch",
            &[params.len()],
            &[direction.len()],
        ));
    }
    for (param, dir) in params.iter().zip(direction.iter()) {
        if param.numel() != dir.len() {
            return Err(OptimError::shape("update direction", param.shape(), &[dir.len()]));
        }
    }

    let decay = 1.0 + lr * weight_decay;
    for (param, dir) in params.iter().zip(direction.iter()) {
        param.with_data_mut(|data| {
            for (p, &d) in data.iter_mut().zip(dir.iter()) {
                if weight_decay != 0.0 {
                    *p *= decay;
                }
                *p += d * lr;
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn negative_lr_descends() {
        let p = Param::new(vec![1.0, 2.0], vec![2]).unwrap();
        let dir = [1.0, -1.0];
        apply_update(&[&p], &[dir.as_slice()], -0.1, 0.0).unwrap();
        let v = p.to_vec();
        assert_abs_diff_eq!(v[0], 0.9, epsilon = 1e-12);
        assert_abs_diff_eq!(v[1], 2.1, epsilon = 1e-12);
    }

    #[test]
    fn weight_decay_shrinks_parameter() {
        let p = Param::new(vec![10.0], vec![1]).unwrap();
        let dir = [0.0];
        apply_update(&[&p], &[dir.as_slice()], -0.1, 0.5).unwrap();
        assert_abs_diff_eq!(p.to_vec()[0], 9.5, epsilon = 1e-12);
    }

    #[test]
    fn rejects_direction_of_wrong_size() {
        let p = Param::zeros(vec![3]);
        let dir = [0.0, 0.0];
        assert!(apply_update(&[&p], &[dir.as_slice()], -0.1, 0.0).is_err());
        assert!(apply_update(&[&p], &[], -0.1, 0.0).is_err());
    }
}
