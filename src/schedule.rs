// Warmup schedules — Step-indexed multipliers for lr, alpha and beta3
//
// Pure functions, all evaluated with the group's current step BEFORE the
// step counter is advanced:
//
//   linear_warmup:            start → end linearly over `warmup` steps
//   linear_half_life_warmup:  start → end linearly in half-life space
//   scheduled_lr:             linear_warmup from 0, called with k + 1
//
// WHY HALF-LIFE SPACE:
//
// A decay coefficient β averages over roughly ln(0.5)/ln(β) steps. Going
// from 0.9 to 0.999 linearly in β spends almost the whole warmup with a
// window of ten-ish steps and then jumps to a thousand at the very end.
// Interpolating the half-life instead grows the averaging window steadily:
//
//   f(β)   = ln(0.5) / ln(β + eps) - 1
//   f⁻¹(t) = 0.5^(1 / (t + 1))
//   β_step = f⁻¹((1 - a) * f(β_start) + a * f(β_end)),  a = step / warmup
//
// Both functions clamp hard: for step ≥ warmup they return `end` exactly.
// A warmup length of 0 means "no warmup" rather than a division by zero.

const HALF_LIFE_EPS: f64 = 1e-8;

/// `start + (end - start) * min(1, step / warmup)`.
///
/// # Example
/// ```
/// use shrew_foreach::schedule::linear_warmup;
/// assert_eq!(linear_warmup(0, 1.0, 0.0, 4), 0.0);
/// assert_eq!(linear_warmup(2, 1.0, 0.0, 4), 0.5);
/// assert_eq!(linear_warmup(9, 1.0, 0.0, 4), 1.0);
/// ```
pub fn linear_warmup(step: u64, end: f64, start: f64, warmup: u64) -> f64 {
    if warmup == 0 || step >= warmup {
        return end;
    }
    let a = step as f64 / warmup as f64;
    start + (end - start) * a
}

/// Learning rate for the 1-indexed `step`: a linear ramp from 0 to `lr` over
/// `warmup_steps`. With `warmup_steps == 1` the rate is flat from step 1.
pub fn scheduled_lr(lr: f64, step: u64, warmup_steps: u64) -> f64 {
    linear_warmup(step, lr, 0.0, warmup_steps)
}

/// Averaging-window half-life implied by a decay coefficient.
fn half_life(beta: f64) -> f64 {
    0.5f64.ln() / (beta + HALF_LIFE_EPS).ln() - 1.0
}

fn half_life_inv(t: f64) -> f64 {
    0.5f64.powf(1.0 / (t + 1.0))
}

/// Warm a decay coefficient from `beta_start` to `beta_end` by linearly
/// interpolating its half-life.
pub fn linear_half_life_warmup(step: u64, beta_end: f64, beta_start: f64, warmup: u64) -> f64 {
    if warmup == 0 || step >= warmup {
        return beta_end;
    }
    let a = step as f64 / warmup as f64;
    half_life_inv((1.0 - a) * half_life(beta_start) + a * half_life(beta_end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    #[test]
    fn linear_warmup_endpoints() {
        assert_eq!(linear_warmup(0, 2.0, 0.5, 10), 0.5);
        assert_eq!(linear_warmup(10, 2.0, 0.5, 10), 2.0);
        assert_eq!(linear_warmup(11, 2.0, 0.5, 10), 2.0);
        assert_abs_diff_eq!(linear_warmup(5, 2.0, 0.5, 10), 1.25);
    }

    #[test]
    fn zero_length_warmup_is_immediate() {
        assert_eq!(linear_warmup(0, 3.0, 0.0, 0), 3.0);
        assert_eq!(linear_half_life_warmup(0, 0.999, 0.9, 0), 0.999);
    }

    #[test]
    fn lr_warmup_with_single_step_is_flat() {
        // lr warmup is evaluated at k + 1 >= 1, so warmup_steps = 1 never scales
        assert_eq!(linear_warmup(1, 0.01, 0.0, 1), 0.01);
    }

    #[test]
    fn scheduled_lr_ramps_from_zero() {
        assert_abs_diff_eq!(scheduled_lr(0.1, 1, 4), 0.025);
        assert_abs_diff_eq!(scheduled_lr(0.1, 2, 4), 0.05);
        assert_eq!(scheduled_lr(0.1, 4, 4), 0.1);
    }

    #[test]
    fn half_life_warmup_starts_at_beta_start() {
        assert_abs_diff_eq!(linear_half_life_warmup(0, 0.999, 0.9, 100), 0.9, epsilon = 1e-6);
        assert_eq!(linear_half_life_warmup(100, 0.999, 0.9, 100), 0.999);
        assert_eq!(linear_half_life_warmup(1000, 0.999, 0.9, 100), 0.999);
    }

    #[test]
    fn half_life_warmup_from_zero_is_finite() {
        let b = linear_half_life_warmup(0, 0.99, 0.0, 10);
        assert!(b.is_finite());
        assert!(b < 1e-6);
    }

    #[test]
    fn half_life_is_linear_in_the_middle() {
        let (s, e) = (0.9, 0.99);
        let mid = linear_half_life_warmup(5, e, s, 10);
        let expected_hl = 0.5 * (half_life(s) + half_life(e));
        assert_abs_diff_eq!(half_life(mid), expected_hl, epsilon = 1e-3);
    }

    proptest! {
        #[test]
        fn prop_linear_warmup_clamps(
            step in 0u64..1000,
            warmup in 1u64..200,
            end in -5.0f64..5.0,
            start in -5.0f64..5.0,
        ) {
            let v = linear_warmup(step, end, start, warmup);
            if step >= warmup {
                prop_assert_eq!(v, end);
            } else {
                let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
                prop_assert!(v >= lo - 1e-12 && v <= hi + 1e-12);
            }
        }

        #[test]
        fn prop_half_life_warmup_is_monotone(
            start in 0.0f64..0.99,
            gap in 0.1f64..0.9,
            warmup in 2u64..300,
        ) {
            let end = (start + gap).min(0.999);
            prop_assume!(end > start);
            let mut prev = linear_half_life_warmup(0, end, start, warmup);
            prop_assert!(prev >= start - 1e-6);
            for step in 1..=warmup {
                let cur = linear_half_life_warmup(step, end, start, warmup);
                prop_assert!(cur >= prev - 1e-12, "step {} went from {} to {}", step, prev, cur);
                prop_assert!(cur <= end + 1e-7);
                prev = cur;
            }
            prop_assert_eq!(prev, end);
        }
    }
}
