// Moment tracking — Running averages of gradients and squared gradients
//
// Every variant in this crate keeps exponential moving averages (EMAs):
//
//   exp_avg_sq = decay * exp_avg_sq + (1 - decay) * grad²        (2nd moment)
//   exp_avg    = beta  * exp_avg    + (1 - beta)  * grad / denom (LaProp-style)
//   exp_avg    = beta  * exp_avg    + (1 - beta)  * grad         (Adam-style)
//
// BIAS DEBIASING:
//
// An EMA that starts at zero underestimates its target during the first
// steps. Adam divides the average by (1 - beta^t) afterwards. Here the
// coefficient itself is corrected before the update instead:
//
//   beta_t = 1 - (1 - beta) / (1 - beta^t)
//          = beta * (1 - beta^(t-1)) / (1 - beta^t)
//
// At t = 1 this is 0, so the first update copies the observation outright;
// as t grows it approaches beta from below. Averages updated with beta_t are
// unbiased without any later rescaling.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::foreach::{zip3_apply, zip_apply, zip_map};

/// How the second moment becomes a normalising denominator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Denominator {
    /// `sqrt(exp_avg_sq) + eps`
    #[default]
    Sqrt,
    /// `exp_avg_sq + eps`
    Raw,
}

/// Debiased decay coefficient for the 1-indexed `step`.
pub fn beta_debias(beta: f64, step: u64) -> f64 {
    if step <= 1 {
        return 0.0;
    }
    if beta >= 1.0 {
        return (step - 1) as f64 / step as f64;
    }
    1.0 - (1.0 - beta) / (1.0 - beta.powf(step as f64))
}

/// Decay the squared-gradient averages in place and return one denominator
/// buffer per parameter.
pub fn update_second_moment(
    exp_avg_sq: &mut [&mut [f64]],
    grads: &[&[f64]],
    decay: f64,
    eps: f64,
    denominator: Denominator,
) -> Result<Vec<Vec<f64>>> {
    zip_apply("exp_avg_sq", exp_avg_sq, grads, |v, g| {
        *v = *v * decay + g * g * (1.0 - decay);
    })?;
    let denoms = exp_avg_sq
        .iter()
        .map(|v| match denominator {
            Denominator::Sqrt => v.iter().map(|x| x.sqrt() + eps).collect(),
            Denominator::Raw => v.iter().map(|x| x + eps).collect(),
        })
        .collect();
    Ok(denoms)
}

/// `acc = acc * beta + grad / denom * (1 - beta)`
pub fn update_normalized_moment(
    acc: &mut [&mut [f64]],
    grads: &[&[f64]],
    denoms: &[&[f64]],
    beta: f64,
) -> Result<()> {
    zip3_apply("normalized moment", acc, grads, denoms, |m, g, d| {
        *m = *m * beta + g / d * (1.0 - beta);
    })
}

/// `acc = acc * beta + grad * (1 - beta)`
pub fn update_moment(acc: &mut [&mut [f64]], grads: &[&[f64]], beta: f64) -> Result<()> {
    zip_apply("moment", acc, grads, |m, g| {
        *m = *m * beta + g * (1.0 - beta);
    })
}

/// `grad / denom` as fresh buffers.
pub fn normalize(grads: &[&[f64]], denoms: &[&[f64]]) -> Result<Vec<Vec<f64>>> {
    zip_map("normalize", grads, denoms, |g, d| g / d)
}
