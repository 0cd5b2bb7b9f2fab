// XOR task and model — Synthetic data plus a tiny model with a hand-written backward pass
//
// DATA: a batch of random bit rows of length 2n. The first n bits of a row
// are `first`, the last n bits `second`, and the target is their xor.
//
// MODEL (per position t, no interaction between positions):
//   h     = tanh(embed0[first[t]] + embed1[second[t]])      h ∈ R^size
//   logit = proj · h
//   loss  = mean BCE-with-logits(logit, target)
//
// Three parameters: embed0 (2, size), embed1 (2, size), proj (size, 1).
// XOR needs a non-monotone response in first + second, which two tanh units
// plus a saturated bias unit can represent.
//
// BACKWARD:
//   dlogit = (σ(logit) - y) / N
//   dproj  = Σ dlogit · h
//   dpre   = dlogit · proj ⊙ (1 - h²)    accumulated into the embedding rows used

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::param::Param;

/// One sampled batch.
#[derive(Debug, Clone, PartialEq)]
pub struct XorBatch {
    pub first: Vec<Vec<usize>>,
    pub second: Vec<Vec<usize>>,
    pub target: Vec<Vec<f64>>,
}

impl XorBatch {
    /// Number of (row, position) pairs.
    pub fn len(&self) -> usize {
        self.first.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Seeded generator of XOR batches.
#[derive(Debug, Clone)]
pub struct XorSequenceTask {
    length: usize,
    batch: usize,
    rng: StdRng,
}

impl XorSequenceTask {
    /// `length` is the full row length; each half holds `length / 2` bits.
    pub fn new(length: usize, batch: usize, seed: u64) -> Self {
        XorSequenceTask {
            length,
            batch,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn sample(&mut self) -> XorBatch {
        let half = self.length / 2;
        let mut first = Vec::with_capacity(self.batch);
        let mut second = Vec::with_capacity(self.batch);
        let mut target: Vec<Vec<f64>> = Vec::with_capacity(self.batch);

        for _ in 0..self.batch {
            let row: Vec<usize> = (0..2 * half).map(|_| usize::from(self.rng.random::<bool>())).collect();
            let (a, b) = row.split_at(half);
            target.push(a.iter().zip(b).map(|(x, y)| (x ^ y) as f64).collect());
            first.push(a.to_vec());
            second.push(b.to_vec());
        }
        XorBatch {
            first,
            second,
            target,
        }
    }
}

/// `max(z, 0) - z y + ln(1 + e^-|z|)`, stable for large |z|.
fn bce_with_logits(z: f64, y: f64) -> f64 {
    z.max(0.0) - z * y + (-z.abs()).exp().ln_1p()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Two bit embeddings and a linear read-out.
#[derive(Debug, Clone)]
pub struct XorModel {
    size: usize,
    embed0: Param,
    embed1: Param,
    proj: Param,
}

impl XorModel {
    /// Embeddings uniform in [-1, 1), projection uniform in ±1/√size.
    pub fn new(size: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut uniform = |n: usize, limit: f64| -> Vec<f64> {
            (0..n).map(|_| rng.random_range(-limit..limit)).collect()
        };
        let bound = 1.0 / (size as f64).sqrt();
        Ok(XorModel {
            size,
            embed0: Param::new(uniform(2 * size, 1.0), vec![2, size])?,
            embed1: Param::new(uniform(2 * size, 1.0), vec![2, size])?,
            proj: Param::new(uniform(size, bound), vec![size, 1])?,
        })
    }

    /// `[embed0, embed1, proj]`, handles sharing storage with the model.
    pub fn params(&self) -> Vec<Param> {
        vec![self.embed0.clone(), self.embed1.clone(), self.proj.clone()]
    }

    fn hidden(&self, e0: &[f64], e1: &[f64], a: usize, b: usize) -> Vec<f64> {
        let n = self.size;
        (0..n).map(|j| (e0[a * n + j] + e1[b * n + j]).tanh()).collect()
    }

    /// Mean loss over the batch, without touching gradients.
    pub fn loss(&self, batch: &XorBatch) -> f64 {
        let (e0, e1, proj) = (self.embed0.to_vec(), self.embed1.to_vec(), self.proj.to_vec());
        let mut total = 0.0;
        for ((first, second), target) in batch.first.iter().zip(&batch.second).zip(&batch.target) {
            for ((&a, &b), &y) in first.iter().zip(second).zip(target) {
                let h = self.hidden(&e0, &e1, a, b);
                let z: f64 = proj.iter().zip(&h).map(|(w, h)| w * h).sum();
                total += bce_with_logits(z, y);
            }
        }
        total / batch.len().max(1) as f64
    }

    /// Mean loss over the batch; stores the gradient of every parameter.
    #[allow(clippy::needless_range_loop)]
    pub fn forward_backward(&self, batch: &XorBatch) -> Result<f64> {
        let n = self.size;
        let (e0, e1, proj) = (self.embed0.to_vec(), self.embed1.to_vec(), self.proj.to_vec());
        let mut g0 = vec![0.0; e0.len()];
        let mut g1 = vec![0.0; e1.len()];
        let mut gp = vec![0.0; proj.len()];
        let count = batch.len().max(1) as f64;

        let mut total = 0.0;
        for ((first, second), target) in batch.first.iter().zip(&batch.second).zip(&batch.target) {
            for ((&a, &b), &y) in first.iter().zip(second).zip(target) {
                let h = self.hidden(&e0, &e1, a, b);
                let z: f64 = proj.iter().zip(&h).map(|(w, h)| w * h).sum();
                total += bce_with_logits(z, y);

                let dz = (sigmoid(z) - y) / count;
                for j in 0..n {
                    gp[j] += dz * h[j];
                    let dpre = dz * proj[j] * (1.0 - h[j] * h[j]);
                    g0[a * n + j] += dpre;
                    g1[b * n + j] += dpre;
                }
            }
        }

        self.embed0.set_grad(g0)?;
        self.embed1.set_grad(g1)?;
        self.proj.set_grad(gp)?;
        Ok(total / count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn targets_are_xor_of_halves() {
        let mut task = XorSequenceTask::new(8, 5, 7);
        let batch = task.sample();
        assert_eq!(batch.first.len(), 5);
        assert_eq!(batch.len(), 20);
        for ((a, b), t) in batch.first.iter().zip(&batch.second).zip(&batch.target) {
            assert_eq!(a.len(), 4);
            for ((&x, &y), &z) in a.iter().zip(b).zip(t) {
                assert_eq!(z, if x != y { 1.0 } else { 0.0 });
            }
        }
    }

    #[test]
    fn same_seed_same_batches() {
        let mut t1 = XorSequenceTask::new(6, 3, 42);
        let mut t2 = XorSequenceTask::new(6, 3, 42);
        assert_eq!(t1.sample(), t2.sample());
        assert_eq!(t1.sample(), t2.sample());
    }

    #[test]
    fn parameter_shapes() {
        let model = XorModel::new(8, 1).unwrap();
        let shapes: Vec<Vec<usize>> = model.params().iter().map(|p| p.shape().to_vec()).collect();
        assert_eq!(shapes, vec![vec![2, 8], vec![2, 8], vec![8, 1]]);
    }

    #[test]
    fn stable_loss_for_large_logits() {
        assert_abs_diff_eq!(bce_with_logits(800.0, 1.0), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(bce_with_logits(-800.0, 1.0), 800.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bce_with_logits(0.0, 0.0), 2f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let model = XorModel::new(4, 3).unwrap();
        let batch = XorSequenceTask::new(6, 4, 9).sample();
        model.forward_backward(&batch).unwrap();

        let h = 1e-6;
        for param in model.params() {
            let grad = param.grad().unwrap();
            for i in 0..param.numel() {
                param.with_data_mut(|d| d[i] += h);
                let up = model.loss(&batch);
                param.with_data_mut(|d| d[i] -= 2.0 * h);
                let down = model.loss(&batch);
                param.with_data_mut(|d| d[i] += h);
                assert_abs_diff_eq!(grad[i], (up - down) / (2.0 * h), epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn forward_backward_reports_the_loss() {
        let model = XorModel::new(8, 5).unwrap();
        let batch = XorSequenceTask::new(8, 4, 11).sample();
        let loss = model.forward_backward(&batch).unwrap();
        assert_abs_diff_eq!(loss, model.loss(&batch), epsilon = 1e-12);
    }
}
