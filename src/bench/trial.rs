// Trial runner — Train until win, retry with a smaller learning rate on failure
//
// One attempt:
//   model   seeded with seed + attempt
//   data    an XorSequenceTask seeded the same way, a fresh batch per step
//   loop    forward_backward → step → zero_grad, for at most `steps` steps
//
// The attempt succeeds on the first step whose loss wins. A non-finite loss
// ends it early. After a failed attempt the learning rate is multiplied by
// `retry_lr_factor` and the next attempt starts from a fresh model.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::xor::{XorModel, XorSequenceTask};
use super::{win, BenchConfig};
use crate::error::Result;
use crate::optimizer::Optimizer;
use crate::stateful::StatefulOptimizer;

/// Outcome of [`trial`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialReport {
    pub variant: String,
    pub success: bool,
    /// Attempts made, including the successful one.
    pub attempts: usize,
    /// Steps taken by the last attempt.
    pub steps: usize,
    pub final_loss: f64,
    /// Learning rate of the last attempt.
    pub lr: f64,
    pub elapsed_secs: f64,
}

struct Attempt {
    won: bool,
    steps: usize,
    loss: f64,
}

fn run_attempt(cfg: &BenchConfig, seed: u64, lr: f64) -> Result<Attempt> {
    let model = XorModel::new(cfg.size, seed)?;
    let mut task = XorSequenceTask::new(cfg.length, cfg.batch, seed);
    let mut opt = StatefulOptimizer::new(cfg.variant, model.params(), cfg.optimizer.clone().lr(lr))?;

    let mut loss = f64::NAN;
    for step in 1..=cfg.steps {
        let batch = task.sample();
        loss = model.forward_backward(&batch)?;
        if !loss.is_finite() {
            warn!(step, loss, "non-finite loss, attempt aborted");
            return Ok(Attempt {
                won: false,
                steps: step,
                loss,
            });
        }
        if win(loss) {
            return Ok(Attempt {
                won: true,
                steps: step,
                loss,
            });
        }
        opt.step()?;
        opt.zero_grad();

        if step % 100 == 0 {
            debug!(step, loss, "training");
        }
    }
    Ok(Attempt {
        won: false,
        steps: cfg.steps,
        loss,
    })
}

/// Train the XOR model with `cfg.variant` until it wins or the retries run out.
pub fn trial(cfg: &BenchConfig) -> Result<TrialReport> {
    cfg.validate()?;
    let start = Instant::now();
    let mut lr = cfg.optimizer.lr;
    let mut last = Attempt {
        won: false,
        steps: 0,
        loss: f64::NAN,
    };

    let mut attempts = 0;
    for attempt in 0..cfg.failure_threshold {
        attempts = attempt + 1;
        last = run_attempt(cfg, cfg.seed.wrapping_add(attempt as u64), lr)?;
        if last.won {
            info!(variant = %cfg.variant, attempt = attempts, steps = last.steps, loss = last.loss, lr, "solved");
            break;
        }
        warn!(variant = %cfg.variant, attempt = attempts, loss = last.loss, lr, "attempt failed");
        if attempts < cfg.failure_threshold {
            lr *= cfg.retry_lr_factor;
        }
    }

    Ok(TrialReport {
        variant: cfg.variant.to_string(),
        success: last.won,
        attempts,
        steps: last.steps,
        final_loss: last.loss,
        lr,
        elapsed_secs: start.elapsed().as_secs_f64(),
    })
}
