use shrew_foreach::bench::{XorModel, XorSequenceTask};
use shrew_foreach::{GroupConfig, Optimizer, StatefulOptimizer, Variant};

const STEPS: usize = 50;
const WINDOW: usize = 10;

fn window_means(losses: &[f64]) -> Vec<f64> {
    losses
        .chunks(WINDOW)
        .map(|w| w.iter().sum::<f64>() / w.len() as f64)
        .collect()
}

/// Train on one fixed batch and return the loss before every step.
fn train_fixed_batch(variant: Variant, seed: u64) -> (Vec<f64>, XorModel, StatefulOptimizer) {
    let model = XorModel::new(8, seed).unwrap();
    let batch = XorSequenceTask::new(8, 16, seed).sample();
    let config = GroupConfig::new(0.01)
        .betas((0.9, 0.99, 0.99))
        .eps(1e-8)
        .weight_decay(0.0);
    let mut opt = StatefulOptimizer::new(variant, model.params(), config).unwrap();

    let mut losses = Vec::with_capacity(STEPS);
    for _ in 0..STEPS {
        losses.push(model.forward_backward(&batch).unwrap());
        opt.step().unwrap();
        opt.zero_grad();
    }
    (losses, model, opt)
}

#[test]
fn laprop_loss_trend_is_strictly_decreasing() {
    let (losses, model, opt) = train_fixed_batch(Variant::LaProp, 0x1239121);
    assert_eq!(opt.step_count(0), Some(STEPS as u64));

    let means = window_means(&losses);
    assert_eq!(means.len(), STEPS / WINDOW);
    for pair in means.windows(2) {
        assert!(pair[1] < pair[0], "window means not decreasing: {means:?}");
    }

    for param in model.params() {
        assert!(param.is_finite());
        let state = opt.state(&param).unwrap();
        let names: Vec<_> = state.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["exp_avg_fast", "exp_avg_slow", "exp_avg_sq"]);
        for (_, buf) in state.iter() {
            assert!(buf.is_finite());
            assert_eq!(buf.shape(), param.shape());
        }
    }
}

#[test]
fn every_variant_learns_the_fixed_batch() {
    for variant in Variant::ALL {
        for seed in [1, 2, 3] {
            let (losses, model, opt) = train_fixed_batch(variant, seed);
            let means = window_means(&losses);
            for pair in means.windows(2) {
                assert!(pair[1] < pair[0], "{variant} seed {seed}: {means:?}");
            }
            for param in model.params() {
                assert!(param.is_finite(), "{variant}");
                assert!(opt.state(&param).unwrap().iter().all(|(_, b)| b.is_finite()));
            }
        }
    }
}

#[test]
fn checkpoint_resume_matches_uninterrupted_run() {
    use shrew_foreach::{OptimizerState, Stateful};

    let seed = 77;
    let (_, reference, _) = train_fixed_batch(Variant::ScheduleFreeAdamW, seed);

    // Same run, but the optimizer is rebuilt from a checkpoint halfway.
    let model = XorModel::new(8, seed).unwrap();
    let batch = XorSequenceTask::new(8, 16, seed).sample();
    let config = GroupConfig::new(0.01).betas((0.9, 0.99, 0.99));
    let mut opt = StatefulOptimizer::new(Variant::ScheduleFreeAdamW, model.params(), config.clone()).unwrap();
    for step in 0..STEPS {
        if step == STEPS / 2 {
            let json = serde_json::to_string(&opt.state_dict()).unwrap();
            let saved: OptimizerState = serde_json::from_str(&json).unwrap();
            opt = StatefulOptimizer::new(Variant::ScheduleFreeAdamW, model.params(), config.clone()).unwrap();
            opt.load_state_dict(&saved).unwrap();
        }
        model.forward_backward(&batch).unwrap();
        opt.step().unwrap();
        opt.zero_grad();
    }

    for (a, b) in model.params().iter().zip(reference.params().iter()) {
        assert_eq!(a.to_vec(), b.to_vec());
    }
}
