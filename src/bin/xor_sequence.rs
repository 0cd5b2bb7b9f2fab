// xor_sequence — Run the XOR sequence benchmark for one optimizer variant
//
// Usage: xor_sequence [config.json]
//
// Without an argument every BenchConfig default is used. Log verbosity
// follows RUST_LOG (default `info`).

use std::fs;

use anyhow::Context;
use shrew_foreach::bench::{trial, BenchConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn load_config() -> anyhow::Result<BenchConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {path}"))
        }
        None => Ok(BenchConfig::default()),
    }
}

fn result_main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config()?;
    info!(
        variant = %cfg.variant,
        length = cfg.length,
        size = cfg.size,
        batch = cfg.batch,
        steps = cfg.steps,
        lr = cfg.optimizer.lr,
        "starting trial"
    );

    let report = trial(&cfg)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.success {
        anyhow::bail!(
            "{} did not reach the target loss after {} attempts",
            report.variant,
            report.attempts
        );
    }
    Ok(())
}

fn main() {
    if let Err(e) = result_main() {
        eprintln!("Err: {e:#}");
        std::process::exit(1);
    }
}
