//! Optimo command-line runner
//!
//! Runs one optimization job over a problem file and writes the outcome.
//!
//! # Usage
//!
//! ```bash
//! optimo-run problem.json [optimo.toml] [outcome.json]
//! ```
//!
//! Without a config argument the configuration is searched in the standard
//! locations and falls back to built-in defaults.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Log level (default: info)

use std::env;
use std::fs;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use optimo_rust::advisor::Advisor;
use optimo_rust::services::{process_run_async, JobTracker};
use optimo_rust::OptimizerConfig;

fn load_config(path: Option<&String>) -> anyhow::Result<OptimizerConfig> {
    match path {
        Some(path) => OptimizerConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path)),
        None => match OptimizerConfig::from_default_location() {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("{}; using defaults", e);
                Ok(OptimizerConfig::default())
            }
        },
    }
}

#[cfg(feature = "http-advisor")]
fn build_advisor(config: &OptimizerConfig) -> anyhow::Result<Option<Arc<dyn Advisor>>> {
    if !config.advisor.enabled {
        return Ok(None);
    }
    let advisor = optimo_rust::advisor::HttpAdvisor::from_settings(&config.advisor)?;
    Ok(Some(Arc::new(advisor)))
}

#[cfg(not(feature = "http-advisor"))]
fn build_advisor(config: &OptimizerConfig) -> anyhow::Result<Option<Arc<dyn Advisor>>> {
    if config.advisor.enabled {
        warn!("advisor.enabled is set but this build has no HTTP advisor; ambiguous courses follow pipeline.allow_heuristic_fallback");
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(
            env::var("RUST_LOG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Level::INFO),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(problem_path) = args.first() else {
        anyhow::bail!("usage: optimo-run <problem.json> [config.toml] [output.json]");
    };

    let config = load_config(args.get(1))?;
    let advisor = build_advisor(&config)?;
    let problem_json = fs::read_to_string(problem_path)
        .with_context(|| format!("Failed to read problem file {}", problem_path))?;

    info!("Starting Optimo run for {}", problem_path);
    let tracker = JobTracker::new();
    let job_id = tracker.create_job();
    let outcome = process_run_async(job_id.clone(), tracker.clone(), problem_json, config, advisor)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if let Some(output_path) = args.get(2) {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?;
        fs::write(output_path, json)
            .with_context(|| format!("Failed to write outcome to {}", output_path))?;
        info!("Outcome written to {}", output_path);
    }
    println!("{}", outcome.report);

    if !outcome.state.is_success() {
        if let Some(job) = tracker.get_job(&job_id) {
            warn!("Job {} ended as {:?}", job.job_id, job.status);
        }
        std::process::exit(2);
    }
    Ok(())
}
