// ABOUTME: Run every pipe of a TOML job file over one connection
// ABOUTME: Pipes run sequentially in file order; the first failure stops the job

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::JobFile;
use crate::replicator::Replicator;
use crate::utils::strip_password;

pub async fn run(config_path: &Path, json: bool) -> Result<()> {
    let job = JobFile::load(config_path)?;
    let plans = job.plans();
    if plans.is_empty() {
        tracing::warn!("Job file {:?} has no [[pipe]] entries", config_path);
        return Ok(());
    }

    tracing::info!(
        "Running {} pipes against {}",
        plans.len(),
        strip_password(&job.connection.url)
    );

    let mut replicator = Replicator::connect(&job.connection.url, job.engine_config())
        .await
        .with_context(|| format!("Failed to connect to {}", strip_password(&job.connection.url)))?;

    let mut outcome = Ok(());
    for (idx, (strategy, plan)) in plans.iter().enumerate() {
        match replicator.run(*strategy, plan).await {
            Ok(report) => {
                if let Err(e) = super::print_report(&report, json) {
                    outcome = Err(e);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Pipe {} ({} => {}) failed: {:?}", idx + 1, plan.from, plan.to, e);
                outcome = Err(e.context(format!(
                    "Pipe {} ({} => {}) failed",
                    idx + 1,
                    plan.from,
                    plan.to
                )));
                break;
            }
        }
    }

    replicator.close().await?;
    outcome
}
