// ABOUTME: One-off pipe command: copy a single table with a chosen strategy
// ABOUTME: Connects, runs the pipe, prints the report and releases the connection

use anyhow::{Context, Result};

use crate::config::{EngineConfig, Strategy};
use crate::replicator::Replicator;
use crate::table::{SyncPlan, TableRef};
use crate::utils::{strip_password, validate_connection_string};

pub struct PipeOptions {
    pub url: String,
    pub from: TableRef,
    pub to: TableRef,
    pub strategy: Strategy,
    pub matcher: Option<String>,
    pub primary_key: Option<String>,
    pub page_size: usize,
    pub json: bool,
}

pub async fn pipe(opts: PipeOptions) -> Result<()> {
    validate_connection_string(&opts.url)?;
    if opts.from == opts.to {
        anyhow::bail!("Source and destination are both {}", opts.from);
    }

    let config = EngineConfig {
        page_size: opts.page_size,
        ..EngineConfig::default()
    };
    let mut replicator = Replicator::connect(&opts.url, config)
        .await
        .with_context(|| format!("Failed to connect to {}", strip_password(&opts.url)))?;

    let mut plan: SyncPlan = replicator.plan(opts.from, opts.to);
    if let Some(matcher) = opts.matcher {
        plan = plan.with_matcher(matcher);
    }
    if let Some(primary_key) = opts.primary_key {
        plan = plan.with_primary_key(primary_key);
    }

    let outcome = replicator.run(opts.strategy, &plan).await;
    // Release the connection even when the pipe failed
    replicator.close().await?;

    let report = outcome?;
    super::print_report(&report, opts.json)
}
