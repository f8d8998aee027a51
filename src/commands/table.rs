// ABOUTME: Table maintenance commands: count, columns, truncate, drop and script execution
// ABOUTME: Thin wrappers that open a connection, run one engine helper and close it again

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::replicator::Replicator;
use crate::table::TableRef;
use crate::utils::strip_password;

#[derive(Subcommand)]
pub enum TableCommands {
    /// Print the number of rows in a table
    Count {
        /// Table as database.table
        table: TableRef,
    },
    /// Print the columns of a table
    Columns { table: TableRef },
    /// Remove every row of a table
    Truncate {
        table: TableRef,
        /// Fail when the table does not exist
        #[arg(long)]
        strict: bool,
    },
    /// Drop a table
    Drop { table: TableRef },
    /// Execute a ;-separated SQL script
    Exec { file: PathBuf },
}

pub async fn command(url: &str, command: TableCommands) -> Result<()> {
    crate::utils::validate_connection_string(url)?;
    let mut replicator = Replicator::connect(url, EngineConfig::default())
        .await
        .with_context(|| format!("Failed to connect to {}", strip_password(url)))?;

    let outcome = dispatch(&mut replicator, command).await;
    replicator.close().await?;
    outcome
}

async fn dispatch(replicator: &mut Replicator, command: TableCommands) -> Result<()> {
    match command {
        TableCommands::Count { table } => {
            println!("{}", replicator.count(&table).await?);
        }
        TableCommands::Columns { table } => {
            for column in replicator.columns(&table).await? {
                println!("{}", column);
            }
        }
        TableCommands::Truncate { table, strict } => {
            if strict {
                replicator.truncate_strict(&table).await?;
                println!("Truncated {}", table);
            } else if replicator.truncate(&table).await? {
                println!("Truncated {}", table);
            } else {
                println!("{} does not exist, nothing to truncate", table);
            }
        }
        TableCommands::Drop { table } => {
            replicator.drop_table(&table).await?;
            println!("Dropped {}", table);
        }
        TableCommands::Exec { file } => {
            let count = replicator.exec_script(&file).await?;
            println!("Executed {} statements from {}", count, file.display());
        }
    }
    Ok(())
}
