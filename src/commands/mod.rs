// ABOUTME: Command implementations behind the CLI
// ABOUTME: Exports pipe, run and the table maintenance commands

pub mod pipe;
pub mod run;
pub mod table;

pub use pipe::pipe;
pub use run::run;

use crate::replicator::PipeReport;

/// Print a report to stdout, as JSON when requested.
pub fn print_report(report: &PipeReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    let kind = match report.kind {
        crate::replicator::CopyKind::Full => "full",
        crate::replicator::CopyKind::Incremental => "incremental",
    };
    match &report.watermark {
        Some(watermark) => println!(
            "{} {} => {}: {} rows in {:.2}s (watermark {})",
            kind,
            report.from,
            report.to,
            report.rows,
            report.elapsed.as_secs_f64(),
            watermark
        ),
        None => println!(
            "{} {} => {}: {} rows in {:.2}s",
            kind,
            report.from,
            report.to,
            report.rows,
            report.elapsed.as_secs_f64()
        ),
    }
    Ok(())
}
