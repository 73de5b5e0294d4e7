//! `boxwood ps`: list boxes.

use boxwood_common::config::RuntimeConfig;
use boxwood_common::types::ContainerRecord;
use clap::Args;

use crate::output;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show only running boxes.
    #[arg(short, long)]
    pub running: bool,
}

const HEADERS: [&str; 6] = ["ID", "NAME", "PID", "STATUS", "COMMAND", "CREATED"];

fn row(record: &ContainerRecord) -> Vec<String> {
    vec![
        record.id.to_string(),
        record.name.clone(),
        output::or_dash(record.pid),
        record.status.to_string(),
        record.command.clone(),
        record.created_time.clone(),
    ]
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the box records cannot be read.
pub fn execute(args: PsArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    let engine = super::engine(config)?;
    let rows: Vec<Vec<String>> = engine
        .list()
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .iter()
        .filter(|r| !args.running || r.pid.is_some())
        .map(row)
        .collect();
    print!("{}", output::render_table(&HEADERS, &rows));
    Ok(())
}
