//! `boxwood logs`: print the output of a detached box.

use boxwood_common::config::RuntimeConfig;
use clap::Args;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Box name.
    pub name: String,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the box is not found or its log cannot be read.
pub fn execute(args: LogsArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    let engine = super::engine(config)?;
    let logs = engine.logs(&args.name).map_err(|e| anyhow::anyhow!("{e}"))?;
    print!("{logs}");
    Ok(())
}
