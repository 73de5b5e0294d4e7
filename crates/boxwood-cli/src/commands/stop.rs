//! `boxwood stop`: stop a running box.

use boxwood_common::config::RuntimeConfig;
use clap::Args;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Box name.
    pub name: String,
}

/// Executes the `stop` command.
///
/// Sends `SIGTERM`, waits for the grace period, then `SIGKILL`s. The box
/// stays listed as stopped until `boxwood rm`.
///
/// # Errors
///
/// Returns an error if the box is unknown, not running, or cannot be
/// signalled.
pub fn execute(args: StopArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    let engine = super::engine(config)?;
    let record = engine.stop(&args.name).map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("{}", record.name);
    Ok(())
}
