//! `boxwood rm`: remove a stopped box.

use boxwood_common::config::RuntimeConfig;
use clap::Args;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Box name.
    pub name: String,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the box is unknown or still running, or if part of
/// its cleanup failed.
pub fn execute(args: RmArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    let engine = super::engine(config)?;
    engine
        .remove(&args.name)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("{}", args.name);
    Ok(())
}
