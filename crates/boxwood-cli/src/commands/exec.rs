//! `boxwood exec`: run a command inside a running box.

use boxwood_common::config::RuntimeConfig;
use clap::Args;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Box name.
    pub name: String,

    /// Command and its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command.
///
/// The command shares the box's namespaces and environment; stdio is
/// inherited and the CLI exits with the command's exit code.
///
/// # Errors
///
/// Returns an error if the box is not running or its namespaces cannot be
/// joined.
pub fn execute(args: ExecArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    let engine = super::engine(config)?;
    ctrlc::set_handler(|| tracing::debug!("interrupt forwarded to exec command"))
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let code = engine
        .exec(&args.name, &args.command)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
