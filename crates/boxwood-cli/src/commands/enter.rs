//! `boxwood enter`: helper behind `exec`, started inside no namespace yet.

use boxwood_core::namespace::enter;
use clap::Args;

/// Arguments for the hidden `enter` command.
#[derive(Args, Debug)]
pub struct EnterArgs {
    /// Host PID of the box init whose namespaces are joined.
    pub pid: i32,

    /// Command and its arguments.
    #[arg(required = true, last = true)]
    pub command: Vec<String>,
}

/// Executes the `enter` command: join the box, run the command, exit with
/// its code.
///
/// # Errors
///
/// Returns an error if the namespaces cannot be joined or the command
/// cannot be started.
pub fn execute(args: EnterArgs) -> anyhow::Result<()> {
    // Joining the mount namespace needs a single-threaded process, so the
    // Ctrl+C handler thread only starts afterwards.
    enter::join(args.pid).map_err(|e| anyhow::anyhow!("cannot enter box: {e}"))?;
    ctrlc::set_handler(|| tracing::debug!("interrupt forwarded to box command"))
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let code = enter::spawn_and_wait(&args.command).map_err(|e| anyhow::anyhow!("{e}"))?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
