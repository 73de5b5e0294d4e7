//! `boxwood init`: first process inside a new box.

use boxwood_core::bootstrap;
use clap::Args;

/// Arguments for the hidden `init` command. It takes none; the user command
/// arrives over the init pipe.
#[derive(Args, Debug)]
pub struct InitArgs {}

/// Executes the `init` command. On success the process image is replaced
/// by the user command and this never returns.
///
/// # Errors
///
/// Returns an error if mounting or exec fails.
pub fn execute(_args: InitArgs) -> anyhow::Result<()> {
    tracing::debug!("box init starting");
    let never = bootstrap::run().map_err(|e| anyhow::anyhow!("box init failed: {e}"))?;
    match never {}
}
