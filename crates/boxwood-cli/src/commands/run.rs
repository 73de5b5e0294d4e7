//! `boxwood run`: start a box from an image.

use boxwood_common::config::RuntimeConfig;
use boxwood_common::types::{PortMapping, ResourceConfig, VolumeSpec};
use boxwood_runtime::engine::{RunOutcome, RunRequest};
use clap::Args;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Attach the terminal and remove the box when the command exits.
    #[arg(short, long)]
    pub interactive: bool,

    /// Memory limit, e.g. `100m`.
    #[arg(short = 'm', long)]
    pub memory: Option<String>,

    /// Relative CPU weight (`cpu.shares`).
    #[arg(long)]
    pub cpushare: Option<String>,

    /// CFS quota in microseconds per period (`cpu.cfs_quota_us`).
    #[arg(long)]
    pub cpuquota: Option<String>,

    /// CPUs the box may run on, e.g. `0-1`.
    #[arg(long)]
    pub cpuset_cpus: Option<String>,

    /// Memory nodes the box may use.
    #[arg(long)]
    pub cpuset_mems: Option<String>,

    /// Box name; defaults to the generated ID.
    #[arg(long)]
    pub name: Option<String>,

    /// Bind a host directory into the box, `HOST:CONTAINER`.
    #[arg(short, long)]
    pub volume: Option<VolumeSpec>,

    /// Extra environment variable, `KEY=VALUE`. Repeatable.
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Network to connect the box to.
    #[arg(long)]
    pub net: Option<String>,

    /// Publish a port, `HOST:CONTAINER`. Repeatable; needs `--net`.
    #[arg(short, long = "publish")]
    pub publish: Vec<PortMapping>,

    /// Image to run.
    pub image: String,

    /// Command and its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Converts the arguments into an engine request.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment entry is not `KEY=VALUE`.
    pub fn into_request(self) -> anyhow::Result<RunRequest> {
        if let Some(bad) = self.env.iter().find(|e| !e.contains('=') || e.starts_with('=')) {
            anyhow::bail!("environment entry must look like KEY=VALUE, got `{bad}`");
        }
        Ok(RunRequest {
            image: self.image,
            command: self.command,
            name: self.name,
            interactive: self.interactive,
            resources: ResourceConfig {
                memory_limit: self.memory,
                cpu_share: self.cpushare,
                cpu_quota: self.cpuquota,
                cpuset_cpus: self.cpuset_cpus,
                cpuset_mems: self.cpuset_mems,
            },
            volume: self.volume,
            env: self.env,
            network: self.net,
            port_mappings: self.publish,
        })
    }
}

/// Executes the `run` command.
///
/// Detached boxes print their ID and keep running. Interactive boxes run
/// in the foreground; the CLI exits with the command's exit code.
///
/// # Errors
///
/// Returns an error if the box cannot be started.
pub fn execute(args: RunArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    let request = args.into_request()?;
    let engine = super::engine(config)?;

    if request.interactive {
        // Ctrl+C reaches the box through the terminal; the runtime stays
        // alive to tear the box down once it exits.
        ctrlc::set_handler(|| tracing::debug!("interrupt forwarded to box"))
            .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;
    }

    match engine.run(&request).map_err(|e| anyhow::anyhow!("{e}"))? {
        RunOutcome::Detached(record) => {
            println!("{}", record.id);
            Ok(())
        }
        RunOutcome::Exited { code: 0, .. } => Ok(()),
        RunOutcome::Exited { code, .. } => std::process::exit(code),
    }
}
