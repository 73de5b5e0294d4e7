//! CLI command definitions and dispatch.

pub mod enter;
pub mod exec;
pub mod image;
pub mod init;
pub mod logs;
pub mod network;
pub mod ps;
pub mod rm;
pub mod run;
pub mod stop;

use std::path::PathBuf;

use boxwood_common::config::RuntimeConfig;
use boxwood_common::constants::{CGROUP_ROOT_ENV, DEFAULT_ROOT, ROOT_ENV};
use boxwood_runtime::engine::Engine;
use clap::{Parser, Subcommand};

/// boxwood: a daemon-less container runtime.
#[derive(Parser, Debug)]
#[command(name = "boxwood", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding images, boxes, networks and IPAM state.
    #[arg(long, global = true, env = ROOT_ENV, default_value = DEFAULT_ROOT)]
    pub root: PathBuf,

    /// Fixed cgroup v1 hierarchy root (`<dir>/<controller>`). Controllers
    /// are looked up in /proc/self/mountinfo when unset.
    #[arg(long, global = true, env = CGROUP_ROOT_ENV)]
    pub cgroup_root: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Cli {
    /// Runtime configuration selected by the global flags.
    #[must_use]
    pub fn config(&self) -> RuntimeConfig {
        RuntimeConfig {
            root: self.root.clone(),
            cgroup_root: self.cgroup_root.clone(),
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a box from an image.
    Run(run::RunArgs),
    /// Bootstrap a box from the inside (invoked by `run`, not by users).
    #[command(hide = true)]
    Init(init::InitArgs),
    /// List boxes.
    Ps(ps::PsArgs),
    /// Run a command inside a running box.
    Exec(exec::ExecArgs),
    /// Join a running box and run a command (invoked by `exec`, not by users).
    #[command(hide = true)]
    Enter(enter::EnterArgs),
    /// Print the output of a detached box.
    Logs(logs::LogsArgs),
    /// Stop a running box.
    Stop(stop::StopArgs),
    /// Remove a stopped box.
    Rm(rm::RmArgs),
    /// Manage networks.
    #[command(subcommand)]
    Network(network::NetworkCommand),
    /// Manage the local image catalog.
    #[command(subcommand)]
    Image(image::ImageCommand),
}

/// Builds the engine for the selected configuration.
///
/// # Errors
///
/// Returns an error if persisted networks cannot be loaded.
pub fn engine(config: RuntimeConfig) -> anyhow::Result<Engine> {
    Engine::new(config).map_err(|e| anyhow::anyhow!("{e}"))
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config();
    match cli.command {
        Command::Run(args) => run::execute(args, config),
        Command::Init(args) => init::execute(args),
        Command::Ps(args) => ps::execute(args, config),
        Command::Exec(args) => exec::execute(args, config),
        Command::Enter(args) => enter::execute(args),
        Command::Logs(args) => logs::execute(args, config),
        Command::Stop(args) => stop::execute(args, config),
        Command::Rm(args) => rm::execute(args, config),
        Command::Network(cmd) => network::execute(cmd, config),
        Command::Image(cmd) => image::execute(cmd, &config),
    }
}
