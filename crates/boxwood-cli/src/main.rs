//! # boxwood
//!
//! Daemon-less container runtime: cgroup v1 limits, Linux namespaces,
//! overlay root filesystems and bridge networking, driven from a single
//! binary. The same binary re-executes itself as `boxwood init` inside
//! every new box.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

mod commands;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to command output and, inside a
    // box, to the user command.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    commands::execute(cli)
}
