//! `boxwood network`: manage networks.

use boxwood_common::config::RuntimeConfig;
use boxwood_network::bridge::BRIDGE_DRIVER;
use boxwood_network::driver::Network;
use clap::{Args, Subcommand};
use ipnetwork::Ipv4Network;

use crate::output;

/// Network subcommands.
#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    /// Create a network.
    Create(CreateArgs),
    /// List networks.
    #[command(alias = "list")]
    Ls,
    /// Delete a network.
    Rm(RmArgs),
}

/// Arguments for `network create`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Network driver.
    #[arg(long, default_value = BRIDGE_DRIVER)]
    pub driver: String,

    /// Subnet in CIDR notation; its first address becomes the gateway.
    #[arg(long)]
    pub subnet: Ipv4Network,

    /// Network name, also the bridge interface name.
    pub name: String,
}

/// Arguments for `network rm`.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Network name.
    pub name: String,
}

const HEADERS: [&str; 3] = ["NAME", "IpRange", "Driver"];

fn row(network: &Network) -> Vec<String> {
    vec![
        network.name.clone(),
        network.ip_range.to_string(),
        network.driver.clone(),
    ]
}

/// Executes a `network` subcommand.
///
/// # Errors
///
/// Returns an error if the network operation fails.
pub fn execute(command: NetworkCommand, config: RuntimeConfig) -> anyhow::Result<()> {
    let mut engine = super::engine(config)?;
    match command {
        NetworkCommand::Create(args) => {
            let network = engine
                .network_mut()
                .create_network(&args.driver, args.subnet, &args.name)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", network.name);
        }
        NetworkCommand::Ls => {
            let rows: Vec<Vec<String>> =
                engine.network().networks().into_iter().map(row).collect();
            print!("{}", output::render_table(&HEADERS, &rows));
        }
        NetworkCommand::Rm(args) => {
            engine
                .network_mut()
                .delete_network(&args.name)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", args.name);
        }
    }
    Ok(())
}
