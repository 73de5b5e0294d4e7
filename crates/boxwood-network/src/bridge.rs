//! Linux bridge network driver.
//!
//! Each network is a kernel bridge named after the network, carrying the
//! gateway address, plus a masquerade rule for its subnet. Each endpoint is
//! a veth pair whose host leg is enslaved to the bridge.

use std::sync::Arc;

use boxwood_common::error::{BoxError, Result};
use boxwood_common::rollback::Rollback;
use ipnetwork::Ipv4Network;

use crate::driver::{Endpoint, Network, NetworkDriver};
use crate::firewall::{NatRule, NatTable};
use crate::ipam;
use crate::netlink::{self, NetlinkHandle};

/// Driver name stored in network records.
pub const BRIDGE_DRIVER: &str = "bridge";

/// [`NetworkDriver`] backed by a Linux bridge.
pub struct BridgeDriver {
    nat: Arc<dyn NatTable>,
}

impl std::fmt::Debug for BridgeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeDriver").finish_non_exhaustive()
    }
}

impl BridgeDriver {
    /// Creates a driver installing its masquerade rules through `nat`.
    pub fn new(nat: Arc<dyn NatTable>) -> Self {
        Self { nat }
    }

    fn masquerade(network: &Network) -> Result<NatRule> {
        Ok(NatRule::Masquerade {
            subnet: network.subnet()?,
            bridge: network.name.clone(),
        })
    }
}

fn delete_link_by_index(index: u32) -> Result<()> {
    NetlinkHandle::new()?.delete_link(index)
}

impl NetworkDriver for BridgeDriver {
    fn name(&self) -> &'static str {
        BRIDGE_DRIVER
    }

    fn create(&self, ip_range: Ipv4Network, name: &str) -> Result<Network> {
        let network = Network {
            name: name.to_string(),
            ip_range,
            driver: BRIDGE_DRIVER.to_string(),
        };
        let mut nl = NetlinkHandle::new()?;
        let mut undo = Rollback::new("bridge create");

        let index = nl.create_bridge(name)?;
        undo.push(format!("delete bridge {name}"), move || {
            delete_link_by_index(index)
        });
        nl.add_address(index, ip_range)?;
        nl.set_link_up(index, true)?;
        self.nat.append(&Self::masquerade(&network)?)?;

        undo.commit();
        tracing::info!(
            bridge = name,
            subnet = %ipam::canonical(&ip_range)?,
            "bridge network created"
        );
        Ok(network)
    }

    fn delete(&self, network: &Network) -> Result<()> {
        let mut failures = Vec::new();

        if let Err(e) = Self::masquerade(network).and_then(|rule| self.nat.delete(&rule)) {
            tracing::warn!(bridge = %network.name, error = %e, "masquerade rule not removed");
            failures.push(e);
        }

        let teardown = netlink::ifindex(&network.name).and_then(|index| {
            let mut nl = NetlinkHandle::new()?;
            nl.set_link_up(index, false)?;
            nl.delete_link(index)
        });
        if let Err(e) = teardown {
            tracing::warn!(bridge = %network.name, error = %e, "bridge not removed");
            failures.push(e);
        }

        BoxError::check_cleanup(failures)?;
        tracing::info!(bridge = %network.name, "bridge network deleted");
        Ok(())
    }

    fn connect(&self, network: &Network, endpoint: &mut Endpoint) -> Result<()> {
        let bridge_index = netlink::ifindex(&network.name)?;
        let mut nl = NetlinkHandle::new()?;
        let mut undo = Rollback::new("bridge connect");

        let host_index = nl.create_veth(&endpoint.veth.host, &endpoint.veth.peer)?;
        undo.push(format!("delete veth {}", endpoint.veth.host), move || {
            delete_link_by_index(host_index)
        });
        nl.set_master(host_index, bridge_index)?;
        nl.set_link_up(host_index, true)?;
        endpoint.mac_address = Some(netlink::link_mac(&endpoint.veth.peer)?);

        undo.commit();
        tracing::info!(
            bridge = %network.name,
            host = %endpoint.veth.host,
            peer = %endpoint.veth.peer,
            "endpoint plugged into bridge"
        );
        Ok(())
    }

    fn disconnect(&self, network: &Network, endpoint: &Endpoint) -> Result<()> {
        let index = netlink::ifindex(&endpoint.veth.host)?;
        NetlinkHandle::new()?.delete_link(index)?;
        tracing::info!(
            bridge = %network.name,
            host = %endpoint.veth.host,
            "endpoint unplugged from bridge"
        );
        Ok(())
    }
}
