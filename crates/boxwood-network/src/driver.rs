//! Network and endpoint model plus the driver seam.

use std::net::Ipv4Addr;

use boxwood_common::constants::MAX_IFNAME_LEN;
use boxwood_common::error::Result;
use boxwood_common::types::{ContainerId, PortMapping};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ipam;

/// Prefix of the box-side veth leg.
pub const PEER_PREFIX: &str = "cif-";

/// Hex digits of the endpoint id digest kept in a shortened interface name.
const NAME_DIGEST_LEN: usize = 5;

/// A named layer-2 segment backed by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Network {
    /// Network name, also the bridge interface name.
    pub name: String,
    /// Gateway address with the subnet prefix, e.g. `172.18.0.1/24`.
    pub ip_range: Ipv4Network,
    /// Name of the driver that owns the network.
    pub driver: String,
}

impl Network {
    /// The canonical subnet, e.g. `172.18.0.0/24`.
    ///
    /// # Errors
    ///
    /// Returns an error only for an unrepresentable prefix.
    pub fn subnet(&self) -> Result<Ipv4Network> {
        ipam::canonical(&self.ip_range)
    }

    /// Gateway address assigned to the bridge.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.ip_range.ip()
    }
}

/// Host and box names of a veth pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPair {
    /// Leg left on the host and enslaved to the bridge.
    pub host: String,
    /// Leg moved into the box.
    pub peer: String,
}

/// Attachment of one box to one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `"<containerID>-<network>"`.
    pub id: String,
    /// Interface names derived from `id`.
    pub veth: VethPair,
    /// Address allocated for the box.
    pub ip_address: Ipv4Addr,
    /// MAC of the box-side leg, known once the pair exists.
    pub mac_address: Option<String>,
    /// Network name.
    pub network: String,
    /// Published ports.
    pub port_mappings: Vec<PortMapping>,
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Interface name for endpoint `id`: `prefix + id` when it fits, otherwise
/// the head of `id` followed by a digest of the whole id, so endpoints of one
/// box on different networks never share a name.
fn interface_name(prefix: &str, id: &str) -> String {
    let budget = MAX_IFNAME_LEN - prefix.len();
    if id.len() <= budget {
        return format!("{prefix}{id}");
    }
    let digest = Sha256::digest(id.as_bytes());
    let hex = format!("{:02x}{:02x}{:02x}", digest[0], digest[1], digest[2]);
    format!(
        "{prefix}{}{}",
        truncate_bytes(id, budget - NAME_DIGEST_LEN),
        &hex[..NAME_DIGEST_LEN]
    )
}

impl Endpoint {
    /// Describes the endpoint of `container` on `network`.
    #[must_use]
    pub fn new(
        container: &ContainerId,
        network: &str,
        ip_address: Ipv4Addr,
        port_mappings: Vec<PortMapping>,
    ) -> Self {
        let id = format!("{container}-{network}");
        Self {
            veth: VethPair {
                host: interface_name("", &id),
                peer: interface_name(PEER_PREFIX, &id),
            },
            id,
            ip_address,
            mac_address: None,
            network: network.to_string(),
            port_mappings,
        }
    }
}

/// Backend that materializes networks and endpoints on the host.
pub trait NetworkDriver: Send + Sync {
    /// Driver name used in network records (`bridge`).
    fn name(&self) -> &'static str;

    /// Creates the host side of a network with `gateway/prefix` as address.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; partial work is undone first.
    fn create(&self, ip_range: Ipv4Network, name: &str) -> Result<Network>;

    /// Tears the host side of `network` down.
    ///
    /// # Errors
    ///
    /// Returns an error listing every step that failed.
    fn delete(&self, network: &Network) -> Result<()>;

    /// Creates the endpoint's link pair and plugs the host leg into `network`.
    ///
    /// Fills in `endpoint.mac_address`.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; partial work is undone first.
    fn connect(&self, network: &Network, endpoint: &mut Endpoint) -> Result<()>;

    /// Removes the endpoint's link pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the host leg cannot be deleted.
    fn disconnect(&self, network: &Network, endpoint: &Endpoint) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn veth_names_fit_ifnamsiz() {
        let ep = Endpoint::new(
            &ContainerId::new("0123456789"),
            "testnet",
            Ipv4Addr::new(172, 18, 0, 2),
            Vec::new(),
        );
        assert_eq!(ep.id, "0123456789-testnet");
        assert!(ep.veth.host.starts_with("0123456789"));
        assert!(ep.veth.peer.starts_with("cif-012345"));
        assert_eq!(ep.veth.host.len(), MAX_IFNAME_LEN);
        assert_eq!(ep.veth.peer.len(), MAX_IFNAME_LEN);
    }

    #[test]
    fn one_box_on_two_networks_gets_distinct_veth_names() {
        let id = ContainerId::new("0123456789");
        let ip = Ipv4Addr::new(172, 18, 0, 2);
        let first = Endpoint::new(&id, "testnet", ip, Vec::new());
        let second = Endpoint::new(&id, "testnet2", ip, Vec::new());
        assert_ne!(first.veth.host, second.veth.host);
        assert_ne!(first.veth.peer, second.veth.peer);
        assert_eq!(first.veth, Endpoint::new(&id, "testnet", ip, Vec::new()).veth);
    }

    #[test]
    fn short_endpoint_id_is_used_verbatim() {
        let ep = Endpoint::new(
            &ContainerId::new("abc"),
            "n1",
            Ipv4Addr::new(10, 0, 0, 2),
            Vec::new(),
        );
        assert_eq!(ep.veth.host, "abc-n1");
        assert_eq!(ep.veth.peer, "cif-abc-n1");
    }

    #[test]
    fn network_record_uses_pascal_case_keys() {
        let network = Network {
            name: "testnet".into(),
            ip_range: "172.18.0.1/24".parse().expect("cidr"),
            driver: "bridge".into(),
        };
        let json = serde_json::to_value(&network).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"Name": "testnet", "IpRange": "172.18.0.1/24", "Driver": "bridge"})
        );
        assert_eq!(network.gateway(), Ipv4Addr::new(172, 18, 0, 1));
        assert_eq!(network.subnet().expect("subnet").to_string(), "172.18.0.0/24");
    }
}
