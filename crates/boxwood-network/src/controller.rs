//! Network controller: the single owner of networking state.
//!
//! The controller holds the driver table, the registry of known networks,
//! the IPAM and the NAT table. It is constructed explicitly and passed to
//! whoever needs it; there is no process-wide registry.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use boxwood_common::config::RuntimeConfig;
use boxwood_common::constants::MAX_IFNAME_LEN;
use boxwood_common::error::{BoxError, Result};
use boxwood_common::rollback::Rollback;
use boxwood_common::types::ContainerRecord;
use boxwood_core::namespace::netns::{pid_netns_path, with_netns};
use ipnetwork::Ipv4Network;

use crate::bridge::BridgeDriver;
use crate::driver::{Endpoint, Network, NetworkDriver};
use crate::firewall::{Iptables, NatRule, NatTable};
use crate::ipam::{self, Ipam};
use crate::netlink::{self, NetlinkHandle};

/// On-disk locations used by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPaths {
    /// One JSON file per network.
    pub network_dir: PathBuf,
    /// IPAM state file.
    pub ipam_file: PathBuf,
}

impl From<&RuntimeConfig> for NetworkPaths {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            network_dir: config.network_dir(),
            ipam_file: config.ipam_file(),
        }
    }
}

/// Owner of drivers, networks, IPAM and NAT rules.
pub struct NetworkController {
    drivers: BTreeMap<&'static str, Arc<dyn NetworkDriver>>,
    networks: BTreeMap<String, Network>,
    ipam: Ipam,
    nat: Arc<dyn NatTable>,
    network_dir: PathBuf,
}

impl std::fmt::Debug for NetworkController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkController")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .field("networks", &self.networks)
            .field("ipam", &self.ipam)
            .field("network_dir", &self.network_dir)
            .finish_non_exhaustive()
    }
}

impl NetworkController {
    /// Registers the bridge driver over `iptables` and loads every persisted network.
    ///
    /// # Errors
    ///
    /// Returns an error if the network directory cannot be created or read.
    pub fn init(paths: &NetworkPaths) -> Result<Self> {
        let nat: Arc<dyn NatTable> = Arc::new(Iptables::default());
        let bridge = Arc::new(BridgeDriver::new(Arc::clone(&nat)));
        Self::with_driver(paths, bridge, nat)
    }

    /// Like [`Self::init`] with an explicit driver and NAT backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the network directory cannot be created or read.
    pub fn with_driver(
        paths: &NetworkPaths,
        driver: Arc<dyn NetworkDriver>,
        nat: Arc<dyn NatTable>,
    ) -> Result<Self> {
        let dir = &paths.network_dir;
        std::fs::create_dir_all(dir).map_err(|e| BoxError::io(dir, e))?;
        let mut drivers: BTreeMap<&'static str, Arc<dyn NetworkDriver>> = BTreeMap::new();
        let _ = drivers.insert(driver.name(), driver);
        let controller = Self {
            drivers,
            networks: load_networks(dir)?,
            ipam: Ipam::new(&paths.ipam_file),
            nat,
            network_dir: dir.clone(),
        };
        tracing::debug!(networks = controller.networks.len(), "network controller ready");
        Ok(controller)
    }

    /// Every known network, sorted by name.
    #[must_use]
    pub fn networks(&self) -> Vec<&Network> {
        self.networks.values().collect()
    }

    /// Looks a network up by name.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::NotFound`] for an unknown name.
    pub fn network(&self, name: &str) -> Result<&Network> {
        self.networks.get(name).ok_or_else(|| BoxError::NotFound {
            kind: "network",
            id: name.to_string(),
        })
    }

    fn driver(&self, name: &str) -> Result<Arc<dyn NetworkDriver>> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| BoxError::NotFound {
                kind: "network driver",
                id: name.to_string(),
            })
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.network_dir.join(name)
    }

    fn save(&self, network: &Network) -> Result<()> {
        let path = self.record_path(&network.name);
        let tmp = self.network_dir.join(format!(".{}.tmp", network.name));
        let bytes = serde_json::to_vec(network)?;
        std::fs::write(&tmp, bytes).map_err(|e| BoxError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| BoxError::io(&path, e))
    }

    fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_IFNAME_LEN {
            return Err(BoxError::Config {
                message: format!("network name must be 1 to {MAX_IFNAME_LEN} bytes, got `{name}`"),
            });
        }
        if name.starts_with('.') || name.contains(['/', ' ', ':']) {
            return Err(BoxError::Config {
                message: format!("network name `{name}` contains forbidden characters"),
            });
        }
        if self.networks.contains_key(name) || self.record_path(name).exists() {
            return Err(BoxError::AlreadyExists {
                kind: "network",
                id: name.to_string(),
            });
        }
        Ok(())
    }

    /// Creates network `name` on `subnet` with the given driver.
    ///
    /// The first address of the subnet becomes the gateway.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid or taken name, an unknown driver, an
    /// exhausted subnet, or any driver failure. Nothing is left behind.
    pub fn create_network(
        &mut self,
        driver: &str,
        subnet: Ipv4Network,
        name: &str,
    ) -> Result<Network> {
        self.validate_name(name)?;
        let driver = self.driver(driver)?;
        let subnet = ipam::canonical(&subnet)?;
        let mut undo = Rollback::new("network create");

        let gateway = self.ipam.allocate(&subnet)?;
        let ipam = self.ipam.clone();
        undo.push(format!("release gateway {gateway}"), move || {
            ipam.release(&subnet, gateway)
        });

        let ip_range = Ipv4Network::new(gateway, subnet.prefix()).map_err(|e| BoxError::Config {
            message: format!("invalid gateway {gateway}/{}: {e}", subnet.prefix()),
        })?;
        let network = driver.create(ip_range, name)?;
        let created = network.clone();
        undo.push(format!("delete network {name}"), move || driver.delete(&created));

        self.save(&network)?;
        undo.commit();

        let _ = self.networks.insert(name.to_string(), network.clone());
        tracing::info!(network = name, ip_range = %network.ip_range, "network created");
        Ok(network)
    }

    /// Deletes network `name`: releases its gateway, tears down the driver
    /// side, and removes its record.
    ///
    /// Every stage runs even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::NotFound`] for an unknown name, or
    /// [`BoxError::Cleanup`] listing every failed stage.
    pub fn delete_network(&mut self, name: &str) -> Result<()> {
        let network = self.network(name)?.clone();
        let mut failures = Vec::new();

        if let Err(e) = network
            .subnet()
            .and_then(|subnet| self.ipam.release(&subnet, network.gateway()))
        {
            failures.push(e);
        }
        if let Err(e) = self
            .driver(&network.driver)
            .and_then(|driver| driver.delete(&network))
        {
            failures.push(e);
        }
        let path = self.record_path(name);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                failures.push(BoxError::io(&path, e));
            }
        }
        let _ = self.networks.remove(name);

        for failure in &failures {
            tracing::warn!(network = name, error = %failure, "network teardown step failed");
        }
        BoxError::check_cleanup(failures)?;
        tracing::info!(network = name, "network deleted");
        Ok(())
    }

    /// Attaches the running box `record` to network `name`.
    ///
    /// Allocates an address, plugs a veth pair into the network, moves the
    /// peer into the box's network namespace and configures it there
    /// (address, link up, loopback up, default route via the gateway), then
    /// publishes the box's port mappings.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::InvalidState`] if the box is not running, and any
    /// IPAM, driver, namespace or NAT failure. Everything done so far is
    /// undone before returning.
    pub fn connect(&self, name: &str, record: &ContainerRecord) -> Result<Endpoint> {
        let pid = record.running_pid()?;
        let network = self.network(name)?;
        let driver = self.driver(&network.driver)?;
        let subnet = network.subnet()?;
        let mut undo = Rollback::new("network connect");

        let ip = self.ipam.allocate(&subnet)?;
        undo.push(format!("release {ip}"), move || self.ipam.release(&subnet, ip));

        let mut endpoint = Endpoint::new(&record.id, name, ip, record.port_mappings.clone());
        driver.connect(network, &mut endpoint)?;
        let plugged = endpoint.clone();
        undo.push(format!("unplug {}", endpoint.veth.host), move || {
            driver.disconnect(network, &plugged)
        });

        configure_in_netns(pid, network, &endpoint, subnet.prefix())?;

        for rule in dnat_rules(&endpoint) {
            self.nat.append(&rule)?;
            undo.push(format!("remove {rule}"), move || self.nat.delete(&rule));
        }

        undo.commit();
        tracing::info!(
            network = name,
            box_id = %record.id,
            ip = %endpoint.ip_address,
            "box connected"
        );
        Ok(endpoint)
    }

    /// Detaches the running box `record` from network `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::InvalidState`] if the box is not running or has no
    /// address, or [`BoxError::Cleanup`] listing every failed stage.
    pub fn disconnect(&self, name: &str, record: &ContainerRecord) -> Result<()> {
        let _ = record.running_pid()?;
        let network = self.network(name)?;
        let endpoint = endpoint_of(record, name)?;
        let mut failures = Vec::new();

        if let Err(e) = self
            .driver(&network.driver)
            .and_then(|driver| driver.disconnect(network, &endpoint))
        {
            failures.push(e);
        }
        failures.extend(self.release_addressing(network, &endpoint));

        BoxError::check_cleanup(failures)?;
        tracing::info!(network = name, box_id = %record.id, "box disconnected");
        Ok(())
    }

    /// Releases what a stopped box still holds on network `name`: its port
    /// forwards and its address. The veth pair went away with the box's
    /// namespace.
    ///
    /// A record without an address holds nothing and is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Cleanup`] listing every failed stage.
    pub fn release_endpoint(&self, name: &str, record: &ContainerRecord) -> Result<()> {
        if record.ip_address.is_none() {
            return Ok(());
        }
        let network = self.network(name)?;
        let endpoint = endpoint_of(record, name)?;
        BoxError::check_cleanup(self.release_addressing(network, &endpoint))?;
        tracing::info!(network = name, box_id = %record.id, "endpoint released");
        Ok(())
    }

    fn release_addressing(&self, network: &Network, endpoint: &Endpoint) -> Vec<BoxError> {
        let mut failures = Vec::new();
        for rule in dnat_rules(endpoint) {
            if let Err(e) = self.nat.delete(&rule) {
                failures.push(e);
            }
        }
        if let Err(e) = network
            .subnet()
            .and_then(|subnet| self.ipam.release(&subnet, endpoint.ip_address))
        {
            failures.push(e);
        }
        failures
    }
}

fn dnat_rules(endpoint: &Endpoint) -> Vec<NatRule> {
    endpoint
        .port_mappings
        .iter()
        .map(|pm| NatRule::Dnat {
            host_port: pm.host_port,
            ip: endpoint.ip_address,
            container_port: pm.container_port,
        })
        .collect()
}

fn endpoint_of(record: &ContainerRecord, network: &str) -> Result<Endpoint> {
    let ip = record.ip_address.ok_or_else(|| BoxError::InvalidState {
        message: format!("box `{}` has no address on network `{network}`", record.name),
    })?;
    Ok(Endpoint::new(
        &record.id,
        network,
        ip,
        record.port_mappings.clone(),
    ))
}

/// Moves the peer leg into the namespace of `pid` and configures it from inside.
fn configure_in_netns(pid: i32, network: &Network, endpoint: &Endpoint, prefix: u8) -> Result<()> {
    let ns_path = pid_netns_path(pid);
    let ns = File::open(&ns_path).map_err(|e| BoxError::io(&ns_path, e))?;
    let peer_index = netlink::ifindex(&endpoint.veth.peer)?;
    NetlinkHandle::new()?.move_to_netns(peer_index, &ns)?;

    let address = Ipv4Network::new(endpoint.ip_address, prefix).map_err(|e| BoxError::Config {
        message: format!("invalid address {}/{prefix}: {e}", endpoint.ip_address),
    })?;
    let gateway = network.gateway();
    let peer = endpoint.veth.peer.as_str();
    with_netns(&ns_path, || {
        let mut nl = NetlinkHandle::new()?;
        let index = netlink::ifindex(peer)?;
        nl.add_address(index, address)?;
        nl.set_link_up(index, true)?;
        nl.set_link_up(netlink::ifindex("lo")?, true)?;
        nl.add_default_route(gateway, index)
    })?;
    tracing::debug!(pid, peer, address = %address, "box interface configured");
    Ok(())
}

/// Reads every network record in `dir`. Unparseable files are skipped with a warning.
fn load_networks(dir: &Path) -> Result<BTreeMap<String, Network>> {
    let mut networks = BTreeMap::new();
    let entries = std::fs::read_dir(dir).map_err(|e| BoxError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| BoxError::io(dir, e))?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_none_or(|n| n.starts_with('.'));
        if hidden || !path.is_file() {
            continue;
        }
        let parsed = std::fs::read(&path)
            .map_err(|e| BoxError::io(&path, e))
            .and_then(|bytes| Ok(serde_json::from_slice::<Network>(&bytes)?));
        match parsed {
            Ok(network) => {
                let _ = networks.insert(network.name.clone(), network);
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping network record"),
        }
    }
    Ok(networks)
}
