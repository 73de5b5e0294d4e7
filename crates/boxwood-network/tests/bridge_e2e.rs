//! End-to-end bridge networking. Needs root, `iptables` and `unshare`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::Ipv4Addr;
use std::process::{Child, Command};
use std::sync::{Arc, Mutex};

use boxwood_common::error::Result;
use boxwood_common::types::{ContainerId, ContainerRecord};
use boxwood_network::bridge::BridgeDriver;
use boxwood_network::controller::{NetworkController, NetworkPaths};
use boxwood_network::firewall::{Iptables, NatRule, NatTable};

fn prerequisites_met() -> bool {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("Skipping bridge e2e: requires root");
        return false;
    }
    for tool in ["iptables", "unshare", "sleep"] {
        let found = Command::new("sh")
            .args(["-c", &format!("command -v {tool}")])
            .output()
            .is_ok_and(|o| o.status.success());
        if !found {
            eprintln!("Skipping bridge e2e: `{tool}` not available");
            return false;
        }
    }
    true
}

/// Installs rules through `iptables` and keeps the ones currently installed.
#[derive(Default)]
struct RecordingNat {
    inner: Iptables,
    installed: Mutex<Vec<NatRule>>,
}

impl RecordingNat {
    fn installed(&self) -> Vec<NatRule> {
        self.installed.lock().expect("lock").clone()
    }
}

impl NatTable for RecordingNat {
    fn append(&self, rule: &NatRule) -> Result<()> {
        self.inner.append(rule)?;
        self.installed.lock().expect("lock").push(rule.clone());
        Ok(())
    }

    fn delete(&self, rule: &NatRule) -> Result<()> {
        self.inner.delete(rule)?;
        self.installed.lock().expect("lock").retain(|r| r != rule);
        Ok(())
    }
}

/// Whether `pid`'s network namespace routes everything via `gateway`.
/// `/proc/<pid>/net/route` lists the table of that namespace, addresses in
/// host byte order as hex.
fn has_default_route(pid: i32, gateway: Ipv4Addr) -> bool {
    let table = std::fs::read_to_string(format!("/proc/{pid}/net/route")).expect("route table");
    let expected = format!("{:08X}", u32::from_ne_bytes(gateway.octets()));
    table.lines().skip(1).any(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        fields.get(1) == Some(&"00000000") && fields.get(2) == Some(&expected.as_str())
    })
}

struct KillOnDrop(Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[test]
fn connect_box_with_port_forward() {
    if !prerequisites_met() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = NetworkPaths {
        network_dir: dir.path().join("network"),
        ipam_file: dir.path().join("ipam/subnet.json"),
    };
    let nat = Arc::new(RecordingNat::default());
    let nat_table: Arc<dyn NatTable> = nat.clone();
    let mut ctl = NetworkController::with_driver(
        &paths,
        Arc::new(BridgeDriver::new(Arc::clone(&nat_table))),
        nat_table,
    )
    .expect("controller");
    let network = ctl
        .create_network("bridge", "172.18.0.0/24".parse().expect("cidr"), "bwtestnet")
        .expect("create network");
    assert_eq!(network.gateway(), Ipv4Addr::new(172, 18, 0, 1));

    let child = KillOnDrop(
        Command::new("unshare")
            .args(["--net", "sleep", "30"])
            .spawn()
            .expect("spawn"),
    );
    // Give unshare time to enter the namespace and exec sleep.
    std::thread::sleep(std::time::Duration::from_millis(200));

    let pid = i32::try_from(child.0.id()).expect("pid");
    let mut record = ContainerRecord::running(
        ContainerId::generate(),
        "e2e".into(),
        &["sleep".into(), "30".into()],
        pid,
    );
    record.port_mappings.push("8080:80".parse().expect("pm"));

    let endpoint = ctl.connect("bwtestnet", &record).expect("connect");
    assert_eq!(endpoint.ip_address, Ipv4Addr::new(172, 18, 0, 2));
    assert!(endpoint.mac_address.is_some());
    assert!(has_default_route(pid, Ipv4Addr::new(172, 18, 0, 1)));
    let dnat = NatRule::Dnat {
        host_port: 8080,
        ip: Ipv4Addr::new(172, 18, 0, 2),
        container_port: 80,
    };
    let installed = nat.installed();
    assert!(installed.contains(&dnat));
    assert!(installed.iter().any(|r| matches!(r, NatRule::Masquerade { .. })));

    record.ip_address = Some(endpoint.ip_address);
    ctl.disconnect("bwtestnet", &record).expect("disconnect");
    assert!(!nat.installed().contains(&dnat));
    drop(child);
    ctl.delete_network("bwtestnet").expect("delete network");
}
