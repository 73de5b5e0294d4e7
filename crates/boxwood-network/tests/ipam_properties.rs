#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashSet;
use std::net::Ipv4Addr;

use boxwood_common::error::BoxError;
use boxwood_network::ipam::Ipam;
use ipnetwork::Ipv4Network;

fn subnet(s: &str) -> Ipv4Network {
    s.parse().expect("cidr")
}

#[test]
fn allocations_are_distinct_and_inside_the_subnet() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ipam = Ipam::new(dir.path().join("subnet.json"));
    let net = subnet("10.20.0.0/26");

    let mut seen = HashSet::new();
    loop {
        match ipam.allocate(&net) {
            Ok(ip) => {
                assert!(net.contains(ip), "{ip} outside {net}");
                assert_ne!(ip, net.network());
                assert_ne!(ip, net.broadcast());
                assert!(seen.insert(ip), "{ip} handed out twice");
            }
            Err(BoxError::SubnetExhausted { .. }) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(seen.len(), 62);
}

#[test]
fn release_makes_the_address_available_again() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ipam = Ipam::new(dir.path().join("subnet.json"));
    let net = subnet("192.168.7.0/24");

    let gateway = ipam.allocate(&net).expect("gateway");
    let ip = ipam.allocate(&net).expect("host");
    assert_eq!(gateway, Ipv4Addr::new(192, 168, 7, 1));
    assert_eq!(ip, Ipv4Addr::new(192, 168, 7, 2));

    ipam.release(&net, ip).expect("release");
    ipam.release(&net, ip).expect("release twice");
    assert_eq!(ipam.allocate(&net).expect("again"), ip);
}

#[test]
fn slash_30_holds_gateway_and_one_host() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ipam = Ipam::new(dir.path().join("subnet.json"));
    let net = subnet("10.0.0.0/30");

    assert_eq!(ipam.allocate(&net).expect("first"), Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(ipam.allocate(&net).expect("second"), Ipv4Addr::new(10, 0, 0, 2));
    assert!(matches!(
        ipam.allocate(&net),
        Err(BoxError::SubnetExhausted { .. })
    ));
}

#[test]
fn state_survives_a_new_allocator_instance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("subnet.json");
    let net = subnet("172.30.0.0/24");

    let _ = Ipam::new(&path).allocate(&net).expect("first");
    let second = Ipam::new(&path).allocate(&net).expect("second");
    assert_eq!(second, Ipv4Addr::new(172, 30, 0, 2));
}

#[test]
fn concurrent_allocators_never_collide() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("subnet.json");
    let net = subnet("10.99.0.0/24");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let path = path.clone();
            std::thread::spawn(move || {
                let ipam = Ipam::new(path);
                (0..10)
                    .map(|_| ipam.allocate(&net).expect("allocate"))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for ip in handle.join().expect("thread") {
            assert!(all.insert(ip), "{ip} handed out twice");
        }
    }
    assert_eq!(all.len(), 80);
}
