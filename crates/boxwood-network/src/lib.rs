//! # boxwood-network
//!
//! Single-host bridge networking for boxwood boxes.
//!
//! - [`ipam::Ipam`]: file-backed bitmap allocator, serialized with `flock(2)`.
//! - [`netlink::NetlinkHandle`]: raw rtnetlink requests for links, addresses
//!   and routes.
//! - [`firewall::NatTable`]: masquerade and DNAT rules.
//! - [`driver::NetworkDriver`] with its only implementation
//!   [`bridge::BridgeDriver`].
//! - [`controller::NetworkController`]: the context object tying the above
//!   together for `network create/rm` and box connect/disconnect.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bridge;
pub mod controller;
pub mod driver;
pub mod firewall;
pub mod ipam;
pub mod netlink;
