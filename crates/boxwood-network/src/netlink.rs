//! Raw rtnetlink requests for link, address and route configuration.
//!
//! A [`NetlinkHandle`] is bound to the network namespace that was current
//! on the creating thread. To configure a link inside a box, create a new
//! handle inside [`boxwood_core::namespace::netns::with_netns`].

#![allow(unsafe_code)]

use std::ffi::CString;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::path::PathBuf;

use boxwood_common::error::{BoxError, Result};
use ipnetwork::Ipv4Network;

const NETLINK_ROUTE: i32 = 0;

const RTM_NEWLINK: u16 = 16;
const RTM_DELLINK: u16 = 17;
const RTM_NEWADDR: u16 = 20;
const RTM_NEWROUTE: u16 = 24;
const NLMSG_ERROR: u16 = 2;

const NLM_F_REQUEST: u16 = 0x0001;
const NLM_F_ACK: u16 = 0x0004;
const NLM_F_EXCL: u16 = 0x0200;
const NLM_F_CREATE: u16 = 0x0400;

const IFF_UP: u32 = 0x1;

const IFLA_IFNAME: u16 = 3;
const IFLA_MASTER: u16 = 10;
const IFLA_LINKINFO: u16 = 18;
const IFLA_NET_NS_FD: u16 = 28;
const IFLA_INFO_KIND: u16 = 1;
const IFLA_INFO_DATA: u16 = 2;
const VETH_INFO_PEER: u16 = 1;

const IFA_ADDRESS: u16 = 1;
const IFA_LOCAL: u16 = 2;

const RTA_OIF: u16 = 4;
const RTA_GATEWAY: u16 = 5;

const RT_TABLE_MAIN: u8 = 254;
const RTPROT_BOOT: u8 = 3;
const RT_SCOPE_UNIVERSE: u8 = 0;
const RTN_UNICAST: u8 = 1;

const NLA_F_NESTED: u16 = 1 << 15;

const NLMSG_HDRLEN: usize = 16;
const NLA_HDRLEN: usize = 4;
const IFINFOMSG_LEN: usize = 16;

const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

fn netlink_err(message: impl Into<String>) -> BoxError {
    BoxError::Netlink {
        message: message.into(),
    }
}

/// One rtnetlink request under construction.
///
/// Fixed headers are written field by field in native byte order, so no
/// `repr(C)` struct is ever reinterpreted as bytes.
#[derive(Debug)]
pub(crate) struct Request {
    buf: Vec<u8>,
}

impl Request {
    fn new(kind: u16, flags: u16) -> Self {
        let mut buf = vec![0u8; NLMSG_HDRLEN];
        buf[4..6].copy_from_slice(&kind.to_ne_bytes());
        buf[6..8].copy_from_slice(&(flags | NLM_F_REQUEST | NLM_F_ACK).to_ne_bytes());
        Self { buf }
    }

    /// Appends a `struct ifinfomsg`.
    fn ifinfo(mut self, index: i32, flags: u32, change: u32) -> Self {
        self.buf.push(libc::AF_UNSPEC as u8);
        self.buf.push(0);
        self.buf.extend_from_slice(&0u16.to_ne_bytes());
        self.buf.extend_from_slice(&index.to_ne_bytes());
        self.buf.extend_from_slice(&flags.to_ne_bytes());
        self.buf.extend_from_slice(&change.to_ne_bytes());
        self
    }

    /// Appends a `struct ifaddrmsg` for an IPv4 address.
    fn ifaddr(mut self, prefix: u8, index: u32) -> Self {
        self.buf
            .extend_from_slice(&[libc::AF_INET as u8, prefix, 0, RT_SCOPE_UNIVERSE]);
        self.buf.extend_from_slice(&index.to_ne_bytes());
        self
    }

    /// Appends a `struct rtmsg` for an IPv4 unicast route in the main table.
    fn rtmsg(mut self, dst_len: u8) -> Self {
        self.buf.extend_from_slice(&[
            libc::AF_INET as u8,
            dst_len,
            0,
            0,
            RT_TABLE_MAIN,
            RTPROT_BOOT,
            RT_SCOPE_UNIVERSE,
            RTN_UNICAST,
        ]);
        self.buf.extend_from_slice(&0u32.to_ne_bytes());
        self
    }

    fn attr(&mut self, kind: u16, payload: &[u8]) -> &mut Self {
        let len = NLA_HDRLEN + payload.len();
        self.buf
            .extend_from_slice(&u16::try_from(len).unwrap_or(u16::MAX).to_ne_bytes());
        self.buf.extend_from_slice(&kind.to_ne_bytes());
        self.buf.extend_from_slice(payload);
        self.buf.resize(align4(self.buf.len()), 0);
        self
    }

    fn attr_str(&mut self, kind: u16, value: &str) -> &mut Self {
        let mut payload = value.as_bytes().to_vec();
        payload.push(0);
        self.attr(kind, &payload)
    }

    fn attr_u32(&mut self, kind: u16, value: u32) -> &mut Self {
        self.attr(kind, &value.to_ne_bytes())
    }

    /// Opens a nested attribute; returns its offset for [`Self::end_nested`].
    fn begin_nested(&mut self, kind: u16) -> usize {
        let start = self.buf.len();
        self.buf.extend_from_slice(&[0u8; 2]);
        self.buf.extend_from_slice(&(kind | NLA_F_NESTED).to_ne_bytes());
        start
    }

    fn end_nested(&mut self, start: usize) {
        let len = u16::try_from(self.buf.len() - start).unwrap_or(u16::MAX);
        self.buf[start..start + 2].copy_from_slice(&len.to_ne_bytes());
    }

    /// Stamps length and sequence number into the header.
    fn finish(mut self, seq: u32) -> Vec<u8> {
        let len = u32::try_from(self.buf.len()).unwrap_or(u32::MAX);
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        self.buf[8..12].copy_from_slice(&seq.to_ne_bytes());
        self.buf
    }
}

/// Extracts the errno carried by an `NLMSG_ERROR` reply for `seq`.
///
/// Returns `Some(0)` for a positive acknowledgement, `Some(errno)` for a
/// rejection, `None` if the buffer holds no matching error message.
fn ack_status(reply: &[u8], seq: u32) -> Option<i32> {
    let mut offset = 0;
    while offset + NLMSG_HDRLEN <= reply.len() {
        let field = |at: usize, n: usize| &reply[offset + at..offset + at + n];
        let len = u32::from_ne_bytes(field(0, 4).try_into().ok()?) as usize;
        let kind = u16::from_ne_bytes(field(4, 2).try_into().ok()?);
        let msg_seq = u32::from_ne_bytes(field(8, 4).try_into().ok()?);
        if len < NLMSG_HDRLEN || offset + len > reply.len() {
            return None;
        }
        if kind == NLMSG_ERROR && msg_seq == seq && len >= NLMSG_HDRLEN + 4 {
            let code = i32::from_ne_bytes(field(NLMSG_HDRLEN, 4).try_into().ok()?);
            return Some(-code);
        }
        offset += align4(len);
    }
    None
}

/// Netlink route socket.
#[derive(Debug)]
pub struct NetlinkHandle {
    fd: OwnedFd,
    seq: u32,
}

impl NetlinkHandle {
    /// Opens a `NETLINK_ROUTE` socket in the current thread's network namespace.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Netlink`] if the socket cannot be created or bound.
    pub fn new() -> Result<Self> {
        // SAFETY: plain socket(2) call; the result is checked before use.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                NETLINK_ROUTE,
            )
        };
        if raw < 0 {
            return Err(netlink_err(format!(
                "cannot create netlink socket: {}",
                io::Error::last_os_error()
            )));
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // SAFETY: `addr` is a valid sockaddr_nl and the length matches it.
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::from_ref(&addr).cast::<libc::sockaddr>(),
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(netlink_err(format!(
                "cannot bind netlink socket: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(Self { fd, seq: 0 })
    }

    fn send_and_ack(&mut self, what: &str, request: Request) -> Result<()> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        let msg = request.finish(seq);

        // SAFETY: `msg` is a live buffer of `msg.len()` bytes.
        let sent = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                msg.as_ptr().cast::<libc::c_void>(),
                msg.len(),
                0,
            )
        };
        if sent < 0 {
            return Err(netlink_err(format!(
                "{what}: send failed: {}",
                io::Error::last_os_error()
            )));
        }

        let mut buf = vec![0u8; 8192];
        loop {
            // SAFETY: `buf` is a live, writable buffer of `buf.len()` bytes.
            let received = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                    0,
                )
            };
            let Ok(received) = usize::try_from(received) else {
                return Err(netlink_err(format!(
                    "{what}: receive failed: {}",
                    io::Error::last_os_error()
                )));
            };
            match ack_status(&buf[..received], seq) {
                Some(0) => {
                    tracing::trace!(request = what, "netlink ack");
                    return Ok(());
                }
                Some(errno) => {
                    return Err(netlink_err(format!(
                        "{what}: {}",
                        io::Error::from_raw_os_error(errno)
                    )));
                }
                None => {}
            }
        }
    }

    /// Creates a bridge named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Netlink`] if the kernel rejects the request,
    /// including when the name is taken.
    pub fn create_bridge(&mut self, name: &str) -> Result<u32> {
        let mut req = Request::new(RTM_NEWLINK, NLM_F_CREATE | NLM_F_EXCL).ifinfo(0, 0, 0);
        let _ = req.attr_str(IFLA_IFNAME, name);
        let info = req.begin_nested(IFLA_LINKINFO);
        let _ = req.attr_str(IFLA_INFO_KIND, "bridge");
        req.end_nested(info);
        self.send_and_ack(&format!("create bridge {name}"), req)?;
        tracing::debug!(bridge = name, "bridge created");
        ifindex(name)
    }

    /// Creates a veth pair `host` <-> `peer` in the current namespace.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Netlink`] if the kernel rejects the request.
    pub fn create_veth(&mut self, host: &str, peer: &str) -> Result<u32> {
        let mut req = Request::new(RTM_NEWLINK, NLM_F_CREATE | NLM_F_EXCL).ifinfo(0, 0, 0);
        let _ = req.attr_str(IFLA_IFNAME, host);
        let info = req.begin_nested(IFLA_LINKINFO);
        let _ = req.attr_str(IFLA_INFO_KIND, "veth");
        let data = req.begin_nested(IFLA_INFO_DATA);
        let peer_info = req.begin_nested(VETH_INFO_PEER);
        // The peer carries its own (zeroed, AF_UNSPEC) ifinfomsg.
        req.buf.extend_from_slice(&[0u8; IFINFOMSG_LEN]);
        let _ = req.attr_str(IFLA_IFNAME, peer);
        req.end_nested(peer_info);
        req.end_nested(data);
        req.end_nested(info);
        self.send_and_ack(&format!("create veth {host}/{peer}"), req)?;
        tracing::debug!(host, peer, "veth pair created");
        ifindex(host)
    }

    /// Deletes the link with index `index`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Netlink`] if the kernel rejects the request.
    pub fn delete_link(&mut self, index: u32) -> Result<()> {
        let req = Request::new(RTM_DELLINK, 0).ifinfo(ifi_index(index), 0, 0);
        self.send_and_ack(&format!("delete link #{index}"), req)
    }

    /// Sets the administrative state of a link.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Netlink`] if the kernel rejects the request.
    pub fn set_link_up(&mut self, index: u32, up: bool) -> Result<()> {
        let flags = if up { IFF_UP } else { 0 };
        let req = Request::new(RTM_NEWLINK, 0).ifinfo(ifi_index(index), flags, IFF_UP);
        let state = if up { "up" } else { "down" };
        self.send_and_ack(&format!("set link #{index} {state}"), req)
    }

    /// Enslaves `index` to the bridge `master`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Netlink`] if the kernel rejects the request.
    pub fn set_master(&mut self, index: u32, master: u32) -> Result<()> {
        let mut req = Request::new(RTM_NEWLINK, 0).ifinfo(ifi_index(index), 0, 0);
        let _ = req.attr_u32(IFLA_MASTER, master);
        self.send_and_ack(&format!("set master of link #{index}"), req)
    }

    /// Moves link `index` into the network namespace referred to by `netns`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Netlink`] if the kernel rejects the request.
    pub fn move_to_netns(&mut self, index: u32, netns: impl AsFd) -> Result<()> {
        let fd = u32::try_from(netns.as_fd().as_raw_fd())
            .map_err(|_| netlink_err("invalid namespace descriptor"))?;
        let mut req = Request::new(RTM_NEWLINK, 0).ifinfo(ifi_index(index), 0, 0);
        let _ = req.attr_u32(IFLA_NET_NS_FD, fd);
        self.send_and_ack(&format!("move link #{index} to netns"), req)
    }

    /// Assigns `address` (host address plus prefix) to link `index`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Netlink`] if the kernel rejects the request.
    pub fn add_address(&mut self, index: u32, address: Ipv4Network) -> Result<()> {
        let octets = address.ip().octets();
        let mut req = Request::new(RTM_NEWADDR, NLM_F_CREATE | NLM_F_EXCL)
            .ifaddr(address.prefix(), index);
        let _ = req.attr(IFA_LOCAL, &octets).attr(IFA_ADDRESS, &octets);
        self.send_and_ack(&format!("add address {address} to link #{index}"), req)
    }

    /// Adds a default route via `gateway` out of link `index`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Netlink`] if the kernel rejects the request.
    pub fn add_default_route(&mut self, gateway: Ipv4Addr, index: u32) -> Result<()> {
        let mut req = Request::new(RTM_NEWROUTE, NLM_F_CREATE | NLM_F_EXCL).rtmsg(0);
        let _ = req
            .attr(RTA_GATEWAY, &gateway.octets())
            .attr_u32(RTA_OIF, index);
        self.send_and_ack(&format!("add default route via {gateway}"), req)
    }
}

fn ifi_index(index: u32) -> i32 {
    i32::try_from(index).unwrap_or(i32::MAX)
}

/// Resolves an interface name to its index in the current namespace.
///
/// # Errors
///
/// Returns [`BoxError::NotFound`] if no such interface exists.
pub fn ifindex(name: &str) -> Result<u32> {
    let c_name = CString::new(name).map_err(|_| netlink_err(format!("bad interface name {name:?}")))?;
    // SAFETY: `c_name` is a valid NUL-terminated string for the duration of the call.
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(BoxError::NotFound {
            kind: "interface",
            id: name.to_string(),
        });
    }
    Ok(index)
}

/// Reads the MAC address of `name` from sysfs.
///
/// # Errors
///
/// Returns [`BoxError::Io`] if the interface has no sysfs entry.
pub fn link_mac(name: &str) -> Result<String> {
    let path = PathBuf::from(format!("/sys/class/net/{name}/address"));
    let mac = std::fs::read_to_string(&path).map_err(|e| BoxError::io(&path, e))?;
    Ok(mac.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(buf: &[u8], at: usize) -> u16 {
        u16::from_ne_bytes([buf[at], buf[at + 1]])
    }

    #[test]
    fn header_carries_length_and_sequence() {
        let msg = Request::new(RTM_DELLINK, 0).ifinfo(7, 0, 0).finish(42);
        assert_eq!(msg.len(), NLMSG_HDRLEN + IFINFOMSG_LEN);
        assert_eq!(u32::from_ne_bytes(msg[0..4].try_into().expect("len")) as usize, msg.len());
        assert_eq!(u16_at(&msg, 4), RTM_DELLINK);
        assert_eq!(u16_at(&msg, 6), NLM_F_REQUEST | NLM_F_ACK);
        assert_eq!(u32::from_ne_bytes(msg[8..12].try_into().expect("seq")), 42);
    }

    #[test]
    fn string_attribute_is_nul_terminated_and_padded() {
        let mut req = Request::new(RTM_NEWLINK, 0);
        let _ = req.attr_str(IFLA_IFNAME, "br0");
        let attr = &req.buf[NLMSG_HDRLEN..];
        // header (4) + "br0\0" (4), already aligned
        assert_eq!(u16_at(attr, 0), 8);
        assert_eq!(u16_at(attr, 2), IFLA_IFNAME);
        assert_eq!(&attr[4..8], b"br0\0");
        assert_eq!(attr.len(), 8);

        let mut req = Request::new(RTM_NEWLINK, 0);
        let _ = req.attr_str(IFLA_IFNAME, "eth0");
        assert_eq!(u16_at(&req.buf, NLMSG_HDRLEN), 9);
        assert_eq!(req.buf.len() - NLMSG_HDRLEN, 12);
    }

    #[test]
    fn nested_attribute_length_covers_children() {
        let mut req = Request::new(RTM_NEWLINK, 0);
        let start = req.begin_nested(IFLA_LINKINFO);
        let _ = req.attr_str(IFLA_INFO_KIND, "veth");
        req.end_nested(start);
        assert_eq!(usize::from(u16_at(&req.buf, start)), req.buf.len() - start);
        assert_eq!(u16_at(&req.buf, start + 2), IFLA_LINKINFO | NLA_F_NESTED);
    }

    #[test]
    fn ack_status_reads_errno_for_matching_sequence() {
        let mut reply = vec![0u8; NLMSG_HDRLEN + 4];
        let reply_len = u32::try_from(reply.len()).expect("len");
        reply[0..4].copy_from_slice(&reply_len.to_ne_bytes());
        reply[4..6].copy_from_slice(&NLMSG_ERROR.to_ne_bytes());
        reply[8..12].copy_from_slice(&5u32.to_ne_bytes());
        reply[16..20].copy_from_slice(&(-libc::EEXIST).to_ne_bytes());
        assert_eq!(ack_status(&reply, 5), Some(libc::EEXIST));
        assert_eq!(ack_status(&reply, 6), None);

        reply[16..20].copy_from_slice(&0i32.to_ne_bytes());
        assert_eq!(ack_status(&reply, 5), Some(0));
    }

    #[test]
    fn loopback_resolves_when_root() {
        if !nix::unistd::geteuid().is_root() {
            eprintln!("Skipping loopback_resolves_when_root: requires root");
            return;
        }
        let _handle = NetlinkHandle::new().expect("socket");
        assert!(ifindex("lo").expect("lo") > 0);
    }
}
