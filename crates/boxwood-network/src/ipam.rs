//! File-backed IPv4 address management.
//!
//! State is one JSON object mapping a canonical subnet (`"172.18.0.0/24"`)
//! to a bitmap string of `2^hostBits` characters, `'1'` marking an
//! allocated offset. Offset `n` stands for address `network + n + 1`, so
//! the first allocation of a subnet is its gateway.
//!
//! Every reload-mutate-persist cycle holds an exclusive `flock(2)` on a
//! sibling `.lock` file, so concurrent `boxwood` processes never hand out
//! the same address.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use boxwood_common::error::{BoxError, Result};
use ipnetwork::Ipv4Network;
use nix::fcntl::{Flock, FlockArg};

/// Largest number of host bits a bitmap is kept for (a `/16`).
pub const MAX_HOST_BITS: u8 = 16;

/// Subnet key to allocation bitmap.
pub type SubnetTable = BTreeMap<String, String>;

/// Bitmap allocator persisted at a single JSON file.
#[derive(Debug, Clone)]
pub struct Ipam {
    path: PathBuf,
}

impl Ipam {
    /// Creates an allocator persisting to `path`. Nothing is read yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the JSON state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Reads the current table. A missing file is an empty table.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<SubnetTable> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SubnetTable::new()),
            Err(e) => Err(BoxError::io(&self.path, e)),
        }
    }

    fn persist(&self, table: &SubnetTable) -> Result<()> {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, serde_json::to_vec(table)?).map_err(|e| BoxError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| BoxError::io(&self.path, e))
    }

    /// Runs one locked reload-mutate-persist cycle. `f` reports whether it
    /// changed the table; unchanged tables are not rewritten.
    fn locked<T>(&self, f: impl FnOnce(&mut SubnetTable) -> Result<(T, bool)>) -> Result<T> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BoxError::io(parent, e))?;
        }
        let lock_path = self.lock_path();
        let lock_file: File = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| BoxError::io(&lock_path, e))?;
        let _lock = Flock::lock(lock_file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            BoxError::io(&lock_path, std::io::Error::from(errno))
        })?;

        let mut table = self.load()?;
        let (value, changed) = f(&mut table)?;
        if changed {
            self.persist(&table)?;
        }
        Ok(value)
    }

    /// Hands out the lowest free address of `subnet`.
    ///
    /// The network and broadcast addresses are never returned.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::SubnetExhausted`] when no address is free (the
    /// state file is left untouched), [`BoxError::Config`] for subnets wider
    /// than [`MAX_HOST_BITS`], or any I/O and parse error of the state file.
    pub fn allocate(&self, subnet: &Ipv4Network) -> Result<Ipv4Addr> {
        let net = canonical(subnet)?;
        let len = bitmap_len(&net)?;
        let key = net.to_string();

        let ip = self.locked(|table| {
            let bitmap = table.entry(key.clone()).or_insert_with(|| "0".repeat(len));
            let mut bits = std::mem::take(bitmap).into_bytes();
            bits.resize(len, b'0');
            let usable = len.saturating_sub(2);
            let free = bits[..usable].iter().position(|b| *b == b'0');
            let result = free.map(|offset| {
                bits[offset] = b'1';
                host_address(&net, offset)
            });
            *bitmap = String::from_utf8_lossy(&bits).into_owned();
            match result {
                Some(ip) => Ok((ip, true)),
                None => Err(BoxError::SubnetExhausted {
                    subnet: key.clone(),
                }),
            }
        })?;
        tracing::debug!(subnet = %key, ip = %ip, "address allocated");
        Ok(ip)
    }

    /// Returns `ip` to the pool of `subnet`.
    ///
    /// Releasing a free address, or an address of a subnet the table has
    /// never seen, is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Config`] if `ip` is not a host address of
    /// `subnet`, or any I/O and parse error of the state file.
    pub fn release(&self, subnet: &Ipv4Network, ip: Ipv4Addr) -> Result<()> {
        let net = canonical(subnet)?;
        let key = net.to_string();
        let base = u32::from(net.network());
        let raw = u32::from(ip);
        if !net.contains(ip) || raw <= base {
            return Err(BoxError::Config {
                message: format!("{ip} is not a host address of {key}"),
            });
        }
        let offset = (raw - 1 - base) as usize;

        self.locked(|table| {
            let Some(bitmap) = table.get_mut(&key) else {
                return Ok(((), false));
            };
            let mut bits = std::mem::take(bitmap).into_bytes();
            let changed = bits.get(offset) == Some(&b'1');
            if changed {
                bits[offset] = b'0';
            }
            *bitmap = String::from_utf8_lossy(&bits).into_owned();
            Ok(((), changed))
        })?;
        tracing::debug!(subnet = %key, ip = %ip, "address released");
        Ok(())
    }
}

/// Normalizes `subnet` to its network address, e.g. `172.18.0.1/24` to `172.18.0.0/24`.
///
/// # Errors
///
/// Never fails for a valid network; the error path exists for the constructor.
pub fn canonical(subnet: &Ipv4Network) -> Result<Ipv4Network> {
    Ipv4Network::new(subnet.network(), subnet.prefix()).map_err(|e| BoxError::Config {
        message: format!("invalid subnet {subnet}: {e}"),
    })
}

fn bitmap_len(net: &Ipv4Network) -> Result<usize> {
    let host_bits = 32 - net.prefix();
    if host_bits > MAX_HOST_BITS {
        return Err(BoxError::Config {
            message: format!("subnet {net} is wider than /{}", 32 - MAX_HOST_BITS),
        });
    }
    Ok(1usize << host_bits)
}

fn host_address(net: &Ipv4Network, offset: usize) -> Ipv4Addr {
    // offset < 2^16 by construction.
    let offset = u32::try_from(offset).unwrap_or(u32::MAX - 1);
    Ipv4Addr::from(u32::from(net.network()) + offset + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Network {
        s.parse().expect("cidr")
    }

    fn ipam(dir: &Path) -> Ipam {
        Ipam::new(dir.join("ipam/subnet.json"))
    }

    #[test]
    fn first_allocations_are_sequential() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ipam = ipam(dir.path());
        let subnet = net("192.168.0.0/24");
        let got: Vec<Ipv4Addr> = (0..3)
            .map(|_| ipam.allocate(&subnet).expect("allocate"))
            .collect();
        assert_eq!(
            got,
            vec![
                Ipv4Addr::new(192, 168, 0, 1),
                Ipv4Addr::new(192, 168, 0, 2),
                Ipv4Addr::new(192, 168, 0, 3),
            ]
        );
    }

    #[test]
    fn subnet_key_is_canonical() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ipam = ipam(dir.path());
        let _ = ipam.allocate(&net("172.18.0.1/24")).expect("allocate");
        let _ = ipam.allocate(&net("172.18.0.0/24")).expect("allocate");
        let table = ipam.load().expect("load");
        assert_eq!(table.len(), 1);
        let bitmap = &table["172.18.0.0/24"];
        assert_eq!(bitmap.len(), 256);
        assert!(bitmap.starts_with("110"));
    }

    #[test]
    fn exhaustion_leaves_file_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ipam = ipam(dir.path());
        let subnet = net("10.0.0.0/30");
        assert_eq!(ipam.allocate(&subnet).expect("gw"), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ipam.allocate(&subnet).expect("host"), Ipv4Addr::new(10, 0, 0, 2));
        let before = std::fs::read(ipam.path()).expect("read");
        let err = ipam.allocate(&subnet).unwrap_err();
        assert!(matches!(err, BoxError::SubnetExhausted { ref subnet } if subnet == "10.0.0.0/30"));
        assert_eq!(std::fs::read(ipam.path()).expect("read"), before);
    }

    #[test]
    fn release_of_unknown_subnet_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ipam = ipam(dir.path());
        ipam.release(&net("10.1.0.0/24"), Ipv4Addr::new(10, 1, 0, 5))
            .expect("release");
        assert!(!ipam.path().exists());
    }

    #[test]
    fn release_outside_subnet_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ipam = ipam(dir.path());
        let subnet = net("10.1.0.0/24");
        assert!(ipam.release(&subnet, Ipv4Addr::new(10, 2, 0, 5)).is_err());
        assert!(ipam.release(&subnet, Ipv4Addr::new(10, 1, 0, 0)).is_err());
    }

    #[test]
    fn oversized_subnet_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ipam(dir.path()).allocate(&net("10.0.0.0/8")).unwrap_err();
        assert!(matches!(err, BoxError::Config { .. }));
    }
}
