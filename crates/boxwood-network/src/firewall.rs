//! NAT rules for bridge networks.
//!
//! Two rule shapes exist: a masquerade rule per network so boxes can reach
//! the outside, and a DNAT rule per published port. Both live in the `nat`
//! table and are managed through the [`NatTable`] trait; [`Iptables`]
//! drives the `iptables` binary.

use std::fmt;
use std::net::Ipv4Addr;
use std::process::Command;

use boxwood_common::error::{BoxError, Result};
use ipnetwork::Ipv4Network;

/// A rule in the `nat` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatRule {
    /// Source-NAT traffic leaving `subnet` through any interface but `bridge`.
    Masquerade {
        /// Canonical subnet of the network.
        subnet: Ipv4Network,
        /// Bridge interface of the network.
        bridge: String,
    },
    /// Forward TCP `host_port` on the host to `ip:container_port`.
    Dnat {
        /// Port opened on the host.
        host_port: u16,
        /// Box address.
        ip: Ipv4Addr,
        /// Port inside the box.
        container_port: u16,
    },
}

/// Whether a rule is added or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// `-A`: append.
    Append,
    /// `-D`: delete the first identical rule.
    Delete,
}

impl RuleAction {
    const fn flag(self) -> &'static str {
        match self {
            Self::Append => "-A",
            Self::Delete => "-D",
        }
    }
}

impl NatRule {
    /// Builds the `iptables` argument vector for `action` on this rule.
    #[must_use]
    pub fn to_args(&self, action: RuleAction) -> Vec<String> {
        let chain_args: Vec<String> = match self {
            Self::Masquerade { subnet, bridge } => vec![
                "POSTROUTING".into(),
                "-s".into(),
                subnet.to_string(),
                "!".into(),
                "-o".into(),
                bridge.clone(),
                "-j".into(),
                "MASQUERADE".into(),
            ],
            Self::Dnat {
                host_port,
                ip,
                container_port,
            } => vec![
                "PREROUTING".into(),
                "-p".into(),
                "tcp".into(),
                "-m".into(),
                "tcp".into(),
                "--dport".into(),
                host_port.to_string(),
                "-j".into(),
                "DNAT".into(),
                "--to-destination".into(),
                format!("{ip}:{container_port}"),
            ],
        };
        ["-t", "nat", action.flag()]
            .into_iter()
            .map(String::from)
            .chain(chain_args)
            .collect()
    }
}

impl fmt::Display for NatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Masquerade { subnet, bridge } => write!(f, "masquerade {subnet} !{bridge}"),
            Self::Dnat {
                host_port,
                ip,
                container_port,
            } => write!(f, "dnat :{host_port} -> {ip}:{container_port}"),
        }
    }
}

/// Packet filter backend holding NAT rules.
pub trait NatTable: Send + Sync {
    /// Installs `rule`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Firewall`] if the backend rejects the rule.
    fn append(&self, rule: &NatRule) -> Result<()>;

    /// Removes `rule`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Firewall`] if the rule is absent or cannot be removed.
    fn delete(&self, rule: &NatRule) -> Result<()>;
}

/// [`NatTable`] backed by the `iptables` command.
#[derive(Debug, Clone)]
pub struct Iptables {
    binary: String,
}

impl Default for Iptables {
    fn default() -> Self {
        Self {
            binary: "iptables".into(),
        }
    }
}

impl Iptables {
    /// Uses `binary` instead of `iptables` from `PATH`.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[String]) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| BoxError::Firewall {
                message: format!("failed to run {}: {e}", self.binary),
            })?;
        if !output.status.success() {
            return Err(BoxError::Firewall {
                message: format!(
                    "{} {} failed: {}",
                    self.binary,
                    args.join(" "),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

impl NatTable for Iptables {
    fn append(&self, rule: &NatRule) -> Result<()> {
        self.run(&rule.to_args(RuleAction::Append))?;
        tracing::info!(rule = %rule, "nat rule installed");
        Ok(())
    }

    fn delete(&self, rule: &NatRule) -> Result<()> {
        self.run(&rule.to_args(RuleAction::Delete))?;
        tracing::info!(rule = %rule, "nat rule removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masquerade_arguments() {
        let rule = NatRule::Masquerade {
            subnet: "172.18.0.0/24".parse().expect("cidr"),
            bridge: "testnet".into(),
        };
        assert_eq!(
            rule.to_args(RuleAction::Append).join(" "),
            "-t nat -A POSTROUTING -s 172.18.0.0/24 ! -o testnet -j MASQUERADE"
        );
    }

    #[test]
    fn dnat_arguments() {
        let rule = NatRule::Dnat {
            host_port: 8080,
            ip: Ipv4Addr::new(172, 18, 0, 2),
            container_port: 80,
        };
        assert_eq!(
            rule.to_args(RuleAction::Delete).join(" "),
            "-t nat -D PREROUTING -p tcp -m tcp --dport 8080 -j DNAT --to-destination 172.18.0.2:80"
        );
    }

    #[test]
    fn missing_binary_is_a_firewall_error() {
        let table = Iptables::with_binary("/nonexistent/iptables");
        let rule = NatRule::Dnat {
            host_port: 1,
            ip: Ipv4Addr::LOCALHOST,
            container_port: 1,
        };
        assert!(matches!(table.append(&rule), Err(BoxError::Firewall { .. })));
    }
}
