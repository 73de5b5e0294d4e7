//! Domain primitive types used across the boxwood workspace.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BoxError, Result};

/// Number of characters in a generated container ID.
pub const CONTAINER_ID_LENGTH: usize = 10;

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID of [`CONTAINER_ID_LENGTH`] hex characters.
    ///
    /// Short enough that `"<id>-<network>"` stays readable in interface names.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(CONTAINER_ID_LENGTH);
        Self(id)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The init process was started and has not been stopped.
    Running,
    /// The container was stopped; its pid is no longer tracked.
    Stopped,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Resource envelope requested for a container.
///
/// Every field is the raw string written to the matching cgroup file.
/// `None` makes the controller write its neutral default instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// `memory.limit_in_bytes`, e.g. `"100m"`.
    pub memory_limit: Option<String>,
    /// `cpu.shares` relative weight.
    pub cpu_share: Option<String>,
    /// `cpu.cfs_quota_us` in microseconds per period.
    pub cpu_quota: Option<String>,
    /// `cpuset.cpus`, e.g. `"0-1"`.
    pub cpuset_cpus: Option<String>,
    /// `cpuset.mems`, e.g. `"0"`.
    pub cpuset_mems: Option<String>,
}

/// A `hostPort:containerPort` TCP forwarding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortMapping {
    /// Port opened on the host.
    pub host_port: u16,
    /// Port inside the container.
    pub container_port: u16,
}

impl FromStr for PortMapping {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BoxError::Config {
            message: format!("port mapping must look like HOST:CONTAINER, got `{s}`"),
        };
        let (host, container) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            host_port: host.parse().map_err(|_| invalid())?,
            container_port: container.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for PortMapping {
    type Error = BoxError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PortMapping> for String {
    fn from(value: PortMapping) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_port, self.container_port)
    }
}

/// A `hostDir:containerDir` bind volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VolumeSpec {
    /// Directory on the host.
    pub host: PathBuf,
    /// Mount point inside the container root.
    pub container: PathBuf,
}

impl FromStr for VolumeSpec {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((host, container))
                if !host.is_empty() && !container.is_empty() && !container.contains(':') =>
            {
                Ok(Self {
                    host: PathBuf::from(host),
                    container: PathBuf::from(container),
                })
            }
            _ => Err(BoxError::Config {
                message: format!("volume must look like HOST_DIR:CONTAINER_DIR, got `{s}`"),
            }),
        }
    }
}

impl TryFrom<String> for VolumeSpec {
    type Error = BoxError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<VolumeSpec> for String {
    fn from(value: VolumeSpec) -> Self {
        value.to_string()
    }
}

impl fmt::Display for VolumeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host.display(), self.container.display())
    }
}

/// Persistent metadata of one box, stored as `config.json` in its directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    /// Container identifier, also the cgroup directory name.
    pub id: ContainerId,
    /// Host PID of the init process while running.
    pub pid: Option<i32>,
    /// Box name; defaults to the ID.
    pub name: String,
    /// Space-joined user command.
    pub command: String,
    /// Local creation time, `YYYY-MM-DD HH:MM:SS`.
    #[serde(rename = "createTime")]
    pub created_time: String,
    /// Current lifecycle status.
    pub status: ContainerStatus,
    /// Optional bind volume.
    #[serde(default)]
    pub volume: Option<VolumeSpec>,
    /// Requested port forwards.
    #[serde(default, rename = "portMapping")]
    pub port_mappings: Vec<PortMapping>,
    /// Network the box is attached to.
    #[serde(default)]
    pub network: Option<String>,
    /// Address allocated on that network.
    #[serde(default)]
    pub ip_address: Option<Ipv4Addr>,
}

impl ContainerRecord {
    /// Creates a running record stamped with the current local time.
    #[must_use]
    pub fn running(id: ContainerId, name: String, command: &[String], pid: i32) -> Self {
        Self {
            id,
            pid: Some(pid),
            name,
            command: command.join(" "),
            created_time: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            status: ContainerStatus::Running,
            volume: None,
            port_mappings: Vec::new(),
            network: None,
            ip_address: None,
        }
    }

    /// Returns the init PID if the record is running.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::InvalidState`] if the box is stopped or has no PID.
    pub fn running_pid(&self) -> Result<i32> {
        match (self.status, self.pid) {
            (ContainerStatus::Running, Some(pid)) => Ok(pid),
            _ => Err(BoxError::InvalidState {
                message: format!("box `{}` is not running", self.name),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_fixed_length_and_differ() {
        let a = ContainerId::generate();
        let b = ContainerId::generate();
        assert_eq!(a.as_str().len(), CONTAINER_ID_LENGTH);
        assert_ne!(a, b);
    }

    #[test]
    fn port_mapping_parses_host_and_container() {
        let pm: PortMapping = "8080:80".parse().expect("parse");
        assert_eq!(pm.host_port, 8080);
        assert_eq!(pm.container_port, 80);
        assert_eq!(pm.to_string(), "8080:80");
    }

    #[test]
    fn port_mapping_rejects_malformed_input() {
        assert!("8080".parse::<PortMapping>().is_err());
        assert!("a:80".parse::<PortMapping>().is_err());
        assert!("8080:80:1".parse::<PortMapping>().is_err());
        assert!("70000:80".parse::<PortMapping>().is_err());
    }

    #[test]
    fn volume_requires_both_sides() {
        let v: VolumeSpec = "/data:/mnt/data".parse().expect("parse");
        assert_eq!(v.host, PathBuf::from("/data"));
        assert_eq!(v.container, PathBuf::from("/mnt/data"));
        assert!(":/mnt".parse::<VolumeSpec>().is_err());
        assert!("/data:".parse::<VolumeSpec>().is_err());
        assert!("/data".parse::<VolumeSpec>().is_err());
    }

    #[test]
    fn record_serializes_with_original_keys() {
        let mut record = ContainerRecord::running(
            ContainerId::new("abc"),
            "web".into(),
            &["sleep".into(), "10".into()],
            42,
        );
        record.port_mappings.push("8080:80".parse().expect("pm"));
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["createTime"], serde_json::json!(record.created_time));
        assert_eq!(json["portMapping"], serde_json::json!(["8080:80"]));
        assert_eq!(json["status"], serde_json::json!("running"));
        assert_eq!(json["command"], serde_json::json!("sleep 10"));

        let back: ContainerRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, record);
    }

    #[test]
    fn stopped_record_has_no_running_pid() {
        let mut record =
            ContainerRecord::running(ContainerId::new("abc"), "web".into(), &["sh".into()], 7);
        assert_eq!(record.running_pid().expect("running"), 7);
        record.status = ContainerStatus::Stopped;
        record.pid = None;
        assert!(matches!(
            record.running_pid(),
            Err(BoxError::InvalidState { .. })
        ));
    }
}
