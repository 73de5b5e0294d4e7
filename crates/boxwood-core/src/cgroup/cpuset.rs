//! `cpuset` controller: pins a box to CPUs and memory nodes.

use std::path::Path;

use boxwood_common::error::Result;
use boxwood_common::types::ResourceConfig;

use super::{Subsystem, write_control_file};

const CPUS_FILE: &str = "cpuset.cpus";
const MEMS_FILE: &str = "cpuset.mems";
/// Written when no placement is requested. A v1 cpuset with empty
/// `cpus`/`mems` rejects every task, so node 0 is always set.
const DEFAULT_PLACEMENT: &str = "0";

/// The `cpuset` v1 controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpusetSubsystem;

impl Subsystem for CpusetSubsystem {
    fn name(&self) -> &'static str {
        "cpuset"
    }

    fn set(&self, cgroup: &Path, res: &ResourceConfig) -> Result<()> {
        let cpus = res.cpuset_cpus.as_deref().unwrap_or(DEFAULT_PLACEMENT);
        let mems = res.cpuset_mems.as_deref().unwrap_or(DEFAULT_PLACEMENT);
        // cpus before mems: the kernel validates mems against an initialised set.
        write_control_file(self.name(), cgroup, CPUS_FILE, cpus)?;
        write_control_file(self.name(), cgroup, MEMS_FILE, mems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_requested_placement() {
        let dir = tempfile::tempdir().expect("tempdir");
        let res = ResourceConfig {
            cpuset_cpus: Some("0-1".into()),
            cpuset_mems: Some("0".into()),
            ..ResourceConfig::default()
        };
        CpusetSubsystem.set(dir.path(), &res).expect("set");
        assert_eq!(
            std::fs::read_to_string(dir.path().join(CPUS_FILE)).expect("cpus"),
            "0-1"
        );
    }
}
