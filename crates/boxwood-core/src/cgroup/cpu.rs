//! `cpu` controller: relative weight and CFS bandwidth quota.

use std::path::Path;

use boxwood_common::error::Result;
use boxwood_common::types::ResourceConfig;

use super::{Subsystem, write_control_file};

const SHARES_FILE: &str = "cpu.shares";
const QUOTA_FILE: &str = "cpu.cfs_quota_us";
const DEFAULT_SHARES: &str = "1024";
const NO_QUOTA: &str = "-1";

/// The `cpu` v1 controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuSubsystem;

impl Subsystem for CpuSubsystem {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn set(&self, cgroup: &Path, res: &ResourceConfig) -> Result<()> {
        let shares = res.cpu_share.as_deref().unwrap_or(DEFAULT_SHARES);
        let quota = res.cpu_quota.as_deref().unwrap_or(NO_QUOTA);
        write_control_file(self.name(), cgroup, SHARES_FILE, shares)?;
        write_control_file(self.name(), cgroup, QUOTA_FILE, quota)
    }
}
