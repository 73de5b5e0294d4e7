//! `memory` controller.

use std::path::Path;

use boxwood_common::error::Result;
use boxwood_common::types::ResourceConfig;

use super::{Subsystem, write_control_file};

const LIMIT_FILE: &str = "memory.limit_in_bytes";
const UNLIMITED: &str = "-1";

/// The `memory` v1 controller. Limits accept kernel suffixes such as `100m`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemorySubsystem;

impl Subsystem for MemorySubsystem {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn set(&self, cgroup: &Path, res: &ResourceConfig) -> Result<()> {
        let limit = res.memory_limit.as_deref().unwrap_or(UNLIMITED);
        write_control_file(self.name(), cgroup, LIMIT_FILE, limit)
    }
}
