//! Logical CPU topology from sysfs

use std::fs;
use std::path::Path;

use crate::config::parse_cpu_list;
use crate::error::{Result, RmidmonError};

const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreInfo {
    /// Logical CPU id
    pub id: u32,
    /// RMID address space the CPU belongs to (its L3 cache instance)
    pub cluster: u32,
    pub socket: u32,
}

pub trait Topology: Send + Sync {
    fn cores(&self) -> &[CoreInfo];

    fn core(&self, id: u32) -> Option<&CoreInfo> {
        self.cores().iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuTopology {
    cores: Vec<CoreInfo>,
}

impl Topology for CpuTopology {
    fn cores(&self) -> &[CoreInfo] {
        &self.cores
    }
}

impl CpuTopology {
    pub fn new(cores: Vec<CoreInfo>) -> Self {
        Self { cores }
    }

    /// Detect online CPUs of this host
    pub fn detect() -> Result<Self> {
        Self::detect_from(Path::new(SYSFS_CPU_ROOT))
    }

    /// Detect online CPUs below a sysfs `devices/system/cpu` directory
    pub fn detect_from(root: &Path) -> Result<Self> {
        let online = fs::read_to_string(root.join("online"))?;
        let ids = parse_cpu_list(&online).ok_or_else(|| {
            RmidmonError::ConfigError(format!("Malformed online CPU list: {}", online.trim()))
        })?;

        let cores: Vec<CoreInfo> = ids
            .into_iter()
            .map(|id| {
                let cpu_dir = root.join(format!("cpu{id}"));
                let socket = read_id(&cpu_dir.join("topology/physical_package_id"))
                    .unwrap_or_else(|| {
                        tracing::warn!("Cannot read socket of CPU {id}, assuming socket 0");
                        0
                    });
                let cluster = l3_cache_id(&cpu_dir).unwrap_or(socket);
                CoreInfo {
                    id,
                    cluster,
                    socket,
                }
            })
            .collect();

        tracing::info!(
            "Detected {} CPUs in {} sockets, {} monitoring clusters",
            cores.len(),
            count_distinct(cores.iter().map(|c| c.socket)),
            count_distinct(cores.iter().map(|c| c.cluster))
        );

        Ok(Self { cores })
    }

    /// Distinct socket ids in ascending order
    pub fn sockets(&self) -> Vec<u32> {
        let mut sockets: Vec<u32> = self.cores.iter().map(|c| c.socket).collect();
        sockets.sort_unstable();
        sockets.dedup();
        sockets
    }
}

fn read_id(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn l3_cache_id(cpu_dir: &Path) -> Option<u32> {
    let entries = fs::read_dir(cpu_dir.join("cache")).ok()?;
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|dir| read_id(&dir.join("level")) == Some(3))
        .find_map(|dir| read_id(&dir.join("id")))
}

fn count_distinct(ids: impl Iterator<Item = u32>) -> usize {
    let mut ids: Vec<u32> = ids.collect();
    ids.sort_unstable();
    ids.dedup();
    ids.len()
}
