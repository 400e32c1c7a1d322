use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use rmidmon_raw::{open_msr, read_msr_at, write_msr_at};

use crate::error::Result;

/// Open `/dev/cpu/<n>/msr` handle for one logical CPU
pub struct MsrHandle {
    file: File,
    cpu_id: u32,
}

impl MsrHandle {
    pub fn new(cpu: u32) -> Result<Self> {
        let file = open_msr(cpu)?;

        tracing::info!("Opened MSR handle {} for core {}", file.as_raw_fd(), cpu);

        Ok(Self { file, cpu_id: cpu })
    }

    pub fn read(&self, addr: u64) -> Result<u64> {
        let value = read_msr_at(&self.file, self.cpu_id, addr)?;
        tracing::debug!(
            "MSR read: CPU {} MSR 0x{:08x} = 0x{:016x}",
            self.cpu_id,
            addr,
            value
        );
        Ok(value)
    }

    pub fn write(&self, addr: u64, value: u64) -> Result<()> {
        tracing::debug!(
            "MSR write: CPU {} MSR 0x{:08x} <- 0x{:016x}",
            self.cpu_id,
            addr,
            value
        );
        write_msr_at(&self.file, self.cpu_id, addr, value)?;
        Ok(())
    }

    pub fn cpu_id(&self) -> u32 {
        self.cpu_id
    }
}

/// Process-wide cache of per-core MSR handles, opened on first use
pub struct Msr {
    handles: RwLock<HashMap<u32, Arc<MsrHandle>>>,
}

impl Msr {
    fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn instance() -> &'static Msr {
        static INSTANCE: Lazy<Msr> = Lazy::new(Msr::new);
        &INSTANCE
    }

    fn get_handle(&self, cpu: u32) -> Result<Arc<MsrHandle>> {
        {
            let handles = self.handles.read();
            if let Some(handle) = handles.get(&cpu) {
                return Ok(Arc::clone(handle));
            }
        }

        let mut handles = self.handles.write();
        if let Some(handle) = handles.get(&cpu) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(MsrHandle::new(cpu)?);
        handles.insert(cpu, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn read(&self, cpu: u32, addr: u64) -> Result<u64> {
        let handle = self.get_handle(cpu)?;
        handle.read(addr)
    }

    pub fn write(&self, cpu: u32, addr: u64, value: u64) -> Result<()> {
        let handle = self.get_handle(cpu)?;
        handle.write(addr, value)
    }

    /// Number of handles currently cached
    pub fn open_handles(&self) -> usize {
        self.handles.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msr_singleton() {
        let msr1 = Msr::instance();
        let msr2 = Msr::instance();
        assert!(std::ptr::eq(msr1, msr2));
    }

    #[test]
    fn test_missing_cpu_is_not_cached() {
        let msr = Msr::new();
        assert!(msr.read(u32::MAX, 0xC8F).is_err());
        assert_eq!(msr.open_handles(), 0);
    }
}
