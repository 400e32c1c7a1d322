//! Register access layer
//!
//! Everything the monitoring core does to hardware goes through
//! [`RegisterAccess`], so the manager can run against the real MSR driver or
//! an in-memory register file.

use rmidmon_raw::CpuidRegs;

use crate::common::{cpuid, Msr};
use crate::error::Result;

pub trait RegisterAccess: Send + Sync {
    /// Execute CPUID `leaf`/`subleaf` on `core`
    fn read_id(&self, core: u32, leaf: u32, subleaf: u32) -> Result<CpuidRegs>;

    /// Read MSR `reg` of `core`
    fn read_register(&self, core: u32, reg: u64) -> Result<u64>;

    /// Write `value` into MSR `reg` of `core`
    fn write_register(&self, core: u32, reg: u64, value: u64) -> Result<()>;
}

/// Host registers through `/dev/cpu/<n>/{msr,cpuid}`
///
/// MSR handles are opened lazily and cached for the process lifetime by
/// [`Msr::instance`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HostRegisters;

impl RegisterAccess for HostRegisters {
    fn read_id(&self, core: u32, leaf: u32, subleaf: u32) -> Result<CpuidRegs> {
        cpuid::cpuid_on(core, leaf, subleaf)
    }

    fn read_register(&self, core: u32, reg: u64) -> Result<u64> {
        Msr::instance().read(core, reg)
    }

    fn write_register(&self, core: u32, reg: u64, value: u64) -> Result<()> {
        Msr::instance().write(core, reg, value)
    }
}
