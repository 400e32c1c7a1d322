use rmidmon_raw::{read_cpuid, CpuidRegs};

use crate::common::affinity::AffinityGuard;
use crate::error::Result;

#[cfg(target_arch = "x86_64")]
pub fn cpuid(eax: u32, ecx: u32) -> (u32, u32, u32, u32) {
    let mut ebx: u32;
    let mut edx: u32;
    let mut eax_out = eax;
    let mut ecx_out = ecx;

    unsafe {
        std::arch::asm!(
            "mov {0:r}, rbx",
            "cpuid",
            "xchg {0:r}, rbx",
            out(reg) ebx,
            inout("eax") eax_out,
            inout("ecx") ecx_out,
            out("edx") edx,
            options(nostack, preserves_flags)
        );
    }

    (eax_out, ebx, ecx_out, edx)
}

#[cfg(not(target_arch = "x86_64"))]
pub fn cpuid(_eax: u32, _ecx: u32) -> (u32, u32, u32, u32) {
    (0, 0, 0, 0)
}

/// Execute CPUID for a specific logical CPU
///
/// Goes through the `cpuid` driver. When the driver is not loaded the
/// instruction is executed locally with the thread pinned to `cpu`.
pub fn cpuid_on(cpu: u32, leaf: u32, subleaf: u32) -> Result<CpuidRegs> {
    match read_cpuid(cpu, leaf, subleaf) {
        Ok(regs) => Ok(regs),
        Err(e) if e.is_open_failure() => {
            tracing::debug!("cpuid driver unavailable ({e}), pinning to CPU {cpu}");
            let _affinity = AffinityGuard::new(cpu)?;
            let (eax, ebx, ecx, edx) = cpuid(leaf, subleaf);
            Ok(CpuidRegs { eax, ebx, ecx, edx })
        }
        Err(e) => Err(e.into()),
    }
}
