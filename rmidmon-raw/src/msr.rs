//! MSR (Model-Specific Register) and CPUID device primitives
//!
//! This module provides low-level access through the `msr` and `cpuid` kernel
//! drivers (`/dev/cpu/*/msr`, `/dev/cpu/*/cpuid`). All transfers are
//! positional, so a single open handle can be shared between readers.
//! For cached per-core handles, use the higher-level abstractions in
//! rmidmon-agent.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};

pub type Result<T> = std::result::Result<T, MsrError>;

/// Errors that can occur during MSR and CPUID device operations
#[derive(Debug, thiserror::Error)]
pub enum MsrError {
    #[error("Failed to open {path} for CPU {cpu}: {source}")]
    OpenFailed {
        cpu: u32,
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to read MSR 0x{msr:X} on CPU {cpu}: {source}")]
    ReadFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },

    #[error("Failed to write MSR 0x{msr:X} on CPU {cpu}: {source}")]
    WriteFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },

    #[error("Failed to read CPUID leaf 0x{leaf:X}.{subleaf} on CPU {cpu}: {source}")]
    CpuidFailed {
        cpu: u32,
        leaf: u32,
        subleaf: u32,
        source: std::io::Error,
    },
}

impl MsrError {
    /// True when the device node itself could not be opened
    pub fn is_open_failure(&self) -> bool {
        matches!(self, MsrError::OpenFailed { .. })
    }
}

/// Raw CPUID output registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuidRegs {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Open the MSR device of a CPU for reading and writing
///
/// Writes through the returned handle are synchronous (`O_SYNC`).
///
/// # Errors
///
/// Fails if the `msr` driver is not loaded or the caller lacks
/// root/CAP_SYS_RAWIO.
pub fn open_msr(cpu: u32) -> Result<File> {
    let path = format!("/dev/cpu/{cpu}/msr");
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_SYNC)
        .open(&path)
        .map_err(|source| MsrError::OpenFailed { cpu, path, source })
}

/// Read a 64-bit value from an MSR through an open device handle
///
/// # Arguments
///
/// * `file` - handle returned by [`open_msr`] (any file for testing)
/// * `cpu` - CPU the handle belongs to, used for error reporting
/// * `msr` - MSR address (e.g., 0xC8F for IA32_PQR_ASSOC)
///
/// # Example
///
/// ```ignore
/// use rmidmon_raw::msr::{open_msr, read_msr_at};
///
/// let file = open_msr(0)?;
/// let value = read_msr_at(&file, 0, 0xC8F)?;
/// println!("PQR_ASSOC = 0x{:016X}", value);
/// ```
pub fn read_msr_at(file: &File, cpu: u32, msr: u64) -> Result<u64> {
    let mut buffer = [0u8; 8];
    file.read_exact_at(&mut buffer, msr)
        .map_err(|source| MsrError::ReadFailed { cpu, msr, source })?;
    Ok(u64::from_le_bytes(buffer))
}

/// Write a 64-bit value to an MSR through an open device handle
///
/// # Safety
///
/// Writing incorrect values to MSRs can cause system instability or crashes.
/// Validate register values with `RegisterLayout::validate()` before writing.
pub fn write_msr_at(file: &File, cpu: u32, msr: u64, value: u64) -> Result<()> {
    file.write_all_at(&value.to_le_bytes(), msr)
        .map_err(|source| MsrError::WriteFailed { cpu, msr, source })
}

/// Execute CPUID on a given CPU through the `cpuid` driver
///
/// The driver encodes the leaf in the low 32 bits of the file offset and the
/// subleaf in the high 32 bits.
pub fn read_cpuid(cpu: u32, leaf: u32, subleaf: u32) -> Result<CpuidRegs> {
    let path = format!("/dev/cpu/{cpu}/cpuid");
    let file = File::open(&path).map_err(|source| MsrError::OpenFailed { cpu, path, source })?;

    let offset = u64::from(leaf) | (u64::from(subleaf) << 32);
    let mut buffer = [0u8; 16];
    file.read_exact_at(&mut buffer, offset)
        .map_err(|source| MsrError::CpuidFailed {
            cpu,
            leaf,
            subleaf,
            source,
        })?;

    Ok(decode_cpuid(&buffer))
}

fn decode_cpuid(buffer: &[u8; 16]) -> CpuidRegs {
    let word = |i: usize| u32::from_le_bytes([buffer[i], buffer[i + 1], buffer[i + 2], buffer[i + 3]]);
    CpuidRegs {
        eax: word(0),
        ebx: word(4),
        ecx: word(8),
        edx: word(12),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msr_error_display() {
        let err = MsrError::OpenFailed {
            cpu: 0,
            path: "/dev/cpu/0/msr".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("Failed to open /dev/cpu/0/msr"));
        assert!(err.is_open_failure());
    }

    #[test]
    fn test_positional_read_write() {
        let file = tempfile::tempfile().unwrap();

        write_msr_at(&file, 3, 0x10, 0xDEAD_BEEF_0000_0042).unwrap();
        assert_eq!(read_msr_at(&file, 3, 0x10).unwrap(), 0xDEAD_BEEF_0000_0042);

        let err = read_msr_at(&file, 3, 0x1000).unwrap_err();
        assert!(matches!(err, MsrError::ReadFailed { cpu: 3, msr: 0x1000, .. }));
    }

    #[test]
    fn test_decode_cpuid() {
        let mut buffer = [0u8; 16];
        buffer[4..8].copy_from_slice(&0xFFu32.to_le_bytes());
        buffer[12..16].copy_from_slice(&0x2u32.to_le_bytes());
        let regs = decode_cpuid(&buffer);
        assert_eq!(regs.eax, 0);
        assert_eq!(regs.ebx, 0xFF);
        assert_eq!(regs.edx, 0x2);
    }
}
