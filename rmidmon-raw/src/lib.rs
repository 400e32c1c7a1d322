//! # rmidmon-raw
//!
//! Register definitions and device access for Intel RDT cache monitoring.
//!
//! This crate provides type-safe layouts for the RDT monitoring MSRs
//! (`IA32_PQR_ASSOC`, `IA32_QM_EVTSEL`, `IA32_QM_CTR`) and thin wrappers over
//! the Linux `msr` and `cpuid` drivers.
//!
//! ## Usage
//!
//! ```ignore
//! use rmidmon_raw::rdt::{self, PqrAssoc};
//! use rmidmon_raw::{open_msr, read_msr_at, write_msr_at, RegisterLayout};
//!
//! let file = open_msr(0)?;
//! let assoc = PqrAssoc::from_msr_value(read_msr_at(&file, 0, rdt::msr::IA32_PQR_ASSOC)?);
//!
//! // Move CPU 0 to RMID 5 without touching its class of service
//! let updated = assoc.with_rmid(5);
//! updated.validate()?;
//! write_msr_at(&file, 0, rdt::msr::IA32_PQR_ASSOC, updated.to_msr_value())?;
//! ```

pub mod msr;
pub mod rdt;
pub mod register;

// Re-export for convenience
pub use msr::{open_msr, read_cpuid, read_msr_at, write_msr_at, CpuidRegs, MsrError, Result};
pub use register::RegisterLayout;
