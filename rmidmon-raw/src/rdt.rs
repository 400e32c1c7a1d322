//! RDT (Resource Director Technology) monitoring register definitions
//!
//! Cache monitoring (CMT) tags every logical processor with a Resource
//! Monitoring ID through `IA32_PQR_ASSOC`. Occupancy for an RMID is read back
//! by selecting the RMID and event in `IA32_QM_EVTSEL` and then reading
//! `IA32_QM_CTR`. These registers are architectural, so the layouts apply to
//! every RDT capable part.
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - Section 17.18: Intel Resource Director Technology Monitoring Features

use crate::register::RegisterLayout;

/// MSR addresses for RDT monitoring
pub mod msr {
    /// QM Event Select - Select monitoring event and RMID
    pub const IA32_QM_EVTSEL: u64 = 0xC8D;

    /// QM Counter - Read monitoring counter value
    pub const IA32_QM_CTR: u64 = 0xC8E;

    /// PQR Association - Associate RMID and COS with logical processor
    pub const IA32_PQR_ASSOC: u64 = 0xC8F;
}

/// RDT monitoring event ids as encoded in `IA32_QM_EVTSEL`
pub mod events {
    /// L3 cache occupancy
    pub const LLC_OCCUPANCY: u8 = 0x01;

    /// L3 total external memory bandwidth
    pub const TOTAL_MEM_BW: u8 = 0x02;

    /// L3 local external memory bandwidth
    pub const LOCAL_MEM_BW: u8 = 0x03;
}

/// Width mask of the RMID field in both the association and event select
/// registers.
pub const RMID_MASK: u64 = (1 << 10) - 1;

/// Highest RMID the 10-bit register fields can carry.
pub const RMID_FIELD_MAX: u32 = RMID_MASK as u32;

const EVTSEL_RMID_SHIFT: u32 = 32;
const EVTSEL_EVENT_MASK: u64 = 0xFF;

const PQR_COS_SHIFT: u32 = 32;
const PQR_COS_MASK: u64 = 0xFFFF_FFFF_0000_0000;

const QM_CTR_DATA_MASK: u64 = (1 << 62) - 1;
const QM_CTR_UNAVAILABLE: u64 = 1 << 62;
const QM_CTR_ERROR: u64 = 1 << 63;

/// QM Event Select Register layout
///
/// Selects which RMID and event the next `IA32_QM_CTR` read reports.
///
/// ## Register Format
///
/// | Bits   | Field     | Description                  |
/// |--------|-----------|------------------------------|
/// | 0-7    | event_id  | Event ID to monitor          |
/// | 8-31   | reserved  |                              |
/// | 32-41  | rmid      | Resource Monitoring ID       |
/// | 42-63  | reserved  |                              |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QmEventSelect {
    /// Resource Monitoring ID (RMID)
    pub rmid: u32,

    /// Event ID (LLC_OCCUPANCY, TOTAL_MEM_BW, etc.)
    pub event_id: u8,
}

impl RegisterLayout for QmEventSelect {
    fn to_msr_value(&self) -> u64 {
        ((u64::from(self.rmid) & RMID_MASK) << EVTSEL_RMID_SHIFT)
            | (u64::from(self.event_id) & EVTSEL_EVENT_MASK)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            rmid: ((value >> EVTSEL_RMID_SHIFT) & RMID_MASK) as u32,
            event_id: (value & EVTSEL_EVENT_MASK) as u8,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.rmid > RMID_FIELD_MAX {
            return Err("RMID does not fit the 10-bit event select field");
        }
        Ok(())
    }
}

/// PQR Association Register layout
///
/// Associates an RMID and COS (Class of Service) with a logical processor.
/// Reserved bits 10-31 always encode as zero.
///
/// ## Register Format
///
/// | Bits   | Field     | Description                  |
/// |--------|-----------|------------------------------|
/// | 0-9    | rmid      | Resource Monitoring ID       |
/// | 10-31  | reserved  |                              |
/// | 32-63  | cos       | Class of Service             |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PqrAssoc {
    /// Resource Monitoring ID (RMID) for this logical processor
    pub rmid: u32,

    /// Class of Service (COS) for cache/memory allocation
    pub cos: u32,
}

impl PqrAssoc {
    /// Same class of service, different RMID
    pub fn with_rmid(self, rmid: u32) -> Self {
        Self { rmid, ..self }
    }
}

impl RegisterLayout for PqrAssoc {
    fn to_msr_value(&self) -> u64 {
        ((u64::from(self.cos) << PQR_COS_SHIFT) & PQR_COS_MASK) | (u64::from(self.rmid) & RMID_MASK)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            rmid: (value & RMID_MASK) as u32,
            cos: ((value & PQR_COS_MASK) >> PQR_COS_SHIFT) as u32,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.rmid > RMID_FIELD_MAX {
            return Err("RMID does not fit the 10-bit association field");
        }
        Ok(())
    }
}

/// QM Counter Register layout
///
/// | Bits   | Field       | Description                          |
/// |--------|-------------|--------------------------------------|
/// | 0-61   | data        | Event count in scale factor units    |
/// | 62     | unavailable | Data not yet available for the RMID  |
/// | 63     | error       | Unsupported RMID or event selected   |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QmCounter {
    pub data: u64,
    pub unavailable: bool,
    pub error: bool,
}

impl RegisterLayout for QmCounter {
    fn to_msr_value(&self) -> u64 {
        let mut value = self.data & QM_CTR_DATA_MASK;
        if self.unavailable {
            value |= QM_CTR_UNAVAILABLE;
        }
        if self.error {
            value |= QM_CTR_ERROR;
        }
        value
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            data: value & QM_CTR_DATA_MASK,
            unavailable: (value & QM_CTR_UNAVAILABLE) != 0,
            error: (value & QM_CTR_ERROR) != 0,
        }
    }
}
