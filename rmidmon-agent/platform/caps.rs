//! Monitoring capability discovery (CPUID leaves 0x7 and 0xF)

use crate::counters::rdt::MonEvent;
use crate::error::Result;
use crate::platform::RegisterAccess;

const LEAF_VENDOR: u32 = 0x0;
const LEAF_EXT_FEATURES: u32 = 0x7;
const LEAF_RDT_MON: u32 = 0xF;

const EXT_FEATURES_EBX_PQM: u32 = 1 << 12;
const RDT_MON_EDX_L3: u32 = 1 << 1;

/// Per-event monitoring limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorEvent {
    pub event: MonEvent,
    /// Number of RMIDs usable with this event (valid RMIDs are `0..max_rmid`)
    pub max_rmid: u32,
    /// Bytes per counter unit
    pub scale_factor: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringCapability {
    /// Number of RMIDs in each cluster's address space
    pub max_rmid: u32,
    pub events: Vec<MonitorEvent>,
}

impl MonitoringCapability {
    pub fn event(&self, event: MonEvent) -> Option<&MonitorEvent> {
        self.events.iter().find(|e| e.event == event)
    }
}

pub trait CapabilityCatalog: Send + Sync {
    /// Monitoring capability, `None` when the platform has no RDT monitoring
    fn monitoring(&self) -> Option<&MonitoringCapability>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub monitoring: Option<MonitoringCapability>,
}

impl CapabilityCatalog for Capabilities {
    fn monitoring(&self) -> Option<&MonitoringCapability> {
        self.monitoring.as_ref()
    }
}

impl Capabilities {
    pub fn with_monitoring(monitoring: MonitoringCapability) -> Self {
        Self {
            monitoring: Some(monitoring),
        }
    }

    /// Discover monitoring capability by executing CPUID on `core`
    pub fn discover(regs: &dyn RegisterAccess, core: u32) -> Result<Self> {
        let max_leaf = regs.read_id(core, LEAF_VENDOR, 0)?.eax;
        if max_leaf < LEAF_RDT_MON {
            tracing::warn!("CPUID leaf 0x{LEAF_RDT_MON:X} not supported (max leaf 0x{max_leaf:X})");
            return Ok(Self::default());
        }

        let ext = regs.read_id(core, LEAF_EXT_FEATURES, 0)?;
        if ext.ebx & EXT_FEATURES_EBX_PQM == 0 {
            tracing::warn!("RDT monitoring not supported on this CPU");
            return Ok(Self::default());
        }

        let mon = regs.read_id(core, LEAF_RDT_MON, 0)?;
        if mon.edx & RDT_MON_EDX_L3 == 0 {
            tracing::warn!("L3 cache monitoring not supported on this CPU");
            return Ok(Self::default());
        }

        let l3 = regs.read_id(core, LEAF_RDT_MON, 1)?;
        let max_rmid = mon.ebx + 1;
        let event_max_rmid = l3.ecx + 1;
        let scale_factor = l3.ebx;

        let events: Vec<MonitorEvent> = MonEvent::all()
            .into_iter()
            .enumerate()
            .filter(|(bit, _)| l3.edx & (1 << bit) != 0)
            .map(|(_, event)| MonitorEvent {
                event,
                max_rmid: event_max_rmid,
                scale_factor,
            })
            .collect();

        tracing::info!(
            "RDT monitoring: max RMID {}, L3 max RMID {}, scale factor {}, events {:?}",
            max_rmid,
            event_max_rmid,
            scale_factor,
            events.iter().map(|e| e.event.name()).collect::<Vec<_>>()
        );

        Ok(Self::with_monitoring(MonitoringCapability { max_rmid, events }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeRegisters;
    use rmidmon_raw::CpuidRegs;

    fn rdt_cpu() -> FakeRegisters {
        let regs = FakeRegisters::new();
        regs.set_cpuid(0x0, 0, CpuidRegs { eax: 0x16, ..Default::default() });
        regs.set_cpuid(0x7, 0, CpuidRegs { ebx: 1 << 12, ..Default::default() });
        regs.set_cpuid(0xF, 0, CpuidRegs { ebx: 143, edx: 1 << 1, ..Default::default() });
        regs.set_cpuid(
            0xF,
            1,
            CpuidRegs {
                ebx: 65536,
                ecx: 143,
                edx: 0b001,
                ..Default::default()
            },
        );
        regs
    }

    #[test]
    fn test_discover_llc_occupancy() {
        let caps = Capabilities::discover(&rdt_cpu(), 0).unwrap();
        let mon = caps.monitoring().unwrap();
        assert_eq!(mon.max_rmid, 144);
        assert_eq!(mon.events.len(), 1);

        let llc = mon.event(MonEvent::LlcOccupancy).unwrap();
        assert_eq!(llc.max_rmid, 144);
        assert_eq!(llc.scale_factor, 65536);
        assert!(mon.event(MonEvent::TotalMemBandwidth).is_none());
    }

    #[test]
    fn test_discover_all_l3_events() {
        let regs = rdt_cpu();
        regs.set_cpuid(0xF, 1, CpuidRegs { ebx: 64, ecx: 63, edx: 0b111, ..Default::default() });
        let caps = Capabilities::discover(&regs, 0).unwrap();
        assert_eq!(caps.monitoring().unwrap().events.len(), 3);
    }

    #[test]
    fn test_no_pqm_means_no_monitoring() {
        let regs = rdt_cpu();
        regs.set_cpuid(0x7, 0, CpuidRegs::default());
        let caps = Capabilities::discover(&regs, 0).unwrap();
        assert!(caps.monitoring().is_none());
    }

    #[test]
    fn test_old_cpu_without_leaf_f() {
        let regs = rdt_cpu();
        regs.set_cpuid(0x0, 0, CpuidRegs { eax: 0xD, ..Default::default() });
        assert!(Capabilities::discover(&regs, 0).unwrap().monitoring().is_none());
    }
}
