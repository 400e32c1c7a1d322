// RDT monitoring event types
use rmidmon_raw::rdt::events;

use crate::enum_with_data;

enum_with_data! {
    pub enum MonEvent: u8 {
        LlcOccupancy => ("LLCOccupancy", events::LLC_OCCUPANCY),
        TotalMemBandwidth => ("TotalMemoryBandwidth", events::TOTAL_MEM_BW),
        LocalMemBandwidth => ("LocalMemoryBandwidth", events::LOCAL_MEM_BW),
    }
    impl event_id -> u8
}

impl MonEvent {
    /// Events a monitoring group may be started for
    pub fn is_group_supported(&self) -> bool {
        matches!(self, MonEvent::LlcOccupancy)
    }
}
