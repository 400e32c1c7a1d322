// Collaborators of the monitoring core: register access, capabilities, topology

pub mod caps;
pub mod regs;
pub mod topology;

#[cfg(test)]
pub(crate) mod fake;

pub use caps::{Capabilities, CapabilityCatalog, MonitorEvent, MonitoringCapability};
pub use regs::{HostRegisters, RegisterAccess};
pub use topology::{CoreInfo, CpuTopology, Topology};
