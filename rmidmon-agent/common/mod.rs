pub mod affinity;
pub mod cpuid;
pub mod msr;

pub use affinity::AffinityGuard;
pub use msr::{Msr, MsrHandle};
