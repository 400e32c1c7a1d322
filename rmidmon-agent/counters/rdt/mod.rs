// Cache monitoring: RMID pool, core associations and monitoring groups

pub mod events;
pub mod group;
pub mod monitor;
pub mod pool;
pub mod tracker;

pub use events::MonEvent;
pub use group::{GroupArena, GroupId, MonitorGroup};
pub use monitor::MonitorManager;
pub use pool::{Rmid, RmidPool, RmidState, RMID0};
pub use tracker::{CoreEntry, CoreTracker};
