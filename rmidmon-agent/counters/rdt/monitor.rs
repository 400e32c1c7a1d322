use parking_lot::Mutex;
use std::sync::Arc;

use rmidmon_raw::rdt::{msr, QmCounter, QmEventSelect};
use rmidmon_raw::RegisterLayout;

use crate::config::MonitorConfig;
use crate::counters::rdt::tracker::{read_association, write_association};
use crate::counters::rdt::{
    CoreEntry, CoreTracker, GroupArena, GroupId, MonEvent, MonitorGroup, Rmid, RmidPool,
    RmidState, RMID0,
};
use crate::error::{Result, RmidmonError};
use crate::platform::{CapabilityCatalog, CoreInfo, MonitoringCapability, RegisterAccess, Topology};

/// Counter reads per poll while the hardware reports data unavailable
const COUNTER_READ_ATTEMPTS: u32 = 3;

struct State {
    pool: RmidPool,
    tracker: CoreTracker,
    groups: GroupArena,
}

/// Owns RMID tables, per-core association state and monitoring groups
///
/// Every public method holds one lock for its whole duration, so calls from
/// different threads never interleave.
pub struct MonitorManager {
    regs: Arc<dyn RegisterAccess>,
    caps: Arc<dyn CapabilityCatalog>,
    topology: Arc<dyn Topology>,
    state: Mutex<State>,
}

impl MonitorManager {
    pub fn new(
        regs: Arc<dyn RegisterAccess>,
        caps: Arc<dyn CapabilityCatalog>,
        topology: Arc<dyn Topology>,
        config: MonitorConfig,
    ) -> Result<Self> {
        let capability = caps.monitoring().ok_or_else(|| {
            RmidmonError::ConfigError("Monitoring capability not detected".to_string())
        })?;

        let mut pool = RmidPool::new(topology.cores(), capability)?;
        let mut tracker = CoreTracker::new(topology.cores());

        let failed = tracker.init_from_hardware(regs.as_ref(), &mut pool, config);
        if failed > 0 {
            tracker.teardown(regs.as_ref());
            return Err(RmidmonError::PartialInitError { failed });
        }

        tracing::info!(
            "RDT monitoring initialized: {} cores, {} clusters",
            topology.cores().len(),
            pool.num_clusters()
        );

        Ok(Self {
            regs,
            caps,
            topology,
            state: Mutex::new(State {
                pool,
                tracker,
                groups: GroupArena::new(),
            }),
        })
    }

    fn capability(&self) -> Result<&MonitoringCapability> {
        self.caps.monitoring().ok_or_else(|| {
            RmidmonError::ConfigError("Monitoring capability not detected".to_string())
        })
    }

    fn core_info(&self, core: u32) -> Result<CoreInfo> {
        self.topology
            .core(core)
            .copied()
            .ok_or_else(|| RmidmonError::ParamError(format!("Core {core} is not in the topology")))
    }

    /// Start monitoring `event` on `cores` with a single RMID
    ///
    /// All cores must be known, available, idle and in one cluster. If a
    /// core cannot be associated, cores already moved to the new RMID are
    /// put back on RMID0 and the RMID is released before the error returns.
    pub fn start(&self, cores: &[u32], event: MonEvent, context: Option<String>) -> Result<GroupId> {
        if cores.is_empty() {
            return Err(RmidmonError::ParamError(
                "Monitoring group needs at least one core".to_string(),
            ));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let infos = cores
            .iter()
            .map(|&core| self.core_info(core))
            .collect::<Result<Vec<_>>>()?;

        for &core in cores {
            if state.tracker.entry(core).map_or(false, |e| e.unavailable) {
                return Err(RmidmonError::ResourceError(format!(
                    "Core {core} is monitored by another process"
                )));
            }
        }

        let first = infos[0];
        if let Some(other) = infos.iter().find(|info| info.cluster != first.cluster) {
            return Err(RmidmonError::ParamError(format!(
                "Cores {} and {} are in different monitoring clusters ({} vs {})",
                first.id, other.id, first.cluster, other.cluster
            )));
        }

        for (i, core) in cores.iter().enumerate() {
            if cores[..i].contains(core) {
                return Err(RmidmonError::ParamError(format!("Core {core} listed twice")));
            }
        }

        for &core in cores {
            if state.tracker.entry(core).map_or(false, |e| e.group.is_some()) {
                return Err(RmidmonError::ResourceError(format!(
                    "Core {core} already belongs to a monitoring group"
                )));
            }
        }

        if !event.is_group_supported() {
            return Err(RmidmonError::ParamError(format!(
                "Event {} cannot be monitored",
                event.name()
            )));
        }

        let rmid = state.pool.allocate(first.cluster, event, self.capability()?)?;

        for (i, &core) in cores.iter().enumerate() {
            if let Err(e) =
                state
                    .tracker
                    .set_association(self.regs.as_ref(), &state.pool, core, first.cluster, rmid)
            {
                tracing::error!("Failed to associate core {core} with RMID{rmid}: {e}");
                self.unwind(state, &cores[..i], first.cluster, rmid);
                return Err(e);
            }
        }

        let id = state.groups.insert(MonitorGroup {
            cores: cores.to_vec(),
            event,
            rmid,
            cluster: first.cluster,
            socket: first.socket,
            value: 0,
            context,
        });
        for &core in cores {
            if let Some(entry) = state.tracker.entry_mut(core) {
                entry.group = Some(id);
            }
        }

        tracing::info!(
            "Started {} monitoring on cores {:?} (socket {}, cluster {}) with RMID{}",
            event.name(),
            cores,
            first.socket,
            first.cluster,
            rmid
        );

        Ok(id)
    }

    fn unwind(&self, state: &mut State, bound: &[u32], cluster: u32, rmid: Rmid) {
        for &core in bound {
            match write_association(self.regs.as_ref(), core, RMID0) {
                Ok(()) => {
                    if let Some(entry) = state.tracker.entry_mut(core) {
                        entry.rmid = RMID0;
                    }
                }
                Err(e) => tracing::error!("Failed to restore RMID0 on core {core}: {e}"),
            }
        }
        if let Err(e) = state.pool.free(cluster, rmid) {
            tracing::error!("Failed to release RMID{rmid} on cluster {cluster}: {e}");
        }
    }

    /// Stop a monitoring group and release its RMID
    ///
    /// Every core is moved back to RMID0 even if some of them fail; the
    /// first failure is returned once the group is gone.
    pub fn stop(&self, id: GroupId) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let group = state
            .groups
            .get(id)
            .ok_or_else(|| RmidmonError::ParamError(format!("{id} is not active")))?;
        if group.cores.is_empty() {
            return Err(RmidmonError::ParamError(format!("{id} has no cores")));
        }
        for &core in &group.cores {
            if state.tracker.entry(core).and_then(|e| e.group) != Some(id) {
                return Err(RmidmonError::ResourceError(format!(
                    "Core {core} of {id} is not marked as monitored"
                )));
            }
        }

        let Some(group) = state.groups.remove(id) else {
            return Err(RmidmonError::ParamError(format!("{id} is not active")));
        };

        let mut first_error = None;
        for &core in &group.cores {
            let reset = write_association(self.regs.as_ref(), core, RMID0);
            if let Some(entry) = state.tracker.entry_mut(core) {
                entry.group = None;
                if reset.is_ok() {
                    entry.rmid = RMID0;
                }
            }
            if let Err(e) = reset {
                tracing::error!("Failed to associate core {core} with RMID0: {e}");
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = state.pool.free(group.cluster, group.rmid) {
            tracing::error!("Failed to free RMID{} on cluster {}: {e}", group.rmid, group.cluster);
            first_error.get_or_insert(e);
        }

        tracing::info!(
            "Stopped {} monitoring on cores {:?}, RMID{} released",
            group.event.name(),
            group.cores,
            group.rmid
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Read the counters of `groups`, one result per requested group
    ///
    /// A failing group does not prevent the others from being read.
    pub fn poll(&self, groups: &[GroupId]) -> Vec<Result<u64>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        groups
            .iter()
            .map(|&id| {
                let group = state
                    .groups
                    .get_mut(id)
                    .ok_or_else(|| RmidmonError::ParamError(format!("{id} is not active")))?;
                let core = group.cores[0];
                match read_counter(self.regs.as_ref(), core, group.rmid, group.event) {
                    Ok(value) => {
                        group.value = value;
                        Ok(value)
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Failed to read monitoring data for event {} on core {} (RMID{}): {}",
                            group.event.name(),
                            core,
                            group.rmid,
                            e
                        );
                        Err(e)
                    }
                }
            })
            .collect()
    }

    /// Snapshot of a live group
    pub fn group(&self, id: GroupId) -> Option<MonitorGroup> {
        self.state.lock().groups.get(id).cloned()
    }

    pub fn groups(&self) -> Vec<GroupId> {
        self.state.lock().groups.ids()
    }

    /// Last polled value of a group converted to bytes
    pub fn occupancy_bytes(&self, id: GroupId) -> Option<u64> {
        let group = self.group(id)?;
        let scale = self.caps.monitoring()?.event(group.event)?.scale_factor;
        Some(group.value.saturating_mul(u64::from(scale)))
    }

    /// RMID the hardware currently associates with `core`
    pub fn assoc_get(&self, core: u32) -> Result<Rmid> {
        let _guard = self.state.lock();
        self.core_info(core)?;
        read_association(self.regs.as_ref(), core)
    }

    pub fn allocate_rmid(&self, cluster: u32, event: MonEvent) -> Result<Rmid> {
        let mut state = self.state.lock();
        state.pool.allocate(cluster, event, self.capability()?)
    }

    /// Release an RMID obtained through [`Self::allocate_rmid`]
    ///
    /// RMIDs owned by a live group are released only by [`Self::stop`].
    pub fn free_rmid(&self, cluster: u32, rmid: Rmid) -> Result<()> {
        let mut state = self.state.lock();
        let owner = state.groups.ids().into_iter().find(|&id| {
            state
                .groups
                .get(id)
                .map_or(false, |g| g.cluster == cluster && g.rmid == rmid)
        });
        if let Some(id) = owner {
            return Err(RmidmonError::ResourceError(format!(
                "RMID{rmid} on cluster {cluster} is held by {id}"
            )));
        }
        state.pool.free(cluster, rmid)
    }

    pub fn rmid_state(&self, cluster: u32, rmid: Rmid) -> Option<RmidState> {
        self.state.lock().pool.state(cluster, rmid)
    }

    pub fn core_entry(&self, core: u32) -> Option<CoreEntry> {
        self.state.lock().tracker.entry(core).copied()
    }
}

impl Drop for MonitorManager {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.groups.is_empty() {
            tracing::warn!(
                "{} monitoring group(s) still active at shutdown",
                state.groups.len()
            );
        }
        state.tracker.teardown(self.regs.as_ref());
    }
}

/// Select `rmid`/`event` on `core` and read the occupancy counter
fn read_counter(regs: &dyn RegisterAccess, core: u32, rmid: Rmid, event: MonEvent) -> Result<u64> {
    let select = QmEventSelect {
        rmid,
        event_id: event.event_id(),
    };
    select
        .validate()
        .map_err(|e| RmidmonError::ParamError(format!("RMID{rmid}: {e}")))?;
    regs.write_register(core, msr::IA32_QM_EVTSEL, select.to_msr_value())?;

    for _ in 0..COUNTER_READ_ATTEMPTS {
        let counter = QmCounter::from_msr_value(regs.read_register(core, msr::IA32_QM_CTR)?);
        if counter.error {
            return Err(RmidmonError::HardwareError(format!(
                "Unsupported RMID{rmid} or event {} selected on core {core}",
                event.name()
            )));
        }
        if !counter.unavailable {
            return Ok(counter.data);
        }
    }

    Err(RmidmonError::HardwareError(format!(
        "RMID{rmid} data unavailable on core {core} after {COUNTER_READ_ATTEMPTS} reads"
    )))
}
