// Core <=> RMID association tracking

use std::collections::HashMap;

use rmidmon_raw::rdt::{msr, PqrAssoc};
use rmidmon_raw::RegisterLayout;

use crate::config::MonitorConfig;
use crate::counters::rdt::{GroupId, Rmid, RmidPool, RmidState, RMID0};
use crate::error::{Result, RmidmonError};
use crate::platform::{CoreInfo, RegisterAccess};

/// Monitoring state of one logical core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreEntry {
    /// RMID the core is associated with
    pub rmid: Rmid,
    /// Core carried a foreign RMID at startup and is never monitored
    pub unavailable: bool,
    /// Group the core belongs to
    pub group: Option<GroupId>,
    pub cluster: u32,
    pub socket: u32,
}

/// Read the RMID field of the association register
pub fn read_association(regs: &dyn RegisterAccess, core: u32) -> Result<Rmid> {
    let value = regs.read_register(core, msr::IA32_PQR_ASSOC)?;
    Ok(PqrAssoc::from_msr_value(value).rmid)
}

/// Associate `core` with `rmid` keeping its class of service
///
/// No pool check; used directly only to move cores back to RMID0.
pub fn write_association(regs: &dyn RegisterAccess, core: u32, rmid: Rmid) -> Result<()> {
    let current = PqrAssoc::from_msr_value(regs.read_register(core, msr::IA32_PQR_ASSOC)?);
    let updated = current.with_rmid(rmid);
    updated
        .validate()
        .map_err(|e| RmidmonError::ParamError(format!("RMID{rmid}: {e}")))?;
    regs.write_register(core, msr::IA32_PQR_ASSOC, updated.to_msr_value())
}

#[derive(Debug)]
pub struct CoreTracker {
    entries: HashMap<u32, CoreEntry>,
}

impl CoreTracker {
    pub fn new(cores: &[CoreInfo]) -> Self {
        let entries = cores
            .iter()
            .map(|core| {
                (
                    core.id,
                    CoreEntry {
                        rmid: RMID0,
                        unavailable: false,
                        group: None,
                        cluster: core.cluster,
                        socket: core.socket,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn entry(&self, core: u32) -> Option<&CoreEntry> {
        self.entries.get(&core)
    }

    pub fn entry_mut(&mut self, core: u32) -> Option<&mut CoreEntry> {
        self.entries.get_mut(&core)
    }

    /// Pick up associations left on the cores by earlier users
    ///
    /// Returns the number of cores whose association could not be read or
    /// reclaimed.
    pub fn init_from_hardware(
        &mut self,
        regs: &dyn RegisterAccess,
        pool: &mut RmidPool,
        config: MonitorConfig,
    ) -> usize {
        let mut fails = 0;
        let mut cores: Vec<u32> = self.entries.keys().copied().collect();
        cores.sort_unstable();

        for core in cores {
            let rmid = match read_association(regs, core) {
                Ok(rmid) => rmid,
                Err(e) => {
                    tracing::error!("Failed to read RMID association of core {core}: {e}");
                    fails += 1;
                    continue;
                }
            };

            let Some(entry) = self.entries.get_mut(&core) else {
                continue;
            };
            entry.rmid = rmid;
            if rmid == RMID0 {
                continue;
            }

            // Either another instance monitors with this RMID or a previous
            // run died without restoring RMID0.
            if !config.free_in_use_rmid {
                tracing::info!(
                    "Detected RMID{rmid} is associated with core {core}. Marking RMID & core unavailable."
                );
                entry.unavailable = true;
                if let Err(e) = pool.quarantine(entry.cluster, rmid) {
                    tracing::warn!("Cannot quarantine RMID{rmid} of core {core}: {e}");
                }
            } else {
                tracing::info!(
                    "Detected RMID{rmid} is associated with core {core}. Freeing the RMID and associating core with RMID0."
                );
                match write_association(regs, core, RMID0) {
                    Ok(()) => entry.rmid = RMID0,
                    Err(e) => {
                        tracing::error!("Failed to associate core {core} with RMID0: {e}");
                        fails += 1;
                    }
                }
            }
        }

        fails
    }

    /// Associate `core` with an RMID allocated from `cluster`'s table
    pub fn set_association(
        &mut self,
        regs: &dyn RegisterAccess,
        pool: &RmidPool,
        core: u32,
        cluster: u32,
        rmid: Rmid,
    ) -> Result<()> {
        if pool.state(cluster, rmid) != Some(RmidState::Allocated) {
            return Err(RmidmonError::ParamError(format!(
                "RMID{rmid} is not allocated on cluster {cluster}"
            )));
        }
        let entry = self
            .entries
            .get_mut(&core)
            .ok_or_else(|| RmidmonError::ParamError(format!("Unknown core {core}")))?;

        write_association(regs, core, rmid)?;
        entry.rmid = rmid;
        Ok(())
    }

    /// Move every core this tracker associated back to RMID0
    ///
    /// Best effort: failures are logged and the remaining cores still reset.
    pub fn teardown(&mut self, regs: &dyn RegisterAccess) {
        let mut cores: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| e.rmid != RMID0 && !e.unavailable)
            .map(|(&core, _)| core)
            .collect();
        cores.sort_unstable();

        for core in cores {
            match write_association(regs, core, RMID0) {
                Ok(()) => {
                    if let Some(entry) = self.entries.get_mut(&core) {
                        entry.rmid = RMID0;
                        entry.group = None;
                    }
                }
                Err(e) => tracing::error!("Failed to associate core {core} with RMID0: {e}"),
            }
        }
    }
}
