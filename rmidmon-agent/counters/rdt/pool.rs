// Per-cluster RMID tables

use rmidmon_raw::rdt::RMID_FIELD_MAX;

use crate::counters::rdt::MonEvent;
use crate::error::{Result, RmidmonError};
use crate::platform::{CoreInfo, MonitoringCapability};

pub type Rmid = u32;

/// Every core is associated with RMID 0 after reset, so it cannot tell
/// "monitored" from "not monitored" and is never handed out.
pub const RMID0: Rmid = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RmidState {
    /// Unused and can be allocated
    #[default]
    Free,
    /// Handed out for monitoring
    Allocated,
    /// RMID0, or found associated with a core at startup and possibly owned
    /// by another process
    Unavailable,
}

/// One RMID table per monitoring cluster
#[derive(Debug)]
pub struct RmidPool {
    tables: Vec<Vec<RmidState>>,
    max_rmid: u32,
}

impl RmidPool {
    /// Size one table per cluster id seen in `cores` (`max id + 1` tables)
    pub fn new(cores: &[CoreInfo], capability: &MonitoringCapability) -> Result<Self> {
        if capability.max_rmid == 0 {
            return Err(RmidmonError::ConfigError(
                "Monitoring capability reports zero RMIDs".to_string(),
            ));
        }

        let max_rmid = if capability.max_rmid > RMID_FIELD_MAX + 1 {
            tracing::warn!(
                "Max RMID {} exceeds the association field, limiting to {}",
                capability.max_rmid,
                RMID_FIELD_MAX + 1
            );
            RMID_FIELD_MAX + 1
        } else {
            capability.max_rmid
        };

        let num_clusters = cores.iter().map(|c| c.cluster).max().map_or(1, |c| c as usize + 1);

        let mut tables = Vec::new();
        tables.try_reserve_exact(num_clusters).map_err(|e| {
            RmidmonError::ResourceError(format!("Cannot allocate cluster map: {e}"))
        })?;
        for cluster in 0..num_clusters {
            let mut table = Vec::new();
            table.try_reserve_exact(max_rmid as usize).map_err(|e| {
                RmidmonError::ResourceError(format!(
                    "Cannot allocate RMID table for cluster {cluster}: {e}"
                ))
            })?;
            table.resize(max_rmid as usize, RmidState::Free);
            table[RMID0 as usize] = RmidState::Unavailable;
            tables.push(table);
        }

        tracing::info!(
            "Max RMID per monitoring cluster is {}, {} cluster table(s) allocated",
            max_rmid,
            num_clusters
        );

        Ok(Self { tables, max_rmid })
    }

    pub fn num_clusters(&self) -> usize {
        self.tables.len()
    }

    pub fn max_rmid(&self) -> u32 {
        self.max_rmid
    }

    pub fn state(&self, cluster: u32, rmid: Rmid) -> Option<RmidState> {
        self.tables
            .get(cluster as usize)
            .and_then(|table| table.get(rmid as usize))
            .copied()
    }

    fn table_mut(&mut self, cluster: u32) -> Result<&mut Vec<RmidState>> {
        self.tables
            .get_mut(cluster as usize)
            .ok_or_else(|| RmidmonError::ParamError(format!("Unknown monitoring cluster {cluster}")))
    }

    /// Allocate an RMID usable with `event`
    ///
    /// Scans downwards from the event's ceiling so that low RMIDs, which are
    /// valid for every event, stay available for events with smaller ranges.
    pub fn allocate(
        &mut self,
        cluster: u32,
        event: MonEvent,
        capability: &MonitoringCapability,
    ) -> Result<Rmid> {
        let table = self.table_mut(cluster)?;

        let ceiling = match capability.event(event) {
            Some(ev) if ev.max_rmid > 0 => ev.max_rmid.min(table.len() as u32),
            _ => {
                return Err(RmidmonError::NotFound(format!(
                    "Event {} is not supported by the platform",
                    event.name()
                )))
            }
        };

        for rmid in (0..ceiling).rev() {
            let state = &mut table[rmid as usize];
            if *state == RmidState::Free {
                *state = RmidState::Allocated;
                tracing::debug!("Allocated RMID{rmid} on cluster {cluster} for {}", event.name());
                return Ok(rmid);
            }
        }

        Err(RmidmonError::ResourceExhausted(format!(
            "No free RMID below {ceiling} on cluster {cluster}"
        )))
    }

    pub fn free(&mut self, cluster: u32, rmid: Rmid) -> Result<()> {
        let max_rmid = self.max_rmid;
        let table = self.table_mut(cluster)?;

        let Some(state) = table.get_mut(rmid as usize) else {
            return Err(RmidmonError::ParamError(format!(
                "RMID{rmid} is out of range (max {max_rmid})"
            )));
        };

        if *state != RmidState::Allocated {
            return Err(RmidmonError::InvalidState(format!(
                "RMID{rmid} on cluster {cluster} is {state:?}, not allocated"
            )));
        }

        *state = RmidState::Free;
        tracing::debug!("Freed RMID{rmid} on cluster {cluster}");
        Ok(())
    }

    /// Protect an RMID found in use at startup from reallocation
    pub fn quarantine(&mut self, cluster: u32, rmid: Rmid) -> Result<()> {
        let max_rmid = self.max_rmid;
        let table = self.table_mut(cluster)?;
        let state = table.get_mut(rmid as usize).ok_or_else(|| {
            RmidmonError::ParamError(format!("RMID{rmid} is out of range (max {max_rmid})"))
        })?;
        *state = RmidState::Unavailable;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MonitorEvent;

    fn cores(clusters: &[u32]) -> Vec<CoreInfo> {
        clusters
            .iter()
            .enumerate()
            .map(|(id, &cluster)| CoreInfo {
                id: id as u32,
                cluster,
                socket: cluster,
            })
            .collect()
    }

    fn capability(max_rmid: u32, events: &[(MonEvent, u32)]) -> MonitoringCapability {
        MonitoringCapability {
            max_rmid,
            events: events
                .iter()
                .map(|&(event, max_rmid)| MonitorEvent {
                    event,
                    max_rmid,
                    scale_factor: 64,
                })
                .collect(),
        }
    }

    #[test]
    fn test_tables_per_cluster_with_rmid0_reserved() {
        let cap = capability(8, &[(MonEvent::LlcOccupancy, 8)]);
        let pool = RmidPool::new(&cores(&[0, 0, 2]), &cap).unwrap();
        assert_eq!(pool.num_clusters(), 3);
        for cluster in 0..3 {
            assert_eq!(pool.state(cluster, 0), Some(RmidState::Unavailable));
            assert_eq!(pool.state(cluster, 7), Some(RmidState::Free));
            assert_eq!(pool.state(cluster, 8), None);
        }
    }

    #[test]
    fn test_zero_max_rmid_is_config_error() {
        let cap = capability(0, &[]);
        assert!(matches!(
            RmidPool::new(&cores(&[0]), &cap),
            Err(RmidmonError::ConfigError(_))
        ));
    }

    #[test]
    fn test_descending_allocation_never_returns_rmid0() {
        let cap = capability(4, &[(MonEvent::LlcOccupancy, 4)]);
        let mut pool = RmidPool::new(&cores(&[0]), &cap).unwrap();

        assert_eq!(pool.allocate(0, MonEvent::LlcOccupancy, &cap).unwrap(), 3);
        assert_eq!(pool.allocate(0, MonEvent::LlcOccupancy, &cap).unwrap(), 2);
        assert_eq!(pool.allocate(0, MonEvent::LlcOccupancy, &cap).unwrap(), 1);
        assert!(matches!(
            pool.allocate(0, MonEvent::LlcOccupancy, &cap),
            Err(RmidmonError::ResourceExhausted(_))
        ));
        assert_eq!(pool.state(0, 0), Some(RmidState::Unavailable));
    }

    #[test]
    fn test_free_then_allocate_returns_same_rmid() {
        let cap = capability(16, &[(MonEvent::LlcOccupancy, 16)]);
        let mut pool = RmidPool::new(&cores(&[0]), &cap).unwrap();

        let first = pool.allocate(0, MonEvent::LlcOccupancy, &cap).unwrap();
        pool.free(0, first).unwrap();
        assert_eq!(pool.allocate(0, MonEvent::LlcOccupancy, &cap).unwrap(), first);
    }

    #[test]
    fn test_double_free_is_invalid_state() {
        let cap = capability(4, &[(MonEvent::LlcOccupancy, 4)]);
        let mut pool = RmidPool::new(&cores(&[0]), &cap).unwrap();

        let rmid = pool.allocate(0, MonEvent::LlcOccupancy, &cap).unwrap();
        pool.free(0, rmid).unwrap();
        assert!(matches!(pool.free(0, rmid), Err(RmidmonError::InvalidState(_))));
        assert!(matches!(pool.free(0, RMID0), Err(RmidmonError::InvalidState(_))));
        assert!(matches!(pool.free(0, 4), Err(RmidmonError::ParamError(_))));
        assert!(matches!(pool.free(1, 1), Err(RmidmonError::ParamError(_))));
    }

    #[test]
    fn test_event_ceiling_narrower_than_table() {
        let cap = capability(
            8,
            &[(MonEvent::LlcOccupancy, 8), (MonEvent::LocalMemBandwidth, 3)],
        );
        let mut pool = RmidPool::new(&cores(&[0]), &cap).unwrap();

        assert_eq!(pool.allocate(0, MonEvent::LocalMemBandwidth, &cap).unwrap(), 2);
        assert_eq!(pool.allocate(0, MonEvent::LlcOccupancy, &cap).unwrap(), 7);
        assert_eq!(pool.allocate(0, MonEvent::LocalMemBandwidth, &cap).unwrap(), 1);
        assert!(matches!(
            pool.allocate(0, MonEvent::LocalMemBandwidth, &cap),
            Err(RmidmonError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_unknown_event_and_cluster() {
        let cap = capability(4, &[(MonEvent::LlcOccupancy, 4)]);
        let mut pool = RmidPool::new(&cores(&[0]), &cap).unwrap();

        assert!(matches!(
            pool.allocate(0, MonEvent::TotalMemBandwidth, &cap),
            Err(RmidmonError::NotFound(_))
        ));
        assert!(matches!(
            pool.allocate(5, MonEvent::LlcOccupancy, &cap),
            Err(RmidmonError::ParamError(_))
        ));
    }

    #[test]
    fn test_quarantined_rmid_is_skipped() {
        let cap = capability(4, &[(MonEvent::LlcOccupancy, 4)]);
        let mut pool = RmidPool::new(&cores(&[0]), &cap).unwrap();

        pool.quarantine(0, 3).unwrap();
        assert_eq!(pool.allocate(0, MonEvent::LlcOccupancy, &cap).unwrap(), 2);
        assert!(matches!(pool.free(0, 3), Err(RmidmonError::InvalidState(_))));
        assert!(pool.quarantine(0, 9).is_err());
    }
}
