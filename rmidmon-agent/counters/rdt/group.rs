// Monitoring groups and the arena that owns them

use crate::counters::rdt::{MonEvent, Rmid};

/// Handle to a live monitoring group
///
/// The generation makes handles of stopped groups stale even after their
/// slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId {
    index: u32,
    generation: u32,
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group{}.{}", self.index, self.generation)
    }
}

/// One monitoring session: cores sharing an RMID and an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorGroup {
    /// Member cores, first one is used for counter reads
    pub cores: Vec<u32>,
    pub event: MonEvent,
    pub rmid: Rmid,
    pub cluster: u32,
    pub socket: u32,
    /// Last polled counter value, in scale factor units
    pub value: u64,
    pub context: Option<String>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    group: Option<MonitorGroup>,
}

#[derive(Debug, Default)]
pub struct GroupArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl GroupArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group: MonitorGroup) -> GroupId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.group = Some(group);
        GroupId {
            index,
            generation: slot.generation,
        }
    }

    fn slot(&self, id: GroupId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    pub fn get(&self, id: GroupId) -> Option<&MonitorGroup> {
        self.slot(id).and_then(|slot| slot.group.as_ref())
    }

    pub fn get_mut(&mut self, id: GroupId) -> Option<&mut MonitorGroup> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.group.as_mut())
    }

    pub fn remove(&mut self, id: GroupId) -> Option<MonitorGroup> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let group = slot.group.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(group)
    }

    pub fn ids(&self) -> Vec<GroupId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.group.is_some())
            .map(|(index, slot)| GroupId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.group.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(core: u32, rmid: Rmid) -> MonitorGroup {
        MonitorGroup {
            cores: vec![core],
            event: MonEvent::LlcOccupancy,
            rmid,
            cluster: 0,
            socket: 0,
            value: 0,
            context: None,
        }
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut arena = GroupArena::new();
        let a = arena.insert(group(0, 3));
        assert_eq!(arena.remove(a).map(|g| g.rmid), Some(3));
        assert!(arena.remove(a).is_none());

        let b = arena.insert(group(1, 2));
        assert_ne!(a, b);
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b).map(|g| g.cores[0]), Some(1));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_ids_lists_live_groups() {
        let mut arena = GroupArena::new();
        let a = arena.insert(group(0, 3));
        let b = arena.insert(group(1, 2));
        arena.remove(a);
        assert_eq!(arena.ids(), vec![b]);

        arena.get_mut(b).unwrap().value = 10;
        assert_eq!(arena.get(b).unwrap().value, 10);
        arena.remove(b);
        assert!(arena.is_empty());
    }
}
