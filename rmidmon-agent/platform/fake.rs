// In-memory register file for tests

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

use rmidmon_raw::rdt::{msr, PqrAssoc, QmEventSelect};
use rmidmon_raw::{CpuidRegs, RegisterLayout};

use crate::error::{Result, RmidmonError};
use crate::platform::RegisterAccess;

#[derive(Default)]
struct FakeState {
    regs: HashMap<(u32, u64), u64>,
    cpuid: HashMap<(u32, u32), CpuidRegs>,
    // Raw IA32_QM_CTR values per RMID; the last one repeats
    counters: HashMap<u32, VecDeque<u64>>,
    failing_reads: HashSet<(u32, u64)>,
    failing_writes: HashSet<(u32, u64)>,
    counter_reads: usize,
}

/// Register file that models the association, event select and counter
/// registers. Unset registers read as zero.
#[derive(Default)]
pub struct FakeRegisters {
    state: Mutex<FakeState>,
}

impl FakeRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, core: u32, reg: u64, value: u64) {
        self.state.lock().regs.insert((core, reg), value);
    }

    pub fn get(&self, core: u32, reg: u64) -> u64 {
        self.state.lock().regs.get(&(core, reg)).copied().unwrap_or(0)
    }

    pub fn assoc_rmid(&self, core: u32) -> u32 {
        PqrAssoc::from_msr_value(self.get(core, msr::IA32_PQR_ASSOC)).rmid
    }

    pub fn set_assoc_rmid(&self, core: u32, rmid: u32) {
        self.set(core, msr::IA32_PQR_ASSOC, u64::from(rmid));
    }

    pub fn set_cpuid(&self, leaf: u32, subleaf: u32, regs: CpuidRegs) {
        self.state.lock().cpuid.insert((leaf, subleaf), regs);
    }

    pub fn set_counter(&self, rmid: u32, values: &[u64]) {
        self.state
            .lock()
            .counters
            .insert(rmid, values.iter().copied().collect());
    }

    pub fn fail_read(&self, core: u32, reg: u64) {
        self.state.lock().failing_reads.insert((core, reg));
    }

    pub fn fail_write(&self, core: u32, reg: u64) {
        self.state.lock().failing_writes.insert((core, reg));
    }

    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.failing_reads.clear();
        state.failing_writes.clear();
    }

    pub fn counter_reads(&self) -> usize {
        self.state.lock().counter_reads
    }
}

fn injected(core: u32, reg: u64) -> RmidmonError {
    RmidmonError::HardwareError(format!("injected failure on CPU {core} MSR 0x{reg:X}"))
}

impl RegisterAccess for FakeRegisters {
    fn read_id(&self, _core: u32, leaf: u32, subleaf: u32) -> Result<CpuidRegs> {
        Ok(self
            .state
            .lock()
            .cpuid
            .get(&(leaf, subleaf))
            .copied()
            .unwrap_or_default())
    }

    fn read_register(&self, core: u32, reg: u64) -> Result<u64> {
        let mut state = self.state.lock();
        if state.failing_reads.contains(&(core, reg)) {
            return Err(injected(core, reg));
        }

        if reg != msr::IA32_QM_CTR {
            return Ok(state.regs.get(&(core, reg)).copied().unwrap_or(0));
        }

        state.counter_reads += 1;
        let evtsel = state
            .regs
            .get(&(core, msr::IA32_QM_EVTSEL))
            .copied()
            .unwrap_or(0);
        let rmid = QmEventSelect::from_msr_value(evtsel).rmid;
        let value = match state.counters.get_mut(&rmid) {
            Some(values) if values.len() > 1 => values.pop_front().unwrap_or(0),
            Some(values) => values.front().copied().unwrap_or(0),
            None => 0,
        };
        Ok(value)
    }

    fn write_register(&self, core: u32, reg: u64, value: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_writes.contains(&(core, reg)) {
            return Err(injected(core, reg));
        }
        state.regs.insert((core, reg), value);
        Ok(())
    }
}
