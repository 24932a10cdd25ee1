use super::cache::block::State;
use super::cache::L1Kind;
use super::dram::FrfcfsScheduler;
use super::mem::MainMemory;
use super::mem_fetch::{AccessKind, MemFetch};
use super::address;

/// Stages of an outstanding L2 miss.
///
/// ```text
/// WAITING_SEND --(send delay)--> WAITING_DRAM --(dram)--> WAITING_FILL
///     --(fill delay)--> READY --(consumed by the L2)--> freed
/// ```
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Status {
    WAITING_SEND,
    WAITING_DRAM,
    WAITING_FILL,
    READY,
}

/// Wake-up token of one pipeline slot blocked on this miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub core_id: usize,
    pub kind: L1Kind,
    pub is_write: bool,
    pub target_state: State,
}

/// Miss status holding register.
#[derive(Debug, Clone)]
pub struct Entry {
    pub valid: bool,
    pub line_addr: address,
    pub status: Status,
    pub is_write: bool,
    pub is_inst_fetch: bool,
    pub alloc_cycle: u64,
    pub completion_cycle: u64,
    /// line buffer, filled from the backing store when the fill delay expires
    pub data: Vec<u8>,
    pub waiters: Vec<Waiter>,
}

impl Entry {
    fn empty(line_size: usize) -> Self {
        Self {
            valid: false,
            line_addr: 0,
            status: Status::WAITING_SEND,
            is_write: false,
            is_inst_fetch: false,
            alloc_cycle: 0,
            completion_cycle: 0,
            data: vec![0; line_size],
            waiters: Vec::new(),
        }
    }
}

/// Fixed-size table of miss status holding registers, owned by the L2.
///
/// The two 5-cycle transfer delays around DRAM (L2->DRAM send, DRAM->L2
/// fill) are the `WAITING_SEND` and `WAITING_FILL` stages of the entries.
#[derive(Debug)]
pub struct Table {
    entries: Vec<Entry>,
    line_size: usize,
    send_latency: u64,
    fill_latency: u64,
    /// most entries valid at once, reported with the final statistics
    pub high_water: usize,
}

impl Table {
    #[must_use]
    pub fn new(num_entries: usize, line_size: usize, send_latency: u64, fill_latency: u64) -> Self {
        let entries = (0..num_entries).map(|_| Entry::empty(line_size)).collect();
        Self {
            entries,
            line_size,
            send_latency,
            fill_latency,
            high_water: 0,
        }
    }

    #[must_use]
    pub fn num_valid(&self) -> usize {
        self.entries.iter().filter(|entry| entry.valid).count()
    }

    #[must_use]
    pub fn has_free(&self) -> bool {
        self.entries.iter().any(|entry| !entry.valid)
    }

    /// Index of the valid entry covering `line_addr`, if any.
    #[must_use]
    pub fn find(&self, line_addr: address) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.valid && entry.line_addr == line_addr)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> &Entry {
        &self.entries[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|entry| entry.valid)
    }

    /// Allocate a new entry.
    ///
    /// Succeeds iff a free slot exists and no valid entry already covers the
    /// line; the caller must have tried [`Table::coalesce`] first.
    pub fn allocate(
        &mut self,
        line_addr: address,
        is_write: bool,
        is_inst_fetch: bool,
        waiter: Waiter,
        cycle: u64,
    ) -> Option<usize> {
        if self.find(line_addr).is_some() {
            return None;
        }
        let index = self.entries.iter().position(|entry| !entry.valid)?;
        let entry = &mut self.entries[index];
        entry.valid = true;
        entry.line_addr = line_addr;
        entry.status = Status::WAITING_SEND;
        entry.is_write = is_write;
        entry.is_inst_fetch = is_inst_fetch;
        entry.alloc_cycle = cycle;
        entry.completion_cycle = 0;
        entry.data.fill(0);
        entry.waiters.clear();
        entry.waiters.push(waiter);
        self.high_water = self.high_water.max(self.num_valid());
        log::debug!(
            "mshr::allocate([{index}] {line_addr:#010x}, write={is_write}, fetch={is_inst_fetch}, cycle={cycle})"
        );
        Some(index)
    }

    /// Attach a waiter to an outstanding miss for the same line.
    pub fn coalesce(&mut self, line_addr: address, waiter: Waiter) -> Option<usize> {
        let index = self.find(line_addr)?;
        let entry = &mut self.entries[index];
        if entry.status == Status::READY {
            // terminal: the fill is being consumed this cycle
            return None;
        }
        entry.waiters.push(waiter);
        log::debug!(
            "mshr::coalesce([{index}] {line_addr:#010x}, waiters={})",
            entry.waiters.len()
        );
        Some(index)
    }

    /// Advance the staged timers: send due requests to DRAM, complete due
    /// fills from the backing store.
    pub fn cycle(&mut self, cycle: u64, dram: &mut FrfcfsScheduler, mem: &MainMemory) {
        for entry in &mut self.entries {
            if !entry.valid {
                continue;
            }
            match entry.status {
                Status::WAITING_SEND => {
                    if cycle >= entry.alloc_cycle + self.send_latency {
                        let kind = if entry.is_inst_fetch {
                            AccessKind::INST_ACC_R
                        } else if entry.is_write {
                            AccessKind::DATA_ACC_W
                        } else {
                            AccessKind::DATA_ACC_R
                        };
                        let core_id = entry.waiters.first().map(|waiter| waiter.core_id);
                        dram.enqueue(MemFetch::new(entry.line_addr, kind, core_id), cycle);
                        entry.status = Status::WAITING_DRAM;
                    }
                }
                // waiting for the on_dram_complete callback
                Status::WAITING_DRAM => {}
                Status::WAITING_FILL => {
                    // a stale completion cycle completes as soon as observed
                    if cycle >= entry.completion_cycle {
                        let line = mem.read_line(entry.line_addr, self.line_size);
                        entry.data.copy_from_slice(&line);
                        entry.status = Status::READY;
                        log::debug!(
                            "mshr::ready({:#010x}, cycle={cycle}, waiters={})",
                            entry.line_addr,
                            entry.waiters.len()
                        );
                    }
                }
                Status::READY => {}
            }
        }
    }

    /// DRAM finished the transfer for `line_addr`.
    pub fn on_dram_complete(&mut self, line_addr: address, cycle: u64) {
        for entry in &mut self.entries {
            if entry.valid
                && entry.line_addr == line_addr
                && entry.status == Status::WAITING_DRAM
            {
                entry.status = Status::WAITING_FILL;
                entry.completion_cycle = cycle + self.fill_latency;
            }
        }
    }

    /// Take the first `READY` entry out of the table.
    pub fn pop_ready(&mut self) -> Option<Entry> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.valid && entry.status == Status::READY)?;
        let empty = Entry::empty(self.line_size);
        Some(std::mem::replace(&mut self.entries[index], empty))
    }

    /// Drop an entry; attached waiters that have not consumed the fill are
    /// dropped with it.
    pub fn free(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        entry.valid = false;
        entry.waiters.clear();
    }

    /// Detach a squashed pipeline slot. The entry itself stays valid: the
    /// in-flight DRAM request is not cancelled and still retires.
    pub fn remove_waiter(&mut self, core_id: usize, kind: L1Kind) {
        for entry in &mut self.entries {
            if entry.valid {
                entry
                    .waiters
                    .retain(|waiter| !(waiter.core_id == core_id && waiter.kind == kind));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Status, Table, Waiter};
    use crate::cache::block::State;
    use crate::cache::L1Kind;
    use crate::config::DramConfig;
    use crate::dram::FrfcfsScheduler;
    use crate::mem::{MainMemory, DATA_BASE};

    fn waiter(core_id: usize) -> Waiter {
        Waiter {
            core_id,
            kind: L1Kind::Data,
            is_write: false,
            target_state: State::EXCLUSIVE,
        }
    }

    fn table() -> Table {
        Table::new(4, 32, 5, 5)
    }

    #[test]
    fn a_line_never_has_two_entries() {
        let mut mshrs = table();
        assert!(mshrs.allocate(DATA_BASE, false, false, waiter(0), 0).is_some());
        assert!(mshrs.allocate(DATA_BASE, false, false, waiter(1), 0).is_none());
        assert_eq!(mshrs.num_valid(), 1);
    }

    #[test]
    fn allocate_fails_when_full() {
        let mut mshrs = table();
        for i in 0..4u32 {
            let addr = DATA_BASE + i * 32;
            assert!(mshrs.allocate(addr, false, false, waiter(0), 0).is_some());
        }
        assert!(!mshrs.has_free());
        assert!(mshrs
            .allocate(DATA_BASE + 4 * 32, false, false, waiter(0), 0)
            .is_none());
        // coalescing still works when the table is full
        assert!(mshrs.coalesce(DATA_BASE, waiter(1)).is_some());
    }

    #[test]
    fn staged_state_machine_timing() {
        let mut mshrs = table();
        let mut dram = FrfcfsScheduler::new(DramConfig::default());
        let mem = MainMemory::new();

        let index = mshrs.allocate(DATA_BASE, false, false, waiter(0), 0).unwrap();
        for cycle in 1..5 {
            mshrs.cycle(cycle, &mut dram, &mem);
            assert_eq!(mshrs.get(index).status, Status::WAITING_SEND);
            assert_eq!(dram.num_pending(), 0);
        }
        // send delay expires: the request is enqueued at DRAM
        mshrs.cycle(5, &mut dram, &mem);
        assert_eq!(mshrs.get(index).status, Status::WAITING_DRAM);
        assert_eq!(dram.num_pending(), 1);

        mshrs.on_dram_complete(DATA_BASE, 255);
        assert_eq!(mshrs.get(index).status, Status::WAITING_FILL);
        assert_eq!(mshrs.get(index).completion_cycle, 260);

        mshrs.cycle(259, &mut dram, &mem);
        assert_eq!(mshrs.get(index).status, Status::WAITING_FILL);
        mshrs.cycle(260, &mut dram, &mem);
        assert_eq!(mshrs.get(index).status, Status::READY);

        let entry = mshrs.pop_ready().unwrap();
        assert_eq!(entry.line_addr, DATA_BASE);
        assert_eq!(entry.waiters.len(), 1);
        assert_eq!(mshrs.num_valid(), 0);
    }

    #[test]
    fn ready_entries_hold_the_backing_store_line() {
        let mut mshrs = table();
        let mut dram = FrfcfsScheduler::new(DramConfig::default());
        let mut mem = MainMemory::new();
        mem.write_u32(DATA_BASE + 4, 0xcafe_f00d);

        mshrs.allocate(DATA_BASE, false, false, waiter(0), 0).unwrap();
        mshrs.cycle(5, &mut dram, &mem);
        mshrs.on_dram_complete(DATA_BASE, 100);
        mshrs.cycle(105, &mut dram, &mem);
        let entry = mshrs.pop_ready().unwrap();
        assert_eq!(
            u32::from_le_bytes(entry.data[4..8].try_into().unwrap()),
            0xcafe_f00d
        );
    }

    #[test]
    fn stale_pending_fills_complete_when_observed() {
        let mut mshrs = table();
        let mut dram = FrfcfsScheduler::new(DramConfig::default());
        let mem = MainMemory::new();
        mshrs.allocate(DATA_BASE, false, false, waiter(0), 0).unwrap();
        mshrs.cycle(5, &mut dram, &mem);
        mshrs.on_dram_complete(DATA_BASE, 50);
        // far in the future: completion_cycle is long past
        mshrs.cycle(1000, &mut dram, &mem);
        assert!(mshrs.pop_ready().is_some());
    }

    #[test]
    fn squash_detaches_the_waiter_but_keeps_the_entry() {
        let mut mshrs = table();
        let index = mshrs.allocate(DATA_BASE, false, true, waiter(0), 0).unwrap();
        mshrs.coalesce(DATA_BASE, waiter(1)).unwrap();
        mshrs.remove_waiter(0, L1Kind::Data);
        assert!(mshrs.get(index).valid);
        assert_eq!(mshrs.get(index).waiters.len(), 1);
        assert_eq!(mshrs.get(index).waiters[0].core_id, 1);
    }

    #[test]
    fn free_drops_waiters() {
        let mut mshrs = table();
        let index = mshrs.allocate(DATA_BASE, false, false, waiter(0), 0).unwrap();
        mshrs.free(index);
        assert_eq!(mshrs.num_valid(), 0);
        assert!(mshrs.find(DATA_BASE).is_none());
    }
}
