use super::address;
use super::cache::block::State;
use super::cache::l1::WriteProbe;
use super::cache::{L1Cache, L1Kind, L2Cache, RequestStatus};
use super::config::{Config, InclusionPolicy};
use super::dram::FrfcfsScheduler;
use super::mem::MainMemory;
use super::mem_fetch::{AccessKind, MemFetch};
use super::mshr;
use super::tag_array::EvictedBlockInfo;
use console::style;

/// Answer to a pipeline-side access.
///
/// The pipeline owns the retry loop: on `Pending` it leaves its stage
/// unchanged and re-issues the same access next cycle. `MissWithPenalty`
/// additionally reports the known latency of an L2 or snoop hit, for stages
/// that count down instead of polling. A stage that abandons its access
/// (branch recovery, syscall halt) must call [`Simulator::free_pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Hit { word: u32 },
    Pending,
    MissWithPenalty { word: u32, cycles: u64 },
}

/// One core's private split L1.
#[derive(Debug)]
pub struct Core {
    pub icache: L1Cache,
    pub dcache: L1Cache,
}

impl Core {
    #[must_use]
    pub fn cache(&self, kind: L1Kind) -> &L1Cache {
        match kind {
            L1Kind::Instr => &self.icache,
            L1Kind::Data => &self.dcache,
        }
    }

    pub fn cache_mut(&mut self, kind: L1Kind) -> &mut L1Cache {
        match kind {
            L1Kind::Instr => &mut self.icache,
            L1Kind::Data => &mut self.dcache,
        }
    }
}

struct SnoopOutcome {
    found: bool,
    /// one of the surfaced copies (they are all identical under MESI)
    data: Option<Vec<u8>>,
}

/// The simulator root: every core's L1s, the shared L2, the DRAM controller
/// and the flat backing store, advanced in lockstep one cycle at a time.
///
/// Sub-tick order within [`Simulator::tick`]: DRAM retire, DRAM schedule,
/// MSHR timers, L2 fills and L1 notifications. Pipeline stages issue their
/// accesses afterwards, so a fill always unblocks its waiter in the same
/// cycle it becomes ready, while a freshly armed miss only starts its timers
/// on the next tick.
#[derive(Debug)]
pub struct Simulator {
    pub config: Config,
    pub cores: Vec<Core>,
    pub l2: L2Cache,
    pub dram: FrfcfsScheduler,
    pub mem: MainMemory,
    cycle: u64,
    sim_stats: stats::Sim,
}

impl Simulator {
    #[must_use]
    pub fn new(config: Config) -> Self {
        config.validate();
        let cores = (0..config.num_cores)
            .map(|core_id| Core {
                icache: L1Cache::new(
                    format!("core{core_id}-{}", style("L1I").blue()),
                    core_id,
                    L1Kind::Instr,
                    config.inst_cache_l1.clone(),
                ),
                dcache: L1Cache::new(
                    format!("core{core_id}-{}", style("L1D").blue()),
                    core_id,
                    L1Kind::Data,
                    config.data_cache_l1.clone(),
                ),
            })
            .collect();
        let l2 = L2Cache::new(&config);
        let dram = FrfcfsScheduler::new(config.dram.clone());
        Self {
            config,
            cores,
            l2,
            dram,
            mem: MainMemory::new(),
            cycle: 0,
            sim_stats: stats::Sim::default(),
        }
    }

    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Advance the whole hierarchy by one cycle.
    pub fn tick(&mut self) {
        self.cycle += 1;
        let cycle = self.cycle;
        self.sim_stats.cycles = cycle;

        // 1. DRAM retires finished transfers and schedules one new request;
        //    completions reach the MSHRs in the same cycle
        let completed = self.dram.cycle(cycle);
        for fetch in completed {
            if !fetch.kind.is_writeback() {
                self.l2.mshrs.on_dram_complete(fetch.addr, cycle);
            }
        }

        // 2. staged MSHR timers: due sends go to DRAM, due fills pull their
        //    line from the backing store
        self.l2.mshrs.cycle(cycle, &mut self.dram, &self.mem);

        // 3. ready MSHRs install into the L2 and wake all coalesced waiters
        while let Some(entry) = self.l2.mshrs.pop_ready() {
            self.complete_fill(entry, cycle);
        }
    }

    /// Instruction fetch through the core's L1I.
    pub fn fetch(&mut self, core_id: usize, pc: address) -> Reply {
        let reply = self.access(core_id, L1Kind::Instr, pc, false, None);
        if matches!(reply, Reply::Hit { .. }) {
            self.sim_stats.fetches += 1;
        }
        reply
    }

    /// Load through the core's L1D.
    pub fn load(&mut self, core_id: usize, addr: address) -> Reply {
        let reply = self.access(core_id, L1Kind::Data, addr, false, None);
        if matches!(reply, Reply::Hit { .. }) {
            self.sim_stats.loads += 1;
        }
        reply
    }

    /// Store through the core's L1D. The word write is applied to the L1
    /// line once the line is resident, so the stored value is observable by
    /// any subsequent load.
    pub fn store(&mut self, core_id: usize, addr: address, value: u32) -> Reply {
        let reply = self.access(core_id, L1Kind::Data, addr, true, Some(value));
        if matches!(reply, Reply::Hit { .. }) {
            self.sim_stats.stores += 1;
        }
        reply
    }

    /// Squash support: drop the pending slot of a flushed pipeline stage.
    ///
    /// The in-flight DRAM request (if any) is not cancelled; its eventual
    /// fill simply finds one waiter less. A dirty line captured from an
    /// exclusive L2 must not vanish with the squash, so it is flushed here.
    pub fn free_pending(&mut self, core_id: usize, kind: L1Kind) {
        let l1 = self.cores[core_id].cache_mut(kind);
        if !l1.pending.valid {
            return;
        }
        let waiting_on_mshr = l1.pending.ready_cycle.is_none();
        if l1.pending.mark_dirty {
            let line_addr = l1.pending.line_addr;
            let data = std::mem::take(&mut l1.pending.data);
            self.mem.write_line(line_addr, &data);
            self.dram
                .enqueue(MemFetch::new(line_addr, AccessKind::L1_WRBK_ACC, None), self.cycle);
        }
        self.cores[core_id].cache_mut(kind).clear_pending();
        if waiting_on_mshr {
            self.l2.mshrs.remove_waiter(core_id, kind);
        }
        self.sim_stats.squashes += 1;
        log::debug!("sim::free_pending(core={core_id}, {kind:?})");
    }

    #[must_use]
    pub fn stats(&self) -> stats::Stats {
        let mut all = stats::Stats::new(self.config.num_cores, self.config.dram.num_banks);
        all.sim = self.sim_stats.clone();
        all.sim.mshr_high_water = self.l2.mshrs.high_water as u64;
        all.dram = self.dram.stats.clone();
        all.l2_stats = self.l2.stats.clone();
        for (core_id, core) in self.cores.iter().enumerate() {
            all.l1i_stats[core_id] = core.icache.stats.clone();
            all.l1d_stats[core_id] = core.dcache.stats.clone();
        }
        all
    }

    fn word_of(data: &[u8], addr: address, line_size: usize) -> u32 {
        let offset = (addr as usize & (line_size - 1)) & !3;
        u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
    }

    fn access(
        &mut self,
        core_id: usize,
        kind: L1Kind,
        addr: address,
        is_write: bool,
        value: Option<u32>,
    ) -> Reply {
        let cycle = self.cycle;
        let stat_kind = match (kind, is_write) {
            (L1Kind::Instr, _) => stats::cache::AccessKind::INST_ACC_R,
            (L1Kind::Data, true) => stats::cache::AccessKind::DATA_ACC_W,
            (L1Kind::Data, false) => stats::cache::AccessKind::DATA_ACC_R,
        };

        // 1. the blocking pending slot
        {
            let l1 = self.cores[core_id].cache_mut(kind);
            if l1.pending.valid {
                if !l1.pending_covers(addr) {
                    self.sim_stats.stalled += 1;
                    return Reply::Pending;
                }
                match l1.pending.ready_cycle {
                    Some(ready) if cycle >= ready => {
                        let line_addr = l1.pending.line_addr;
                        let target = l1.pending.target_state;
                        let mark_dirty = l1.pending.mark_dirty;
                        let data = std::mem::take(&mut l1.pending.data);
                        l1.clear_pending();
                        let evicted = self.cores[core_id].cache_mut(kind).fill(
                            line_addr, &data, target, mark_dirty, cycle,
                        );
                        if let Some(victim) = evicted {
                            self.route_l1_eviction(core_id, kind, victim, cycle);
                        }
                        // fall through: the access hits now
                    }
                    _ => {
                        self.sim_stats.stalled += 1;
                        return Reply::Pending;
                    }
                }
            }
        }

        // 2. local tag probe
        {
            let l1 = self.cores[core_id].cache_mut(kind);
            if is_write {
                let value = value.expect("store without a value");
                if l1.write_probe(addr, value, cycle) == WriteProbe::Hit {
                    l1.stats.inc(stat_kind, RequestStatus::HIT.into(), 1);
                    return Reply::Hit { word: value };
                }
            } else if let Some(word) = l1.read_hit(addr, cycle) {
                l1.stats.inc(stat_kind, RequestStatus::HIT.into(), 1);
                return Reply::Hit { word };
            }
        }

        let line_addr = self.cores[core_id].cache(kind).line_addr(addr);
        let line_size = self.config.line_size();

        // 3. a conflicting pending write in another core blocks us
        if self.pending_conflict(core_id, line_addr, is_write) {
            self.sim_stats.stalled += 1;
            return Reply::Pending;
        }

        // 4. cross-L1 snoop
        if self.config.num_cores > 1 {
            let outcome = self.snoop_peers(core_id, line_addr, is_write, cycle);
            if outcome.found {
                let target = if is_write {
                    State::MODIFIED
                } else {
                    State::SHARED
                };
                let data = outcome.data.expect("snoop hit carries the line");
                let ready = cycle + self.config.l1_transfer_latency;
                let word = value.unwrap_or_else(|| Self::word_of(&data, addr, line_size));
                let l1 = self.cores[core_id].cache_mut(kind);
                l1.stats.inc(stat_kind, RequestStatus::MISS.into(), 1);
                l1.arm_pending(line_addr, is_write, Some(ready), target, false, data);
                return Reply::MissWithPenalty {
                    word,
                    cycles: self.config.l1_transfer_latency,
                };
            }
        }

        // 5./6. the shared L2: hit, coalesce, allocate or stall
        let target = if is_write {
            State::MODIFIED
        } else {
            State::EXCLUSIVE
        };
        let waiter = mshr::Waiter {
            core_id,
            kind,
            is_write,
            target_state: target,
        };
        match self
            .l2
            .access(addr, is_write, kind.is_instr(), waiter, cycle)
        {
            super::cache::l2::Access::Hit { data, was_dirty } => {
                let latency = self.config.l1_transfer_latency + self.config.l2_hit_latency;
                let ready = cycle + latency;
                let word = value.unwrap_or_else(|| Self::word_of(&data, addr, line_size));
                let l1 = self.cores[core_id].cache_mut(kind);
                l1.stats.inc(stat_kind, RequestStatus::MISS.into(), 1);
                l1.arm_pending(line_addr, is_write, Some(ready), target, was_dirty, data);
                Reply::MissWithPenalty {
                    word,
                    cycles: latency,
                }
            }
            super::cache::l2::Access::Miss { .. } => {
                let l1 = self.cores[core_id].cache_mut(kind);
                l1.stats.inc(stat_kind, RequestStatus::MISS.into(), 1);
                l1.arm_pending(line_addr, is_write, None, target, false, vec![0; line_size]);
                self.sim_stats.stalled += 1;
                Reply::Pending
            }
            super::cache::l2::Access::Busy => {
                let l1 = self.cores[core_id].cache_mut(kind);
                l1.stats.inc(stat_kind, RequestStatus::RESERVATION_FAIL.into(), 1);
                self.sim_stats.stalled += 1;
                Reply::Pending
            }
        }
    }

    /// Does another core hold a conflicting pending access to this line?
    fn pending_conflict(&self, requester: usize, line_addr: address, is_write: bool) -> bool {
        self.cores.iter().enumerate().any(|(core_id, core)| {
            core_id != requester
                && [&core.icache, &core.dcache].into_iter().any(|l1| {
                    l1.pending.valid
                        && l1.pending.line_addr == line_addr
                        && (l1.pending.is_write || is_write)
                })
        })
    }

    fn any_other_l1_holds(&self, requester: usize, line_addr: address) -> bool {
        self.cores.iter().enumerate().any(|(core_id, core)| {
            core_id != requester
                && (core.icache.holds(line_addr) || core.dcache.holds(line_addr))
        })
    }

    /// Probe every other core's L1s. Writes invalidate the peers, reads
    /// downgrade them to `SHARED`; a surfaced dirty copy is written to DRAM
    /// at the current cycle, bypassing the L2.
    fn snoop_peers(
        &mut self,
        requester: usize,
        line_addr: address,
        is_write: bool,
        cycle: u64,
    ) -> SnoopOutcome {
        let mut found = false;
        let mut data = None;
        let mut flush = false;
        for core_id in 0..self.cores.len() {
            if core_id == requester {
                continue;
            }
            for kind in [L1Kind::Instr, L1Kind::Data] {
                let l1 = self.cores[core_id].cache_mut(kind);
                if let Some(reply) = l1.probe_coherence(line_addr, is_write) {
                    found = true;
                    flush |= reply.dirty;
                    data = Some(reply.data);
                }
            }
        }
        if flush {
            let line = data.as_ref().unwrap();
            self.mem.write_line(line_addr, line);
            self.dram
                .enqueue(MemFetch::new(line_addr, AccessKind::L1_WRBK_ACC, None), cycle);
        }
        SnoopOutcome { found, data }
    }

    /// A ready MSHR delivers its line: the L2 installs it (unless running
    /// exclusive) and every coalesced waiter is filled in the same cycle.
    fn complete_fill(&mut self, entry: mshr::Entry, cycle: u64) {
        log::debug!(
            "sim::complete_fill({:#010x}, waiters={}, cycle={cycle})",
            entry.line_addr,
            entry.waiters.len()
        );
        if self.config.l2_inclusion_policy != InclusionPolicy::EXCLUSIVE {
            if let Some(victim) = self.l2.install_fill(entry.line_addr, &entry.data, cycle) {
                self.handle_l2_eviction(victim, cycle);
            }
        }
        for waiter in &entry.waiters {
            self.notify_waiter(waiter, entry.line_addr, &entry.data, cycle);
        }
    }

    fn notify_waiter(
        &mut self,
        waiter: &mshr::Waiter,
        line_addr: address,
        data: &[u8],
        cycle: u64,
    ) {
        // serialize coalesced waiters: writers invalidate every other copy,
        // readers join as sharers once a copy exists
        let mut target = waiter.target_state;
        if waiter.is_write {
            self.snoop_peers(waiter.core_id, line_addr, true, cycle);
        } else if self.any_other_l1_holds(waiter.core_id, line_addr) {
            self.snoop_peers(waiter.core_id, line_addr, false, cycle);
            target = State::SHARED;
        }

        let l1 = self.cores[waiter.core_id].cache_mut(waiter.kind);
        if l1.pending_covers(line_addr) {
            l1.clear_pending();
        }
        let evicted = l1.fill(line_addr, data, target, false, cycle);
        if let Some(victim) = evicted {
            self.route_l1_eviction(waiter.core_id, waiter.kind, victim, cycle);
        }
    }

    /// An L1 victim leaves the cache: dirty lines go to the L2 (never
    /// directly to DRAM); under an exclusive L2, clean victims move too.
    fn route_l1_eviction(
        &mut self,
        core_id: usize,
        kind: L1Kind,
        victim: EvictedBlockInfo,
        cycle: u64,
    ) {
        let exclusive = self.config.l2_inclusion_policy == InclusionPolicy::EXCLUSIVE;
        if !victim.modified && !exclusive {
            return;
        }
        self.cores[core_id].cache_mut(kind).stats.writebacks += 1;
        match self
            .l2
            .handle_l1_writeback(victim.block_addr, &victim.data, victim.modified, cycle)
        {
            super::cache::l2::WritebackOutcome::Updated => {}
            super::cache::l2::WritebackOutcome::Installed(Some(l2_victim)) => {
                self.handle_l2_eviction(l2_victim, cycle);
            }
            super::cache::l2::WritebackOutcome::Installed(None) => {}
            super::cache::l2::WritebackOutcome::Bypass => {
                if victim.modified {
                    self.mem.write_line(victim.block_addr, &victim.data);
                    self.dram.enqueue(
                        MemFetch::new(victim.block_addr, AccessKind::L1_WRBK_ACC, None),
                        cycle,
                    );
                }
            }
        }
    }

    /// An L2 victim leaves the cache: dirty data goes to DRAM, and an
    /// inclusive L2 back-invalidates every L1 copy (a modified L1 copy is
    /// written back to DRAM directly).
    fn handle_l2_eviction(&mut self, victim: EvictedBlockInfo, cycle: u64) {
        if victim.modified {
            self.l2.stats.writebacks += 1;
            self.mem.write_line(victim.block_addr, &victim.data);
            self.dram.enqueue(
                MemFetch::new(victim.block_addr, AccessKind::L2_WRBK_ACC, None),
                cycle,
            );
        }
        if self.config.l2_inclusion_policy != InclusionPolicy::INCLUSIVE {
            return;
        }
        for core_id in 0..self.cores.len() {
            for kind in [L1Kind::Instr, L1Kind::Data] {
                let dropped = self.cores[core_id]
                    .cache_mut(kind)
                    .invalidate(victim.block_addr);
                if let Some(dropped) = dropped {
                    self.cores[core_id].cache_mut(kind).stats.back_invalidations += 1;
                    log::debug!(
                        "sim::back_invalidate(core={core_id}, {kind:?}, {:#010x})",
                        victim.block_addr
                    );
                    if dropped.modified {
                        self.mem.write_line(victim.block_addr, &dropped.data);
                        self.dram.enqueue(
                            MemFetch::new(victim.block_addr, AccessKind::L1_WRBK_ACC, None),
                            cycle,
                        );
                    }
                }
            }
        }
    }

    /// Structural invariants of the whole hierarchy; exercised by tests
    /// after every cycle.
    pub fn assert_invariants(&self) {
        use std::collections::{HashMap, HashSet};

        // at most one valid MSHR per line
        let mut mshr_lines = HashSet::new();
        for entry in self.l2.mshrs.iter() {
            assert!(
                mshr_lines.insert(entry.line_addr),
                "two valid MSHRs for line {:#010x}",
                entry.line_addr
            );
        }

        // MESI: a modified line has exactly one holding core, an exclusive
        // line no other holding core. States aggregate per core: a core may
        // alias a line across its own I and D cache (self-modifying code
        // coherence is out of scope).
        let mut holders: HashMap<address, Vec<State>> = HashMap::new();
        for core in &self.cores {
            let mut per_core: HashMap<address, State> = HashMap::new();
            for l1 in [&core.icache, &core.dcache] {
                for line in l1.tag_array.lines.iter().filter(|line| line.is_valid()) {
                    let strongest = per_core.entry(line.block_addr).or_insert(line.state);
                    if (line.state as u8) > (*strongest as u8) {
                        *strongest = line.state;
                    }
                }
            }
            for (line_addr, state) in per_core {
                holders.entry(line_addr).or_default().push(state);
            }
        }
        for (line_addr, states) in &holders {
            let owners = states
                .iter()
                .filter(|state| matches!(state, State::MODIFIED | State::EXCLUSIVE))
                .count();
            assert!(
                owners <= 1,
                "line {line_addr:#010x} has {owners} exclusive owners"
            );
            if states.contains(&State::MODIFIED) {
                assert_eq!(
                    states.len(),
                    1,
                    "modified line {line_addr:#010x} has other copies"
                );
            }
        }

        match self.config.l2_inclusion_policy {
            InclusionPolicy::INCLUSIVE => {
                for line_addr in holders.keys() {
                    assert!(
                        self.l2.holds(*line_addr),
                        "inclusion violated for line {line_addr:#010x}"
                    );
                }
            }
            InclusionPolicy::EXCLUSIVE => {
                for line_addr in self.l2.tag_array.valid_block_addrs() {
                    assert!(
                        !holders.contains_key(&line_addr),
                        "exclusion violated for line {line_addr:#010x}"
                    );
                }
            }
            InclusionPolicy::NINE => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Reply, Simulator};
    use crate::cache::L1Kind;
    use pretty_assertions::assert_eq;
    use crate::config::{CacheConfig, Config, InclusionPolicy, ReplacementPolicy};
    use crate::mem::DATA_BASE;

    const MAX_CYCLES: u64 = 50_000;

    fn simulator(config: Config) -> Simulator {
        Simulator::new(config)
    }

    /// Re-issue `op` every cycle until it hits, like a stalled pipeline
    /// stage would; returns the word and the completion cycle.
    fn run_until_hit(
        sim: &mut Simulator,
        mut op: impl FnMut(&mut Simulator) -> Reply,
    ) -> (u32, u64) {
        loop {
            match op(sim) {
                Reply::Hit { word } => return (word, sim.cycle()),
                Reply::Pending | Reply::MissWithPenalty { .. } => {
                    assert!(sim.cycle() < MAX_CYCLES, "no forward progress");
                    sim.tick();
                    sim.assert_invariants();
                }
            }
        }
    }

    #[test]
    fn cold_load_fill_cycle_is_exact() {
        let mut sim = simulator(Config::default());
        sim.mem.write_u32(0x1000_0000, 0x1122_3344);
        // issue at cycle 0: alloc at 0, DRAM send at 5, schedule at 6
        // (row empty: ACT 6, RD 106, data 206..256), fill ready at 261
        let (word, done) = run_until_hit(&mut sim, |sim| sim.load(0, 0x1000_0000));
        assert_eq!(word, 0x1122_3344);
        assert_eq!(done, 261);
        assert_eq!(sim.dram.stats.row_empties, 1);
        assert_eq!(sim.dram.stats.retired, 1);
    }

    #[test]
    fn l2_hit_follow_on_takes_transfer_plus_hit_latency() {
        let mut sim = simulator(Config::default());
        sim.mem.write_u32(0x1000_0004, 77);
        // pull the line in through core 0's L1D
        run_until_hit(&mut sim, |sim| sim.load(0, 0x1000_0000));
        // the same line misses in the (cold) L1I but hits in the L2
        let start = sim.cycle();
        match sim.fetch(0, 0x1000_0004) {
            Reply::MissWithPenalty { word, cycles } => {
                assert_eq!(cycles, 20);
                assert_eq!(word, 77);
            }
            other => panic!("expected a known-latency L2 hit, got {other:?}"),
        }
        let (_, done) = run_until_hit(&mut sim, |sim| sim.fetch(0, 0x1000_0004));
        assert_eq!(done, start + 20);
    }

    #[test]
    fn same_line_loads_coalesce_into_one_dram_request() {
        let config = Config {
            num_cores: 2,
            ..Config::default()
        };
        let mut sim = simulator(config);
        assert_eq!(sim.load(0, 0x1000_0000), Reply::Pending);
        sim.tick();
        sim.tick();
        // second core joins the outstanding miss two cycles later
        assert_eq!(sim.load(1, 0x1000_0000), Reply::Pending);
        assert_eq!(sim.l2.mshrs.num_valid(), 1);

        let mut done = [0u64; 2];
        while done.contains(&0) {
            sim.tick();
            sim.assert_invariants();
            assert!(sim.cycle() < MAX_CYCLES, "no forward progress");
            for core in 0..2 {
                if done[core] == 0 {
                    if let Reply::Hit { .. } = sim.load(core, 0x1000_0000) {
                        done[core] = sim.cycle();
                    }
                }
            }
        }
        // both waiters unblock on the same fill
        assert_eq!(done[0], done[1]);
        assert_eq!(sim.dram.stats.retired, 1);
        assert_eq!(sim.dram.stats.total_reads(), 1);
    }

    #[test]
    fn squashed_fetch_frees_the_slot_without_leaks() {
        let mut sim = simulator(Config::default());
        assert_eq!(sim.fetch(0, 0x0040_0100), Reply::Pending);
        // run the miss into its DRAM phase
        for _ in 0..10 {
            sim.tick();
        }
        assert_eq!(sim.l2.mshrs.num_valid(), 1);
        assert_eq!(sim.dram.num_pending(), 1);

        // branch recovery squashes the fetch
        sim.free_pending(0, L1Kind::Instr);
        assert!(!sim.cores[0].icache.pending.valid);

        // the DRAM request still retires and the entry drains without a
        // waiter; nothing leaks and the hierarchy keeps making progress
        for _ in 0..500 {
            sim.tick();
            sim.assert_invariants();
        }
        assert_eq!(sim.l2.mshrs.num_valid(), 0);
        assert_eq!(sim.dram.stats.retired, 1);
        let (_, done) = run_until_hit(&mut sim, |sim| sim.fetch(0, 0x0040_0200));
        assert!(done < MAX_CYCLES);
    }

    #[test]
    fn store_through_miss_is_observable_after_fill() {
        let mut sim = simulator(Config::default());
        let addr = 0x1000_0040;
        let (word, _) = run_until_hit(&mut sim, |sim| sim.store(0, addr, 0xabcd_0123));
        assert_eq!(word, 0xabcd_0123);
        // the store landed in the L1 line, not just in flight
        let (word, _) = run_until_hit(&mut sim, |sim| sim.load(0, addr));
        assert_eq!(word, 0xabcd_0123);
        // and it has not been written back anywhere yet
        assert_eq!(sim.mem.read_u32(addr), 0);
    }

    /// Tiny caches so evictions are easy to force.
    fn tiny_config() -> Config {
        Config {
            num_cores: 1,
            inst_cache_l1: CacheConfig::new(1, 1, 32, ReplacementPolicy::LRU, 20),
            data_cache_l1: CacheConfig::new(1, 1, 32, ReplacementPolicy::LRU, 20),
            data_cache_l2: CacheConfig::new(2, 1, 32, ReplacementPolicy::LRU, 200),
            ..Config::default()
        }
    }

    #[test]
    fn dirty_l1_eviction_goes_to_l2_not_dram() {
        let mut sim = simulator(tiny_config());
        let a = DATA_BASE; // L2 set 0
        let b = DATA_BASE + 0x20; // same L1 set, L2 set 1
        run_until_hit(&mut sim, |sim| sim.store(0, a, 0x5555_0001));
        // loading b evicts the dirty line a from the one-way L1D
        run_until_hit(&mut sim, |sim| sim.load(0, b));
        assert!(!sim.cores[0].dcache.holds(a));
        let index = sim.l2.tag_array.lookup(a).expect("a lives in the L2");
        let line = sim.l2.tag_array.get(index);
        assert!(line.is_dirty());
        assert_eq!(line.read_word(0), 0x5555_0001);
        // the stored value never reached DRAM
        assert_eq!(sim.mem.read_u32(a), 0);
        assert_eq!(sim.cores[0].dcache.stats.writebacks, 1);
    }

    #[test]
    fn writeback_round_trip_preserves_the_stored_value() {
        let mut sim = simulator(tiny_config());
        let a = DATA_BASE; // L2 set 0
        let c = DATA_BASE + 0x40; // L2 set 0 as well, L1 set 0
        run_until_hit(&mut sim, |sim| sim.store(0, a, 0xfeed_cafe));
        // c maps to a's L2 set: the fill evicts a from the L2, which
        // back-invalidates the modified L1 copy and flushes it to DRAM
        run_until_hit(&mut sim, |sim| sim.load(0, c));
        assert!(!sim.cores[0].dcache.holds(a));
        assert!(!sim.l2.holds(a));
        assert_eq!(sim.mem.read_u32(a), 0xfeed_cafe);
        assert!(sim.dram.stats.total_writes() > 0);
        assert_eq!(sim.cores[0].dcache.stats.back_invalidations, 1);
        // reading a again round-trips through DRAM and yields the value
        let (word, _) = run_until_hit(&mut sim, |sim| sim.load(0, a));
        assert_eq!(word, 0xfeed_cafe);
    }

    #[test]
    fn snoop_write_gains_exclusive_ownership() {
        let config = Config {
            num_cores: 2,
            ..Config::default()
        };
        let mut sim = simulator(config);
        let addr = 0x1000_0080;
        run_until_hit(&mut sim, |sim| sim.store(0, addr, 0xc0de));
        // core 1 reads: the modified copy is surfaced, flushed and shared
        let (word, _) = run_until_hit(&mut sim, |sim| sim.load(1, addr));
        assert_eq!(word, 0xc0de);
        assert_eq!(sim.mem.read_u32(addr), 0xc0de);
        // core 1 writes: core 0's copy is invalidated
        run_until_hit(&mut sim, |sim| sim.store(1, addr, 0xbeef));
        assert!(!sim.cores[0].dcache.holds(addr));
        let (word, _) = run_until_hit(&mut sim, |sim| sim.load(1, addr));
        assert_eq!(word, 0xbeef);
    }

    #[test]
    fn exclusive_l2_never_double_holds() {
        let config = Config {
            l2_inclusion_policy: InclusionPolicy::EXCLUSIVE,
            inst_cache_l1: CacheConfig::new(1, 1, 32, ReplacementPolicy::LRU, 20),
            data_cache_l1: CacheConfig::new(1, 1, 32, ReplacementPolicy::LRU, 20),
            ..Config::default()
        };
        let mut sim = simulator(config);
        let a = DATA_BASE;
        let b = DATA_BASE + 0x20;
        run_until_hit(&mut sim, |sim| sim.load(0, a));
        // the DRAM fill bypassed the L2
        assert!(!sim.l2.holds(a));
        assert!(sim.cores[0].dcache.holds(a));
        // b evicts a: the clean victim moves into the L2
        run_until_hit(&mut sim, |sim| sim.load(0, b));
        assert!(sim.l2.holds(a));
        assert!(!sim.cores[0].dcache.holds(a));
        // loading a again hits the L2 and moves the line back up
        let (_, _) = run_until_hit(&mut sim, |sim| sim.load(0, a));
        assert!(!sim.l2.holds(a));
        assert!(sim.cores[0].dcache.holds(a));
    }

    #[test]
    fn mshr_exhaustion_stalls_until_an_entry_drains() {
        let config = Config {
            num_mshrs: 1,
            ..Config::default()
        };
        let mut sim = simulator(config);
        assert_eq!(sim.load(0, 0x1000_0000), Reply::Pending);
        sim.tick();
        // the single MSHR is taken, an unrelated fetch cannot even probe
        assert_eq!(sim.fetch(0, 0x0040_0000), Reply::Pending);
        assert_eq!(sim.l2.mshrs.num_valid(), 1);
        // after the load drains, the fetch gets through
        run_until_hit(&mut sim, |sim| sim.load(0, 0x1000_0000));
        let (_, done) = run_until_hit(&mut sim, |sim| sim.fetch(0, 0x0040_0000));
        assert!(done < MAX_CYCLES);
    }

    #[test]
    fn drrip_l2_runs_the_same_scenarios() {
        let config = Config {
            data_cache_l2: CacheConfig::new(512, 16, 32, ReplacementPolicy::DRRIP, 200),
            ..Config::default()
        };
        let mut sim = simulator(config);
        for i in 0..32u32 {
            let addr = DATA_BASE + i * 0x20;
            run_until_hit(&mut sim, |sim| sim.store(0, addr, i));
        }
        for i in 0..32u32 {
            let addr = DATA_BASE + i * 0x20;
            let (word, _) = run_until_hit(&mut sim, |sim| sim.load(0, addr));
            assert_eq!(word, i);
        }
    }
}
