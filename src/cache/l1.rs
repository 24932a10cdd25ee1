use super::block::State;
use super::L1Kind;
use crate::address;
use crate::config::CacheConfig;
use crate::tag_array::{EvictedBlockInfo, TagArray};

/// The single pending-fill slot of a blocking L1.
///
/// `ready_cycle == None` means the slot waits for an L2 MSHR to go `READY`;
/// a known-latency fill (L2 hit, snoop hit) carries its captured line data
/// and completes lazily once the ready cycle passes.
#[derive(Debug, Clone)]
pub struct PendingFill {
    pub valid: bool,
    pub line_addr: address,
    pub is_write: bool,
    pub ready_cycle: Option<u64>,
    pub target_state: State,
    /// install the line dirty (it was dirty in the L2 when captured)
    pub mark_dirty: bool,
    pub data: Vec<u8>,
}

impl PendingFill {
    fn empty(line_size: usize) -> Self {
        Self {
            valid: false,
            line_addr: 0,
            is_write: false,
            ready_cycle: None,
            target_state: State::INVALID,
            mark_dirty: false,
            data: vec![0; line_size],
        }
    }
}

/// Outcome of probing the local tags for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProbe {
    Hit,
    /// Write hit on a `SHARED` line: peers must be invalidated first.
    UpgradeMiss,
    Miss,
}

/// What a coherence snoop found in this cache.
#[derive(Debug, Clone)]
pub struct SnoopReply {
    pub was_modified: bool,
    /// the surfaced copy was newer than the backing store
    pub dirty: bool,
    /// line contents; the peer copy is authoritative over the backing store
    pub data: Vec<u8>,
}

/// Private per-core cache, blocking on its single pending-fill slot.
#[derive(Debug)]
pub struct L1Cache {
    pub name: String,
    pub core_id: usize,
    pub kind: L1Kind,
    pub tag_array: TagArray,
    pub pending: PendingFill,
    pub stats: stats::cache::Cache,
}

impl L1Cache {
    #[must_use]
    pub fn new(name: String, core_id: usize, kind: L1Kind, config: CacheConfig) -> Self {
        let pending = PendingFill::empty(config.line_size);
        Self {
            name,
            core_id,
            kind,
            tag_array: TagArray::new(config),
            pending,
            stats: stats::cache::Cache::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        self.tag_array.config()
    }

    #[must_use]
    pub fn line_addr(&self, addr: address) -> address {
        self.config().block_addr(addr)
    }

    #[must_use]
    pub fn holds(&self, addr: address) -> bool {
        self.tag_array.holds(addr)
    }

    #[must_use]
    pub fn pending_covers(&self, addr: address) -> bool {
        self.pending.valid && self.pending.line_addr == self.line_addr(addr)
    }

    pub fn arm_pending(
        &mut self,
        line_addr: address,
        is_write: bool,
        ready_cycle: Option<u64>,
        target_state: State,
        mark_dirty: bool,
        data: Vec<u8>,
    ) {
        debug_assert!(!self.pending.valid, "{}: pending slot already armed", self.name);
        log::debug!(
            "{}::arm_pending({line_addr:#010x}, write={is_write}, ready={ready_cycle:?}, target={target_state:?})",
            self.name,
        );
        // one pending fill per miss: let the set-dueling policies see it
        self.tag_array.note_miss(line_addr);
        self.pending = PendingFill {
            valid: true,
            line_addr,
            is_write,
            ready_cycle,
            target_state,
            mark_dirty,
            data,
        };
    }

    pub fn clear_pending(&mut self) {
        self.pending.valid = false;
    }

    /// Probe for a read. Any valid state hits and promotes recency.
    pub fn read_hit(&mut self, addr: address, cycle: u64) -> Option<u32> {
        let index = self.tag_array.lookup(addr)?;
        self.tag_array.touch(index, cycle);
        let offset = self.config().offset(addr);
        Some(self.tag_array.get(index).read_word(offset))
    }

    /// Probe for a write; applies the store on a true hit.
    pub fn write_probe(&mut self, addr: address, value: u32, cycle: u64) -> WriteProbe {
        let Some(index) = self.tag_array.lookup(addr) else {
            return WriteProbe::Miss;
        };
        match self.tag_array.get(index).state {
            State::MODIFIED | State::EXCLUSIVE => {
                self.tag_array.touch(index, cycle);
                let offset = self.config().offset(addr);
                let line = self.tag_array.get_mut(index);
                line.state = State::MODIFIED;
                line.write_word(offset, value);
                WriteProbe::Hit
            }
            State::SHARED => WriteProbe::UpgradeMiss,
            State::INVALID => WriteProbe::Miss,
        }
    }

    /// Install a line, returning the victim (if any) for the caller to route.
    pub fn fill(
        &mut self,
        line_addr: address,
        data: &[u8],
        target_state: State,
        mark_dirty: bool,
        cycle: u64,
    ) -> Option<EvictedBlockInfo> {
        log::debug!(
            "{}::fill({line_addr:#010x}, target={target_state:?}, cycle={cycle})",
            self.name,
        );
        let (index, evicted) = self.tag_array.install(line_addr, data, target_state, cycle);
        if mark_dirty || target_state == State::MODIFIED {
            self.tag_array.get_mut(index).mark_dirty();
        }
        if evicted.is_some() {
            self.stats.evictions += 1;
        }
        evicted
    }

    /// Coherence snoop from a peer core.
    ///
    /// A write request invalidates our copy; a read downgrades it to
    /// `SHARED`. A `MODIFIED` copy surfaces its dirty data either way, and
    /// the caller is responsible for flushing it to memory.
    pub fn probe_coherence(&mut self, addr: address, is_write_req: bool) -> Option<SnoopReply> {
        let index = self.tag_array.lookup(addr)?;
        let line = self.tag_array.get_mut(index);
        let was_modified = line.is_modified();
        let dirty = was_modified || line.is_dirty();
        let data = line.data().to_vec();
        if is_write_req {
            line.invalidate();
        } else {
            line.state = State::SHARED;
            // the caller flushes the surfaced data, our copy is clean now
            line.clear_dirty();
        }
        Some(SnoopReply {
            was_modified,
            dirty,
            data,
        })
    }

    /// Drop `addr` (inclusive back-invalidation, snoop write).
    pub fn invalidate(&mut self, addr: address) -> Option<EvictedBlockInfo> {
        self.tag_array.invalidate(addr)
    }
}
