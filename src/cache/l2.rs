use super::block::State;
use super::RequestStatus;
use crate::address;
use crate::config::{Config, InclusionPolicy};
use crate::mem_fetch::AccessKind;
use crate::mshr;
use crate::tag_array::{EvictedBlockInfo, TagArray};
use console::style;

/// Outcome of an L2 access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Tag hit; the line contents travel to the L1 as a copy.
    Hit { data: Vec<u8>, was_dirty: bool },
    /// Miss tracked by the given MSHR (fresh or coalesced).
    Miss { mshr: usize },
    /// No free MSHR and no coverage: the requester stalls.
    Busy,
}

/// How an L1 writeback was absorbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritebackOutcome {
    /// Updated the present L2 copy in place.
    Updated,
    /// Installed (exclusive victim-cache mode), possibly evicting a victim.
    Installed(Option<EvictedBlockInfo>),
    /// Not present: goes straight to DRAM, bypassing allocation.
    Bypass,
}

/// The shared second-level cache: one tag array, the global MSHR pool, and
/// the containment policy against the private L1s.
#[derive(Debug)]
pub struct L2Cache {
    pub name: String,
    pub tag_array: TagArray,
    pub mshrs: mshr::Table,
    pub inclusion: InclusionPolicy,
    pub stats: stats::cache::Cache,
}

impl L2Cache {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let name = format!("{}", style("L2").green());
        let mshrs = mshr::Table::new(
            config.num_mshrs,
            config.data_cache_l2.line_size,
            config.l2_to_mem_latency,
            config.mem_to_l2_latency,
        );
        Self {
            name,
            tag_array: TagArray::new(config.data_cache_l2.clone()),
            mshrs,
            inclusion: config.l2_inclusion_policy,
            stats: stats::cache::Cache::default(),
        }
    }

    #[must_use]
    pub fn line_addr(&self, addr: address) -> address {
        self.tag_array.config().block_addr(addr)
    }

    #[must_use]
    pub fn holds(&self, addr: address) -> bool {
        self.tag_array.holds(addr)
    }

    fn access_kind(is_write: bool, is_fetch: bool) -> AccessKind {
        if is_fetch {
            AccessKind::INST_ACC_R
        } else if is_write {
            AccessKind::DATA_ACC_W
        } else {
            AccessKind::DATA_ACC_R
        }
    }

    /// Probe the shared cache on behalf of an L1 miss.
    ///
    /// A free MSHR (or an outstanding one covering the line) is a
    /// prerequisite; without it the access does not even probe the tags.
    pub fn access(
        &mut self,
        addr: address,
        is_write: bool,
        is_fetch: bool,
        waiter: mshr::Waiter,
        cycle: u64,
    ) -> Access {
        let line_addr = self.line_addr(addr);
        let kind = Self::access_kind(is_write, is_fetch).into();
        let covered = self.mshrs.find(line_addr).is_some();
        if !covered && !self.mshrs.has_free() {
            self.stats.inc(kind, RequestStatus::RESERVATION_FAIL.into(), 1);
            return Access::Busy;
        }

        if let Some(index) = self.tag_array.lookup(addr) {
            self.tag_array.touch(index, cycle);
            let line = self.tag_array.get(index);
            let data = line.data().to_vec();
            let was_dirty = line.is_dirty();
            self.stats.inc(kind, RequestStatus::HIT.into(), 1);
            log::debug!("{}::access({addr:#010x}) => HIT", self.name);
            if self.inclusion == InclusionPolicy::EXCLUSIVE {
                // the line moves up to the L1; drop our copy
                self.tag_array.invalidate(addr);
            }
            return Access::Hit { data, was_dirty };
        }

        self.tag_array.note_miss(addr);

        if let Some(index) = self.mshrs.coalesce(line_addr, waiter) {
            self.stats.inc(kind, RequestStatus::MSHR_HIT.into(), 1);
            log::debug!("{}::access({addr:#010x}) => merged into MSHR {index}", self.name);
            return Access::Miss { mshr: index };
        }

        match self.mshrs.allocate(line_addr, is_write, is_fetch, waiter, cycle) {
            Some(index) => {
                self.stats.inc(kind, RequestStatus::MISS.into(), 1);
                log::debug!("{}::access({addr:#010x}) => MISS (MSHR {index})", self.name);
                Access::Miss { mshr: index }
            }
            None => {
                self.stats.inc(kind, RequestStatus::RESERVATION_FAIL.into(), 1);
                Access::Busy
            }
        }
    }

    /// Install a line delivered by a ready MSHR.
    ///
    /// The caller routes the returned victim: writeback to DRAM if dirty,
    /// back-invalidation of L1 copies if the L2 is inclusive.
    pub fn install_fill(
        &mut self,
        line_addr: address,
        data: &[u8],
        cycle: u64,
    ) -> Option<EvictedBlockInfo> {
        debug_assert_ne!(
            self.inclusion,
            InclusionPolicy::EXCLUSIVE,
            "exclusive L2 never installs DRAM fills"
        );
        let (_, evicted) = self
            .tag_array
            .install(line_addr, data, State::SHARED, cycle);
        if evicted.is_some() {
            self.stats.evictions += 1;
        }
        evicted
    }

    /// Absorb a line evicted from an L1.
    pub fn handle_l1_writeback(
        &mut self,
        line_addr: address,
        data: &[u8],
        dirty: bool,
        cycle: u64,
    ) -> WritebackOutcome {
        if let Some(index) = self.tag_array.lookup(line_addr) {
            self.tag_array.touch(index, cycle);
            let line = self.tag_array.get_mut(index);
            if dirty {
                line.write_data(data);
            } else {
                line.fill_data(data);
            }
            return WritebackOutcome::Updated;
        }
        match self.inclusion {
            // victim-cache behavior: install unconditionally
            InclusionPolicy::EXCLUSIVE => {
                let (index, evicted) =
                    self.tag_array
                        .install(line_addr, data, State::SHARED, cycle);
                if dirty {
                    self.tag_array.get_mut(index).mark_dirty();
                }
                if evicted.is_some() {
                    self.stats.evictions += 1;
                }
                WritebackOutcome::Installed(evicted)
            }
            InclusionPolicy::INCLUSIVE | InclusionPolicy::NINE => WritebackOutcome::Bypass,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Access, L2Cache, WritebackOutcome};
    use crate::cache::block::State;
    use crate::cache::L1Kind;
    use crate::config::{Config, InclusionPolicy};
    use crate::mem::DATA_BASE;
    use crate::mshr::Waiter;

    fn waiter() -> Waiter {
        Waiter {
            core_id: 0,
            kind: L1Kind::Data,
            is_write: false,
            target_state: State::EXCLUSIVE,
        }
    }

    fn l2(inclusion: InclusionPolicy) -> L2Cache {
        let config = Config {
            l2_inclusion_policy: inclusion,
            ..Config::default()
        };
        L2Cache::new(&config)
    }

    #[test]
    fn miss_allocates_then_coalesces() {
        let mut l2 = l2(InclusionPolicy::INCLUSIVE);
        let first = l2.access(DATA_BASE, false, false, waiter(), 0);
        let Access::Miss { mshr } = first else {
            panic!("expected miss, got {first:?}");
        };
        // a second access to the same line merges into the same entry
        let second = l2.access(DATA_BASE + 4, false, false, waiter(), 2);
        assert_eq!(second, Access::Miss { mshr });
        assert_eq!(l2.mshrs.num_valid(), 1);
        assert_eq!(l2.mshrs.get(mshr).waiters.len(), 2);
    }

    #[test]
    fn busy_when_no_mshr_covers_and_none_free() {
        let mut l2 = l2(InclusionPolicy::INCLUSIVE);
        let num_mshrs = Config::default().num_mshrs;
        for i in 0..num_mshrs as u32 {
            let addr = DATA_BASE + i * 32;
            assert!(matches!(
                l2.access(addr, false, false, waiter(), 0),
                Access::Miss { .. }
            ));
        }
        assert_eq!(
            l2.access(DATA_BASE + 0x10_0000, false, false, waiter(), 1),
            Access::Busy
        );
        // an access covered by an existing MSHR still goes through
        assert!(matches!(
            l2.access(DATA_BASE, false, false, waiter(), 1),
            Access::Miss { .. }
        ));
    }

    #[test]
    fn hit_returns_line_data() {
        let mut l2 = l2(InclusionPolicy::INCLUSIVE);
        let mut line = [0u8; 32];
        line[..4].copy_from_slice(&0xfeed_beefu32.to_le_bytes());
        l2.install_fill(DATA_BASE, &line, 1);
        match l2.access(DATA_BASE, false, false, waiter(), 2) {
            Access::Hit { data, was_dirty } => {
                assert_eq!(data, line.to_vec());
                assert!(!was_dirty);
            }
            other => panic!("expected hit, got {other:?}"),
        }
        // still resident: the L2 is not exclusive
        assert!(l2.holds(DATA_BASE));
    }

    #[test]
    fn exclusive_hit_invalidates_own_copy() {
        let mut l2 = l2(InclusionPolicy::EXCLUSIVE);
        // exclusive L2 content arrives via L1 evictions
        let outcome = l2.handle_l1_writeback(DATA_BASE, &[1u8; 32], false, 1);
        assert_eq!(outcome, WritebackOutcome::Installed(None));
        assert!(l2.holds(DATA_BASE));
        assert!(matches!(
            l2.access(DATA_BASE, false, false, waiter(), 2),
            Access::Hit { .. }
        ));
        assert!(!l2.holds(DATA_BASE));
    }

    #[test]
    fn dirty_l1_writeback_updates_present_line() {
        let mut l2 = l2(InclusionPolicy::INCLUSIVE);
        l2.install_fill(DATA_BASE, &[0u8; 32], 1);
        let outcome = l2.handle_l1_writeback(DATA_BASE, &[9u8; 32], true, 2);
        assert_eq!(outcome, WritebackOutcome::Updated);
        let index = l2.tag_array.lookup(DATA_BASE).unwrap();
        assert!(l2.tag_array.get(index).is_dirty());
        assert_eq!(l2.tag_array.get(index).data(), &[9u8; 32]);
    }

    #[test]
    fn absent_line_writeback_bypasses_unless_exclusive() {
        let mut l2 = l2(InclusionPolicy::NINE);
        assert_eq!(
            l2.handle_l1_writeback(DATA_BASE, &[9u8; 32], true, 2),
            WritebackOutcome::Bypass
        );
    }
}
