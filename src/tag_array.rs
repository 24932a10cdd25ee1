use super::address;
use super::cache::block::{Line, State};
use super::cache::replacement::Policy;
use super::config::CacheConfig;

/// A victim pushed out by [`TagArray::install`] or an invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedBlockInfo {
    pub block_addr: address,
    pub data: Vec<u8>,
    pub modified: bool,
}

/// Tag and data storage of one cache level.
///
/// `num_sets x assoc` lines in total; victim selection and insertion are
/// delegated to the replacement [`Policy`].
#[derive(Debug)]
pub struct TagArray {
    pub lines: Vec<Line>,
    config: CacheConfig,
    policy: Policy,
}

impl TagArray {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let lines = (0..config.total_lines())
            .map(|_| Line::new(config.line_size))
            .collect();
        let policy = Policy::new(config.replacement_policy, config.total_lines());
        Self {
            lines,
            config,
            policy,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    fn set_range(&self, set_index: usize) -> std::ops::Range<usize> {
        let start = set_index * self.config.associativity;
        start..start + self.config.associativity
    }

    /// Index of the valid line holding `addr`, if any.
    #[must_use]
    pub fn lookup(&self, addr: address) -> Option<usize> {
        let set_index = self.config.set_index(addr);
        let tag = self.config.tag(addr);
        self.set_range(set_index)
            .find(|&index| self.lines[index].is_valid() && self.lines[index].tag == tag)
    }

    #[must_use]
    pub fn holds(&self, addr: address) -> bool {
        self.lookup(addr).is_some()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> &Line {
        &self.lines[index]
    }

    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> &mut Line {
        &mut self.lines[index]
    }

    /// Hit promotion per the active policy.
    pub fn touch(&mut self, index: usize, time: u64) {
        self.policy.on_hit(&mut self.lines[index], time);
    }

    /// Record a miss for the set-dueling policies.
    pub fn note_miss(&mut self, addr: address) {
        let set_index = self.config.set_index(addr);
        self.policy.on_miss(set_index);
    }

    /// Install a line, evicting a victim if the set is full.
    ///
    /// If the block is already present (e.g. a Shared->Modified upgrade) it is
    /// updated in place and no victim is produced.
    pub fn install(
        &mut self,
        addr: address,
        data: &[u8],
        state: State,
        time: u64,
    ) -> (usize, Option<EvictedBlockInfo>) {
        let set_index = self.config.set_index(addr);
        let tag = self.config.tag(addr);
        let block_addr = self.config.block_addr(addr);

        if let Some(index) = self.lookup(addr) {
            let line = &mut self.lines[index];
            line.state = state;
            self.policy.on_hit(&mut self.lines[index], time);
            return (index, None);
        }

        let range = self.set_range(set_index);
        let way = self.policy.victim(&mut self.lines[range.clone()]);
        let index = range.start + way;

        let victim = &self.lines[index];
        let victim_last_touch = victim.last_access_time;
        let evicted = victim.is_valid().then(|| EvictedBlockInfo {
            block_addr: victim.block_addr,
            data: victim.data().to_vec(),
            modified: victim.is_dirty(),
        });
        if let Some(ref evicted) = evicted {
            log::trace!(
                "tag_array::evict({:#010x}, modified={})",
                evicted.block_addr,
                evicted.modified,
            );
            self.policy.on_evict(evicted.block_addr);
        }

        let line = &mut self.lines[index];
        line.allocate(tag, block_addr, data, state, time);
        self.policy.on_insert(
            set_index,
            &mut self.lines[index],
            block_addr,
            victim_last_touch,
            time,
            self.config.miss_penalty,
        );
        (index, evicted)
    }

    /// Drop `addr` from the array, returning the dropped copy.
    pub fn invalidate(&mut self, addr: address) -> Option<EvictedBlockInfo> {
        let index = self.lookup(addr)?;
        let line = &mut self.lines[index];
        let evicted = EvictedBlockInfo {
            block_addr: line.block_addr,
            data: line.data().to_vec(),
            modified: line.is_dirty(),
        };
        line.invalidate();
        Some(evicted)
    }

    /// All valid block addresses, for the containment invariants.
    pub fn valid_block_addrs(&self) -> impl Iterator<Item = address> + '_ {
        self.lines
            .iter()
            .filter(|line| line.is_valid())
            .map(|line| line.block_addr)
    }
}
