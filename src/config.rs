use super::address;
use serde::{Deserialize, Serialize};

/// Replacement policy of a cache level.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum ReplacementPolicy {
    /// Least recently used
    LRU,
    /// Oldest allocation
    FIFO,
    /// Dynamic insertion policy (LRU/BIP set dueling)
    DIP,
    /// Dynamic re-reference interval prediction (SRRIP/BRRIP set dueling)
    DRRIP,
    /// Evicted address filter (Bloom filter driven reuse prediction)
    EAF,
}

/// Containment policy of the shared L2 relative to the private L1s.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum InclusionPolicy {
    /// L2 holds a superset of all L1 contents (evictions back-invalidate)
    INCLUSIVE,
    /// L2 holds only L1 victims (fills bypass the L2)
    EXCLUSIVE,
    /// Non-inclusive non-exclusive
    NINE,
}

/// Geometry and policies of a single cache level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub num_sets: usize,
    pub associativity: usize,
    /// line size in bytes
    pub line_size: usize,
    pub replacement_policy: ReplacementPolicy,
    /// nominal miss penalty in cycles, used by MRU insertion timestamps
    pub miss_penalty: u64,
}

impl CacheConfig {
    #[must_use]
    pub fn new(
        num_sets: usize,
        associativity: usize,
        line_size: usize,
        replacement_policy: ReplacementPolicy,
        miss_penalty: u64,
    ) -> Self {
        assert!(num_sets.is_power_of_two(), "num_sets must be a power of two");
        assert!(
            line_size.is_power_of_two(),
            "line_size must be a power of two"
        );
        assert!(associativity > 0, "associativity must be nonzero");
        Self {
            num_sets,
            associativity,
            line_size,
            replacement_policy,
            miss_penalty,
        }
    }

    #[must_use]
    pub fn line_size_log2(&self) -> u32 {
        self.line_size.trailing_zeros()
    }

    #[must_use]
    pub fn num_sets_log2(&self) -> u32 {
        self.num_sets.trailing_zeros()
    }

    #[must_use]
    pub fn total_lines(&self) -> usize {
        self.num_sets * self.associativity
    }

    /// Line-aligned address.
    #[must_use]
    pub fn block_addr(&self, addr: address) -> address {
        addr & !(self.line_size as address - 1)
    }

    #[must_use]
    pub fn offset(&self, addr: address) -> usize {
        (addr as usize) & (self.line_size - 1)
    }

    #[must_use]
    pub fn set_index(&self, addr: address) -> usize {
        ((addr >> self.line_size_log2()) as usize) & (self.num_sets - 1)
    }

    /// For generality, the tag includes both index and tag.
    /// This allows for set index functions that map different indices to the
    /// same set, so a full tag + index compare is required for hit detection.
    #[must_use]
    pub fn tag(&self, addr: address) -> address {
        self.block_addr(addr)
    }
}

/// DRAM controller timing and geometry.
///
/// The unit of everything here is one core clock cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DramConfig {
    pub num_banks: usize,
    /// cycles a command occupies the shared command bus
    pub cmd_bus_occupancy: u64,
    /// cycles a bank stays busy after each command step (PRE/ACT/RD/WR)
    pub bank_busy_delay: u64,
    /// cycles from the RD/WR command until the data transfer begins
    pub data_delay: u64,
    /// cycles a data transfer occupies the shared data bus
    pub data_bus_occupancy: u64,
    /// scheduler queue capacity; overflow is a hard error
    pub sched_queue_size: usize,
}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            num_banks: 8,
            cmd_bus_occupancy: 4,
            bank_busy_delay: 100,
            data_delay: 100,
            data_bus_occupancy: 50,
            sched_queue_size: 256,
        }
    }
}

/// Top level configuration of the memory hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// number of cores, each with a private split L1
    pub num_cores: usize,
    /// per-core L1 instruction cache
    pub inst_cache_l1: CacheConfig,
    /// per-core L1 data cache
    pub data_cache_l1: CacheConfig,
    /// shared L2 cache
    pub data_cache_l2: CacheConfig,
    /// number of L2 miss status holding registers
    pub num_mshrs: usize,
    /// L2 to L1 transfer latency
    pub l1_transfer_latency: u64,
    /// L2 data array hit latency
    pub l2_hit_latency: u64,
    /// delay from MSHR allocation until the request is sent to DRAM
    pub l2_to_mem_latency: u64,
    /// delay from DRAM completion until the L2 fill
    pub mem_to_l2_latency: u64,
    pub l2_inclusion_policy: InclusionPolicy,
    pub dram: DramConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_cores: 1,
            // 8KB: 16 sets, 4 ways, 32B lines
            inst_cache_l1: CacheConfig::new(16, 4, 32, ReplacementPolicy::LRU, 20),
            // 64KB: 256 sets, 8 ways, 32B lines
            data_cache_l1: CacheConfig::new(256, 8, 32, ReplacementPolicy::LRU, 20),
            // 256KB: 512 sets, 16 ways, 32B lines
            data_cache_l2: CacheConfig::new(512, 16, 32, ReplacementPolicy::LRU, 200),
            num_mshrs: 16,
            l1_transfer_latency: 5,
            l2_hit_latency: 15,
            l2_to_mem_latency: 5,
            mem_to_l2_latency: 5,
            l2_inclusion_policy: InclusionPolicy::INCLUSIVE,
            dram: DramConfig::default(),
        }
    }
}

impl Config {
    /// All L1 and L2 line sizes must agree for line transfers to be copies.
    pub fn validate(&self) {
        assert!(self.num_cores > 0, "need at least one core");
        assert!(self.num_mshrs > 0, "need at least one MSHR");
        assert_eq!(
            self.inst_cache_l1.line_size, self.data_cache_l2.line_size,
            "L1I and L2 line sizes differ"
        );
        assert_eq!(
            self.data_cache_l1.line_size, self.data_cache_l2.line_size,
            "L1D and L2 line sizes differ"
        );
    }

    #[must_use]
    pub fn line_size(&self) -> usize {
        self.data_cache_l2.line_size
    }
}
