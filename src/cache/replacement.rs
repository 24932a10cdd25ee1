use super::block::Line;
use crate::address;
use crate::config::ReplacementPolicy;
use bitvec::vec::BitVec;

pub const RRPV_MAX: u8 = 3;
pub const RRPV_LONG: u8 = 2;
pub const PSEL_MAX: u16 = 1023;
pub const PSEL_INIT: u16 = 512;
/// Leader sets: `set & 0x1f == 0` duels for the static policy,
/// `set & 0x1f == 1` for the bimodal one.
const LEADER_MASK: usize = 0x1f;

const EAF_HASH_SALT: u64 = 0x9e37_79b9_7f4a_7c15;
/// Filter bits per tracked cache line.
const EAF_BITS_PER_LINE: usize = 8;

/// 64-bit avalanche hash, used for the deterministic 1/32 bimodal draws and
/// the Bloom filter index pair.
#[must_use]
pub(crate) fn hash_u64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    x
}

/// Bloom filter over recently evicted line addresses.
///
/// Cleared after `capacity` insertions so stale reuse information ages out.
#[derive(Debug, Clone)]
pub struct EvictedAddressFilter {
    bits: BitVec<u64>,
    inserts: usize,
    capacity: usize,
}

impl EvictedAddressFilter {
    #[must_use]
    pub fn new(total_lines: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, total_lines * EAF_BITS_PER_LINE),
            inserts: 0,
            capacity: total_lines,
        }
    }

    fn indices(&self, block_addr: address) -> (usize, usize) {
        let size = self.bits.len() as u64;
        let h1 = hash_u64(u64::from(block_addr)) % size;
        let h2 = hash_u64(u64::from(block_addr) ^ EAF_HASH_SALT) % size;
        (h1 as usize, h2 as usize)
    }

    #[must_use]
    pub fn test(&self, block_addr: address) -> bool {
        let (h1, h2) = self.indices(block_addr);
        self.bits[h1] && self.bits[h2]
    }

    pub fn insert(&mut self, block_addr: address) {
        let (h1, h2) = self.indices(block_addr);
        self.bits.set(h1, true);
        self.bits.set(h2, true);
        self.inserts += 1;
        if self.inserts >= self.capacity {
            self.bits.fill(false);
            self.inserts = 0;
        }
    }
}

/// Victim selection, insertion and hit-promotion for one cache instance.
#[derive(Debug, Clone)]
pub struct Policy {
    pub kind: ReplacementPolicy,
    /// policy selector for the set-dueling policies (DIP, DRRIP)
    psel: u16,
    /// event counter feeding the deterministic bimodal draws
    draws: u64,
    eaf: Option<EvictedAddressFilter>,
}

impl Policy {
    #[must_use]
    pub fn new(kind: ReplacementPolicy, total_lines: usize) -> Self {
        let eaf = match kind {
            ReplacementPolicy::EAF => Some(EvictedAddressFilter::new(total_lines)),
            _ => None,
        };
        Self {
            kind,
            psel: PSEL_INIT,
            draws: 0,
            eaf,
        }
    }

    #[must_use]
    pub fn psel(&self) -> u16 {
        self.psel
    }

    fn is_leader0(set_index: usize) -> bool {
        set_index & LEADER_MASK == 0
    }

    fn is_leader1(set_index: usize) -> bool {
        set_index & LEADER_MASK == 1
    }

    fn one_in_32(&mut self) -> bool {
        let draw = self.draws;
        self.draws += 1;
        hash_u64(draw) & 31 == 0
    }

    /// Should this set insert bimodally (BIP for DIP, BRRIP for DRRIP)?
    fn bimodal(&self, set_index: usize) -> bool {
        if Self::is_leader0(set_index) {
            false
        } else if Self::is_leader1(set_index) {
            true
        } else {
            self.psel >= PSEL_INIT
        }
    }

    /// Pick the way to replace within one set.
    pub fn victim(&mut self, set: &mut [Line]) -> usize {
        if let Some(way) = set.iter().position(|line| !line.is_valid()) {
            return way;
        }
        match self.kind {
            ReplacementPolicy::FIFO => set
                .iter()
                .enumerate()
                .min_by_key(|(_, line)| line.alloc_time)
                .map(|(way, _)| way)
                .unwrap(),
            ReplacementPolicy::DRRIP => loop {
                if let Some(way) = set.iter().position(|line| line.rrpv >= RRPV_MAX) {
                    break way;
                }
                for line in set.iter_mut() {
                    line.rrpv += 1;
                }
            },
            // LRU, DIP and EAF all evict the coldest recency
            _ => set
                .iter()
                .enumerate()
                .min_by_key(|(_, line)| line.last_access_time)
                .map(|(way, _)| way)
                .unwrap(),
        }
    }

    /// Set the inserted line's metadata according to the insertion policy.
    ///
    /// `victim_last_touch` is the replaced way's recency before the fill; a
    /// BIP insertion reuses it so the new line lands in the LRU position.
    pub fn on_insert(
        &mut self,
        set_index: usize,
        line: &mut Line,
        block_addr: address,
        victim_last_touch: u64,
        now: u64,
        miss_penalty: u64,
    ) {
        let mru = now + miss_penalty;
        line.rrpv = 0;
        match self.kind {
            ReplacementPolicy::LRU | ReplacementPolicy::FIFO => {
                line.last_access_time = mru;
            }
            ReplacementPolicy::DIP => {
                if self.bimodal(set_index) {
                    self.insert_bip(line, victim_last_touch, mru);
                } else {
                    line.last_access_time = mru;
                }
            }
            ReplacementPolicy::DRRIP => {
                line.rrpv = if self.bimodal(set_index) {
                    // BRRIP: distant re-reference except for 1 in 32 fills
                    if self.one_in_32() {
                        RRPV_LONG
                    } else {
                        RRPV_MAX
                    }
                } else {
                    // SRRIP
                    RRPV_LONG
                };
            }
            ReplacementPolicy::EAF => {
                let seen_before = self
                    .eaf
                    .as_ref()
                    .map(|filter| filter.test(block_addr))
                    .unwrap_or(false);
                if seen_before {
                    line.last_access_time = mru;
                } else {
                    self.insert_bip(line, victim_last_touch, mru);
                }
            }
        }
    }

    fn insert_bip(&mut self, line: &mut Line, victim_last_touch: u64, mru: u64) {
        line.last_access_time = if self.one_in_32() {
            mru
        } else {
            victim_last_touch
        };
    }

    pub fn on_hit(&mut self, line: &mut Line, now: u64) {
        match self.kind {
            ReplacementPolicy::DRRIP => line.rrpv = 0,
            _ => line.last_access_time = now,
        }
    }

    /// Update the duel on misses in leader sets.
    pub fn on_miss(&mut self, set_index: usize) {
        if !matches!(
            self.kind,
            ReplacementPolicy::DIP | ReplacementPolicy::DRRIP
        ) {
            return;
        }
        if Self::is_leader0(set_index) {
            // the static policy missed: lean towards bimodal insertion
            self.psel = (self.psel + 1).min(PSEL_MAX);
        } else if Self::is_leader1(set_index) {
            self.psel = self.psel.saturating_sub(1);
        }
    }

    /// Learn an eviction (EAF only).
    pub fn on_evict(&mut self, block_addr: address) {
        if let Some(filter) = self.eaf.as_mut() {
            filter.insert(block_addr);
        }
    }
}
