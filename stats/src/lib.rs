#![allow(
    non_camel_case_types,
    clippy::upper_case_acronyms,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod dram;
pub mod sim;

pub use cache::{Cache, PerCache};
pub use dram::DRAM;
pub use sim::Sim;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub sim: Sim,
    pub dram: DRAM,
    pub l1i_stats: PerCache,
    pub l1d_stats: PerCache,
    pub l2_stats: Cache,
}

impl Stats {
    #[must_use]
    pub fn new(num_cores: usize, num_dram_banks: usize) -> Self {
        Self {
            sim: Sim::default(),
            dram: DRAM::new(num_dram_banks),
            l1i_stats: PerCache::new(num_cores),
            l1d_stats: PerCache::new(num_cores),
            l2_stats: Cache::default(),
        }
    }
}
