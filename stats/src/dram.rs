use serde::{Deserialize, Serialize};

/// DRAM controller statistics.
///
/// Row buffer outcomes are recorded when a request is scheduled, reads and
/// writes when the data transfer completes.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DRAM {
    /// Number of reads per bank
    pub bank_reads: Box<[u64]>,
    /// Number of writes per bank
    pub bank_writes: Box<[u64]>,
    /// Scheduled requests that hit the open row
    pub row_hits: u64,
    /// Scheduled requests that found the bank precharged
    pub row_empties: u64,
    /// Scheduled requests that required a precharge first
    pub row_conflicts: u64,
    /// Requests retired off the data bus
    pub retired: u64,
    /// Number of banks
    pub num_banks: usize,
}

impl DRAM {
    #[must_use]
    pub fn new(num_banks: usize) -> Self {
        Self {
            bank_reads: vec![0; num_banks].into_boxed_slice(),
            bank_writes: vec![0; num_banks].into_boxed_slice(),
            row_hits: 0,
            row_empties: 0,
            row_conflicts: 0,
            retired: 0,
            num_banks,
        }
    }

    #[must_use]
    pub fn total_reads(&self) -> u64 {
        self.bank_reads.iter().sum()
    }

    #[must_use]
    pub fn total_writes(&self) -> u64 {
        self.bank_writes.iter().sum()
    }
}

impl std::ops::AddAssign for DRAM {
    fn add_assign(&mut self, other: Self) {
        debug_assert_eq!(self.num_banks, other.num_banks);
        for (bank, reads) in other.bank_reads.iter().enumerate() {
            self.bank_reads[bank] += reads;
        }
        for (bank, writes) in other.bank_writes.iter().enumerate() {
            self.bank_writes[bank] += writes;
        }
        self.row_hits += other.row_hits;
        self.row_empties += other.row_empties;
        self.row_conflicts += other.row_conflicts;
        self.retired += other.retired;
    }
}
