use serde::{Deserialize, Serialize};

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sim {
    pub cycles: u64,
    pub fetches: u64,
    pub loads: u64,
    pub stores: u64,
    /// Accesses answered with a structural stall (`Pending`/`Busy`).
    pub stalled: u64,
    /// Pending slots freed by pipeline squash.
    pub squashes: u64,
    /// Most MSHRs valid at once over the whole run.
    pub mshr_high_water: u64,
}

impl std::ops::AddAssign for Sim {
    fn add_assign(&mut self, other: Self) {
        self.cycles += other.cycles;
        self.fetches += other.fetches;
        self.loads += other.loads;
        self.stores += other.stores;
        self.stalled += other.stalled;
        self.squashes += other.squashes;
        self.mshr_high_water = self.mshr_high_water.max(other.mshr_high_water);
    }
}
