use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(
    Debug,
    strum::EnumIter,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub enum AccessKind {
    INST_ACC_R = 0,
    DATA_ACC_R,
    DATA_ACC_W,
    L1_WRBK_ACC,
    L2_WRBK_ACC,
}

#[derive(
    Debug,
    strum::EnumIter,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub enum RequestStatus {
    HIT = 0,
    MISS,
    /// Merged into an already outstanding miss for the same line.
    MSHR_HIT,
    /// Structural stall: no free MSHR, busy pending slot, etc.
    RESERVATION_FAIL,
}

pub type CsvRow = (AccessKind, RequestStatus, u64);

/// Per-cache access statistics.
///
/// Keyed by access kind and outcome; evictions and writebacks are counted
/// separately since they are not accesses of their own.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache {
    // json object keys must be strings, so the map round-trips through rows
    #[serde(with = "access_rows")]
    pub accesses: HashMap<(AccessKind, RequestStatus), u64>,
    pub evictions: u64,
    pub writebacks: u64,
    /// Lines dropped from L1 by an inclusive L2 eviction.
    pub back_invalidations: u64,
}

impl Cache {
    pub fn inc(&mut self, kind: AccessKind, status: RequestStatus, count: u64) {
        *self.accesses.entry((kind, status)).or_insert(0) += count;
    }

    #[must_use]
    pub fn count(&self, kind: AccessKind, status: RequestStatus) -> u64 {
        self.accesses.get(&(kind, status)).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self, status: RequestStatus) -> u64 {
        self.accesses
            .iter()
            .filter(|((_, s), _)| *s == status)
            .map(|(_, count)| count)
            .sum()
    }

    /// Flatten into rows sorted by kind and status, for reporting.
    #[must_use]
    pub fn csv_rows(&self) -> Vec<CsvRow> {
        self.accesses
            .iter()
            .map(|(&(kind, status), &count)| (kind, status, count))
            .sorted()
            .collect()
    }
}

mod access_rows {
    use super::{AccessKind, CsvRow, RequestStatus};
    use itertools::Itertools;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        accesses: &HashMap<(AccessKind, RequestStatus), u64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let rows: Vec<CsvRow> = accesses
            .iter()
            .map(|(&(kind, status), &count)| (kind, status, count))
            .sorted()
            .collect();
        rows.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<(AccessKind, RequestStatus), u64>, D::Error> {
        let rows: Vec<CsvRow> = Vec::deserialize(deserializer)?;
        Ok(rows
            .into_iter()
            .map(|(kind, status, count)| ((kind, status), count))
            .collect())
    }
}

impl std::ops::AddAssign for Cache {
    fn add_assign(&mut self, other: Self) {
        for ((kind, status), count) in other.accesses {
            *self.accesses.entry((kind, status)).or_insert(0) += count;
        }
        self.evictions += other.evictions;
        self.writebacks += other.writebacks;
        self.back_invalidations += other.back_invalidations;
    }
}

/// One [`Cache`] per core.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerCache(pub Box<[Cache]>);

impl PerCache {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self(vec![Cache::default(); size].into_boxed_slice())
    }

    #[must_use]
    pub fn reduce(&self) -> Cache {
        let mut total = Cache::default();
        for stats in &*self.0 {
            total += stats.clone();
        }
        total
    }
}

impl std::ops::Index<usize> for PerCache {
    type Output = Cache;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl std::ops::IndexMut<usize> for PerCache {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}
