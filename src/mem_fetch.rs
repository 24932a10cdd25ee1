use super::{address, mcu};
use serde::{Deserialize, Serialize};
use std::sync::atomic;

/// Classification of a memory request by its originator.
#[derive(
    Debug,
    strum::EnumIter,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub enum AccessKind {
    INST_ACC_R,
    DATA_ACC_R,
    DATA_ACC_W,
    L1_WRBK_ACC,
    L2_WRBK_ACC,
}

impl AccessKind {
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            AccessKind::DATA_ACC_W | AccessKind::L1_WRBK_ACC | AccessKind::L2_WRBK_ACC
        )
    }

    #[must_use]
    pub fn is_writeback(self) -> bool {
        matches!(self, AccessKind::L1_WRBK_ACC | AccessKind::L2_WRBK_ACC)
    }
}

impl From<AccessKind> for stats::cache::AccessKind {
    fn from(kind: AccessKind) -> Self {
        match kind {
            AccessKind::INST_ACC_R => Self::INST_ACC_R,
            AccessKind::DATA_ACC_R => Self::DATA_ACC_R,
            AccessKind::DATA_ACC_W => Self::DATA_ACC_W,
            AccessKind::L1_WRBK_ACC => Self::L1_WRBK_ACC,
            AccessKind::L2_WRBK_ACC => Self::L2_WRBK_ACC,
        }
    }
}

/// Scheduling source of a DRAM request (drives the last FR-FCFS tie break).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    FETCH,
    MEMORY,
}

static MEM_FETCH_UID: atomic::AtomicU64 = atomic::AtomicU64::new(0);

pub fn generate_uid() -> u64 {
    MEM_FETCH_UID.fetch_add(1, atomic::Ordering::SeqCst)
}

/// A single request travelling between the L2 and DRAM.
///
/// `addr` is always line-aligned by the issuing component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemFetch {
    pub uid: u64,
    pub addr: address,
    pub kind: AccessKind,
    pub core_id: Option<usize>,
    pub physical_addr: mcu::PhysicalAddress,
}

impl MemFetch {
    #[must_use]
    pub fn new(addr: address, kind: AccessKind, core_id: Option<usize>) -> Self {
        Self {
            uid: generate_uid(),
            addr,
            kind,
            core_id,
            physical_addr: mcu::to_physical_address(addr),
        }
    }

    #[must_use]
    pub fn is_write(&self) -> bool {
        self.kind.is_write()
    }

    /// Instruction fetch misses lose the last FR-FCFS tie break.
    #[must_use]
    pub fn source(&self) -> Source {
        match self.kind {
            AccessKind::INST_ACC_R => Source::FETCH,
            _ => Source::MEMORY,
        }
    }
}

impl std::fmt::Display for MemFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}({:#010x})", self.kind, self.addr)
    }
}
