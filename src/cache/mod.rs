pub mod block;
pub mod l1;
pub mod l2;
pub mod replacement;

pub use l1::L1Cache;
pub use l2::L2Cache;

/// Outcome of a cache access.
#[derive(Debug, strum::EnumIter, Clone, Copy, Hash, PartialEq, Eq)]
pub enum RequestStatus {
    HIT = 0,
    MISS,
    /// Merged into an already outstanding miss for the same line.
    MSHR_HIT,
    /// Structural stall; the requester retries next cycle.
    RESERVATION_FAIL,
}

impl From<RequestStatus> for stats::cache::RequestStatus {
    fn from(status: RequestStatus) -> Self {
        match status {
            RequestStatus::HIT => Self::HIT,
            RequestStatus::MISS => Self::MISS,
            RequestStatus::MSHR_HIT => Self::MSHR_HIT,
            RequestStatus::RESERVATION_FAIL => Self::RESERVATION_FAIL,
        }
    }
}

/// Which half of a core's split L1.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum L1Kind {
    Instr,
    Data,
}

impl L1Kind {
    #[must_use]
    pub fn is_instr(self) -> bool {
        self == L1Kind::Instr
    }
}
