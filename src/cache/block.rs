use crate::address;
use bitvec::vec::BitVec;

/// MESI coherence state of a cache line.
///
/// The single-core build uses the natural subset: `EXCLUSIVE` is a clean
/// valid line and `MODIFIED` a dirty one.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum State {
    INVALID = 0,
    SHARED,
    EXCLUSIVE,
    MODIFIED,
}

/// One cache line: tag, coherence state, data, replacement metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub tag: address,
    pub block_addr: address,
    pub state: State,
    pub alloc_time: u64,
    pub last_access_time: u64,
    /// re-reference prediction value, used by DRRIP only
    pub rrpv: u8,
    data: Vec<u8>,
    dirty_mask: BitVec<u8>,
}

impl std::fmt::Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Line")
            .field("addr", &self.block_addr)
            .field("state", &self.state)
            .finish()
    }
}

impl Line {
    #[must_use]
    pub fn new(line_size: usize) -> Self {
        Self {
            tag: 0,
            block_addr: 0,
            state: State::INVALID,
            alloc_time: 0,
            last_access_time: 0,
            rrpv: 0,
            data: vec![0; line_size],
            dirty_mask: BitVec::repeat(false, line_size),
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state != State::INVALID
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.state == State::MODIFIED
    }

    /// A line is dirty once any of its bytes diverged from the backing store.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty_mask.any()
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Install new contents. Invariant: `INVALID` implies clean, so the dirty
    /// mask is reset here and set again by the caller where appropriate.
    pub fn allocate(
        &mut self,
        tag: address,
        block_addr: address,
        data: &[u8],
        state: State,
        time: u64,
    ) {
        self.tag = tag;
        self.block_addr = block_addr;
        self.state = state;
        self.alloc_time = time;
        self.last_access_time = time;
        self.data.copy_from_slice(data);
        self.dirty_mask.fill(false);
    }

    pub fn invalidate(&mut self) {
        self.state = State::INVALID;
        self.dirty_mask.fill(false);
    }

    pub fn mark_dirty(&mut self) {
        self.dirty_mask.fill(true);
    }

    pub fn clear_dirty(&mut self) {
        self.dirty_mask.fill(false);
    }

    /// Little-endian word at a byte offset inside the line.
    #[must_use]
    pub fn read_word(&self, offset: usize) -> u32 {
        let offset = offset & !3;
        let bytes = &self.data[offset..offset + 4];
        u32::from_le_bytes(bytes.try_into().unwrap())
    }

    /// Write a little-endian word and mark its bytes dirty.
    pub fn write_word(&mut self, offset: usize, value: u32) {
        let offset = offset & !3;
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        self.dirty_mask[offset..offset + 4].fill(true);
    }

    /// Overwrite the whole line payload and mark it dirty (L1 writebacks).
    pub fn write_data(&mut self, data: &[u8]) {
        self.data.copy_from_slice(data);
        self.dirty_mask.fill(true);
    }

    /// Overwrite the payload without touching the dirty mask (clean refills).
    pub fn fill_data(&mut self, data: &[u8]) {
        self.data.copy_from_slice(data);
    }
}
