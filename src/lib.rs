#![allow(
    non_camel_case_types,
    clippy::upper_case_acronyms,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod config;
pub mod dram;
pub mod fifo;
pub mod mcu;
pub mod mem;
pub mod mem_fetch;
pub mod mshr;
pub mod sim;
pub mod tag_array;

pub use mem::MainMemory;
pub use sim::{Reply, Simulator};

/// Physical addresses are 32 bit.
pub type address = u32;
