//! Logical planning: pool merge, device membership, redundancy, swap/dump

pub mod identify;
pub mod merge;
pub mod redundancy;
pub mod registry;
pub mod swap;

pub use registry::Registry;
