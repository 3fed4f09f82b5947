//! Physical planning: disk matching, merge, layouts and geometry

pub mod gaps;
pub mod layouts;
pub mod matching;
pub mod merge;
