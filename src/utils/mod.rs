//! Shared utilities

pub mod command;
pub mod error;
