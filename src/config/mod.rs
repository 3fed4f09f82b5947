//! Configuration and target documents

pub mod controller;
pub mod manifest;

pub use controller::ControllerConfig;
pub use manifest::TargetDoc;

/// Per-run planner settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionConfig {
    /// Plan without asking the live system anything
    pub dry_run: bool,
}

impl SelectionConfig {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}
