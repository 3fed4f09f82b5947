//! target-selection library - plans the desired install target from a
//! manifest and the discovered system

pub mod config;
pub mod controller;
pub mod disk;
pub mod model;
pub mod pool;
pub mod selection;
pub mod utils;

#[cfg(test)]
mod testutil;

pub use config::{ControllerConfig, TargetDoc};
pub use controller::{DefaultController, TargetController};
pub use model::Target;
pub use selection::{plan, TargetSelection};
pub use utils::error::{Result, SelectionError};
