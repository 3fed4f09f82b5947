//! State for one planning run

use crate::config::SelectionConfig;
use crate::controller::TargetController;
use crate::model::{Logical, Size, Target, Zpool};
use crate::pool::registry::Registry;
use crate::utils::command::CommandRunner;

/// Everything one run reads and writes, built fresh per run.
///
/// The discovered target is only read; all changes go to `desired`.
pub struct PlanningContext<'a> {
    pub discovered: &'a Target,
    pub controller: &'a dyn TargetController,
    pub registry: Registry,
    pub runner: CommandRunner,
    pub desired: Target,
}

impl<'a> PlanningContext<'a> {
    pub fn new(
        discovered: &'a Target,
        controller: &'a dyn TargetController,
        config: SelectionConfig,
    ) -> Self {
        Self {
            discovered,
            controller,
            registry: Registry::new(),
            runner: CommandRunner::new(config.dry_run),
            desired: Target::default(),
        }
    }

    pub fn minimum_size(&self) -> Size {
        self.controller.minimum_target_size()
    }

    pub fn discovered_pool(&self, name: &str) -> Option<&'a Zpool> {
        let discovered: &'a Target = self.discovered;
        discovered.logical.as_ref()?.find_zpool(name)
    }

    pub fn planned_pool(&self, name: &str) -> Option<&Zpool> {
        self.desired.logical.as_ref()?.find_zpool(name)
    }

    pub fn logical_mut(&mut self) -> &mut Logical {
        self.desired.logical.get_or_insert_with(Logical::default)
    }

    /// Preserved or used as-is in the plan
    pub fn pool_is_preserved(&self, name: &str) -> bool {
        self.planned_pool(name).is_some_and(Zpool::is_preserved)
    }

    pub fn root_pool(&self) -> Option<&Zpool> {
        self.desired.logical.as_ref()?.root_pool()
    }
}
