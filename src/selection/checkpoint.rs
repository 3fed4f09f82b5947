//! The target selection step as the install pipeline drives it

use crate::config::SelectionConfig;
use crate::controller::TargetController;
use crate::model::Target;
use crate::selection::plan;
use crate::utils::error::Result;
use tracing::info;

/// Rough wall-clock cost of one run, in seconds
pub const PROGRESS_ESTIMATE_SECS: u32 = 1;

/// One target selection run: a specification, the system it is planned
/// against, and the policy used to fill in defaults.
pub struct TargetSelection {
    spec: Target,
    discovered: Target,
    controller: Box<dyn TargetController>,
    desired: Option<Target>,
}

impl TargetSelection {
    pub fn new(spec: Target, discovered: Target, controller: Box<dyn TargetController>) -> Self {
        Self {
            spec,
            discovered,
            controller,
            desired: None,
        }
    }

    /// Plan the desired target. On failure no plan is kept, and the step can
    /// be run again.
    pub fn execute(&mut self, dry_run: bool) -> Result<()> {
        info!("Running target selection{}", if dry_run { " (dry run)" } else { "" });
        self.desired = None;
        let desired = plan(
            &self.spec,
            &self.discovered,
            self.controller.as_ref(),
            SelectionConfig::new(dry_run),
        )?;
        self.desired = Some(desired);
        Ok(())
    }

    pub fn progress_estimate(&self) -> u32 {
        PROGRESS_ESTIMATE_SECS
    }

    pub fn discovered(&self) -> &Target {
        &self.discovered
    }

    /// The accepted plan, once `execute` has succeeded
    pub fn desired(&self) -> Option<&Target> {
        self.desired.as_ref()
    }

    pub fn into_desired(self) -> Option<Target> {
        self.desired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn execute_keeps_the_plan() {
        let discovered = testutil::inventory(&[("c0t0d0", 40)]);
        let controller = Box::new(testutil::controller(&discovered));
        let mut step = TargetSelection::new(Target::default(), discovered, controller);

        assert!(step.desired().is_none());
        step.execute(true).unwrap();
        assert_eq!(step.progress_estimate(), PROGRESS_ESTIMATE_SECS);
        let desired = step.into_desired().unwrap();
        assert!(desired.logical.unwrap().root_pool().is_some());
    }

    #[test]
    fn failed_run_leaves_no_plan() {
        let discovered = testutil::inventory(&[("c0t0d0", 2)]);
        let controller = Box::new(testutil::controller(&discovered));
        let mut step = TargetSelection::new(Target::default(), discovered, controller);

        assert!(step.execute(true).is_err());
        assert!(step.desired().is_none());
    }
}
