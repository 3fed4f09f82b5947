//! Swap and dump volumes for the root pool

use crate::controller::SwapDumpType;
use crate::model::{LogicalChild, Size, Zpool, Zvol, ZvolUse};
use crate::pool::redundancy::pool_capacity;
use crate::selection::context::PlanningContext;
use crate::utils::error::Result;
use tracing::{debug, info, warn};

/// Capacity of the planned root pool. Kept pools are measured on the
/// discovered devices, new ones on the desired layout.
pub fn root_capacity(ctx: &PlanningContext, root: &Zpool) -> Result<Size> {
    match ctx.discovered_pool(&root.name) {
        Some(found) if root.is_preserved() => pool_capacity(&ctx.discovered.devices, found),
        _ => pool_capacity(&ctx.desired.devices, root),
    }
}

/// Add swap and dump volumes to the root pool when the plan lacks them.
///
/// Sizing failures are not fatal here: the missing volumes are reported by
/// the swap/dump check that runs afterwards.
pub fn provision_swap_dump(ctx: &mut PlanningContext) -> Result<()> {
    let Some(ref logical) = ctx.desired.logical else {
        return Ok(());
    };
    let want_swap = !logical.noswap && logical.zvols_with_use(ZvolUse::Swap).next().is_none();
    let want_dump = !logical.nodump && logical.zvols_with_use(ZvolUse::Dump).next().is_none();
    if !want_swap && !want_dump {
        return Ok(());
    }

    let Some(root) = logical.root_pool() else {
        return Ok(());
    };

    let capacity = root_capacity(ctx, root)?;
    let sizes = match ctx
        .controller
        .calc_swap_dump_size(ctx.minimum_size(), capacity)
    {
        Ok(sizes) => sizes,
        Err(e) => {
            warn!("Cannot size swap and dump for '{}': {}", root.name, e);
            return Ok(());
        }
    };

    let mut volumes = Vec::new();
    if want_swap && sizes.swap_type == SwapDumpType::Volume {
        volumes.push((unique_name(ctx, root, "swap")?, ZvolUse::Swap, sizes.swap_size));
    }
    if want_dump && sizes.dump_type == SwapDumpType::Volume {
        volumes.push((unique_name(ctx, root, "dump")?, ZvolUse::Dump, sizes.dump_size));
    }
    let pool_name = root.name.clone();

    for (name, usage, size) in volumes {
        info!("Adding {} volume {}/{} ({})", usage, pool_name, name, size.human());
        ctx.registry.add_dataset(&pool_name, &name)?;
        if let Some(pool) = ctx.logical_mut().find_zpool_mut(&pool_name) {
            pool.children
                .push(LogicalChild::Zvol(Zvol::new(&name, usage, size)));
        }
    }
    Ok(())
}

/// `base`, `base1`, `base2`... whichever is free in the plan and on the system
fn unique_name(ctx: &PlanningContext, pool: &Zpool, base: &str) -> Result<String> {
    let taken = |name: &str| -> Result<bool> {
        if pool.has_dataset(name) || ctx.registry.has_dataset(&pool.name, name) {
            return Ok(true);
        }
        ctx.runner.dataset_exists(&format!("{}/{}", pool.name, name))
    };

    let mut name = base.to_string();
    let mut n = 1;
    while taken(&name)? {
        debug!("Dataset {}/{} is taken", pool.name, name);
        name = format!("{}{}", base, n);
        n += 1;
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, DeviceTree, Logical, PhysicalDevice, Redundancy, Target, Vdev};
    use crate::testutil;
    use crate::utils::command::CommandRunner;
    use crate::utils::error::SelectionError;

    fn desired(root_gb: u64, children: Vec<LogicalChild>) -> Target {
        let mut tree = DeviceTree::new();
        tree.add_disk(
            PhysicalDevice::disk("c0t0d0")
                .with_size(Size::from_gb(root_gb))
                .whole()
                .in_pool("rpool", "vdev"),
        );
        let mut pool = Zpool::new("rpool", Action::Create, true)
            .with_child(LogicalChild::Vdev(Vdev::new("vdev", Redundancy::None)));
        pool.children.extend(children);
        Target::new(
            tree,
            Some(Logical {
                zpools: vec![pool],
                ..Default::default()
            }),
        )
    }

    fn provision(target: Target) -> Target {
        let discovered = testutil::inventory(&[("c0t0d0", 40)]);
        let controller = testutil::controller(&discovered);
        let mut ctx = testutil::context(&discovered, &controller);
        ctx.desired = target;
        provision_swap_dump(&mut ctx).unwrap();
        ctx.desired
    }

    #[test]
    fn adds_both_volumes() {
        let target = provision(desired(40, Vec::new()));
        let logical = target.logical.unwrap();
        let swap = logical.zvols_with_use(ZvolUse::Swap).next().unwrap();
        assert_eq!(swap.name, "swap");
        assert_eq!(swap.size, Some(Size::from_gb(2)));
        assert_eq!(logical.zvols_with_use(ZvolUse::Dump).next().unwrap().name, "dump");
    }

    #[test]
    fn names_avoid_existing_datasets() {
        let taken = Zvol::new("swap", ZvolUse::None, Size::from_gb(1));
        let target = provision(desired(40, vec![LogicalChild::Zvol(taken)]));
        let logical = target.logical.unwrap();
        assert_eq!(logical.zvols_with_use(ZvolUse::Swap).next().unwrap().name, "swap1");
    }

    #[test]
    fn respects_noswap_and_existing_volumes() {
        let mut target = desired(40, vec![LogicalChild::Zvol(Zvol::new(
            "mydump",
            ZvolUse::Dump,
            Size::from_gb(1),
        ))]);
        target.logical.as_mut().unwrap().noswap = true;
        let logical = provision(target).logical.unwrap();
        assert_eq!(logical.zvols_with_use(ZvolUse::Swap).count(), 0);
        assert_eq!(logical.zvols_with_use(ZvolUse::Dump).count(), 1);
    }

    #[test]
    fn dataset_lookup_errors_are_returned() {
        let discovered = testutil::inventory(&[("c0t0d0", 40)]);
        let controller = testutil::controller(&discovered);
        let mut ctx = testutil::context(&discovered, &controller);
        ctx.runner = CommandRunner::new(false).with_zfs("/");
        ctx.desired = desired(40, Vec::new());
        let err = provision_swap_dump(&mut ctx).unwrap_err();
        assert!(matches!(err, SelectionError::Io(_)));
    }

    #[test]
    fn sizing_failure_is_not_fatal() {
        // below the install minimum: nothing added, no error
        let logical = provision(desired(4, Vec::new())).logical.unwrap();
        assert_eq!(logical.zvols_with_use(ZvolUse::Swap).count(), 0);
        assert_eq!(logical.zvols_with_use(ZvolUse::Dump).count(), 0);
    }
}
