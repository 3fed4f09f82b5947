//! Checks run on the built desired target

use crate::disk::merge::required_label;
use crate::model::{Action, Be, LogicalChild, ZvolUse};
use crate::pool::swap::{provision_swap_dump, root_capacity};
use crate::selection::context::PlanningContext;
use crate::utils::error::{first_error, Result, SelectionError};
use tracing::{debug, info};

/// ValidateSwapDump: provision what is missing, then insist on it.
/// Without a root pool there is nowhere to put either; the pool check
/// reports that.
pub fn validate_swap_dump(ctx: &mut PlanningContext) -> Result<()> {
    provision_swap_dump(ctx)?;

    let Some(ref logical) = ctx.desired.logical else {
        return Ok(());
    };
    if logical.root_pool().is_none() {
        return Ok(());
    }
    if !logical.noswap && logical.zvols_with_use(ZvolUse::Swap).next().is_none() {
        return Err(SelectionError::MissingSwap);
    }
    if !logical.nodump && logical.zvols_with_use(ZvolUse::Dump).next().is_none() {
        return Err(SelectionError::MissingDump);
    }
    Ok(())
}

/// ValidateLogical: pool structure, the root pool singleton and its BE.
pub fn validate_logical(ctx: &mut PlanningContext) -> Result<()> {
    let logical = ctx
        .desired
        .logical
        .as_ref()
        .ok_or_else(|| SelectionError::NoRootPool("no pools are planned".to_string()))?;

    let mut errors = Vec::new();
    for pool in &logical.zpools {
        if pool.action == Action::Delete {
            continue;
        }
        if pool.top_level_vdevs().next().is_none() {
            errors.push(SelectionError::InvalidSpecification(format!(
                "zpool '{}' has no data vdev",
                pool.name
            )));
        }
        let singletons = [
            ("boot environment", pool.count_of(|c| matches!(c, LogicalChild::Be(_)))),
            ("pool options", pool.count_of(|c| matches!(c, LogicalChild::PoolOptions(_)))),
            ("dataset options", pool.count_of(|c| matches!(c, LogicalChild::DatasetOptions(_)))),
        ];
        for (what, count) in singletons {
            if count > 1 {
                errors.push(SelectionError::DuplicateName(format!(
                    "zpool '{}' has {} {} entries",
                    pool.name, count, what
                )));
            }
        }
    }
    first_error("logical", errors)?;

    let mut roots = logical.zpools.iter().filter(|p| p.is_root);
    let root = match (roots.next(), roots.next()) {
        (None, _) => {
            return Err(SelectionError::NoRootPool("no pool is marked as root".to_string()))
        }
        (Some(root), None) => root,
        (Some(a), Some(b)) => {
            return Err(SelectionError::NoRootPool(format!(
                "exactly one root pool is allowed, found '{}' and '{}'",
                a.name, b.name
            )))
        }
    };

    let capacity = root_capacity(ctx, root)?;
    let minimum = ctx.minimum_size();
    if capacity < minimum {
        return Err(SelectionError::InsufficientSpace(format!(
            "root pool '{}' holds {}, at least {} is needed",
            root.name,
            capacity.human(),
            minimum.human()
        )));
    }
    debug!("Root pool '{}' capacity {}", root.name, capacity.human());

    if root.bes().next().is_some() {
        return Ok(());
    }

    let name = ctx.controller.default_be_name();
    let taken = root.is_preserved()
        && ctx
            .discovered_pool(&root.name)
            .is_some_and(|p| p.bes().any(|b| b.name.as_deref() == Some(name.as_str())));
    if taken {
        return Err(SelectionError::NoBE(format!(
            "boot environment '{}' already exists in '{}', name a new one",
            name, root.name
        )));
    }

    let pool_name = root.name.clone();
    info!("Adding boot environment '{}' to '{}'", name, pool_name);
    ctx.registry.set_be(&pool_name, &name)?;
    if let Some(pool) = ctx.logical_mut().find_zpool_mut(&pool_name) {
        pool.children.push(LogicalChild::Be(Be {
            name: Some(name),
            mountpoint: None,
            exists: false,
        }));
    }
    Ok(())
}

/// ValidateDisks: pool references sit on leaves, disks that get new
/// partitions or slices are VTOC labeled, and a new root pool has a slice.
pub fn validate_disks(ctx: &mut PlanningContext) -> Result<()> {
    let tree = &ctx.desired.devices;
    for id in tree.walk() {
        if tree.has_children(id) && tree.get(id).has_logical_ref() {
            return Err(SelectionError::NotIdentifiable(format!(
                "{} has child devices and cannot itself be assigned to a pool",
                tree.full_name(id)
            )));
        }
    }

    let mut relabel = Vec::new();
    for disk in tree.disks() {
        let device = tree.get(*disk);
        if device.action == Action::Delete || !tree.has_children(*disk) {
            continue;
        }
        if let Some(label) = required_label(tree, *disk)? {
            relabel.push((*disk, label));
        }
    }
    for (disk, label) in relabel {
        let device = ctx.desired.devices.get_mut(disk);
        debug!("Labeling {} {:?}", device.name, label);
        if let Some(attrs) = device.as_disk_mut() {
            attrs.label = Some(label);
        }
    }

    let Some(root) = ctx.root_pool() else {
        return Ok(());
    };
    if root.action != Action::Create {
        return Ok(());
    }
    let tree = &ctx.desired.devices;
    let has_slice = tree.walk().into_iter().any(|id| {
        let device = tree.get(id);
        device.is_slice()
            && device.action != Action::Delete
            && device.in_zpool.as_deref() == Some(root.name.as_str())
    });
    if !has_slice {
        return Err(SelectionError::NoRootPool(format!(
            "root pool '{}' has no slice to live on",
            root.name
        )));
    }
    Ok(())
}

/// FinalCrossCheck: the desired target's own consistency sweep.
pub fn final_cross_check(ctx: &PlanningContext) -> Result<()> {
    let errors = ctx
        .desired
        .consistency_errors()
        .into_iter()
        .map(SelectionError::FinalValidationFailed)
        .collect();
    first_error("desired target", errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        partition_types, DeviceTree, DiskLabel, Logical, PhysicalDevice, PoolOptions, Redundancy,
        Size, Target, Vdev, Zpool,
    };
    use crate::testutil;

    /// rpool on c0t0d0s0, with the slice size given in GB
    fn planned(slice_gb: u64, pools: Vec<Zpool>) -> Target {
        let mut tree = DeviceTree::new();
        let sectors = Size::from_gb(slice_gb).sectors();
        let disk = tree.add_disk(PhysicalDevice::disk("c0t0d0").with_size(Size::from_gb(slice_gb)));
        let solaris = partition_types::SOLARIS2;
        let part = testutil::add_partition(&mut tree, disk, "1", solaris, 0, sectors);
        tree.add_child(
            part,
            PhysicalDevice::slice("0")
                .with_start(0)
                .with_size(Size::from_gb(slice_gb))
                .in_pool("rpool", "vdev"),
        );
        Target::new(
            tree,
            Some(Logical {
                zpools: pools,
                ..Default::default()
            }),
        )
    }

    fn rpool() -> Zpool {
        Zpool::new("rpool", Action::Create, true)
            .with_child(LogicalChild::Vdev(Vdev::new("vdev", Redundancy::None)))
    }

    fn with_desired<T>(desired: Target, f: impl FnOnce(&mut PlanningContext) -> T) -> T {
        let discovered = testutil::inventory(&[("c0t0d0", 40)]);
        let controller = testutil::controller(&discovered);
        let mut ctx = testutil::context(&discovered, &controller);
        ctx.desired = desired;
        f(&mut ctx)
    }

    #[test]
    fn missing_swap_is_reported() {
        // too small for swap and dump on top of the install
        let err = with_desired(planned(6, vec![rpool()]), validate_swap_dump).unwrap_err();
        assert!(matches!(err, SelectionError::MissingSwap));

        let mut target = planned(6, vec![rpool()]);
        target.logical.as_mut().unwrap().noswap = true;
        let err = with_desired(target, validate_swap_dump).unwrap_err();
        assert!(matches!(err, SelectionError::MissingDump));

        let mut target = planned(6, vec![rpool()]);
        let logical = target.logical.as_mut().unwrap();
        logical.noswap = true;
        logical.nodump = true;
        assert!(with_desired(target, validate_swap_dump).is_ok());
    }

    #[test]
    fn exactly_one_root_pool() {
        let data = Zpool::new("tank", Action::Create, false)
            .with_child(LogicalChild::Vdev(Vdev::new("v", Redundancy::None)));
        assert!(matches!(
            with_desired(planned(40, vec![data]), validate_logical),
            Err(SelectionError::NoRootPool(_))
        ));

        let mut second = rpool();
        second.name = "rpool2".to_string();
        assert!(matches!(
            with_desired(planned(40, vec![rpool(), second]), validate_logical),
            Err(SelectionError::NoRootPool(_))
        ));
    }

    #[test]
    fn pools_need_a_data_vdev_and_single_options() {
        let bare = Zpool::new("tank", Action::Create, false);
        assert!(matches!(
            with_desired(planned(40, vec![rpool(), bare]), validate_logical),
            Err(SelectionError::InvalidSpecification(_))
        ));

        let doubled = rpool()
            .with_child(LogicalChild::PoolOptions(PoolOptions::default()))
            .with_child(LogicalChild::PoolOptions(PoolOptions::default()));
        assert!(matches!(
            with_desired(planned(40, vec![doubled]), validate_logical),
            Err(SelectionError::DuplicateName(_))
        ));

        // deleted pools are exempt
        let gone = Zpool::new("old", Action::Delete, false);
        assert!(with_desired(planned(40, vec![rpool(), gone]), validate_logical).is_ok());
    }

    #[test]
    fn small_root_pool_is_rejected() {
        assert!(matches!(
            with_desired(planned(4, vec![rpool()]), validate_logical),
            Err(SelectionError::InsufficientSpace(_))
        ));
    }

    #[test]
    fn boot_environment_is_synthesized() {
        let desired = with_desired(planned(40, vec![rpool()]), |ctx| {
            validate_logical(ctx).unwrap();
            ctx.desired.clone()
        });
        let rpool = desired.logical.unwrap().zpools.remove(0);
        let be = rpool.bes().next().unwrap();
        assert_eq!(be.name.as_deref(), Some("solaris"));
        assert!(!be.exists);
    }

    #[test]
    fn disks_get_vtoc_labels_and_root_slices() {
        let desired = with_desired(planned(40, vec![rpool()]), |ctx| {
            validate_disks(ctx).unwrap();
            ctx.desired.clone()
        });
        let disk = desired.devices.disks()[0];
        assert_eq!(
            desired.devices.get(disk).as_disk().unwrap().label,
            Some(DiskLabel::Vtoc)
        );

        let mut target = planned(40, vec![rpool()]);
        let disk = target.devices.disks()[0];
        let part = target.devices.children(disk)[0];
        let slice = target.devices.children(part)[0];
        target.devices.get_mut(slice).clear_logical_ref();
        assert!(matches!(
            with_desired(target, validate_disks),
            Err(SelectionError::NoRootPool(_))
        ));
    }

    #[test]
    fn final_check_reports_first_problem() {
        let mut target = planned(40, vec![rpool()]);
        let disk = target.devices.disks()[0];
        target
            .devices
            .add_child(disk, PhysicalDevice::slice("7").in_pool("ghost", "vdev"));
        let err = with_desired(target, |ctx| final_cross_check(ctx)).unwrap_err();
        assert!(matches!(err, SelectionError::FinalValidationFailed(ref m) if m.contains("ghost")));

    }
}
