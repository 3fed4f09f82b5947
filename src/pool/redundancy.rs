//! Redundancy group rules and pool capacity

use crate::model::{DeviceId, DeviceTree, Redundancy, Size, Vdev, Zpool};
use crate::pool::identify::collect_vdev_devices;
use crate::selection::context::PlanningContext;
use crate::utils::error::{Result, SelectionError};
use std::iter;
use tracing::{debug, info};

/// Smallest device a data-holding vdev accepts
pub const MIN_VDEV_DEVICE_SIZE: Size = Size::from_mb(64);

/// Check one vdev against the devices assigned to it.
///
/// Returns the redundancy to keep, which differs from the declared one when
/// an automatic correction applies: root pool vdevs become `mirror` with
/// several devices and `none` with one, and a synthesized mirror with a
/// single device becomes `none`.
pub fn validate_vdev(
    ctx: &PlanningContext,
    pool: &Zpool,
    vdev: &Vdev,
    devices: &[DeviceId],
) -> Result<Redundancy> {
    let tree = &ctx.desired.devices;
    let label = format!("{}:{}", pool.name, vdev.name);
    let count = devices.len();
    let mut redundancy = vdev.redundancy;

    let count_error =
        |redundancy: Redundancy, required: usize| SelectionError::RedundancyDeviceCount {
            vdev: label.clone(),
            redundancy: redundancy.to_string(),
            required,
            found: count,
        };

    if count == 0 {
        return Err(count_error(redundancy, redundancy.required_devices().max(1)));
    }

    if pool.is_root {
        if redundancy.is_raidz() {
            return Err(SelectionError::InvalidRootRedundancy {
                pool: pool.name.clone(),
                redundancy: redundancy.to_string(),
            });
        }
        if matches!(redundancy, Redundancy::Log | Redundancy::Logmirror) {
            return Err(SelectionError::InvalidRootVdev {
                pool: pool.name.clone(),
                vdev: vdev.name.clone(),
                redundancy: redundancy.to_string(),
            });
        }
        if count > 1 && redundancy == Redundancy::None {
            info!("Root pool vdev {} has {} devices, mirroring them", label, count);
            redundancy = Redundancy::Mirror;
        } else if count == 1 && redundancy == Redundancy::Mirror {
            info!("Root pool vdev {} has a single device, not mirrored", label);
            redundancy = Redundancy::None;
        }
    }

    let required = redundancy.required_devices();
    if count < required {
        if count == 1 && vdev.synthesized && redundancy == Redundancy::Mirror {
            debug!("Synthesized vdev {} has one device, using no redundancy", label);
            redundancy = Redundancy::None;
        } else {
            return Err(count_error(redundancy, required));
        }
    }

    if redundancy.is_top_level() {
        for id in devices {
            if let Some(size) = tree.get(*id).size {
                if size < MIN_VDEV_DEVICE_SIZE {
                    return Err(SelectionError::InsufficientSpace(format!(
                        "{} is {}, members of {} need at least {}",
                        tree.full_name(*id),
                        size.human(),
                        label,
                        MIN_VDEV_DEVICE_SIZE.human()
                    )));
                }
            }
        }
    }

    for id in devices {
        check_not_in_use(ctx, Some(&pool.name), *id)?;
    }

    Ok(redundancy)
}

/// A device whose discovered counterpart (or anything on it) belongs to a
/// pool that the plan keeps, or does not mention, cannot be reused. Members
/// of `pool` itself are exempt.
pub fn check_not_in_use(ctx: &PlanningContext, pool: Option<&str>, id: DeviceId) -> Result<()> {
    let full = ctx.desired.devices.full_name(id);
    let discovered = &ctx.discovered.devices;
    let Some(found) = discovered.find_by_full_name(&full) else {
        return Ok(());
    };

    for d in iter::once(found).chain(discovered.descendants(found)) {
        let Some(ref other) = discovered.get(d).in_zpool else {
            continue;
        };
        if Some(other.as_str()) == pool {
            continue;
        }
        let claimed = ctx.planned_pool(other).map_or(true, Zpool::is_preserved);
        if claimed {
            return Err(SelectionError::DeviceAlreadyInUse(format!(
                "{} belongs to zpool '{}'",
                discovered.full_name(d),
                other
            )));
        }
    }
    Ok(())
}

/// Validate every vdev of every pool the plan builds, applying corrections.
/// Preserved and deleted pools are left alone.
pub fn validate_pools(ctx: &mut PlanningContext) -> Result<()> {
    let mut corrections = Vec::new();

    if let Some(ref logical) = ctx.desired.logical {
        for (p, pool) in logical.zpools.iter().enumerate() {
            if pool.is_preserved() || pool.action == crate::model::Action::Delete {
                continue;
            }
            for vdev in pool.vdevs() {
                let devices = collect_vdev_devices(&ctx.desired.devices, &pool.name, &vdev.name)?;
                let redundancy = validate_vdev(ctx, pool, vdev, &devices)?;
                debug!(
                    "Vdev {}:{} ({}) has {} device(s)",
                    pool.name,
                    vdev.name,
                    redundancy,
                    devices.len()
                );
                if redundancy != vdev.redundancy {
                    corrections.push((p, vdev.name.clone(), redundancy));
                }
            }
        }
    }

    for (p, name, redundancy) in corrections {
        let pool = &mut ctx.logical_mut().zpools[p];
        if let Some(vdev) = pool.find_vdev_mut(&name) {
            vdev.redundancy = redundancy;
        }
    }
    Ok(())
}

/// Usable space of a vdev built from devices of the given sizes
pub fn vdev_capacity(redundancy: Redundancy, sizes: &[Size]) -> Size {
    let Some(smallest) = sizes.iter().min().copied() else {
        return Size::ZERO;
    };
    match redundancy {
        Redundancy::None => sizes.iter().copied().sum(),
        Redundancy::Mirror => smallest,
        Redundancy::Raidz1 | Redundancy::Raidz2 | Redundancy::Raidz3 => {
            let data = sizes.len().saturating_sub(redundancy.parity()) as u64;
            Size::from_sectors(smallest.sectors() * data)
        }
        _ => Size::ZERO,
    }
}

/// Usable space of a pool's data vdevs, with devices looked up in `tree`
pub fn pool_capacity(tree: &DeviceTree, pool: &Zpool) -> Result<Size> {
    let mut total = Size::ZERO;
    for vdev in pool.top_level_vdevs() {
        let sizes: Vec<Size> = collect_vdev_devices(tree, &pool.name, &vdev.name)?
            .iter()
            .filter_map(|d| tree.get(*d).size)
            .collect();
        total += vdev_capacity(vdev.redundancy, &sizes);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Logical, LogicalChild, PhysicalDevice, Target};
    use crate::testutil;

    /// Whole disks of `gb` each, all in pool:vdev
    fn planned(pool: Zpool, vdev: &str, disks: &[u64]) -> (Target, Vec<DeviceId>) {
        let mut tree = crate::model::DeviceTree::new();
        let ids = disks
            .iter()
            .enumerate()
            .map(|(i, gb)| {
                tree.add_disk(
                    PhysicalDevice::disk(&format!("c1t{}d0", i))
                        .with_size(Size::from_gb(*gb))
                        .whole()
                        .in_pool(&pool.name, vdev),
                )
            })
            .collect();
        let logical = Logical {
            zpools: vec![pool],
            ..Default::default()
        };
        (Target::new(tree, Some(logical)), ids)
    }

    fn check(pool: Zpool, vdev: Vdev, disks: &[u64]) -> Result<Redundancy> {
        let discovered = testutil::inventory(&[("c0t0d0", 40)]);
        let controller = testutil::controller(&discovered);
        let mut ctx = testutil::context(&discovered, &controller);
        let pool = pool.with_child(LogicalChild::Vdev(vdev.clone()));
        let (desired, ids) = planned(pool.clone(), &vdev.name, disks);
        ctx.desired = desired;
        validate_vdev(&ctx, &pool, &vdev, &ids)
    }

    fn tank() -> Zpool {
        Zpool::new("tank", Action::Create, false)
    }

    fn rpool() -> Zpool {
        Zpool::new("rpool", Action::Create, true)
    }

    #[test]
    fn raidz2_needs_three_devices() {
        let err = check(tank(), Vdev::new("v", Redundancy::Raidz2), &[10, 10]).unwrap_err();
        match err {
            SelectionError::RedundancyDeviceCount { required, found, .. } => {
                assert_eq!(required, 3);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            check(tank(), Vdev::new("v", Redundancy::Raidz2), &[10, 10, 10]).unwrap(),
            Redundancy::Raidz2
        );
    }

    #[test]
    fn empty_vdev_is_rejected() {
        assert!(matches!(
            check(tank(), Vdev::new("v", Redundancy::None), &[]),
            Err(SelectionError::RedundancyDeviceCount { found: 0, .. })
        ));
    }

    #[test]
    fn single_device_mirror() {
        assert!(matches!(
            check(tank(), Vdev::new("v", Redundancy::Mirror), &[10]),
            Err(SelectionError::RedundancyDeviceCount { required: 2, .. })
        ));

        let mut synthesized = Vdev::new("v", Redundancy::Mirror);
        synthesized.synthesized = true;
        assert_eq!(check(tank(), synthesized, &[10]).unwrap(), Redundancy::None);
    }

    #[test]
    fn root_pool_restrictions() {
        assert!(matches!(
            check(rpool(), Vdev::new("v", Redundancy::Raidz1), &[10, 10, 10]),
            Err(SelectionError::InvalidRootRedundancy { .. })
        ));
        assert!(matches!(
            check(rpool(), Vdev::new("v", Redundancy::Raidz1), &[10]),
            Err(SelectionError::InvalidRootRedundancy { .. })
        ));
        assert!(matches!(
            check(rpool(), Vdev::new("l", Redundancy::Log), &[10]),
            Err(SelectionError::InvalidRootVdev { .. })
        ));
    }

    #[test]
    fn root_pool_corrections() {
        assert_eq!(
            check(rpool(), Vdev::new("v", Redundancy::None), &[10, 10]).unwrap(),
            Redundancy::Mirror
        );
        assert_eq!(
            check(rpool(), Vdev::new("v", Redundancy::Mirror), &[10]).unwrap(),
            Redundancy::None
        );
    }

    #[test]
    fn tiny_devices_are_rejected() {
        let discovered = testutil::inventory(&[("c0t0d0", 40)]);
        let controller = testutil::controller(&discovered);
        let mut ctx = testutil::context(&discovered, &controller);
        let vdev = Vdev::new("v", Redundancy::None);
        let pool = tank().with_child(LogicalChild::Vdev(vdev.clone()));
        let mut tree = crate::model::DeviceTree::new();
        let id = tree.add_disk(
            PhysicalDevice::disk("c1t0d0")
                .with_size(Size::from_mb(32))
                .whole()
                .in_pool("tank", "v"),
        );
        ctx.desired = Target::new(tree, None);
        assert!(matches!(
            validate_vdev(&ctx, &pool, &vdev, &[id]),
            Err(SelectionError::InsufficientSpace(_))
        ));
    }

    #[test]
    fn devices_of_foreign_pools_are_in_use() {
        let mut discovered = testutil::inventory(&[("c0t0d0", 40), ("c1t0d0", 40)]);
        let disk = discovered.devices.find_disk("c1t0d0").unwrap();
        testutil::add_solaris_layout(&mut discovered.devices, disk, Some(("data", "vdev")));

        let controller = testutil::controller(&discovered);
        let mut ctx = testutil::context(&discovered, &controller);
        let vdev = Vdev::new("v", Redundancy::None);
        let pool = tank().with_child(LogicalChild::Vdev(vdev.clone()));
        let (desired, ids) = planned(pool.clone(), "v", &[40]);
        ctx.desired = desired;

        assert!(matches!(
            validate_vdev(&ctx, &pool, &vdev, &ids),
            Err(SelectionError::DeviceAlreadyInUse(_))
        ));

        // destroying the other pool releases the device
        ctx.logical_mut()
            .zpools
            .push(Zpool::new("data", Action::Delete, false));
        assert!(validate_vdev(&ctx, &pool, &vdev, &ids).is_ok());
    }

    #[test]
    fn capacity_by_redundancy() {
        let sizes = [Size::from_gb(10), Size::from_gb(20), Size::from_gb(30)];
        assert_eq!(vdev_capacity(Redundancy::None, &sizes), Size::from_gb(60));
        assert_eq!(vdev_capacity(Redundancy::Mirror, &sizes), Size::from_gb(10));
        assert_eq!(vdev_capacity(Redundancy::Raidz1, &sizes), Size::from_gb(20));
        assert_eq!(vdev_capacity(Redundancy::Spare, &sizes), Size::ZERO);
        assert_eq!(vdev_capacity(Redundancy::Mirror, &[]), Size::ZERO);

        let (target, _) = planned(
            rpool().with_child(LogicalChild::Vdev(Vdev::new("v", Redundancy::Mirror))),
            "v",
            &[10, 20],
        );
        let pool = target.logical.as_ref().unwrap().zpools[0].clone();
        assert_eq!(pool_capacity(&target.devices, &pool).unwrap(), Size::from_gb(10));
    }
}
