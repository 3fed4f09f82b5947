//! Pool membership of physical devices
//!
//! Only the lowest device in a disk/partition/slice chain may carry an
//! `(in_zpool, in_vdev)` reference.

use crate::model::{Action, DeviceId, DeviceTree};
use crate::pool::registry::Registry;
use crate::utils::error::{Result, SelectionError};
use tracing::debug;

fn has_children_error(tree: &DeviceTree, id: DeviceId) -> SelectionError {
    SelectionError::NotIdentifiable(format!(
        "{} has child devices and cannot itself be assigned to a pool",
        tree.full_name(id)
    ))
}

/// Resolve the `(pool, vdev)` a device belongs to.
///
/// A device naming only its pool is identifiable when that pool has exactly
/// one vdev; one naming only its vdev, when that vdev name exists in exactly
/// one pool. The missing half is written back onto the device. Anything
/// else is `None`, and the caller decides whether that is an error.
pub fn is_identifiable(
    registry: &Registry,
    tree: &mut DeviceTree,
    id: DeviceId,
) -> Result<Option<(String, String)>> {
    let device = tree.get(id);
    if tree.has_children(id) {
        if device.has_logical_ref() {
            return Err(has_children_error(tree, id));
        }
        return Ok(None);
    }

    let resolved = match (device.in_zpool.clone(), device.in_vdev.clone()) {
        (Some(pool), Some(vdev)) => registry.has_vdev(&pool, &vdev).then_some((pool, vdev)),
        (Some(pool), None) => match registry.vdevs_of(&pool) {
            [only] => Some((pool.clone(), only.clone())),
            _ => None,
        },
        (None, Some(vdev)) => match registry.pools_with_vdev(&vdev).as_slice() {
            [only] => Some((only.to_string(), vdev)),
            [] => None,
            many => {
                debug!(
                    "{}: vdev '{}' exists in pools {}",
                    tree.full_name(id),
                    vdev,
                    many.join(", ")
                );
                None
            }
        },
        (None, None) => None,
    };

    if let Some((ref pool, ref vdev)) = resolved {
        let device = tree.get_mut(id);
        if device.in_zpool.is_none() || device.in_vdev.is_none() {
            debug!("Back-filled {} into {}:{}", device.name, pool, vdev);
        }
        device.in_zpool = Some(pool.clone());
        device.in_vdev = Some(vdev.clone());
    }
    Ok(resolved)
}

/// Leaf devices assigned to `pool:vdev`, in tree order. Deleted devices are
/// skipped; a device with children that carries a reference is an error.
pub fn collect_vdev_devices(tree: &DeviceTree, pool: &str, vdev: &str) -> Result<Vec<DeviceId>> {
    let mut found = Vec::new();
    for disk in tree.disks() {
        collect(tree, *disk, pool, vdev, &mut found)?;
    }
    Ok(found)
}

fn collect(
    tree: &DeviceTree,
    id: DeviceId,
    pool: &str,
    vdev: &str,
    found: &mut Vec<DeviceId>,
) -> Result<()> {
    let device = tree.get(id);
    if device.action == Action::Delete {
        return Ok(());
    }

    if tree.has_children(id) {
        if device.has_logical_ref() {
            return Err(has_children_error(tree, id));
        }
        for child in tree.children(id) {
            collect(tree, *child, pool, vdev, found)?;
        }
    } else if device.in_zpool.as_deref() == Some(pool) && device.in_vdev.as_deref() == Some(vdev) {
        found.push(id);
    }
    Ok(())
}
