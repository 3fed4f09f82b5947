//! Default disk layouts
//!
//! Root pools live on a VTOC slice inside a Solaris fdisk partition. The
//! default layout builds that chain on a disk, leaving geometry unresolved so
//! the gap allocator sizes it from whatever space is free.

use crate::model::physical::{partition_types, BOOTID_ACTIVE, MAX_PRIMARY_PARTITIONS};
use crate::model::{Action, DeviceId, DeviceTree, DiskLabel, PhysicalDevice};
use crate::utils::error::{Result, SelectionError};
use tracing::{debug, info};

/// Slice that holds the root pool
pub const ROOT_SLICE: &str = "0";

/// Build the default Solaris partition + root slice on `disk`.
///
/// With `use_whole_disk`, existing children are discarded and the disk is
/// relabeled. Otherwise an existing Solaris partition is reused, or a new one
/// is placed in the first free primary slot.
pub fn apply_solaris_layout(
    tree: &mut DeviceTree,
    disk: DeviceId,
    use_whole_disk: bool,
    in_zpool: &str,
    in_vdev: &str,
) -> Result<()> {
    let disk_name = tree.get(disk).name.clone();
    info!(
        "Applying default layout to {} ({}, pool {}/{})",
        disk_name,
        if use_whole_disk { "whole disk" } else { "free space" },
        in_zpool,
        in_vdev
    );

    {
        let device = tree.get_mut(disk);
        device.clear_logical_ref();
        if let Some(attrs) = device.as_disk_mut() {
            attrs.label = Some(DiskLabel::Vtoc);
            if use_whole_disk {
                attrs.whole_disk = true;
            }
        }
    }

    if use_whole_disk {
        tree.clear_children(disk);
    }

    let partition = match solaris_partition(tree, disk) {
        Some(existing) => {
            debug!("Reusing Solaris partition {}", tree.full_name(existing));
            tree.get_mut(existing).action = Action::UseExistingSolaris2;
            tree.clear_children(existing);
            existing
        }
        None => {
            let number = free_primary_number(tree, disk).ok_or_else(|| {
                SelectionError::InsufficientSpace(format!(
                    "no free primary partition slot on {}",
                    disk_name
                ))
            })?;
            let mut part =
                PhysicalDevice::partition(&number.to_string(), partition_types::SOLARIS2);
            if let Some(p) = part.as_partition_mut() {
                p.bootid = BOOTID_ACTIVE;
            }
            tree.add_child(disk, part)
        }
    };

    tree.add_child(
        partition,
        PhysicalDevice::slice(ROOT_SLICE).in_pool(in_zpool, in_vdev),
    );

    Ok(())
}

fn solaris_partition(tree: &DeviceTree, disk: DeviceId) -> Option<DeviceId> {
    tree.children(disk).iter().copied().find(|c| {
        let dev = tree.get(*c);
        dev.is_solaris() && dev.action != Action::Delete
    })
}

fn free_primary_number(tree: &DeviceTree, disk: DeviceId) -> Option<u32> {
    let used: Vec<u32> = tree
        .children(disk)
        .iter()
        .map(|c| tree.get(*c))
        .filter(|d| d.is_partition() && d.action != Action::Delete)
        .filter_map(|d| d.number())
        .collect();
    (1..=MAX_PRIMARY_PARTITIONS).find(|n| !used.contains(n))
}

/// Print a layout summary for one disk
pub fn print_layout_summary(tree: &DeviceTree, disk: DeviceId) {
    let device = tree.get(disk);
    println!(
        "\nDisk {} ({}{}):",
        device.name,
        device.size.map(|s| s.human()).unwrap_or_else(|| "?".to_string()),
        if device.is_whole_disk() { ", whole disk" } else { "" }
    );
    println!(
        "{:<14} {:<22} {:>12} {:>10} {:<16}",
        "DEVICE", "ACTION", "START", "SIZE", "POOL"
    );
    println!("{}", "-".repeat(78));

    for id in tree.descendants(disk) {
        let dev = tree.get(id);
        let pool = match (&dev.in_zpool, &dev.in_vdev) {
            (Some(p), Some(v)) => format!("{}/{}", p, v),
            (Some(p), None) => p.clone(),
            _ => "-".to_string(),
        };
        println!(
            "{:<14} {:<22} {:>12} {:>10} {:<16}",
            tree.full_name(id),
            dev.action.to_string(),
            dev.start_sector.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            dev.size.map(|s| s.human()).unwrap_or_else(|| "-".to_string()),
            pool
        );
    }
}
