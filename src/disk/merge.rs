//! Merging specified disks with the discovered inventory
//!
//! Each specified disk is resolved to a discovered disk, which becomes the
//! starting point of the desired disk. Whole disks keep only what the
//! specification lists. Otherwise every specified partition or slice is
//! matched against its discovered counterpart by number, and discovered
//! devices the specification does not mention are carried over untouched.

use crate::disk::layouts::ROOT_SLICE;
use crate::disk::matching::resolve_disk;
use crate::model::{Action, DeviceId, DeviceTree, DiskLabel, PhysicalDevice, Target};
use crate::pool::redundancy::check_not_in_use;
use crate::selection::context::PlanningContext;
use crate::utils::error::{Result, SelectionError};
use tracing::{debug, info, warn};

/// Merge every disk of the specification into the desired tree.
pub fn merge_disks(ctx: &mut PlanningContext, spec: &DeviceTree) -> Result<()> {
    for disk in spec.disks() {
        merge_disk(ctx, spec, *disk)?;
    }
    Ok(())
}

/// Merge one specified disk, returning its id in the desired tree.
pub fn merge_disk<'a>(
    ctx: &mut PlanningContext<'a>,
    spec: &DeviceTree,
    spec_disk: DeviceId,
) -> Result<DeviceId> {
    let discovered: &'a Target = ctx.discovered;
    let dtree = &discovered.devices;
    let wanted = spec.get(spec_disk);
    let wanted_attrs = wanted.as_disk().cloned().unwrap_or_default();

    let found = resolve_disk(dtree, &wanted_attrs.ident)?;
    let ctd = dtree.get(found).name.clone();
    ctx.registry.add_disk(&ctd)?;

    let mut disk = dtree.get(found).clone();
    disk.action = wanted.action;
    disk.in_zpool = wanted.in_zpool.clone();
    disk.in_vdev = wanted.in_vdev.clone();
    if let Some(attrs) = disk.as_disk_mut() {
        attrs.whole_disk = wanted_attrs.whole_disk;
        // a wiped disk gets relabeled anyway
        if wanted_attrs.whole_disk || wanted_attrs.label.is_some() {
            attrs.label = wanted_attrs.label;
        }
    }
    let id = ctx.desired.devices.add_disk(disk);

    if wanted_attrs.whole_disk {
        info!("Using all of {}", ctd);
        check_not_in_use(ctx, wanted.in_zpool.as_deref(), id)?;
        for child in spec.children(spec_disk) {
            copy_new(ctx, spec, *child, id)?;
        }
    } else {
        merge_children(ctx, spec, spec_disk, found, id)?;
    }

    let extended = ctx
        .desired
        .devices
        .children(id)
        .iter()
        .filter(|c| {
            let dev = ctx.desired.devices.get(**c);
            dev.is_extended() && dev.action != Action::Delete
        })
        .count();
    if extended > 1 {
        return Err(SelectionError::TooManyExtendedPartitions(ctd));
    }

    Ok(id)
}

/// Add a specified device (and its subtree) whose parent is new or wiped.
/// Only newly created devices fit there.
fn copy_new(
    ctx: &mut PlanningContext,
    spec: &DeviceTree,
    spec_id: DeviceId,
    parent: DeviceId,
) -> Result<()> {
    let device = spec.get(spec_id);
    if device.action != Action::Create {
        return Err(SelectionError::InvalidSpecification(format!(
            "{} {} on {} cannot be {}: parent is new or being wiped",
            device.kind_name(),
            device.name,
            ctx.desired.devices.full_name(parent),
            device.action
        )));
    }
    let id = ctx.desired.devices.add_child(parent, device.clone());
    for child in spec.children(spec_id) {
        copy_new(ctx, spec, *child, id)?;
    }
    Ok(())
}

/// Merge the specified children of `spec_parent` with those of the
/// discovered `found`, then carry over what was left unmentioned.
fn merge_children<'a>(
    ctx: &mut PlanningContext<'a>,
    spec: &DeviceTree,
    spec_parent: DeviceId,
    found: DeviceId,
    parent: DeviceId,
) -> Result<()> {
    let discovered: &'a Target = ctx.discovered;
    let dtree = &discovered.devices;

    // recreating or deleting an extended partition takes its logicals with it
    let cascade = spec.children(spec_parent).iter().any(|c| {
        let device = spec.get(*c);
        matches!(device.action, Action::Create | Action::Delete)
            && dtree
                .find_child(found, &device.name)
                .is_some_and(|d| dtree.get(d).is_extended())
    });
    if cascade {
        debug!(
            "Extended partition on {} is replaced, dropping its logical partitions",
            dtree.full_name(found)
        );
    }

    let mut named = Vec::new();
    for child in spec.children(spec_parent) {
        let device = spec.get(*child);
        if cascade && device.is_logical() && device.action.keeps_existing() {
            return Err(SelectionError::InvalidSpecification(format!(
                "logical partition {} cannot be {} while its extended partition is replaced",
                device.name, device.action
            )));
        }
        let name = if device.is_partition() {
            merge_partition(ctx, spec, *child, found, parent)?
        } else {
            merge_slice(ctx, spec, *child, found, parent)?
        };
        named.push(name);
    }

    for child in dtree.children(found) {
        let device = dtree.get(*child);
        if named.contains(&device.name) {
            continue;
        }
        if cascade && device.is_logical() {
            continue;
        }
        carry_over(ctx, *child, parent);
    }
    Ok(())
}

/// Deep copy of a discovered device the specification leaves alone
fn carry_over<'a>(ctx: &mut PlanningContext<'a>, found: DeviceId, parent: DeviceId) {
    let discovered: &'a Target = ctx.discovered;
    let dtree = &discovered.devices;
    let mut device = dtree.get(found).clone();
    device.action = Action::Preserve;
    if let Some(ref pool) = device.in_zpool {
        if !ctx.pool_is_preserved(pool) {
            device.clear_logical_ref();
        }
    }
    debug!("Keeping {}", dtree.full_name(found));

    let id = ctx.desired.devices.add_child(parent, device);
    for child in dtree.children(found) {
        carry_over(ctx, *child, id);
    }
}

/// The one Solaris partition on a disk, for partitions specified without a
/// number.
fn solaris_partition(dtree: &DeviceTree, disk: DeviceId) -> Result<DeviceId> {
    let found: Vec<DeviceId> = dtree
        .children(disk)
        .iter()
        .copied()
        .filter(|c| dtree.get(*c).is_solaris())
        .collect();
    match found.as_slice() {
        [] => Err(SelectionError::InvalidSpecification(format!(
            "{} has no Solaris partition to use",
            dtree.full_name(disk)
        ))),
        [only] => Ok(*only),
        many => Err(SelectionError::AmbiguousIdentification(format!(
            "{} has {} Solaris partitions, give a partition number",
            dtree.full_name(disk),
            many.len()
        ))),
    }
}

/// Take over geometry and type from the discovered counterpart
fn adopt(device: &mut PhysicalDevice, existing: &PhysicalDevice, full_name: &str) -> Result<()> {
    let (start, size) = existing.extent().ok_or_else(|| {
        SelectionError::InvalidSpecification(format!("{} has no known geometry", full_name))
    })?;
    device.start_sector = Some(start);
    device.size = Some(size);
    device.kind = existing.kind.clone();
    Ok(())
}

/// Keep the reference a kept device already has while its pool survives
fn keep_refs(ctx: &PlanningContext, device: &mut PhysicalDevice, existing: &PhysicalDevice) {
    if device.has_logical_ref() {
        return;
    }
    if let Some(ref pool) = existing.in_zpool {
        if ctx.pool_is_preserved(pool) {
            device.in_zpool = existing.in_zpool.clone();
            device.in_vdev = existing.in_vdev.clone();
        }
    }
}

fn missing(kind: &str, full_name: &str, action: Action) -> SelectionError {
    SelectionError::UnknownDevice(format!(
        "{} {} is marked {} but does not exist",
        kind, full_name, action
    ))
}

fn merge_partition<'a>(
    ctx: &mut PlanningContext<'a>,
    spec: &DeviceTree,
    spec_id: DeviceId,
    found_disk: DeviceId,
    disk: DeviceId,
) -> Result<String> {
    let discovered: &'a Target = ctx.discovered;
    let dtree = &discovered.devices;
    let mut device = spec.get(spec_id).clone();

    if device.name.is_empty() {
        if device.action != Action::UseExistingSolaris2 {
            return Err(SelectionError::InvalidSpecification(format!(
                "partition on {} needs a number to be {}",
                dtree.full_name(found_disk),
                device.action
            )));
        }
        let only = solaris_partition(dtree, found_disk)?;
        device.name = dtree.get(only).name.clone();
        debug!("Using Solaris partition {}", dtree.full_name(only));
    }

    let disk_name = dtree.get(found_disk).name.clone();
    let full_name = format!("{}p{}", disk_name, device.name);
    let counterpart = dtree.find_child(found_disk, &device.name);
    let name = device.name.clone();

    match device.action {
        Action::Create => {
            if counterpart.is_some() {
                warn!("Partition {} exists and will be recreated", full_name);
            }
            let id = ctx.desired.devices.add_child(disk, device.clone());
            if counterpart.is_some() {
                check_not_in_use(ctx, device.in_zpool.as_deref(), id)?;
            }
            for child in spec.children(spec_id) {
                copy_new(ctx, spec, *child, id)?;
            }
        }
        Action::Delete => {
            let existing =
                counterpart.ok_or_else(|| missing("partition", &full_name, device.action))?;
            adopt(&mut device, dtree.get(existing), &full_name)?;
            device.clear_logical_ref();
            warn!("Partition {} will be deleted", full_name);
            if spec.has_children(spec_id) {
                debug!("Ignoring slices of deleted partition {}", full_name);
            }
            ctx.desired.devices.add_child(disk, device);
        }
        Action::Preserve | Action::UseExisting => {
            let existing =
                counterpart.ok_or_else(|| missing("partition", &full_name, device.action))?;
            adopt(&mut device, dtree.get(existing), &full_name)?;
            keep_refs(ctx, &mut device, dtree.get(existing));
            let id = ctx.desired.devices.add_child(disk, device);
            merge_children(ctx, spec, spec_id, existing, id)?;
        }
        Action::UseExistingSolaris2 => {
            let existing =
                counterpart.ok_or_else(|| missing("partition", &full_name, device.action))?;
            if !dtree.get(existing).is_solaris() {
                return Err(SelectionError::InvalidSpecification(format!(
                    "{} is not a Solaris partition",
                    full_name
                )));
            }
            adopt(&mut device, dtree.get(existing), &full_name)?;
            let size = device.size;
            let id = ctx.desired.devices.add_child(disk, device);

            if spec.has_children(spec_id) {
                for child in spec.children(spec_id) {
                    merge_slice(ctx, spec, *child, existing, id)?;
                }
            } else {
                let pool = ctx
                    .root_pool()
                    .map(|p| p.name.clone())
                    .ok_or_else(|| {
                        SelectionError::NoRootPool(format!(
                            "{} is reused for the root pool but none is planned",
                            full_name
                        ))
                    })?;
                let mut slice = PhysicalDevice::slice(ROOT_SLICE).with_start(0);
                slice.size = size;
                slice.in_zpool = Some(pool);
                debug!("Root slice {}s{} spans {}", disk_name, ROOT_SLICE, full_name);
                ctx.desired.devices.add_child(id, slice);
            }
        }
    }
    Ok(name)
}

fn merge_slice<'a>(
    ctx: &mut PlanningContext<'a>,
    spec: &DeviceTree,
    spec_id: DeviceId,
    found_parent: DeviceId,
    parent: DeviceId,
) -> Result<String> {
    let discovered: &'a Target = ctx.discovered;
    let dtree = &discovered.devices;
    let mut device = spec.get(spec_id).clone();
    let full_name = format!("{}s{}", dtree.get(dtree.disk_of(found_parent)).name, device.name);
    let counterpart = dtree.find_child(found_parent, &device.name);
    let name = device.name.clone();

    match device.action {
        Action::Create => {
            if counterpart.is_some() {
                warn!("Slice {} exists and will be recreated", full_name);
            }
            let id = ctx.desired.devices.add_child(parent, device.clone());
            if counterpart.is_some() {
                check_not_in_use(ctx, device.in_zpool.as_deref(), id)?;
            }
        }
        Action::Delete | Action::Preserve | Action::UseExisting => {
            let existing = counterpart.ok_or_else(|| missing("slice", &full_name, device.action))?;
            adopt(&mut device, dtree.get(existing), &full_name)?;
            if device.action == Action::Delete {
                warn!("Slice {} will be deleted", full_name);
                device.clear_logical_ref();
            } else {
                keep_refs(ctx, &mut device, dtree.get(existing));
            }
            ctx.desired.devices.add_child(parent, device);
        }
        Action::UseExistingSolaris2 => {
            return Err(SelectionError::InvalidSpecification(format!(
                "slice {}: {} only applies to partitions",
                full_name, device.action
            )));
        }
    }
    Ok(name)
}

/// Label to write on a disk that gets new partitions, if it needs one.
/// GPT disks cannot hold the fdisk/VTOC layout.
pub fn required_label(tree: &DeviceTree, disk: DeviceId) -> Result<Option<DiskLabel>> {
    let device = tree.get(disk);
    match device.as_disk().and_then(|d| d.label) {
        None => Ok(Some(DiskLabel::Vtoc)),
        Some(DiskLabel::Vtoc) => Ok(None),
        Some(DiskLabel::Gpt) => Err(SelectionError::InvalidSpecification(format!(
            "{} has a GPT label; use the whole disk to relabel it",
            device.name
        ))),
    }
}
