//! Fixtures for unit tests

use crate::config::{ControllerConfig, SelectionConfig};
use crate::controller::DefaultController;
use crate::model::{partition_types, Action, DeviceId, DeviceTree, PhysicalDevice, Size, Target};
use crate::selection::{self, PlanningContext};
use crate::utils::error::Result;

/// Empty disks of the given sizes in GB; the first one is the boot disk.
pub fn inventory(disks: &[(&str, u64)]) -> Target {
    let mut tree = DeviceTree::new();
    for (i, (ctd, gb)) in disks.iter().enumerate() {
        let mut disk = PhysicalDevice::disk(ctd).with_size(Size::from_gb(*gb));
        if let Some(attrs) = disk.as_disk_mut() {
            attrs.is_boot_disk = i == 0;
        }
        tree.add_disk(disk);
    }
    Target::new(tree, None)
}

pub fn controller(discovered: &Target) -> DefaultController {
    DefaultController::new(ControllerConfig::default(), discovered)
}

/// Dry-run context, so nothing probes the host
pub fn context<'a>(
    discovered: &'a Target,
    controller: &'a DefaultController,
) -> PlanningContext<'a> {
    PlanningContext::new(discovered, controller, SelectionConfig::new(true))
}

pub fn plan(spec: &Target, discovered: &Target) -> Result<Target> {
    let controller = controller(discovered);
    selection::plan(spec, discovered, &controller, SelectionConfig::new(true))
}

pub fn add_partition(
    tree: &mut DeviceTree,
    disk: DeviceId,
    name: &str,
    part_type: u8,
    start: u64,
    sectors: u64,
) -> DeviceId {
    tree.add_child(
        disk,
        PhysicalDevice::partition(name, part_type)
            .with_action(Action::Preserve)
            .with_start(start)
            .with_size(Size::from_sectors(sectors)),
    )
}

/// Solaris partition 1 over the whole disk with slice 0 over the whole
/// partition, optionally in `(pool, vdev)`. Returns the partition.
pub fn add_solaris_layout(
    tree: &mut DeviceTree,
    disk: DeviceId,
    pool: Option<(&str, &str)>,
) -> DeviceId {
    let size = tree.get(disk).size.unwrap_or_default();
    let part = add_partition(tree, disk, "1", partition_types::SOLARIS2, 0, size.sectors());
    let mut slice = PhysicalDevice::slice("0")
        .with_action(Action::Preserve)
        .with_start(0)
        .with_size(size);
    if let Some((pool, vdev)) = pool {
        slice = slice.in_pool(pool, vdev);
    }
    tree.add_child(part, slice);
    part
}
