//! Free space on disks and partitions, and geometry allocation
//!
//! Offsets are relative to the parent device. Logical partitions live inside
//! the extended partition's extent, everything else inside the parent.

use crate::model::{Action, DeviceId, DeviceTree, Size};
use crate::utils::error::{Result, SelectionError};
use tracing::debug;

/// A contiguous run of sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub start: u64,
    pub size: Size,
}

impl Extent {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size.sectors())
    }
}

fn search_area(tree: &DeviceTree, parent: DeviceId, logical: bool) -> Option<(u64, u64)> {
    if logical {
        let extended = tree.extended_partition(parent)?;
        let (start, size) = tree.get(extended).extent()?;
        Some((start, start.saturating_add(size.sectors())))
    } else {
        tree.get(parent).size.map(|s| (0, s.sectors()))
    }
}

/// Free extents under `parent`, in ascending order.
///
/// With `logical`, the search area is the extended partition on `parent` and
/// only logical partitions occupy it. Deleted devices and devices without a
/// resolved extent take no space.
pub fn gaps(tree: &DeviceTree, parent: DeviceId, logical: bool) -> Vec<Extent> {
    let Some((area_start, area_end)) = search_area(tree, parent, logical) else {
        return Vec::new();
    };

    let mut used: Vec<(u64, u64)> = tree
        .children(parent)
        .iter()
        .map(|c| tree.get(*c))
        .filter(|d| d.action != Action::Delete && d.is_logical() == logical)
        .filter_map(|d| d.extent())
        .map(|(start, size)| (start, start.saturating_add(size.sectors())))
        .collect();
    used.sort_unstable();

    let mut free = Vec::new();
    let mut cursor = area_start;
    for (start, end) in used {
        let start = start.clamp(area_start, area_end);
        if start > cursor {
            free.push(Extent {
                start: cursor,
                size: Size::from_sectors(start - cursor),
            });
        }
        cursor = cursor.max(end.min(area_end));
    }
    if area_end > cursor {
        free.push(Extent {
            start: cursor,
            size: Size::from_sectors(area_end - cursor),
        });
    }
    free
}

/// Resolve the start and size of one device from the free space around it.
///
/// Size and start given: nothing to do. Size only: the first gap that fits.
/// Start only: the rest of the gap containing it. Neither: the largest gap,
/// which must hold at least `minimum`.
pub fn allocate(tree: &mut DeviceTree, id: DeviceId, minimum: Size) -> Result<()> {
    let device = tree.get(id);
    let (size, start) = (device.size, device.start_sector);
    let name = tree.full_name(id);
    if let (Some(size), Some(start)) = (size, start) {
        if start.checked_add(size.sectors()).is_none() {
            return Err(SelectionError::InvalidSpecification(format!(
                "{} at sector {} with {} sectors runs past the addressable range",
                name,
                start,
                size.sectors()
            )));
        }
        return Ok(());
    }

    let parent = tree.parent(id).ok_or_else(|| {
        SelectionError::InvalidSpecification(format!("{} has no parent to allocate from", name))
    })?;
    let free = gaps(tree, parent, device.is_logical());

    let chosen = match (size, start) {
        (Some(size), _) => free
            .iter()
            .find(|g| g.size >= size)
            .map(|g| Extent {
                start: g.start,
                size,
            })
            .ok_or_else(|| {
                SelectionError::InsufficientSpace(format!(
                    "no free extent of {} for {}",
                    size.human(),
                    name
                ))
            })?,
        (None, Some(start)) => free
            .iter()
            .find(|g| g.start <= start && start < g.end())
            .map(|g| Extent {
                start,
                size: Size::from_sectors(g.end() - start),
            })
            .ok_or_else(|| {
                SelectionError::InsufficientSpace(format!(
                    "sector {} requested for {} is not free",
                    start, name
                ))
            })?,
        (None, None) => {
            // ties go to the earliest gap
            let largest = free.iter().copied().fold(None, |best: Option<Extent>, g| match best {
                Some(b) if b.size >= g.size => Some(b),
                _ => Some(g),
            });
            match largest {
                Some(g) if g.size >= minimum => g,
                Some(g) => {
                    return Err(SelectionError::InsufficientSpace(format!(
                        "largest free extent for {} is {}, at least {} is needed",
                        name,
                        g.size.human(),
                        minimum.human()
                    )))
                }
                None => {
                    return Err(SelectionError::InsufficientSpace(format!(
                        "no free space left for {}",
                        name
                    )))
                }
            }
        }
    };

    debug!(
        "Allocated {} at sector {} ({})",
        name,
        chosen.start,
        chosen.size.human()
    );
    let device = tree.get_mut(id);
    device.start_sector = Some(chosen.start);
    device.size = Some(chosen.size);
    Ok(())
}

/// Allocate every created device in the tree that still lacks geometry.
pub fn allocate_tree(tree: &mut DeviceTree, minimum: Size) -> Result<()> {
    for disk in tree.disks().to_vec() {
        allocate_children(tree, disk, minimum)?;
    }
    Ok(())
}

fn allocate_children(tree: &mut DeviceTree, parent: DeviceId, minimum: Size) -> Result<()> {
    let mut pending: Vec<DeviceId> = tree
        .children(parent)
        .iter()
        .copied()
        .filter(|c| tree.get(*c).action == Action::Create)
        .collect();

    // fixed extents first, then partial, then unsized; logical partitions
    // after the extended partition they live in
    pending.sort_by_key(|c| {
        let d = tree.get(*c);
        let rank = match (d.size, d.start_sector) {
            (Some(_), Some(_)) => 0,
            (None, None) => 2,
            _ => 1,
        };
        (d.is_logical(), rank)
    });

    for id in pending {
        allocate(tree, id, minimum)?;
    }

    let children: Vec<DeviceId> = tree
        .children(parent)
        .iter()
        .copied()
        .filter(|c| tree.get(*c).action != Action::Delete)
        .collect();
    for child in children {
        allocate_children(tree, child, minimum)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{partition_types, PhysicalDevice};

    fn disk_with(parts: &[(&str, u8, u64, u64)]) -> (DeviceTree, DeviceId) {
        let mut tree = DeviceTree::new();
        let disk =
            tree.add_disk(PhysicalDevice::disk("c0t0d0").with_size(Size::from_sectors(1000)));
        for (name, ty, start, size) in parts {
            tree.add_child(
                disk,
                PhysicalDevice::partition(name, *ty)
                    .with_action(Action::Preserve)
                    .with_start(*start)
                    .with_size(Size::from_sectors(*size)),
            );
        }
        (tree, disk)
    }

    fn ext(start: u64, size: u64) -> Extent {
        Extent {
            start,
            size: Size::from_sectors(size),
        }
    }

    #[test]
    fn gaps_between_partitions() {
        let (tree, disk) = disk_with(&[
            ("1", partition_types::NTFS, 100, 200),
            ("2", partition_types::LINUX_NATIVE, 500, 100),
        ]);
        assert_eq!(gaps(&tree, disk, false), vec![ext(0, 100), ext(300, 200), ext(600, 400)]);
    }

    #[test]
    fn deleted_partitions_free_their_space() {
        let (mut tree, disk) = disk_with(&[("1", partition_types::NTFS, 0, 500)]);
        let first = tree.children(disk)[0];
        tree.get_mut(first).action = Action::Delete;
        assert_eq!(gaps(&tree, disk, false), vec![ext(0, 1000)]);
    }

    #[test]
    fn logical_gaps_stay_inside_extended() {
        let (mut tree, disk) = disk_with(&[
            ("1", partition_types::NTFS, 0, 200),
            ("2", partition_types::EXTENDED, 200, 600),
        ]);
        tree.add_child(
            disk,
            PhysicalDevice::partition("5", partition_types::LINUX_NATIVE)
                .with_start(200)
                .with_size(Size::from_sectors(100)),
        );
        assert_eq!(gaps(&tree, disk, true), vec![ext(300, 500)]);
        // logical partitions do not occupy primary space
        assert_eq!(gaps(&tree, disk, false), vec![ext(800, 200)]);
    }

    #[test]
    fn allocate_by_size_takes_first_fit() {
        let (mut tree, disk) = disk_with(&[("1", partition_types::NTFS, 100, 200)]);
        let new = tree.add_child(
            disk,
            PhysicalDevice::partition("2", partition_types::SOLARIS2)
                .with_size(Size::from_sectors(150)),
        );
        allocate(&mut tree, new, Size::from_sectors(1)).unwrap();
        assert_eq!(tree.get(new).extent(), Some((300, Size::from_sectors(150))));
    }

    #[test]
    fn allocate_unsized_takes_largest_gap() {
        let (mut tree, disk) = disk_with(&[("1", partition_types::NTFS, 100, 200)]);
        let new = tree.add_child(disk, PhysicalDevice::partition("2", partition_types::SOLARIS2));
        allocate(&mut tree, new, Size::from_sectors(500)).unwrap();
        assert_eq!(tree.get(new).extent(), Some((300, Size::from_sectors(700))));

        let (mut tree, disk) = disk_with(&[("1", partition_types::NTFS, 100, 200)]);
        let new = tree.add_child(disk, PhysicalDevice::partition("2", partition_types::SOLARIS2));
        let err = allocate(&mut tree, new, Size::from_sectors(800)).unwrap_err();
        assert!(matches!(err, SelectionError::InsufficientSpace(_)));
    }

    #[test]
    fn allocation_is_deterministic_and_idempotent() {
        let build = || {
            let (mut tree, disk) = disk_with(&[("1", partition_types::NTFS, 0, 100)]);
            let part =
                tree.add_child(disk, PhysicalDevice::partition("2", partition_types::SOLARIS2));
            tree.add_child(part, PhysicalDevice::slice("1").with_size(Size::from_sectors(50)));
            tree.add_child(part, PhysicalDevice::slice("0"));
            tree
        };
        let minimum = Size::from_sectors(10);

        let mut a = build();
        allocate_tree(&mut a, minimum).unwrap();
        let mut b = build();
        allocate_tree(&mut b, minimum).unwrap();

        let extents = |t: &DeviceTree| {
            t.walk()
                .iter()
                .map(|id| t.get(*id).extent())
                .collect::<Vec<_>>()
        };
        assert_eq!(extents(&a), extents(&b));

        let before = extents(&a);
        allocate_tree(&mut a, minimum).unwrap();
        assert_eq!(extents(&a), before);

        // the sized slice is placed first, the unsized one takes the rest
        let part = a.children(a.disks()[0])[1];
        let slices = a.children(part).to_vec();
        assert_eq!(a.get(slices[0]).extent(), Some((0, Size::from_sectors(50))));
        assert_eq!(a.get(slices[1]).extent(), Some((50, Size::from_sectors(850))));
    }

    #[test]
    fn huge_start_sector_is_rejected() {
        let (mut tree, disk) = disk_with(&[]);
        let far = tree.add_child(
            disk,
            PhysicalDevice::partition("2", partition_types::SOLARIS2)
                .with_start(u64::MAX - 10)
                .with_size(Size::from_sectors(100)),
        );
        let err = allocate(&mut tree, far, Size::from_sectors(1)).unwrap_err();
        assert!(matches!(err, SelectionError::InvalidSpecification(_)));

        // siblings still see sane gaps around it
        tree.get_mut(far).action = Action::Preserve;
        assert_eq!(gaps(&tree, disk, false), vec![ext(0, 1000)]);
    }
}
