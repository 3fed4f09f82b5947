//! Arena-backed device trees and the `Target` they belong to
//!
//! Devices are addressed by [`DeviceId`] handles into a [`DeviceTree`].
//! Parent and child links are explicit, so the planner mutates nodes by
//! handle instead of holding references into the tree.

use crate::model::logical::Logical;
use crate::model::physical::{Action, PhysicalDevice};
use crate::model::size::Size;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(usize);

#[derive(Debug, Clone)]
struct Node {
    device: PhysicalDevice,
    parent: Option<DeviceId>,
    children: Vec<DeviceId>,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceTree {
    nodes: Vec<Node>,
    disks: Vec<DeviceId>,
}

impl DeviceTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, device: PhysicalDevice, parent: Option<DeviceId>) -> DeviceId {
        let id = DeviceId(self.nodes.len());
        self.nodes.push(Node {
            device,
            parent,
            children: Vec::new(),
        });
        id
    }

    pub fn add_disk(&mut self, device: PhysicalDevice) -> DeviceId {
        let id = self.push(device, None);
        self.disks.push(id);
        id
    }

    pub fn add_child(&mut self, parent: DeviceId, device: PhysicalDevice) -> DeviceId {
        let id = self.push(device, Some(parent));
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn get(&self, id: DeviceId) -> &PhysicalDevice {
        &self.nodes[id.0].device
    }

    pub fn get_mut(&mut self, id: DeviceId) -> &mut PhysicalDevice {
        &mut self.nodes[id.0].device
    }

    pub fn parent(&self, id: DeviceId) -> Option<DeviceId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: DeviceId) -> &[DeviceId] {
        &self.nodes[id.0].children
    }

    pub fn has_children(&self, id: DeviceId) -> bool {
        !self.nodes[id.0].children.is_empty()
    }

    pub fn disks(&self) -> &[DeviceId] {
        &self.disks
    }

    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }

    /// Unlink a device from its parent (or the disk list). The node stays in
    /// the arena but is no longer reachable.
    pub fn detach(&mut self, id: DeviceId) {
        match self.nodes[id.0].parent {
            Some(parent) => self.nodes[parent.0].children.retain(|c| *c != id),
            None => self.disks.retain(|d| *d != id),
        }
    }

    pub fn clear_children(&mut self, id: DeviceId) {
        self.nodes[id.0].children.clear();
    }

    /// Depth-first descendants of `id`, excluding `id` itself
    pub fn descendants(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut out = Vec::new();
        for child in self.children(id) {
            out.push(*child);
            out.extend(self.descendants(*child));
        }
        out
    }

    /// Every reachable device, disks first in depth-first order
    pub fn walk(&self) -> Vec<DeviceId> {
        let mut out = Vec::new();
        for disk in &self.disks {
            out.push(*disk);
            out.extend(self.descendants(*disk));
        }
        out
    }

    /// Deep copy a subtree of `src` under `parent` (or as a new disk)
    pub fn copy_subtree(
        &mut self,
        src: &DeviceTree,
        src_id: DeviceId,
        parent: Option<DeviceId>,
    ) -> DeviceId {
        let device = src.get(src_id).clone();
        let id = match parent {
            Some(p) => self.add_child(p, device),
            None => self.add_disk(device),
        };
        for child in src.children(src_id) {
            self.copy_subtree(src, *child, Some(id));
        }
        id
    }

    pub fn find_child(&self, parent: DeviceId, name: &str) -> Option<DeviceId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|c| self.get(*c).name == name)
    }

    pub fn find_disk(&self, ctd: &str) -> Option<DeviceId> {
        self.disks.iter().copied().find(|d| self.get(*d).name == ctd)
    }

    /// The disk a device lives on
    pub fn disk_of(&self, mut id: DeviceId) -> DeviceId {
        while let Some(parent) = self.parent(id) {
            id = parent;
        }
        id
    }

    /// Platform device name: `c0t0d0`, `c0t0d0p1` or `c0t0d0s0`
    pub fn full_name(&self, id: DeviceId) -> String {
        let device = self.get(id);
        let disk = self.get(self.disk_of(id));
        if device.is_partition() {
            format!("{}p{}", disk.name, device.name)
        } else if device.is_slice() {
            format!("{}s{}", disk.name, device.name)
        } else {
            device.name.clone()
        }
    }

    /// The extended partition on a disk, if any (ignoring deleted ones)
    pub fn extended_partition(&self, disk: DeviceId) -> Option<DeviceId> {
        self.children(disk).iter().copied().find(|c| {
            let dev = self.get(*c);
            dev.is_extended() && dev.action != Action::Delete
        })
    }

    /// Find the device with a given full name anywhere in the tree
    pub fn find_by_full_name(&self, full_name: &str) -> Option<DeviceId> {
        self.walk()
            .into_iter()
            .find(|id| self.full_name(*id) == full_name)
    }
}

/// A storage target: physical devices plus the logical section
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub devices: DeviceTree,
    pub logical: Option<Logical>,
}

impl Target {
    pub fn new(devices: DeviceTree, logical: Option<Logical>) -> Self {
        Self { devices, logical }
    }

    /// Nothing specified at all
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.logical.as_ref().map_or(true, |l| l.zpools.is_empty())
    }

    /// Structural problems in the tree, in discovery order.
    pub fn consistency_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let tree = &self.devices;

        let mut pool_names = HashSet::new();
        if let Some(ref logical) = self.logical {
            for pool in &logical.zpools {
                if !pool_names.insert(pool.name.as_str()) {
                    errors.push(format!("pool '{}' appears more than once", pool.name));
                }
            }
        }

        for id in tree.walk() {
            let device = tree.get(id);
            let name = tree.full_name(id);

            for child in tree.children(id) {
                if tree.parent(*child) != Some(id) {
                    errors.push(format!("{} has a child with a broken parent link", name));
                }
            }

            if let Some(ref pool) = device.in_zpool {
                if device.action != Action::Delete && !pool_names.contains(pool.as_str()) {
                    errors.push(format!("{} references unknown pool '{}'", name, pool));
                }
            }

            if device.is_disk() {
                continue;
            }

            if device.action == Action::Delete {
                continue;
            }

            let Some((start, size)) = device.extent() else {
                errors.push(format!("{} has no resolved geometry", name));
                continue;
            };

            let Some(end) = start.checked_add(size.sectors()) else {
                errors.push(format!(
                    "{} at sector {} with {} sectors runs past the addressable range",
                    name,
                    start,
                    size.sectors()
                ));
                continue;
            };
            if let Some(limit) = self.parent_limit(id) {
                if end > limit {
                    errors.push(format!(
                        "{} ({}..{}) extends past the end of its parent ({} sectors)",
                        name, start, end, limit
                    ));
                }
            }
        }

        for id in tree.walk() {
            errors.extend(self.overlap_errors(id));
        }

        errors
    }

    /// Last sector (exclusive) a child of `id`'s parent may use
    fn parent_limit(&self, id: DeviceId) -> Option<u64> {
        let tree = &self.devices;
        let device = tree.get(id);
        let parent = tree.parent(id)?;

        if device.is_logical() {
            let extended = tree.extended_partition(parent)?;
            let (start, size) = tree.get(extended).extent()?;
            return Some(start.saturating_add(size.sectors()));
        }

        tree.get(parent).size.map(|s| s.sectors())
    }

    fn overlap_errors(&self, parent: DeviceId) -> Vec<String> {
        let tree = &self.devices;
        let live: Vec<(DeviceId, u64, Size, bool)> = tree
            .children(parent)
            .iter()
            .filter_map(|c| {
                let dev = tree.get(*c);
                if dev.action == Action::Delete {
                    return None;
                }
                dev.extent().map(|(s, z)| (*c, s, z, dev.is_logical()))
            })
            .collect();

        let mut errors = Vec::new();
        for (i, a) in live.iter().enumerate() {
            for b in live.iter().skip(i + 1) {
                // logical partitions sit inside the extended partition
                if a.3 != b.3 {
                    continue;
                }
                let a_end = a.1.saturating_add(a.2.sectors());
                let b_end = b.1.saturating_add(b.2.sectors());
                if a.1 < b_end && b.1 < a_end {
                    errors.push(format!(
                        "{} overlaps {}",
                        tree.full_name(a.0),
                        tree.full_name(b.0)
                    ));
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::logical::Zpool;
    use crate::model::physical::partition_types;

    fn sample() -> (DeviceTree, DeviceId, DeviceId, DeviceId) {
        let mut tree = DeviceTree::new();
        let disk =
            tree.add_disk(PhysicalDevice::disk("c0t0d0").with_size(Size::from_sectors(1000)));
        let part = tree.add_child(
            disk,
            PhysicalDevice::partition("1", partition_types::SOLARIS2)
                .with_start(0)
                .with_size(Size::from_sectors(600)),
        );
        let slice = tree.add_child(
            part,
            PhysicalDevice::slice("0")
                .with_start(0)
                .with_size(Size::from_sectors(600))
                .in_pool("rpool", "vdev"),
        );
        (tree, disk, part, slice)
    }

    #[test]
    fn links_and_names() {
        let (tree, disk, part, slice) = sample();
        assert_eq!(tree.parent(slice), Some(part));
        assert_eq!(tree.disk_of(slice), disk);
        assert_eq!(tree.full_name(part), "c0t0d0p1");
        assert_eq!(tree.full_name(slice), "c0t0d0s0");
        assert_eq!(tree.walk(), vec![disk, part, slice]);
        assert_eq!(tree.find_by_full_name("c0t0d0s0"), Some(slice));
    }

    #[test]
    fn detach_and_copy() {
        let (mut tree, disk, part, _) = sample();
        let mut other = DeviceTree::new();
        let copy = other.copy_subtree(&tree, disk, None);
        assert_eq!(other.walk().len(), 3);
        assert_eq!(other.get(copy).name, "c0t0d0");

        tree.detach(part);
        assert_eq!(tree.walk(), vec![disk]);
    }

    #[test]
    fn consistency_reports_unknown_pool_and_overlap() {
        let (mut tree, disk, _, _) = sample();
        tree.add_child(
            disk,
            PhysicalDevice::partition("2", partition_types::LINUX_NATIVE)
                .with_start(500)
                .with_size(Size::from_sectors(600)),
        );
        let target = Target::new(tree, None);
        let errors = target.consistency_errors();
        assert!(errors.iter().any(|e| e.contains("unknown pool 'rpool'")));
        assert!(errors.iter().any(|e| e.contains("overlaps")));
        assert!(errors.iter().any(|e| e.contains("past the end")));
    }

    #[test]
    fn sector_overflow_is_reported() {
        let (mut tree, _, part, _) = sample();
        tree.add_child(
            part,
            PhysicalDevice::slice("1")
                .with_start(u64::MAX - 10)
                .with_size(Size::from_sectors(100)),
        );
        let errors = Target::new(tree, None).consistency_errors();
        assert!(errors.iter().any(|e| e.contains("c0t0d0s1") && e.contains("addressable range")));
    }

    #[test]
    fn consistent_target_is_clean() {
        let (tree, _, _, _) = sample();
        let logical = Logical {
            zpools: vec![Zpool::new("rpool", Action::Create, true)],
            ..Default::default()
        };
        let target = Target::new(tree, Some(logical));
        assert!(target.consistency_errors().is_empty());
    }
}
