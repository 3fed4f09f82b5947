//! Target documents
//!
//! Specification manifests, discovered inventories and planned layouts are
//! all stored in the same nested form:
//!
//! ```toml
//! [[disks]]
//! ctd = "c0t0d0"
//! whole_disk = true
//!
//! [[disks.partitions]]
//! name = "1"
//! part_type = 191
//!
//! [[disks.partitions.slices]]
//! name = "0"
//! in_zpool = "rpool"
//! in_vdev = "vdev"
//!
//! [[logical.zpools]]
//! name = "rpool"
//! is_root = true
//! ```
//!
//! Files ending in `.json` are read and written as JSON, anything else as
//! TOML.

use crate::model::{
    partition_types, Action, DeviceId, DeviceTree, DiskIdent, DiskLabel, Logical,
    PhysicalDevice, Size, Target,
};
use crate::utils::error::{Result, SelectionError};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetDoc {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<DiskDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical: Option<Logical>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskDoc {
    #[serde(flatten)]
    pub ident: DiskIdent,
    #[serde(default)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub whole_disk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<DiskLabel>,
    /// Set in discovered inventories on the firmware boot disk
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub boot_disk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_zpool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_vdev: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionDoc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slices: Vec<SliceDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionDoc {
    /// Partition number; may be empty for `use_existing_solaris2`
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub action: Action,
    #[serde(default = "default_part_type")]
    pub part_type: u8,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub bootid: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_sector: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_zpool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_vdev: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slices: Vec<SliceDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceDoc {
    pub name: String,
    #[serde(default)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_sector: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_swap: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_zpool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_vdev: Option<String>,
}

fn default_part_type() -> u8 {
    partition_types::SOLARIS2
}

fn is_zero(v: &u8) -> bool {
    *v == 0
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

fn check_number(kind: &str, name: &str, disk: &str) -> Result<()> {
    if name.parse::<u32>().is_err() {
        return Err(SelectionError::InvalidSpecification(format!(
            "{} '{}' on disk {} is not a number",
            kind, name, disk
        )));
    }
    Ok(())
}

impl SliceDoc {
    fn into_device(self, disk: &str) -> Result<PhysicalDevice> {
        check_number("slice", &self.name, disk)?;
        let mut dev = PhysicalDevice::slice(&self.name).with_action(self.action);
        dev.start_sector = self.start_sector;
        dev.size = self.size;
        dev.in_zpool = self.in_zpool;
        dev.in_vdev = self.in_vdev;
        if let Some(s) = dev.as_slice_mut() {
            s.is_swap = self.is_swap;
        }
        Ok(dev)
    }

    fn from_device(dev: &PhysicalDevice) -> Self {
        Self {
            name: dev.name.clone(),
            action: dev.action,
            start_sector: dev.start_sector,
            size: dev.size,
            is_swap: dev.is_swap_slice(),
            in_zpool: dev.in_zpool.clone(),
            in_vdev: dev.in_vdev.clone(),
        }
    }
}

impl PartitionDoc {
    fn from_device(tree: &DeviceTree, id: DeviceId) -> Self {
        let dev = tree.get(id);
        let attrs = dev.as_partition().cloned().unwrap_or_default();
        Self {
            name: dev.name.clone(),
            action: dev.action,
            part_type: attrs.part_type,
            bootid: attrs.bootid,
            start_sector: dev.start_sector,
            size: dev.size,
            in_zpool: dev.in_zpool.clone(),
            in_vdev: dev.in_vdev.clone(),
            slices: tree
                .children(id)
                .iter()
                .map(|s| SliceDoc::from_device(tree.get(*s)))
                .collect(),
        }
    }
}

impl TargetDoc {
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load a document, picking the format from the file extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if is_json(path) {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write a document, picking the format from the file extension
    pub fn save(&self, path: &Path) -> Result<()> {
        let rendered = if is_json(path) {
            self.to_json()?
        } else {
            self.to_toml()?
        };
        std::fs::write(path, rendered)?;
        Ok(())
    }

    /// Build the device tree this document describes
    pub fn into_target(self) -> Result<Target> {
        let mut tree = DeviceTree::new();

        for doc in self.disks {
            if doc.ident.is_empty() {
                return Err(SelectionError::InvalidSpecification(
                    "disk entry has no identifier".to_string(),
                ));
            }

            let disk_name = doc.ident.to_string();
            let mut disk = PhysicalDevice::disk_with(doc.ident).with_action(doc.action);
            disk.size = doc.size;
            disk.in_zpool = doc.in_zpool;
            disk.in_vdev = doc.in_vdev;
            if let Some(attrs) = disk.as_disk_mut() {
                attrs.whole_disk = doc.whole_disk;
                attrs.label = doc.label;
                attrs.is_boot_disk = doc.boot_disk;
            }
            let disk_id = tree.add_disk(disk);

            for part in doc.partitions {
                if !part.name.is_empty() {
                    check_number("partition", &part.name, &disk_name)?;
                }
                let mut dev =
                    PhysicalDevice::partition(&part.name, part.part_type).with_action(part.action);
                dev.start_sector = part.start_sector;
                dev.size = part.size;
                dev.in_zpool = part.in_zpool;
                dev.in_vdev = part.in_vdev;
                if let Some(p) = dev.as_partition_mut() {
                    p.bootid = part.bootid;
                }
                let part_id = tree.add_child(disk_id, dev);
                for slice in part.slices {
                    tree.add_child(part_id, slice.into_device(&disk_name)?);
                }
            }
            for slice in doc.slices {
                tree.add_child(disk_id, slice.into_device(&disk_name)?);
            }
        }

        Ok(Target::new(tree, self.logical))
    }

    /// Document form of a target tree
    pub fn from_target(target: &Target) -> Self {
        let tree = &target.devices;
        let disks = tree
            .disks()
            .iter()
            .map(|id| {
                let dev = tree.get(*id);
                let attrs = dev.as_disk().cloned().unwrap_or_default();
                let mut ident = attrs.ident;
                if ident.ctd.is_none() && !dev.name.is_empty() {
                    ident.ctd = Some(dev.name.clone());
                }

                let (partitions, slices): (Vec<DeviceId>, Vec<DeviceId>) = tree
                    .children(*id)
                    .iter()
                    .copied()
                    .partition(|c| tree.get(*c).is_partition());

                DiskDoc {
                    ident,
                    action: dev.action,
                    size: dev.size,
                    whole_disk: attrs.whole_disk,
                    label: attrs.label,
                    boot_disk: attrs.is_boot_disk,
                    in_zpool: dev.in_zpool.clone(),
                    in_vdev: dev.in_vdev.clone(),
                    partitions: partitions
                        .iter()
                        .map(|p| PartitionDoc::from_device(tree, *p))
                        .collect(),
                    slices: slices
                        .iter()
                        .map(|s| SliceDoc::from_device(tree.get(*s)))
                        .collect(),
                }
            })
            .collect();

        Self {
            disks,
            logical: target.logical.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LogicalChild, Redundancy};

    const MANIFEST: &str = r#"
        [[disks]]
        ctd = "c0t0d0"
        [[disks.partitions]]
        name = "1"
        action = "use_existing_solaris2"
        [[disks.partitions.slices]]
        name = "0"
        size = "8gb"
        in_zpool = "rpool"

        [[disks]]
        volid = "DATA-1"
        whole_disk = true
        in_zpool = "tank"

        [logical]
        noswap = true

        [[logical.zpools]]
        name = "rpool"
        is_root = true

        [[logical.zpools]]
        name = "tank"
        [[logical.zpools.children]]
        kind = "vdev"
        name = "data"
        redundancy = "raidz"
        [[logical.zpools.children]]
        kind = "zvol"
        name = "vol1"
        size = "1gb"
        use = "swap"
    "#;

    #[test]
    fn manifest_builds_tree() {
        let target = TargetDoc::from_toml(MANIFEST).unwrap().into_target().unwrap();
        let tree = &target.devices;
        assert_eq!(tree.disks().len(), 2);

        let first = tree.disks()[0];
        let part = tree.children(first)[0];
        assert_eq!(tree.get(part).action, Action::UseExistingSolaris2);
        assert!(tree.get(part).is_solaris());
        let slice = tree.get(tree.children(part)[0]);
        assert_eq!(slice.size, Some(Size::from_gb(8)));
        assert_eq!(slice.in_zpool.as_deref(), Some("rpool"));

        let second = tree.get(tree.disks()[1]);
        assert!(second.is_whole_disk());
        assert_eq!(second.as_disk().unwrap().ident.volid.as_deref(), Some("DATA-1"));

        let logical = target.logical.unwrap();
        assert!(logical.noswap && !logical.nodump);
        let tank = logical.find_zpool("tank").unwrap();
        assert_eq!(tank.find_vdev("data").unwrap().redundancy, Redundancy::Raidz1);
        assert!(matches!(
            tank.children[1],
            LogicalChild::Zvol(ref z) if z.usage == crate::model::ZvolUse::Swap
        ));
    }

    #[test]
    fn documents_survive_toml_and_json() {
        let doc = TargetDoc::from_toml(MANIFEST).unwrap();
        let back = TargetDoc::from_target(&doc.clone().into_target().unwrap());
        assert_eq!(back, doc);

        let json = back.to_json().unwrap();
        assert_eq!(TargetDoc::from_json(&json).unwrap(), doc);
        let toml = back.to_toml().unwrap();
        assert_eq!(TargetDoc::from_toml(&toml).unwrap(), doc);
    }

    #[test]
    fn rejects_bad_entries() {
        let no_ident = "[[disks]]\nwhole_disk = true\n";
        assert!(matches!(
            TargetDoc::from_toml(no_ident).unwrap().into_target(),
            Err(SelectionError::InvalidSpecification(_))
        ));

        let bad_slice = "[[disks]]\nctd = \"c0t0d0\"\n[[disks.slices]]\nname = \"a\"\n";
        assert!(TargetDoc::from_toml(bad_slice).unwrap().into_target().is_err());
    }
}
