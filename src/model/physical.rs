//! Physical devices: disks, fdisk partitions and VTOC slices

use crate::model::size::Size;
use serde::{Deserialize, Serialize};
use std::fmt;

/// fdisk partition type ids
pub mod partition_types {
    pub const SOLARIS2: u8 = 0xBF;
    pub const EXTENDED: u8 = 0x05;
    pub const WIN95_EXTENDED_LBA: u8 = 0x0F;
    pub const LINUX_EXTENDED: u8 = 0x85;
    pub const LINUX_NATIVE: u8 = 0x83;
    pub const NTFS: u8 = 0x07;
}

/// Active-partition marker
pub const BOOTID_ACTIVE: u8 = 0x80;

/// Number of primary partitions an fdisk table can hold
pub const MAX_PRIMARY_PARTITIONS: u32 = 4;

/// What should happen to a device or container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    Create,
    Delete,
    Preserve,
    UseExisting,
    UseExistingSolaris2,
}

impl Action {
    /// Existing data stays in place
    pub fn keeps_existing(&self) -> bool {
        matches!(self, Self::Preserve | Self::UseExisting | Self::UseExistingSolaris2)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Delete => write!(f, "delete"),
            Self::Preserve => write!(f, "preserve"),
            Self::UseExisting => write!(f, "use_existing"),
            Self::UseExistingSolaris2 => write!(f, "use_existing_solaris2"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskLabel {
    Vtoc,
    Gpt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskKeyword {
    BootDisk,
}

/// Property matcher, used when no stable identifier is given.
/// On discovered disks it carries the probed values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskProp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_chassis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_size: Option<Size>,
}

impl DiskProp {
    pub fn is_empty(&self) -> bool {
        self.dev_type.is_none()
            && self.dev_vendor.is_none()
            && self.dev_chassis.is_none()
            && self.dev_size.is_none()
    }
}

/// Every way a disk can be referred to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskIdent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receptacle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<DiskKeyword>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop: Option<DiskProp>,
}

impl DiskIdent {
    /// No identifier and no usable property matcher
    pub fn is_empty(&self) -> bool {
        self.ctd.is_none()
            && self.volid.is_none()
            && self.devid.is_none()
            && self.devpath.is_none()
            && self.receptacle.is_none()
            && self.keyword.is_none()
            && self.prop.as_ref().map_or(true, DiskProp::is_empty)
    }
}

impl fmt::Display for DiskIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref ctd) = self.ctd {
            write!(f, "ctd '{}'", ctd)
        } else if let Some(ref volid) = self.volid {
            write!(f, "volume id '{}'", volid)
        } else if let Some(ref devid) = self.devid {
            write!(f, "device id '{}'", devid)
        } else if let Some(ref devpath) = self.devpath {
            write!(f, "device path '{}'", devpath)
        } else if let Some(ref receptacle) = self.receptacle {
            write!(f, "receptacle '{}'", receptacle)
        } else if self.keyword.is_some() {
            write!(f, "keyword 'boot_disk'")
        } else if let Some(ref prop) = self.prop {
            write!(f, "properties {:?}", prop)
        } else {
            write!(f, "<no identifier>")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskAttrs {
    pub ident: DiskIdent,
    pub whole_disk: bool,
    pub label: Option<DiskLabel>,
    /// Set by the probe on the firmware boot disk
    pub is_boot_disk: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionAttrs {
    pub part_type: u8,
    pub bootid: u8,
}

impl Default for PartitionAttrs {
    fn default() -> Self {
        Self {
            part_type: partition_types::SOLARIS2,
            bootid: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceAttrs {
    pub is_swap: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceKind {
    Disk(DiskAttrs),
    Partition(PartitionAttrs),
    Slice(SliceAttrs),
}

/// A disk, partition or slice.
///
/// `name` is the ctd for disks and the number for partitions and slices.
/// `start_sector` is relative to the parent device.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalDevice {
    pub name: String,
    pub action: Action,
    pub size: Option<Size>,
    pub start_sector: Option<u64>,
    pub in_zpool: Option<String>,
    pub in_vdev: Option<String>,
    pub kind: DeviceKind,
}

impl PhysicalDevice {
    fn new(name: &str, kind: DeviceKind) -> Self {
        Self {
            name: name.to_string(),
            action: Action::Create,
            size: None,
            start_sector: None,
            in_zpool: None,
            in_vdev: None,
            kind,
        }
    }

    /// A disk referred to by its ctd name
    pub fn disk(ctd: &str) -> Self {
        let ident = DiskIdent {
            ctd: Some(ctd.to_string()),
            ..Default::default()
        };
        Self::disk_with(ident)
    }

    /// A disk referred to by an arbitrary identifier
    pub fn disk_with(ident: DiskIdent) -> Self {
        let name = ident.ctd.clone().unwrap_or_default();
        Self::new(
            &name,
            DeviceKind::Disk(DiskAttrs {
                ident,
                ..Default::default()
            }),
        )
    }

    pub fn partition(name: &str, part_type: u8) -> Self {
        Self::new(
            name,
            DeviceKind::Partition(PartitionAttrs {
                part_type,
                bootid: 0,
            }),
        )
    }

    pub fn slice(name: &str) -> Self {
        Self::new(name, DeviceKind::Slice(SliceAttrs::default()))
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn with_size(mut self, size: Size) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_start(mut self, start_sector: u64) -> Self {
        self.start_sector = Some(start_sector);
        self
    }

    pub fn in_pool(mut self, zpool: &str, vdev: &str) -> Self {
        self.in_zpool = Some(zpool.to_string());
        self.in_vdev = Some(vdev.to_string());
        self
    }

    pub fn whole(mut self) -> Self {
        if let DeviceKind::Disk(ref mut attrs) = self.kind {
            attrs.whole_disk = true;
        }
        self
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            DeviceKind::Disk(_) => "disk",
            DeviceKind::Partition(_) => "partition",
            DeviceKind::Slice(_) => "slice",
        }
    }

    pub fn is_disk(&self) -> bool {
        matches!(self.kind, DeviceKind::Disk(_))
    }

    pub fn is_partition(&self) -> bool {
        matches!(self.kind, DeviceKind::Partition(_))
    }

    pub fn is_slice(&self) -> bool {
        matches!(self.kind, DeviceKind::Slice(_))
    }

    pub fn as_disk(&self) -> Option<&DiskAttrs> {
        match self.kind {
            DeviceKind::Disk(ref attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn as_disk_mut(&mut self) -> Option<&mut DiskAttrs> {
        match self.kind {
            DeviceKind::Disk(ref mut attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn as_partition(&self) -> Option<&PartitionAttrs> {
        match self.kind {
            DeviceKind::Partition(ref attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn as_partition_mut(&mut self) -> Option<&mut PartitionAttrs> {
        match self.kind {
            DeviceKind::Partition(ref mut attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn as_slice(&self) -> Option<&SliceAttrs> {
        match self.kind {
            DeviceKind::Slice(ref attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn as_slice_mut(&mut self) -> Option<&mut SliceAttrs> {
        match self.kind {
            DeviceKind::Slice(ref mut attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn is_whole_disk(&self) -> bool {
        self.as_disk().is_some_and(|d| d.whole_disk)
    }

    /// Partition number parsed from the name
    pub fn number(&self) -> Option<u32> {
        self.name.parse().ok()
    }

    pub fn is_solaris(&self) -> bool {
        self.as_partition()
            .is_some_and(|p| p.part_type == partition_types::SOLARIS2)
    }

    pub fn is_extended(&self) -> bool {
        self.as_partition().is_some_and(|p| {
            matches!(
                p.part_type,
                partition_types::EXTENDED
                    | partition_types::WIN95_EXTENDED_LBA
                    | partition_types::LINUX_EXTENDED
            )
        })
    }

    pub fn is_primary(&self) -> bool {
        self.is_partition()
            && self
                .number()
                .is_some_and(|n| (1..=MAX_PRIMARY_PARTITIONS).contains(&n))
    }

    pub fn is_logical(&self) -> bool {
        self.is_partition() && self.number().is_some_and(|n| n > MAX_PRIMARY_PARTITIONS)
    }

    pub fn is_swap_slice(&self) -> bool {
        self.as_slice().is_some_and(|s| s.is_swap)
    }

    pub fn has_logical_ref(&self) -> bool {
        self.in_zpool.is_some() || self.in_vdev.is_some()
    }

    pub fn clear_logical_ref(&mut self) {
        self.in_zpool = None;
        self.in_vdev = None;
    }

    /// Resolved `(start, size)`, if both are known
    pub fn extent(&self) -> Option<(u64, Size)> {
        match (self.start_sector, self.size) {
            (Some(start), Some(size)) => Some((start, size)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_classification() {
        let solaris = PhysicalDevice::partition("1", partition_types::SOLARIS2);
        assert!(solaris.is_solaris() && solaris.is_primary() && !solaris.is_extended());

        let extended = PhysicalDevice::partition("2", partition_types::WIN95_EXTENDED_LBA);
        assert!(extended.is_extended() && extended.is_primary());

        let logical = PhysicalDevice::partition("5", partition_types::LINUX_NATIVE);
        assert!(logical.is_logical() && !logical.is_primary());

        let slice = PhysicalDevice::slice("0");
        assert!(!slice.is_primary() && !slice.is_logical());
    }

    #[test]
    fn builders_set_fields() {
        let disk = PhysicalDevice::disk("c0t0d0").whole().in_pool("tank", "v0");
        assert!(disk.is_whole_disk());
        assert_eq!(disk.name, "c0t0d0");
        assert!(disk.has_logical_ref());
        assert_eq!(disk.extent(), None);

        let slice = PhysicalDevice::slice("0").with_start(0).with_size(Size::from_mb(1));
        assert_eq!(slice.extent(), Some((0, Size::from_mb(1))));
    }
}
