//! Target controller: default layout and sizing policy
//!
//! The planner delegates every policy decision (which disk to use when none
//! is named, how a default pool looks, how big swap and dump should be) to a
//! [`TargetController`]. [`DefaultController`] is the configurable policy the
//! CLI uses.

use crate::config::ControllerConfig;
use crate::disk::layouts::apply_solaris_layout;
use crate::model::{
    Action, DeviceId, DeviceTree, Logical, LogicalChild, Redundancy, Size, Target, Vdev, Zpool,
};
use crate::utils::error::{Result, SelectionError};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// How swap or dump should be provided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDumpType {
    None,
    Volume,
}

/// Recommended swap and dump provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapDumpSizes {
    pub swap_type: SwapDumpType,
    pub swap_size: Size,
    pub dump_type: SwapDumpType,
    pub dump_size: Size,
}

impl SwapDumpSizes {
    pub fn none() -> Self {
        Self {
            swap_type: SwapDumpType::None,
            swap_size: Size::ZERO,
            dump_type: SwapDumpType::None,
            dump_size: Size::ZERO,
        }
    }
}

pub trait TargetController {
    /// Smallest root pool an install fits in
    fn minimum_target_size(&self) -> Size;

    fn calc_swap_dump_size(&self, min_size: Size, available_size: Size) -> Result<SwapDumpSizes>;

    /// Lay out `disk` so that a single root slice lands in `in_zpool`/`in_vdev`
    fn apply_default_layout(
        &self,
        tree: &mut DeviceTree,
        disk: DeviceId,
        use_whole_disk: bool,
        in_zpool: &str,
        in_vdev: &str,
    ) -> Result<()>;

    /// Pick a disk from the discovered inventory when none was specified
    fn select_initial_disk(&self, discovered: &Target) -> Result<DeviceId>;

    /// Narrow the given discovered disks down to the ones to install on
    fn select_disk(
        &self,
        discovered: &Target,
        disks: &[DeviceId],
        use_whole_disk: bool,
    ) -> Result<Vec<DeviceId>>;

    /// Add a default root pool (with one vdev) to `existing`
    fn apply_default_logical(
        &self,
        existing: Option<&Logical>,
        mountpoint: &str,
        redundancy: Redundancy,
        unique_name: bool,
    ) -> Result<Logical>;

    fn default_be_name(&self) -> String {
        "solaris".to_string()
    }

    fn default_vdev_name(&self) -> String {
        "vdev".to_string()
    }

    fn default_mountpoint(&self) -> String {
        "/rpool".to_string()
    }
}

/// Clamp value between min and max
fn clamp(value: Size, min: Size, max: Size) -> Size {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Take up to `want` out of `spare`; nothing if less than `floor` fits
fn carve(want: Size, floor: Size, spare: &mut Size) -> Size {
    let got = want.min(*spare);
    if got < floor || got.is_zero() {
        Size::ZERO
    } else {
        *spare = *spare - got;
        got
    }
}

pub struct DefaultController {
    config: ControllerConfig,
    /// Pool names present on the system, avoided when a unique name is asked for
    taken_pool_names: HashSet<String>,
}

impl DefaultController {
    pub fn new(config: ControllerConfig, discovered: &Target) -> Self {
        let taken_pool_names = discovered
            .logical
            .iter()
            .flat_map(|l| l.zpools.iter().map(|p| p.name.clone()))
            .collect();
        Self {
            config,
            taken_pool_names,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn disk_size(discovered: &Target, disk: DeviceId) -> Size {
        discovered.devices.get(disk).size.unwrap_or_default()
    }
}

impl TargetController for DefaultController {
    fn minimum_target_size(&self) -> Size {
        self.config.sizing.minimum_target_size
    }

    fn calc_swap_dump_size(&self, min_size: Size, available_size: Size) -> Result<SwapDumpSizes> {
        if available_size < min_size {
            return Err(SelectionError::InsufficientSpace(format!(
                "root pool capacity {} is below the minimum {}",
                available_size.human(),
                min_size.human()
            )));
        }

        let sizing = &self.config.sizing;
        let mut spare = available_size - min_size;

        let swap_size = carve(
            clamp(available_size.scale(sizing.swap_ratio), sizing.swap_min, sizing.swap_max),
            sizing.swap_min,
            &mut spare,
        );
        let dump_size = carve(
            clamp(available_size.scale(sizing.dump_ratio), sizing.dump_min, sizing.dump_max),
            sizing.dump_min,
            &mut spare,
        );

        let kind = |s: Size| {
            if s.is_zero() {
                SwapDumpType::None
            } else {
                SwapDumpType::Volume
            }
        };

        debug!(
            "Swap/dump sizing for {}: swap {}, dump {}",
            available_size.human(),
            swap_size.human(),
            dump_size.human()
        );

        Ok(SwapDumpSizes {
            swap_type: kind(swap_size),
            swap_size,
            dump_type: kind(dump_size),
            dump_size,
        })
    }

    fn apply_default_layout(
        &self,
        tree: &mut DeviceTree,
        disk: DeviceId,
        use_whole_disk: bool,
        in_zpool: &str,
        in_vdev: &str,
    ) -> Result<()> {
        apply_solaris_layout(tree, disk, use_whole_disk, in_zpool, in_vdev)
    }

    fn select_initial_disk(&self, discovered: &Target) -> Result<DeviceId> {
        if discovered.devices.is_empty() {
            return Err(SelectionError::Controller(
                "no disks were discovered to choose from".to_string(),
            ));
        }
        let minimum = self.minimum_target_size();
        let candidates: Vec<DeviceId> = discovered
            .devices
            .disks()
            .iter()
            .copied()
            .filter(|d| Self::disk_size(discovered, *d) >= minimum)
            .collect();

        let chosen = candidates
            .iter()
            .copied()
            .find(|d| {
                discovered
                    .devices
                    .get(*d)
                    .as_disk()
                    .is_some_and(|a| a.is_boot_disk)
            })
            .or_else(|| candidates.first().copied())
            .ok_or_else(|| {
                SelectionError::InsufficientSpace(format!(
                    "no discovered disk is at least {}",
                    minimum.human()
                ))
            })?;

        info!("Selected initial disk {}", discovered.devices.get(chosen).name);
        Ok(chosen)
    }

    fn select_disk(
        &self,
        discovered: &Target,
        disks: &[DeviceId],
        use_whole_disk: bool,
    ) -> Result<Vec<DeviceId>> {
        if disks.is_empty() {
            return Err(SelectionError::Controller(
                "disk selection needs at least one candidate".to_string(),
            ));
        }
        let minimum = self.minimum_target_size();
        let mut selected = Vec::new();
        for disk in disks {
            let size = Self::disk_size(discovered, *disk);
            if size < minimum {
                warn!(
                    "Skipping {} ({}): smaller than the minimum {}",
                    discovered.devices.get(*disk).name,
                    size.human(),
                    minimum.human()
                );
                continue;
            }
            selected.push(*disk);
        }

        if selected.is_empty() {
            return Err(SelectionError::InsufficientSpace(format!(
                "none of the {} specified disk(s) is at least {}{}",
                disks.len(),
                minimum.human(),
                if use_whole_disk { "" } else { " of free space" }
            )));
        }
        Ok(selected)
    }

    fn apply_default_logical(
        &self,
        existing: Option<&Logical>,
        mountpoint: &str,
        redundancy: Redundancy,
        unique_name: bool,
    ) -> Result<Logical> {
        let mut logical = existing.cloned().unwrap_or_default();
        let base = &self.config.pool.root_pool_name;

        let taken = |name: &str| {
            logical.find_zpool(name).is_some()
                || (unique_name && self.taken_pool_names.contains(name))
        };

        let mut name = base.clone();
        let mut n = 1;
        while taken(&name) {
            if !unique_name {
                return Err(SelectionError::DuplicateName(format!("zpool '{}'", name)));
            }
            name = format!("{}{}", base, n);
            n += 1;
        }

        info!("Adding default root pool '{}' ({})", name, redundancy);
        let mut pool = Zpool::new(&name, Action::Create, true);
        pool.mountpoint = Some(mountpoint.to_string());
        pool.children.push(LogicalChild::Vdev(Vdev::new(
            &self.config.pool.vdev_name,
            redundancy,
        )));
        logical.zpools.push(pool);
        Ok(logical)
    }

    fn default_be_name(&self) -> String {
        self.config.pool.be_name.clone()
    }

    fn default_vdev_name(&self) -> String {
        self.config.pool.vdev_name.clone()
    }

    fn default_mountpoint(&self) -> String {
        self.config.pool.root_mountpoint.clone()
    }
}
