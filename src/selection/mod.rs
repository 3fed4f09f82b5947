//! Target selection pipeline
//!
//! Turns a specification and the discovered inventory into a desired target.
//! The pipeline runs once, front to back:
//!
//! ```text
//! NoManifestTarget | WholeDiskOnlyShortcut | FullManifestTarget
//!   -> BuildDesiredTree -> ValidateSwapDump -> ValidateLogical
//!   -> ValidateDisks -> FinalCrossCheck
//! ```
//!
//! Any error ends the run; nothing is executed, so there is nothing to undo.

pub mod checkpoint;
pub mod context;
pub mod validate;

pub use checkpoint::TargetSelection;
pub use context::PlanningContext;

use crate::config::SelectionConfig;
use crate::controller::TargetController;
use crate::disk::gaps::allocate_tree;
use crate::disk::matching::resolve_disk;
use crate::disk::merge::merge_disks;
use crate::model::{Action, DeviceId, DeviceTree, Logical, PhysicalDevice, Redundancy, Target};
use crate::pool::identify::is_identifiable;
use crate::pool::merge::merge_logical;
use crate::pool::redundancy::validate_pools;
use crate::pool::Registry;
use crate::utils::error::{Result, SelectionError};
use std::fmt;
use tracing::{debug, info};

/// Pipeline states, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoManifestTarget,
    WholeDiskOnlyShortcut,
    FullManifestTarget,
    BuildDesiredTree,
    ValidateSwapDump,
    ValidateLogical,
    ValidateDisks,
    FinalCrossCheck,
}

impl Phase {
    /// Position in the pipeline; the three entry states share the first slot
    pub fn step(&self) -> usize {
        match self {
            Self::NoManifestTarget | Self::WholeDiskOnlyShortcut | Self::FullManifestTarget => 1,
            Self::BuildDesiredTree => 2,
            Self::ValidateSwapDump => 3,
            Self::ValidateLogical => 4,
            Self::ValidateDisks => 5,
            Self::FinalCrossCheck => 6,
        }
    }

    pub const STEPS: usize = 6;
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoManifestTarget => "No target specified",
            Self::WholeDiskOnlyShortcut => "Whole disks only",
            Self::FullManifestTarget => "Full target specification",
            Self::BuildDesiredTree => "Building desired target",
            Self::ValidateSwapDump => "Checking swap and dump",
            Self::ValidateLogical => "Checking pools",
            Self::ValidateDisks => "Checking disks",
            Self::FinalCrossCheck => "Final consistency check",
        };
        write!(f, "{}", name)
    }
}

fn enter(phase: Phase) {
    info!("[{}/{}] {}", phase.step(), Phase::STEPS, phase);
}

/// Which entry state a specification takes
pub fn entry_for(spec: &Target) -> Phase {
    if spec.is_empty() {
        return Phase::NoManifestTarget;
    }

    let has_pools = spec.logical.as_ref().is_some_and(|l| !l.zpools.is_empty());
    let tree = &spec.devices;
    let bare_whole_disks = tree.disks().iter().all(|d| {
        let disk = tree.get(*d);
        disk.is_whole_disk() && !disk.has_logical_ref() && !tree.has_children(*d)
    });

    if !has_pools && bare_whole_disks {
        Phase::WholeDiskOnlyShortcut
    } else {
        Phase::FullManifestTarget
    }
}

/// Plan a desired target for `spec` on the `discovered` system.
pub fn plan(
    spec: &Target,
    discovered: &Target,
    controller: &dyn TargetController,
    config: SelectionConfig,
) -> Result<Target> {
    let mut ctx = PlanningContext::new(discovered, controller, config);
    select_targets(&mut ctx, spec)?;
    Ok(ctx.desired)
}

/// Run the whole pipeline, leaving the accepted plan in `ctx.desired`.
pub fn select_targets(ctx: &mut PlanningContext, spec: &Target) -> Result<()> {
    let entry = entry_for(spec);
    enter(entry);

    match entry {
        Phase::NoManifestTarget => {
            let disk = ctx.controller.select_initial_disk(ctx.discovered)?;
            let expanded = default_target(ctx, spec.logical.as_ref(), &[disk])?;
            build_desired(ctx, &expanded, None)?;
        }
        Phase::WholeDiskOnlyShortcut => {
            let mut found = Vec::new();
            for disk in spec.devices.disks() {
                let ident = spec
                    .devices
                    .get(*disk)
                    .as_disk()
                    .map(|d| d.ident.clone())
                    .unwrap_or_default();
                found.push(resolve_disk(&ctx.discovered.devices, &ident)?);
            }
            let selected = ctx.controller.select_disk(ctx.discovered, &found, true)?;
            let expanded = default_target(ctx, spec.logical.as_ref(), &selected)?;
            build_desired(ctx, &expanded, None)?;
        }
        _ => {
            let has_pools = spec.logical.as_ref().is_some_and(|l| !l.zpools.is_empty());
            if has_pools {
                build_desired(ctx, spec, None)?;
            } else {
                let mountpoint = ctx.controller.default_mountpoint();
                let logical = ctx.controller.apply_default_logical(
                    spec.logical.as_ref(),
                    &mountpoint,
                    Redundancy::None,
                    false,
                )?;
                let temp = logical.root_pool().map(|p| p.name.clone());
                debug!("Using temporary root pool {:?}", temp);
                let expanded = Target::new(spec.devices.clone(), Some(logical));
                build_desired(ctx, &expanded, temp.as_deref())?;
            }
        }
    }

    enter(Phase::ValidateSwapDump);
    validate::validate_swap_dump(ctx)?;
    enter(Phase::ValidateLogical);
    validate::validate_logical(ctx)?;
    enter(Phase::ValidateDisks);
    validate::validate_disks(ctx)?;
    enter(Phase::FinalCrossCheck);
    validate::final_cross_check(ctx)?;

    info!("Target selection accepted");
    Ok(())
}

/// Whole discovered disks plus a default root pool with a unique name
fn default_target(
    ctx: &PlanningContext,
    existing: Option<&Logical>,
    disks: &[DeviceId],
) -> Result<Target> {
    let mut tree = DeviceTree::new();
    for disk in disks {
        let found = ctx.discovered.devices.get(*disk);
        let mut ident = found.as_disk().map(|d| d.ident.clone()).unwrap_or_default();
        if ident.ctd.is_none() {
            ident.ctd = Some(found.name.clone());
        }
        tree.add_disk(PhysicalDevice::disk_with(ident).whole());
    }

    let mountpoint = ctx.controller.default_mountpoint();
    let logical = ctx
        .controller
        .apply_default_logical(existing, &mountpoint, Redundancy::None, true)?;
    Ok(Target::new(tree, Some(logical)))
}

/// BuildDesiredTree: merge, identify, lay out and allocate.
fn build_desired(ctx: &mut PlanningContext, spec: &Target, temp_pool: Option<&str>) -> Result<()> {
    enter(Phase::BuildDesiredTree);

    let logical = spec.logical.clone().unwrap_or_default();
    merge_logical(ctx, &logical)?;
    merge_disks(ctx, &spec.devices)?;

    assign_bare_disks(ctx)?;
    apply_root_layouts(ctx)?;
    identify_devices(ctx)?;
    if let Some(name) = temp_pool {
        discard_if_unused(ctx, name);
    }

    let minimum = ctx.minimum_size();
    allocate_tree(&mut ctx.desired.devices, minimum)?;
    validate_pools(ctx)
}

/// Whole disks that name no pool and hold nothing go to the root pool's
/// first data vdev.
fn assign_bare_disks(ctx: &mut PlanningContext) -> Result<()> {
    let tree = &ctx.desired.devices;
    let bare: Vec<DeviceId> = tree
        .disks()
        .iter()
        .copied()
        .filter(|d| {
            let disk = tree.get(*d);
            disk.is_whole_disk() && !disk.has_logical_ref() && !tree.has_children(*d)
        })
        .collect();
    let Some(first) = bare.first() else {
        return Ok(());
    };

    let root = ctx.root_pool().ok_or_else(|| {
        SelectionError::NoRootPool(format!(
            "whole disk {} has no pool to join",
            ctx.desired.devices.get(*first).name
        ))
    })?;
    let pool = root.name.clone();
    let vdev = root
        .top_level_vdevs()
        .next()
        .map(|v| v.name.clone())
        .ok_or_else(|| {
            SelectionError::InvalidSpecification(format!("root pool '{}' has no data vdev", pool))
        })?;

    for disk in bare {
        let device = ctx.desired.devices.get_mut(disk);
        debug!("Assigning {} to {}:{}", device.name, pool, vdev);
        device.in_zpool = Some(pool.clone());
        device.in_vdev = Some(vdev.clone());
    }
    Ok(())
}

/// Every pool reference must resolve to a planned vdev. Kept devices of
/// kept pools already belong there.
fn identify_devices(ctx: &mut PlanningContext) -> Result<()> {
    for id in ctx.desired.devices.walk() {
        let device = ctx.desired.devices.get(id);
        let action = device.action;
        if let Some(pool) = device.in_zpool.clone() {
            if ctx.pool_is_preserved(&pool) {
                if action == Action::Create {
                    return Err(SelectionError::InvalidSpecification(format!(
                        "new device {} cannot join zpool '{}', which is kept as is",
                        ctx.desired.devices.full_name(id),
                        pool
                    )));
                }
                if action.keeps_existing() {
                    continue;
                }
            }
        }

        let resolved = is_identifiable(&ctx.registry, &mut ctx.desired.devices, id)?;
        let device = ctx.desired.devices.get(id);
        if resolved.is_none() && device.has_logical_ref() {
            return Err(SelectionError::NotIdentifiable(format!(
                "{} refers to {}:{}, which is not a unique vdev in the plan",
                ctx.desired.devices.full_name(id),
                device.in_zpool.as_deref().unwrap_or("?"),
                device.in_vdev.as_deref().unwrap_or("?")
            )));
        }
    }
    Ok(())
}

/// Disks given to the root pool get the controller's default root layout,
/// since root pools live on slices. A whole disk must hold nothing else; a
/// partly used disk keeps what it has as long as none of it names a pool.
fn apply_root_layouts(ctx: &mut PlanningContext) -> Result<()> {
    let Some(root) = ctx.root_pool() else {
        return Ok(());
    };
    let root = root.name.clone();

    let tree = &ctx.desired.devices;
    let disks: Vec<(DeviceId, String, bool)> = tree
        .disks()
        .iter()
        .copied()
        .filter_map(|d| {
            let disk = tree.get(d);
            let whole = disk.is_whole_disk();
            let free = if whole {
                !tree.has_children(d)
            } else {
                tree.descendants(d).iter().all(|c| !tree.get(*c).has_logical_ref())
            };
            if !free {
                return None;
            }
            let vdev = root_vdev(&ctx.registry, &root, disk)?;
            Some((d, vdev, whole))
        })
        .collect();

    let controller = ctx.controller;
    for (disk, vdev, whole) in disks {
        controller.apply_default_layout(&mut ctx.desired.devices, disk, whole, &root, &vdev)?;
    }
    Ok(())
}

/// The root pool vdev a disk reference points at, if it resolves to one
fn root_vdev(registry: &Registry, root: &str, disk: &PhysicalDevice) -> Option<String> {
    match (disk.in_zpool.as_deref(), disk.in_vdev.as_deref()) {
        (Some(pool), Some(vdev)) if pool == root => Some(vdev.to_string()),
        (Some(pool), None) if pool == root => match registry.vdevs_of(root) {
            [only] => Some(only.clone()),
            _ => None,
        },
        (None, Some(vdev)) if registry.pools_with_vdev(vdev) == [root] => Some(vdev.to_string()),
        _ => None,
    }
}

fn discard_if_unused(ctx: &mut PlanningContext, name: &str) {
    let tree = &ctx.desired.devices;
    let used = tree
        .walk()
        .into_iter()
        .any(|id| tree.get(id).in_zpool.as_deref() == Some(name));
    if used {
        return;
    }

    info!("No device was assigned to default pool '{}', dropping it", name);
    ctx.logical_mut().zpools.retain(|p| p.name != name);
    ctx.registry.remove_pool(name);
}
