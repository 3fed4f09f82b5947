//! Merging specified pools with the pools found on the system
//!
//! New pools take their children from the specification. Preserved and
//! use-existing pools start as a copy of the discovered pool; their vdevs are
//! frozen and only dataset-level changes are accepted. Errors found while
//! walking one pool's children are collected and reported together.

use crate::model::{Action, Be, Logical, LogicalChild, Redundancy, Vdev, Zpool, ZvolUse};
use crate::selection::context::PlanningContext;
use crate::utils::error::{first_error, Result, SelectionError};
use tracing::{debug, info, warn};

/// Merge the logical section of the specification into the desired target.
pub fn merge_logical(ctx: &mut PlanningContext, spec: &Logical) -> Result<()> {
    ctx.desired.logical = Some(Logical {
        noswap: spec.noswap,
        nodump: spec.nodump,
        zpools: Vec::new(),
    });

    for pool in &spec.zpools {
        let merged = merge_pool(ctx, pool)?;
        ctx.logical_mut().zpools.push(merged);
    }
    Ok(())
}

/// Merge one specified pool and register its names.
pub fn merge_pool(ctx: &mut PlanningContext, spec: &Zpool) -> Result<Zpool> {
    ctx.registry.add_pool(&spec.name)?;

    if spec.is_root {
        if !matches!(spec.action, Action::Create | Action::UseExisting) {
            return Err(SelectionError::InvalidSpecification(format!(
                "root pool '{}' can only be created or used as is, not {}",
                spec.name, spec.action
            )));
        }
        ctx.registry.set_root_pool(&spec.name)?;
    }

    let found = ctx.discovered_pool(&spec.name);
    match spec.action {
        Action::Create => merge_new_pool(ctx, spec, found.is_some()),
        Action::Preserve | Action::UseExisting => {
            let found = found.ok_or_else(|| {
                SelectionError::UnknownDevice(format!(
                    "zpool '{}' is marked {} but does not exist",
                    spec.name, spec.action
                ))
            })?;
            merge_existing_pool(ctx, spec, found)
        }
        Action::Delete => {
            if found.is_none() {
                return Err(SelectionError::UnknownDevice(format!(
                    "zpool '{}' is marked delete but does not exist",
                    spec.name
                )));
            }
            warn!("Zpool '{}' will be destroyed", spec.name);
            if !spec.children.is_empty() {
                debug!("Ignoring children of deleted zpool '{}'", spec.name);
            }
            let mut pool = Zpool::new(&spec.name, Action::Delete, false);
            pool.exists = true;
            Ok(pool)
        }
        Action::UseExistingSolaris2 => Err(SelectionError::InvalidSpecification(format!(
            "zpool '{}': {} only applies to partitions",
            spec.name, spec.action
        ))),
    }
}

fn merge_new_pool(ctx: &mut PlanningContext, spec: &Zpool, exists: bool) -> Result<Zpool> {
    if exists {
        warn!(
            "Zpool '{}' exists and will be recreated, its data will be lost",
            spec.name
        );
    }
    debug!("Creating zpool '{}'", spec.name);

    let mut pool = Zpool::new(&spec.name, Action::Create, spec.is_root);
    pool.mountpoint = spec.mountpoint.clone();

    let mut errors = Vec::new();
    for child in &spec.children {
        if let Err(e) = add_new_child(ctx, &mut pool, child) {
            errors.push(e);
        }
    }
    first_error(&format!("zpool '{}'", pool.name), errors)?;

    if pool.top_level_vdevs().next().is_none() {
        let name = ctx.controller.default_vdev_name();
        ctx.registry.add_vdev(&pool.name, &name)?;
        debug!("Synthesized vdev {}:{}", pool.name, name);
        pool.children.push(LogicalChild::Vdev(Vdev {
            name,
            redundancy: Redundancy::Mirror,
            synthesized: true,
        }));
    }

    Ok(pool)
}

fn add_new_child(ctx: &mut PlanningContext, pool: &mut Zpool, child: &LogicalChild) -> Result<()> {
    match child {
        LogicalChild::Vdev(vdev) => {
            ctx.registry.add_vdev(&pool.name, &vdev.name)?;
        }
        LogicalChild::Filesystem(fs) => {
            if fs.action != Action::Create {
                return Err(SelectionError::InvalidSpecification(format!(
                    "filesystem '{}/{}' cannot be {} in a new pool",
                    pool.name, fs.name, fs.action
                )));
            }
            ctx.registry.add_dataset(&pool.name, &fs.name)?;
        }
        LogicalChild::Zvol(zvol) => {
            if zvol.action != Action::Create {
                return Err(SelectionError::InvalidSpecification(format!(
                    "zvol '{}/{}' cannot be {} in a new pool",
                    pool.name, zvol.name, zvol.action
                )));
            }
            if zvol.size.is_none() {
                return Err(SelectionError::InvalidSpecification(format!(
                    "zvol '{}/{}' needs a size",
                    pool.name, zvol.name
                )));
            }
            ctx.registry.add_dataset(&pool.name, &zvol.name)?;
        }
        LogicalChild::PoolOptions(_) => ctx.registry.add_pool_options(&pool.name)?,
        LogicalChild::DatasetOptions(_) => ctx.registry.add_dataset_options(&pool.name)?,
        LogicalChild::Be(be) => return add_be(ctx, pool, be, None),
    }
    pool.children.push(child.clone());
    Ok(())
}

fn add_be(
    ctx: &mut PlanningContext,
    pool: &mut Zpool,
    be: &Be,
    existing: Option<&Zpool>,
) -> Result<()> {
    if !pool.is_root {
        return Err(SelectionError::InvalidSpecification(format!(
            "boot environments belong in the root pool, not '{}'",
            pool.name
        )));
    }

    let name = be.name.clone().unwrap_or_else(|| ctx.controller.default_be_name());
    if existing.is_some_and(|p| p.bes().any(|b| b.name.as_deref() == Some(name.as_str()))) {
        return Err(SelectionError::DuplicateName(format!(
            "boot environment '{}' already exists in pool '{}'",
            name, pool.name
        )));
    }

    ctx.registry.set_be(&pool.name, &name)?;
    pool.children.push(LogicalChild::Be(Be {
        name: Some(name),
        mountpoint: be.mountpoint.clone(),
        exists: false,
    }));
    Ok(())
}

fn merge_existing_pool(ctx: &mut PlanningContext, spec: &Zpool, found: &Zpool) -> Result<Zpool> {
    info!("Keeping zpool '{}' ({})", spec.name, spec.action);

    let mut pool = Zpool::new(&spec.name, spec.action, spec.is_root);
    pool.exists = true;
    pool.mountpoint = spec.mountpoint.clone().or_else(|| found.mountpoint.clone());
    pool.children = found
        .children
        .iter()
        .filter(|c| {
            matches!(
                c,
                LogicalChild::Vdev(_) | LogicalChild::Filesystem(_) | LogicalChild::Zvol(_)
            )
        })
        .cloned()
        .collect();
    for child in pool.children.iter_mut() {
        match child {
            LogicalChild::Filesystem(fs) => fs.action = Action::Preserve,
            LogicalChild::Zvol(zvol) => zvol.action = Action::Preserve,
            _ => {}
        }
    }

    for vdev in found.vdevs() {
        ctx.registry.add_vdev(&pool.name, &vdev.name)?;
    }
    for name in found
        .filesystems()
        .map(|f| &f.name)
        .chain(found.zvols().map(|z| &z.name))
    {
        ctx.registry.add_dataset(&pool.name, name)?;
    }

    let mut errors = Vec::new();
    for child in &spec.children {
        if let Err(e) = merge_existing_child(ctx, &mut pool, found, child) {
            errors.push(e);
        }
    }
    first_error(&format!("zpool '{}'", pool.name), errors)?;

    Ok(pool)
}

fn merge_existing_child(
    ctx: &mut PlanningContext,
    pool: &mut Zpool,
    found: &Zpool,
    child: &LogicalChild,
) -> Result<()> {
    let pool_name = pool.name.clone();
    match child {
        LogicalChild::Vdev(vdev) => {
            debug!("Rejecting vdev '{}' on {} pool", vdev.name, pool.action);
            Err(SelectionError::VdevOnPreservedPool(pool_name.clone()))
        }
        LogicalChild::PoolOptions(_) | LogicalChild::DatasetOptions(_) => {
            Err(SelectionError::InvalidSpecification(format!(
                "options cannot be changed on {} pool '{}'",
                pool.action, pool_name
            )))
        }
        LogicalChild::Be(be) => add_be(ctx, pool, be, Some(found)),
        LogicalChild::Filesystem(fs) => match fs.action {
            Action::Create => {
                if found.has_dataset(&fs.name) {
                    return Err(SelectionError::DuplicateName(format!(
                        "dataset '{}/{}' already exists",
                        pool_name, fs.name
                    )));
                }
                ctx.registry.add_dataset(&pool_name, &fs.name)?;
                pool.children.push(child.clone());
                Ok(())
            }
            Action::Preserve | Action::Delete => {
                let existing = pool.find_filesystem_mut(&fs.name).ok_or_else(|| {
                    SelectionError::UnknownDevice(format!(
                        "filesystem '{}/{}' does not exist",
                        pool_name, fs.name
                    ))
                })?;
                if fs.action == Action::Delete {
                    warn!("Filesystem '{}/{}' will be destroyed", pool_name, fs.name);
                }
                existing.action = fs.action;
                Ok(())
            }
            other => Err(SelectionError::InvalidSpecification(format!(
                "filesystem '{}/{}' cannot be {}",
                pool_name, fs.name, other
            ))),
        },
        LogicalChild::Zvol(zvol) => match zvol.action {
            Action::Create => {
                if found.has_dataset(&zvol.name) {
                    return Err(SelectionError::DuplicateName(format!(
                        "dataset '{}/{}' already exists",
                        pool_name, zvol.name
                    )));
                }
                if zvol.size.is_none() {
                    return Err(SelectionError::InvalidSpecification(format!(
                        "zvol '{}/{}' needs a size",
                        pool_name, zvol.name
                    )));
                }
                ctx.registry.add_dataset(&pool_name, &zvol.name)?;
                pool.children.push(child.clone());
                Ok(())
            }
            Action::Preserve | Action::Delete | Action::UseExisting => {
                let current = found.find_zvol(&zvol.name).ok_or_else(|| {
                    SelectionError::UnknownDevice(format!(
                        "zvol '{}/{}' does not exist",
                        pool_name, zvol.name
                    ))
                })?;

                let reassigned = zvol.action == Action::UseExisting && zvol.usage != current.usage;
                if current.usage == ZvolUse::Dump && (zvol.action == Action::Delete || reassigned) {
                    return Err(SelectionError::InvalidSpecification(format!(
                        "zvol '{}/{}' is the dump device and cannot be {}",
                        pool_name,
                        zvol.name,
                        if reassigned { "reassigned" } else { "deleted" }
                    )));
                }
                if zvol.action == Action::UseExisting && !reassigned {
                    return Err(SelectionError::InvalidSpecification(format!(
                        "zvol '{}/{}' is already used as {}",
                        pool_name, zvol.name, current.usage
                    )));
                }

                let size = current.size;
                let existing = pool.find_zvol_mut(&zvol.name).ok_or_else(|| {
                    SelectionError::UnknownDevice(format!("zvol '{}/{}'", pool_name, zvol.name))
                })?;
                existing.action = zvol.action;
                match zvol.action {
                    Action::UseExisting => {
                        debug!(
                            "Zvol '{}/{}' changes use from {} to {}",
                            pool_name, zvol.name, existing.usage, zvol.usage
                        );
                        existing.usage = zvol.usage;
                        existing.size = size;
                    }
                    Action::Delete => warn!("Zvol '{}/{}' will be destroyed", pool_name, zvol.name),
                    _ => {}
                }
                Ok(())
            }
            other => Err(SelectionError::InvalidSpecification(format!(
                "zvol '{}/{}' cannot be {}",
                pool_name, zvol.name, other
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Filesystem, Size, Zvol};
    use crate::testutil;

    fn discovered_with_pool() -> crate::model::Target {
        let mut target = testutil::inventory(&[("c0t0d0", 40)]);
        let mut dump = Zvol::new("dump", ZvolUse::Dump, Size::from_gb(1));
        dump.action = Action::Preserve;
        let pool = Zpool::new("rpool", Action::Preserve, true)
            .with_child(LogicalChild::Vdev(Vdev::new("vdev", Redundancy::None)))
            .with_child(LogicalChild::Filesystem(Filesystem {
                name: "export".to_string(),
                action: Action::Preserve,
                mountpoint: None,
                in_be: false,
            }))
            .with_child(LogicalChild::Zvol(dump))
            .with_child(LogicalChild::Zvol(Zvol::new("vol1", ZvolUse::None, Size::from_gb(2))))
            .with_child(LogicalChild::Be(Be {
                name: Some("solaris".to_string()),
                mountpoint: None,
                exists: true,
            }));
        target.logical = Some(Logical {
            zpools: vec![pool],
            ..Default::default()
        });
        target
    }

    fn run(discovered: &crate::model::Target, spec: Zpool) -> Result<Zpool> {
        let controller = testutil::controller(discovered);
        let mut ctx = testutil::context(discovered, &controller);
        merge_pool(&mut ctx, &spec)
    }

    #[test]
    fn new_pool_gets_synthesized_vdev() {
        let discovered = testutil::inventory(&[("c0t0d0", 40)]);
        let pool = run(&discovered, Zpool::new("tank", Action::Create, false)).unwrap();
        let vdev = pool.vdevs().next().unwrap();
        assert_eq!(vdev.name, "vdev");
        assert_eq!(vdev.redundancy, Redundancy::Mirror);
        assert!(vdev.synthesized);
    }

    #[test]
    fn duplicate_children_are_rejected() {
        let discovered = testutil::inventory(&[("c0t0d0", 40)]);
        let spec = Zpool::new("tank", Action::Create, false)
            .with_child(LogicalChild::Vdev(Vdev::new("v0", Redundancy::None)))
            .with_child(LogicalChild::Vdev(Vdev::new("v0", Redundancy::Mirror)));
        assert!(matches!(run(&discovered, spec), Err(SelectionError::DuplicateName(_))));

        // filesystems and zvols share a namespace
        let spec = Zpool::new("tank", Action::Create, false)
            .with_child(LogicalChild::Filesystem(Filesystem {
                name: "data".to_string(),
                action: Action::Create,
                mountpoint: None,
                in_be: false,
            }))
            .with_child(LogicalChild::Zvol(Zvol::new("data", ZvolUse::None, Size::from_gb(1))));
        assert!(matches!(run(&discovered, spec), Err(SelectionError::DuplicateName(_))));
    }

    #[test]
    fn preserved_pool_rejects_vdevs() {
        let discovered = discovered_with_pool();
        let spec = Zpool::new("rpool", Action::UseExisting, true)
            .with_child(LogicalChild::Vdev(Vdev::new("extra", Redundancy::None)));
        assert!(matches!(
            run(&discovered, spec),
            Err(SelectionError::VdevOnPreservedPool(_))
        ));
    }

    #[test]
    fn preserved_pool_copies_discovered_datasets() {
        let discovered = discovered_with_pool();
        let spec = Zpool::new("rpool", Action::UseExisting, true)
            .with_child(LogicalChild::Filesystem(Filesystem {
                name: "export".to_string(),
                action: Action::Delete,
                mountpoint: None,
                in_be: false,
            }))
            .with_child(LogicalChild::Zvol(Zvol {
                name: "vol1".to_string(),
                action: Action::UseExisting,
                size: None,
                usage: ZvolUse::Swap,
            }))
            .with_child(LogicalChild::Be(Be {
                name: Some("solaris-2".to_string()),
                ..Default::default()
            }));
        let pool = run(&discovered, spec).unwrap();

        assert!(pool.exists);
        assert_eq!(pool.find_vdev("vdev").unwrap().redundancy, Redundancy::None);
        assert_eq!(pool.find_filesystem("export").unwrap().action, Action::Delete);
        let vol = pool.find_zvol("vol1").unwrap();
        assert_eq!(vol.usage, ZvolUse::Swap);
        assert_eq!(vol.size, Some(Size::from_gb(2)));
        // discovered BEs are not carried over, the new one is
        assert_eq!(pool.bes().count(), 1);
        assert_eq!(pool.bes().next().unwrap().name.as_deref(), Some("solaris-2"));
    }

    #[test]
    fn dump_volume_cannot_be_deleted_or_reassigned() {
        let discovered = discovered_with_pool();
        let changes = [
            (Action::Delete, ZvolUse::Dump),
            (Action::UseExisting, ZvolUse::Swap),
        ];
        for (action, usage) in changes {
            let dump = Zvol {
                name: "dump".to_string(),
                action,
                size: None,
                usage,
            };
            let spec =
                Zpool::new("rpool", Action::UseExisting, true).with_child(LogicalChild::Zvol(dump));
            assert!(matches!(
                run(&discovered, spec),
                Err(SelectionError::InvalidSpecification(_))
            ));
        }
    }

    #[test]
    fn existing_dataset_rules() {
        let discovered = discovered_with_pool();

        // create needs a fresh name
        let spec = Zpool::new("rpool", Action::UseExisting, true)
            .with_child(LogicalChild::Zvol(Zvol::new("vol1", ZvolUse::None, Size::from_gb(1))));
        assert!(matches!(run(&discovered, spec), Err(SelectionError::DuplicateName(_))));

        // preserve needs an existing one
        let absent = Filesystem {
            name: "missing".to_string(),
            action: Action::Preserve,
            mountpoint: None,
            in_be: false,
        };
        let spec = Zpool::new("rpool", Action::UseExisting, true)
            .with_child(LogicalChild::Filesystem(absent));
        assert!(matches!(run(&discovered, spec), Err(SelectionError::UnknownDevice(_))));

        // an existing BE name cannot be reused
        let spec = Zpool::new("rpool", Action::UseExisting, true).with_child(LogicalChild::Be(Be {
            name: Some("solaris".to_string()),
            ..Default::default()
        }));
        assert!(matches!(run(&discovered, spec), Err(SelectionError::DuplicateName(_))));
    }

    #[test]
    fn root_pool_actions_are_restricted() {
        let discovered = discovered_with_pool();
        let spec = Zpool::new("rpool", Action::Preserve, true);
        assert!(matches!(
            run(&discovered, spec),
            Err(SelectionError::InvalidSpecification(_))
        ));

        let spec = Zpool::new("gone", Action::Delete, false);
        assert!(matches!(run(&discovered, spec), Err(SelectionError::UnknownDevice(_))));
    }
}
