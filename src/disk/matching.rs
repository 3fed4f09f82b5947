//! Resolving disk references against the discovered inventory

use crate::model::{DeviceId, DeviceTree, DiskIdent, DiskProp};
use crate::utils::error::{Result, SelectionError};
use tracing::debug;

/// `/dev/dsk/c0t0d0` and `c0t0d0` name the same disk
fn bare_ctd(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn ident_of(tree: &DeviceTree, id: DeviceId) -> Option<&DiskIdent> {
    tree.get(id).as_disk().map(|d| &d.ident)
}

fn find_by(
    tree: &DeviceTree,
    wanted: Option<&String>,
    field: impl Fn(&DiskIdent) -> Option<&String>,
) -> Option<DeviceId> {
    let wanted = wanted?;
    tree.disks().iter().copied().find(|d| {
        ident_of(tree, *d)
            .and_then(&field)
            .is_some_and(|have| have == wanted)
    })
}

fn eq_ignore_case(want: &Option<String>, have: &Option<String>) -> bool {
    match (want, have) {
        (None, _) => true,
        (Some(w), Some(h)) => w.eq_ignore_ascii_case(h),
        (Some(_), None) => false,
    }
}

/// Does a discovered disk satisfy a property matcher? The size criterion is
/// a lower bound.
pub fn matches_prop(prop: &DiskProp, tree: &DeviceTree, disk: DeviceId) -> bool {
    let device = tree.get(disk);
    let have = device
        .as_disk()
        .and_then(|d| d.ident.prop.clone())
        .unwrap_or_default();

    let size_ok = match prop.dev_size {
        None => true,
        Some(want) => device.size.or(have.dev_size).is_some_and(|s| s >= want),
    };

    eq_ignore_case(&prop.dev_type, &have.dev_type)
        && eq_ignore_case(&prop.dev_vendor, &have.dev_vendor)
        && eq_ignore_case(&prop.dev_chassis, &have.dev_chassis)
        && size_ok
}

/// Candidate matches, one per identifier present in `ident`, in precedence
/// order: ctd, volume id, device id, device path, receptacle, boot disk
/// keyword, then the property matcher (only when nothing stable was given).
fn candidates(tree: &DeviceTree, ident: &DiskIdent) -> Vec<(&'static str, Option<DeviceId>)> {
    let mut out = Vec::new();

    if let Some(ref ctd) = ident.ctd {
        let ctd = bare_ctd(ctd);
        out.push(("ctd", tree.disks().iter().copied().find(|d| tree.get(*d).name == ctd)));
    }
    if ident.volid.is_some() {
        out.push(("volid", find_by(tree, ident.volid.as_ref(), |i| i.volid.as_ref())));
    }
    if ident.devid.is_some() {
        out.push(("devid", find_by(tree, ident.devid.as_ref(), |i| i.devid.as_ref())));
    }
    if ident.devpath.is_some() {
        out.push(("devpath", find_by(tree, ident.devpath.as_ref(), |i| i.devpath.as_ref())));
    }
    if ident.receptacle.is_some() {
        out.push((
            "receptacle",
            find_by(tree, ident.receptacle.as_ref(), |i| i.receptacle.as_ref()),
        ));
    }
    if ident.keyword.is_some() {
        let boot = tree.disks().iter().copied().find(|d| {
            tree.get(*d).as_disk().is_some_and(|a| a.is_boot_disk)
        });
        out.push(("keyword", boot));
    }

    if out.is_empty() {
        if let Some(ref prop) = ident.prop {
            let found = tree
                .disks()
                .iter()
                .copied()
                .find(|d| matches_prop(prop, tree, *d));
            out.push(("properties", found));
        }
    }

    out
}

/// First discovered disk matching `ident`, by identifier precedence.
pub fn find_disk(tree: &DeviceTree, ident: &DiskIdent) -> Option<DeviceId> {
    candidates(tree, ident).into_iter().find_map(|(_, found)| found)
}

/// Like [`find_disk`], but an unmatched reference is an `UnknownDevice` and
/// identifiers that point at different disks are ambiguous.
pub fn resolve_disk(tree: &DeviceTree, ident: &DiskIdent) -> Result<DeviceId> {
    let found = candidates(tree, ident);
    let mut matched = found.iter().filter_map(|(how, id)| id.map(|id| (*how, id)));

    let Some((how, disk)) = matched.next() else {
        return Err(SelectionError::UnknownDevice(format!(
            "no discovered disk matches {}",
            ident
        )));
    };

    if let Some((other_how, other)) = matched.find(|(_, id)| *id != disk) {
        return Err(SelectionError::AmbiguousIdentification(format!(
            "{} selects {} but {} selects {}",
            how,
            tree.get(disk).name,
            other_how,
            tree.get(other).name
        )));
    }

    debug!("Disk reference {} resolved to {} by {}", ident, tree.get(disk).name, how);
    Ok(disk)
}
