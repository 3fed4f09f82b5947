//! Plan-wide name registry
//!
//! Every name that must be unique in the desired tree goes through here:
//! disks by ctd, pools, `pool:vdev`, `pool:dataset` (filesystems and zvols
//! share a namespace), per-pool options, and the root pool and BE
//! singletons. A fresh registry is built for every planning run.

use crate::utils::error::{Result, SelectionError};
use std::collections::{BTreeMap, BTreeSet};

fn key(pool: &str, name: &str) -> String {
    format!("{}:{}", pool, name)
}

fn duplicate(what: String) -> SelectionError {
    SelectionError::DuplicateName(what)
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    disks: BTreeSet<String>,
    /// Pool name to its vdev names, in insertion order
    pools: BTreeMap<String, Vec<String>>,
    datasets: BTreeSet<String>,
    pool_options: BTreeSet<String>,
    dataset_options: BTreeSet<String>,
    root_pool: Option<String>,
    be: Option<(String, String)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_disk(&mut self, ctd: &str) -> Result<()> {
        if !self.disks.insert(ctd.to_string()) {
            return Err(duplicate(format!("disk '{}' is specified more than once", ctd)));
        }
        Ok(())
    }

    pub fn add_pool(&mut self, name: &str) -> Result<()> {
        if self.pools.contains_key(name) {
            return Err(duplicate(format!("zpool '{}' is specified more than once", name)));
        }
        self.pools.insert(name.to_string(), Vec::new());
        Ok(())
    }

    /// Forget a pool and everything registered under it
    pub fn remove_pool(&mut self, name: &str) {
        self.pools.remove(name);
        let prefix = key(name, "");
        self.datasets.retain(|k| !k.starts_with(&prefix));
        self.pool_options.remove(name);
        self.dataset_options.remove(name);
        if self.root_pool.as_deref() == Some(name) {
            self.root_pool = None;
        }
        if self.be.as_ref().is_some_and(|(pool, _)| pool == name) {
            self.be = None;
        }
    }

    pub fn add_vdev(&mut self, pool: &str, vdev: &str) -> Result<()> {
        let vdevs = self.pools.entry(pool.to_string()).or_default();
        if vdevs.iter().any(|v| v == vdev) {
            return Err(duplicate(format!(
                "vdev '{}' is specified more than once",
                key(pool, vdev)
            )));
        }
        vdevs.push(vdev.to_string());
        Ok(())
    }

    pub fn add_dataset(&mut self, pool: &str, name: &str) -> Result<()> {
        if !self.datasets.insert(key(pool, name)) {
            return Err(duplicate(format!(
                "dataset '{}/{}' is specified more than once",
                pool, name
            )));
        }
        Ok(())
    }

    pub fn add_pool_options(&mut self, pool: &str) -> Result<()> {
        if !self.pool_options.insert(pool.to_string()) {
            return Err(duplicate(format!("pool options for '{}' given more than once", pool)));
        }
        Ok(())
    }

    pub fn add_dataset_options(&mut self, pool: &str) -> Result<()> {
        if !self.dataset_options.insert(pool.to_string()) {
            return Err(duplicate(format!("dataset options for '{}' given more than once", pool)));
        }
        Ok(())
    }

    pub fn set_root_pool(&mut self, name: &str) -> Result<()> {
        match self.root_pool {
            Some(ref existing) => Err(duplicate(format!(
                "root pool: both '{}' and '{}' are marked as root",
                existing, name
            ))),
            None => {
                self.root_pool = Some(name.to_string());
                Ok(())
            }
        }
    }

    pub fn set_be(&mut self, pool: &str, name: &str) -> Result<()> {
        match self.be {
            Some((ref p, ref n)) => Err(duplicate(format!(
                "boot environment: '{}/{}' and '{}/{}' both specified",
                p, n, pool, name
            ))),
            None => {
                self.be = Some((pool.to_string(), name.to_string()));
                Ok(())
            }
        }
    }

    pub fn has_disk(&self, ctd: &str) -> bool {
        self.disks.contains(ctd)
    }

    pub fn has_pool(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    pub fn has_vdev(&self, pool: &str, vdev: &str) -> bool {
        self.vdevs_of(pool).iter().any(|v| v == vdev)
    }

    pub fn vdevs_of(&self, pool: &str) -> &[String] {
        self.pools.get(pool).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pools that have a vdev of this name
    pub fn pools_with_vdev(&self, vdev: &str) -> Vec<&str> {
        self.pools
            .iter()
            .filter(|(_, vdevs)| vdevs.iter().any(|v| v == vdev))
            .map(|(pool, _)| pool.as_str())
            .collect()
    }

    pub fn has_dataset(&self, pool: &str, name: &str) -> bool {
        self.datasets.contains(&key(pool, name))
    }

    pub fn root_pool(&self) -> Option<&str> {
        self.root_pool.as_deref()
    }

    pub fn be(&self) -> Option<(&str, &str)> {
        self.be.as_ref().map(|(p, n)| (p.as_str(), n.as_str()))
    }
}
