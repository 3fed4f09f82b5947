//! Logical containers: zpools and everything that lives in them

use crate::model::physical::Action;
use crate::model::size::Size;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Redundancy {
    #[default]
    None,
    Mirror,
    #[serde(alias = "raidz")]
    Raidz1,
    Raidz2,
    Raidz3,
    Log,
    Logmirror,
    Spare,
    Cache,
}

impl Redundancy {
    /// Fewest devices the group can be built from
    pub fn min_devices(&self) -> usize {
        match self {
            Self::None | Self::Mirror | Self::Log | Self::Logmirror => 1,
            Self::Raidz1 => 2,
            Self::Raidz2 => 3,
            Self::Raidz3 => 4,
            Self::Spare | Self::Cache => 0,
        }
    }

    /// Fewest devices for the group to keep its declared redundancy
    pub fn required_devices(&self) -> usize {
        match self {
            Self::Mirror | Self::Logmirror => 2,
            other => other.min_devices(),
        }
    }

    /// Data-holding redundancy groups
    pub fn is_top_level(&self) -> bool {
        matches!(
            self,
            Self::None | Self::Mirror | Self::Raidz1 | Self::Raidz2 | Self::Raidz3
        )
    }

    pub fn is_raidz(&self) -> bool {
        matches!(self, Self::Raidz1 | Self::Raidz2 | Self::Raidz3)
    }

    pub fn parity(&self) -> usize {
        match self {
            Self::Raidz1 => 1,
            Self::Raidz2 => 2,
            Self::Raidz3 => 3,
            _ => 0,
        }
    }
}

impl fmt::Display for Redundancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Mirror => "mirror",
            Self::Raidz1 => "raidz1",
            Self::Raidz2 => "raidz2",
            Self::Raidz3 => "raidz3",
            Self::Log => "log",
            Self::Logmirror => "logmirror",
            Self::Spare => "spare",
            Self::Cache => "cache",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZvolUse {
    #[default]
    None,
    Swap,
    Dump,
}

impl fmt::Display for ZvolUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Swap => write!(f, "swap"),
            Self::Dump => write!(f, "dump"),
        }
    }
}

/// A redundancy group; the name is unique within its pool only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vdev {
    pub name: String,
    #[serde(default)]
    pub redundancy: Redundancy,
    /// Added by the planner rather than the manifest
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthesized: bool,
}

impl Vdev {
    pub fn new(name: &str, redundancy: Redundancy) -> Self {
        Self {
            name: name.to_string(),
            redundancy,
            synthesized: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filesystem {
    pub name: String,
    #[serde(default)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub in_be: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zvol {
    pub name: String,
    #[serde(default)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(default, rename = "use")]
    pub usage: ZvolUse,
}

impl Zvol {
    pub fn new(name: &str, usage: ZvolUse, size: Size) -> Self {
        Self {
            name: name.to_string(),
            action: Action::Create,
            size: Some(size),
            usage,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolOptions {
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetOptions {
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Boot environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Be {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogicalChild {
    Vdev(Vdev),
    Filesystem(Filesystem),
    Zvol(Zvol),
    PoolOptions(PoolOptions),
    DatasetOptions(DatasetOptions),
    Be(Be),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Zpool {
    pub name: String,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exists: bool,
    #[serde(default)]
    pub children: Vec<LogicalChild>,
}

impl Zpool {
    pub fn new(name: &str, action: Action, is_root: bool) -> Self {
        Self {
            name: name.to_string(),
            action,
            is_root,
            ..Default::default()
        }
    }

    pub fn with_child(mut self, child: LogicalChild) -> Self {
        self.children.push(child);
        self
    }

    /// Vdevs, filesystems and zvols are frozen to what exists on disk
    pub fn is_preserved(&self) -> bool {
        matches!(self.action, Action::Preserve | Action::UseExisting)
    }

    pub fn vdevs(&self) -> impl Iterator<Item = &Vdev> {
        self.children.iter().filter_map(|c| match c {
            LogicalChild::Vdev(v) => Some(v),
            _ => None,
        })
    }

    pub fn vdevs_mut(&mut self) -> impl Iterator<Item = &mut Vdev> {
        self.children.iter_mut().filter_map(|c| match c {
            LogicalChild::Vdev(v) => Some(v),
            _ => None,
        })
    }

    pub fn top_level_vdevs(&self) -> impl Iterator<Item = &Vdev> {
        self.vdevs().filter(|v| v.redundancy.is_top_level())
    }

    pub fn filesystems(&self) -> impl Iterator<Item = &Filesystem> {
        self.children.iter().filter_map(|c| match c {
            LogicalChild::Filesystem(fs) => Some(fs),
            _ => None,
        })
    }

    pub fn zvols(&self) -> impl Iterator<Item = &Zvol> {
        self.children.iter().filter_map(|c| match c {
            LogicalChild::Zvol(z) => Some(z),
            _ => None,
        })
    }

    pub fn bes(&self) -> impl Iterator<Item = &Be> {
        self.children.iter().filter_map(|c| match c {
            LogicalChild::Be(be) => Some(be),
            _ => None,
        })
    }

    pub fn find_vdev(&self, name: &str) -> Option<&Vdev> {
        self.vdevs().find(|v| v.name == name)
    }

    pub fn find_vdev_mut(&mut self, name: &str) -> Option<&mut Vdev> {
        self.vdevs_mut().find(|v| v.name == name)
    }

    pub fn find_filesystem(&self, name: &str) -> Option<&Filesystem> {
        self.filesystems().find(|fs| fs.name == name)
    }

    pub fn find_zvol(&self, name: &str) -> Option<&Zvol> {
        self.zvols().find(|z| z.name == name)
    }

    pub fn find_filesystem_mut(&mut self, name: &str) -> Option<&mut Filesystem> {
        self.children.iter_mut().find_map(|c| match c {
            LogicalChild::Filesystem(fs) if fs.name == name => Some(fs),
            _ => None,
        })
    }

    pub fn find_zvol_mut(&mut self, name: &str) -> Option<&mut Zvol> {
        self.children.iter_mut().find_map(|c| match c {
            LogicalChild::Zvol(z) if z.name == name => Some(z),
            _ => None,
        })
    }

    /// A filesystem or zvol of that name
    pub fn has_dataset(&self, name: &str) -> bool {
        self.find_filesystem(name).is_some() || self.find_zvol(name).is_some()
    }

    pub fn count_of(&self, pred: impl Fn(&LogicalChild) -> bool) -> usize {
        self.children.iter().filter(|&c| pred(c)).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Logical {
    #[serde(default)]
    pub noswap: bool,
    #[serde(default)]
    pub nodump: bool,
    #[serde(default)]
    pub zpools: Vec<Zpool>,
}

impl Logical {
    pub fn find_zpool(&self, name: &str) -> Option<&Zpool> {
        self.zpools.iter().find(|z| z.name == name)
    }

    pub fn find_zpool_mut(&mut self, name: &str) -> Option<&mut Zpool> {
        self.zpools.iter_mut().find(|z| z.name == name)
    }

    pub fn root_pool(&self) -> Option<&Zpool> {
        self.zpools.iter().find(|z| z.is_root)
    }

    pub fn zvols_with_use(&self, usage: ZvolUse) -> impl Iterator<Item = &Zvol> {
        self.zpools
            .iter()
            .filter(|p| p.action != Action::Delete)
            .flat_map(|p| p.zvols())
            .filter(move |z| z.usage == usage && z.action != Action::Delete)
    }
}
