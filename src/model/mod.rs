//! Node types shared by the discovered and desired trees

pub mod logical;
pub mod physical;
pub mod size;
pub mod tree;

pub use logical::{
    Be, DatasetOptions, Filesystem, Logical, LogicalChild, PoolOptions, Redundancy, Vdev,
    Zpool, Zvol, ZvolUse,
};
pub use physical::{
    partition_types, Action, DeviceKind, DiskIdent, DiskKeyword, DiskLabel, DiskProp,
    PhysicalDevice,
};
pub use size::Size;
pub use tree::{DeviceId, DeviceTree, Target};
