//! Default target controller policy

use crate::model::Size;
use crate::utils::error::{Result, SelectionError};
use serde::{Deserialize, Serialize};

/// Policy knobs for [`DefaultController`](crate::controller::DefaultController)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub pool: PoolDefaults,
    #[serde(default)]
    pub sizing: SizingPolicy,
}

/// Names used when the planner has to synthesize logical containers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDefaults {
    /// Root pool name (default: "rpool")
    #[serde(default = "default_root_pool_name")]
    pub root_pool_name: String,
    /// Vdev name for synthesized redundancy groups (default: "vdev")
    #[serde(default = "default_vdev_name")]
    pub vdev_name: String,
    /// Boot environment name (default: "solaris")
    #[serde(default = "default_be_name")]
    pub be_name: String,
    /// Root pool mountpoint (default: "/rpool")
    #[serde(default = "default_root_mountpoint")]
    pub root_mountpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingPolicy {
    /// Smallest root pool the OS can be installed into
    #[serde(default = "default_minimum_target_size")]
    pub minimum_target_size: Size,
    #[serde(default = "default_swap_min")]
    pub swap_min: Size,
    #[serde(default = "default_swap_max")]
    pub swap_max: Size,
    /// Share of the root pool capacity given to swap
    #[serde(default = "default_swap_ratio")]
    pub swap_ratio: f64,
    #[serde(default = "default_dump_min")]
    pub dump_min: Size,
    #[serde(default = "default_dump_max")]
    pub dump_max: Size,
    /// Share of the root pool capacity given to dump
    #[serde(default = "default_dump_ratio")]
    pub dump_ratio: f64,
}

impl Default for PoolDefaults {
    fn default() -> Self {
        Self {
            root_pool_name: default_root_pool_name(),
            vdev_name: default_vdev_name(),
            be_name: default_be_name(),
            root_mountpoint: default_root_mountpoint(),
        }
    }
}

impl Default for SizingPolicy {
    fn default() -> Self {
        Self {
            minimum_target_size: default_minimum_target_size(),
            swap_min: default_swap_min(),
            swap_max: default_swap_max(),
            swap_ratio: default_swap_ratio(),
            dump_min: default_dump_min(),
            dump_max: default_dump_max(),
            dump_ratio: default_dump_ratio(),
        }
    }
}

// Default value functions

fn default_root_pool_name() -> String {
    "rpool".to_string()
}

fn default_vdev_name() -> String {
    "vdev".to_string()
}

fn default_be_name() -> String {
    "solaris".to_string()
}

fn default_root_mountpoint() -> String {
    "/rpool".to_string()
}

fn default_minimum_target_size() -> Size {
    Size::from_gb(6)
}

fn default_swap_min() -> Size {
    Size::from_mb(512)
}

fn default_swap_max() -> Size {
    Size::from_gb(4)
}

fn default_swap_ratio() -> f64 {
    0.05
}

fn default_dump_min() -> Size {
    Size::from_mb(256)
}

fn default_dump_max() -> Size {
    Size::from_gb(2)
}

fn default_dump_ratio() -> f64 {
    0.03
}

impl ControllerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ControllerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (what, value) in [
            ("root_pool_name", &self.pool.root_pool_name),
            ("vdev_name", &self.pool.vdev_name),
            ("be_name", &self.pool.be_name),
        ] {
            if value.is_empty() {
                return Err(SelectionError::ConfigError(format!("{} cannot be empty", what)));
            }
            if value.contains('/') || value.contains(' ') {
                return Err(SelectionError::ConfigError(format!(
                    "{} '{}' cannot contain '/' or spaces",
                    what, value
                )));
            }
        }

        if !self.pool.root_mountpoint.starts_with('/') {
            return Err(SelectionError::ConfigError(format!(
                "root_mountpoint '{}' must be absolute",
                self.pool.root_mountpoint
            )));
        }

        let sizing = &self.sizing;
        if sizing.minimum_target_size.is_zero() {
            return Err(SelectionError::ConfigError(
                "minimum_target_size must be greater than zero".to_string(),
            ));
        }
        if sizing.swap_min > sizing.swap_max {
            return Err(SelectionError::ConfigError(
                "swap_min cannot exceed swap_max".to_string(),
            ));
        }
        if sizing.dump_min > sizing.dump_max {
            return Err(SelectionError::ConfigError(
                "dump_min cannot exceed dump_max".to_string(),
            ));
        }
        for (what, ratio) in [
            ("swap_ratio", sizing.swap_ratio),
            ("dump_ratio", sizing.dump_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(SelectionError::ConfigError(format!(
                    "{} must be between 0 and 1, got {}",
                    what, ratio
                )));
            }
        }

        Ok(())
    }
}
