//! Error types for target selection

use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Ambiguous identification: {0}")]
    AmbiguousIdentification(String),

    #[error("Device not identifiable: {0}")]
    NotIdentifiable(String),

    #[error("Vdev '{vdev}' ({redundancy}) requires at least {required} device(s), found {found}")]
    RedundancyDeviceCount {
        vdev: String,
        redundancy: String,
        required: usize,
        found: usize,
    },

    #[error("Root pool '{pool}' cannot use '{redundancy}' redundancy")]
    InvalidRootRedundancy { pool: String, redundancy: String },

    #[error("Root pool '{pool}' cannot contain a '{redundancy}' vdev ({vdev})")]
    InvalidRootVdev {
        pool: String,
        vdev: String,
        redundancy: String,
    },

    #[error("Device already in use: {0}")]
    DeviceAlreadyInUse(String),

    #[error("Insufficient space: {0}")]
    InsufficientSpace(String),

    #[error("Vdevs cannot be specified on preserved pool '{0}'")]
    VdevOnPreservedPool(String),

    #[error("Too many extended partitions on disk {0}, at most one is allowed")]
    TooManyExtendedPartitions(String),

    #[error("No swap volume in the plan and noswap is not set")]
    MissingSwap,

    #[error("No dump volume in the plan and nodump is not set")]
    MissingDump,

    #[error("No root pool: {0}")]
    NoRootPool(String),

    #[error("No boot environment: {0}")]
    NoBE(String),

    #[error("Final validation failed: {0}")]
    FinalValidationFailed(String),

    #[error("Invalid specification: {0}")]
    InvalidSpecification(String),

    #[error("Invalid size '{0}'")]
    InvalidSize(String),

    #[error("Target controller error: {0}")]
    Controller(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Command failed: {command}\n{stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SelectionError>;

/// Log every error collected while processing one container and fail with
/// the first of them.
pub fn first_error(container: &str, errors: Vec<SelectionError>) -> Result<()> {
    let mut errors = errors.into_iter();
    let Some(first) = errors.next() else {
        return Ok(());
    };
    error!("{}: {}", container, first);
    for other in errors {
        error!("{}: {}", container, other);
    }
    Err(first)
}
