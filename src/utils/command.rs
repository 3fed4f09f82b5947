//! Command execution utilities

use crate::utils::error::{Result, SelectionError};
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Execute a command and return the output
pub fn run_command(program: &str, args: &[&str]) -> Result<Output> {
    debug!("Running: {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SelectionError::CommandNotFound(program.to_string())
            } else {
                SelectionError::Io(e)
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        debug!(
            "Command failed: {} {}\n  stderr: {}",
            program,
            args.join(" "),
            stderr.trim()
        );
        return Err(SelectionError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            stderr,
        });
    }

    Ok(output)
}

/// Execute a command and return stdout as string
pub fn run_command_output(program: &str, args: &[&str]) -> Result<String> {
    let output = run_command(program, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Log a command that would be run (for dry-run mode)
pub fn log_dry_run(program: &str, args: &[&str]) {
    debug!("[dry-run] skipping {} {}", program, args.join(" "));
}

/// Wrapper for command execution that respects dry-run mode
#[derive(Debug, Clone)]
pub struct CommandRunner {
    dry_run: bool,
    zfs: String,
}

impl CommandRunner {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            zfs: "zfs".to_string(),
        }
    }

    /// Use another `zfs` binary for dataset lookups
    pub fn with_zfs(mut self, program: &str) -> Self {
        self.zfs = program.to_string();
        self
    }

    pub fn run_output(&self, program: &str, args: &[&str]) -> Result<Option<String>> {
        if self.dry_run {
            log_dry_run(program, args);
            Ok(None)
        } else {
            run_command_output(program, args).map(Some)
        }
    }

    /// Ask the live system whether a dataset already exists.
    ///
    /// Always `false` in dry-run mode, and when the `zfs` tooling is not
    /// available on the host. Other I/O failures are returned.
    pub fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        match self.run_output(&self.zfs, &["list", "-H", "-o", "name", dataset]) {
            Ok(Some(name)) => Ok(name == dataset),
            Ok(None) => Ok(false),
            Err(SelectionError::CommandFailed { .. }) => Ok(false),
            Err(SelectionError::CommandNotFound(program)) => {
                debug!("{} not available, assuming {} is unused", program, dataset);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}
