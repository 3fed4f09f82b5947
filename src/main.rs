//! target-selection - plan an install target for a ZFS root system
//!
//! Reads a target manifest and a discovered inventory, and prints or saves
//! the desired target the installer would build.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use target_selection::disk::layouts::print_layout_summary;
use target_selection::model::LogicalChild;
use target_selection::{ControllerConfig, DefaultController, Target, TargetDoc, TargetSelection};

#[derive(Parser)]
#[command(name = "target-selection")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Dry run mode - never query the live system for existing datasets
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan the desired target and print or save it
    Plan {
        /// Target manifest (TOML or JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Discovered inventory (TOML or JSON)
        #[arg(short, long)]
        discovered: PathBuf,

        /// Controller configuration file
        #[arg(short, long)]
        controller: Option<String>,

        /// Write the desired target here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print JSON instead of TOML
        #[arg(long)]
        json: bool,
    },

    /// Check a manifest against the discovered system without output
    Validate {
        /// Target manifest (TOML or JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Discovered inventory (TOML or JSON)
        #[arg(short, long)]
        discovered: PathBuf,

        /// Controller configuration file
        #[arg(short, long)]
        controller: Option<String>,
    },

    /// Generate a sample controller configuration file
    GenerateConfig {
        /// Output file path
        #[arg(short, long, default_value = "controller.toml")]
        output: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Plan {
            manifest,
            discovered,
            controller,
            output,
            json,
        } => cmd_plan(&manifest, &discovered, controller, output, json, cli.dry_run),
        Commands::Validate {
            manifest,
            discovered,
            controller,
        } => cmd_validate(&manifest, &discovered, controller, cli.dry_run),
        Commands::GenerateConfig { output } => cmd_generate_config(&output),
    }
}

fn load_target(path: &Path) -> Result<Target> {
    let target = TargetDoc::from_file(path)
        .and_then(TargetDoc::into_target)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    Ok(target)
}

fn load_controller_config(path: Option<String>) -> Result<ControllerConfig> {
    let config = match path {
        Some(path) => {
            info!("Loading controller configuration from {}", path);
            ControllerConfig::from_file(&path)?
        }
        None => ControllerConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Run the selection step and hand back the desired target
fn run_selection(
    manifest: &Path,
    discovered: &Path,
    controller: Option<String>,
    dry_run: bool,
) -> Result<Target> {
    let spec = load_target(manifest)?;
    let discovered = load_target(discovered)?;
    let config = load_controller_config(controller)?;
    let controller = DefaultController::new(config, &discovered);

    let mut step = TargetSelection::new(spec, discovered, Box::new(controller));
    step.execute(dry_run)?;
    step.into_desired()
        .context("Target selection finished without a desired target")
}

fn cmd_plan(
    manifest: &Path,
    discovered: &Path,
    controller: Option<String>,
    output: Option<PathBuf>,
    json: bool,
    dry_run: bool,
) -> Result<()> {
    let desired = run_selection(manifest, discovered, controller, dry_run)?;

    let doc = TargetDoc::from_target(&desired);
    match output {
        Some(path) => {
            doc.save(&path)?;
            print_summary(&desired);
            println!("\n{} Desired target written to {}", "✓".green(), path.display());
        }
        None if json => println!("{}", doc.to_json()?),
        None => println!("{}", doc.to_toml()?),
    }
    Ok(())
}

fn cmd_validate(
    manifest: &Path,
    discovered: &Path,
    controller: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let desired = run_selection(manifest, discovered, controller, dry_run)?;
    print_summary(&desired);
    println!("\n{} Manifest {} is valid", "✓".green(), manifest.display());
    Ok(())
}

fn cmd_generate_config(output: &str) -> Result<()> {
    let config = ControllerConfig::sample();
    let content = toml::to_string_pretty(&config)?;
    std::fs::write(output, content)?;
    println!("{} Sample configuration written to {}", "✓".green(), output);
    Ok(())
}

fn print_summary(desired: &Target) {
    for disk in desired.devices.disks() {
        print_layout_summary(&desired.devices, *disk);
    }

    let Some(ref logical) = desired.logical else {
        return;
    };
    for pool in &logical.zpools {
        let role = if pool.is_root { " (root)" } else { "" };
        println!("\n{} {}{} [{}]", "zpool".bold(), pool.name.cyan(), role, pool.action);
        for child in &pool.children {
            match child {
                LogicalChild::Vdev(v) => println!("  vdev {} {}", v.name, v.redundancy),
                LogicalChild::Zvol(z) => println!(
                    "  zvol {} {} {}",
                    z.name,
                    z.usage,
                    z.size.map(|s| s.human()).unwrap_or_else(|| "-".to_string())
                ),
                LogicalChild::Be(b) => {
                    println!("  be {}", b.name.as_deref().unwrap_or("-"))
                }
                _ => {}
            }
        }
    }
}
