//! pyramctl - inspect and clean up pyram's RAM disks.
//!
//! ## Usage
//!
//! ```bash
//! # Show both mounts
//! pyramctl status
//!
//! # Remove the staging mount left behind by an aborted launch
//! sudo pyramctl teardown
//!
//! # Also drop the runtime mount (pyram itself never removes it)
//! sudo pyramctl teardown --runtime
//! ```

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::debug;
use serde::Serialize;

use pyram::config::config_file_path;
use pyram::mounts::MountTable;
use pyram::ramdisk::RamdiskManager;
use pyram::stage::ScriptStager;
use pyram::{EffectiveUser, Identity, LauncherConfig, SystemRunner};

#[derive(Parser, Debug)]
#[command(
    name = "pyramctl",
    version,
    about = "Inspect and clean up pyram's RAM disks",
    after_help = "Examples:\n  \
        pyramctl status --json\n  \
        sudo pyramctl teardown --runtime\n  \
        pyramctl config show"
)]
struct Cli {
    /// Path to the pyram config file (TOML).
    #[arg(short, long, global = true, env = "PYRAM_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the state of the runtime and staging mounts
    Status {
        /// Print machine readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Unmount and remove RAM disks (staging only unless --runtime is given)
    Teardown {
        /// Remove the runtime mount
        #[arg(long)]
        runtime: bool,
        /// Remove the staging mount
        #[arg(long)]
        staging: bool,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
}

#[derive(Debug, Serialize)]
struct MountStatus {
    name: &'static str,
    path: PathBuf,
    exists: bool,
    mounted: bool,
    size_bytes: u64,
}

#[derive(Debug, Serialize)]
struct Status {
    runtime: MountStatus,
    staging: MountStatus,
    interpreter: PathBuf,
    interpreter_executable: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("PYRAM_LOG", log_level))
        .init();

    match cli.command {
        Command::Status { json } => {
            let config = load_config(cli.config.as_deref())?;
            print_status(&collect_status(&config)?, json)
        }
        Command::Teardown { runtime, staging } => {
            let config = load_config(cli.config.as_deref())?;
            teardown(&config, runtime, staging)
        }
        Command::Config { command } => match command {
            ConfigCommand::Show => {
                let config = load_config(cli.config.as_deref())?;
                print!("{}", config.to_toml()?);
                Ok(())
            }
            ConfigCommand::Path => {
                let (path, _) = config_file_path(cli.config.as_deref());
                println!("{}", path.display());
                Ok(())
            }
        },
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "pyramctl", &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<LauncherConfig> {
    LauncherConfig::load(path).context("loading pyram config")
}

fn collect_status(config: &LauncherConfig) -> Result<Status> {
    let table = MountTable::read(&config.mounts_file)
        .with_context(|| format!("reading {}", config.mounts_file.display()))?;

    let mount_status = |name: &'static str, path: &Path, size_bytes: u64| MountStatus {
        name,
        path: path.to_path_buf(),
        exists: path.exists(),
        mounted: table.is_mounted(path),
        size_bytes,
    };

    let interpreter_executable = std::fs::metadata(&config.interpreter_path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false);

    Ok(Status {
        runtime: mount_status(
            "runtime",
            &config.runtime.mount_path,
            config.runtime.size_bytes,
        ),
        staging: mount_status(
            "staging",
            &config.staging.mount_path,
            config.staging.size_bytes,
        ),
        interpreter: config.interpreter_path.clone(),
        interpreter_executable,
    })
}

fn print_status(status: &Status, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }

    for mount in [&status.runtime, &status.staging] {
        let state = match (mount.exists, mount.mounted) {
            (_, true) => "mounted",
            (true, false) => "directory only",
            (false, false) => "absent",
        };
        println!(
            "{:<8} {:<24} {} ({} bytes)",
            mount.name,
            mount.path.display(),
            state,
            mount.size_bytes
        );
    }
    println!(
        "{:<8} {:<24} {}",
        "pypy",
        status.interpreter.display(),
        if status.interpreter_executable {
            "ready"
        } else {
            "missing"
        }
    );
    Ok(())
}

fn teardown(config: &LauncherConfig, runtime: bool, staging: bool) -> Result<()> {
    if !EffectiveUser.is_superuser() {
        anyhow::bail!("teardown must be run as root (try sudo)");
    }

    // Staging is the default target; the runtime mount is only removed on request.
    let staging = staging || !runtime;
    let runner = SystemRunner;

    if staging {
        let stager = ScriptStager::new(config, &runner);
        report(stager.mount_path(), stager.teardown()?);
    }
    if runtime {
        let ramdisk = RamdiskManager::new(config, &runner);
        report(ramdisk.mount_path(), ramdisk.teardown()?);
    }
    Ok(())
}

fn report(path: &Path, removed: bool) {
    if removed {
        println!("Removed {}", path.display());
    } else {
        debug!("{} not present", path.display());
        println!("Nothing to remove at {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_teardown_flags() {
        let cli = Cli::try_parse_from(["pyramctl", "teardown", "--runtime"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Teardown {
                runtime: true,
                staging: false
            }
        ));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_status_reports_absent_mounts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LauncherConfig::default();
        config.runtime.mount_path = dir.path().join("rt");
        config.interpreter_path = dir.path().join("rt/bin/pypy");
        config.staging.mount_path = dir.path().join("stage");
        config.mounts_file = dir.path().join("mounts");
        std::fs::create_dir(dir.path().join("stage")).unwrap();

        let status = collect_status(&config).unwrap();
        assert!(!status.runtime.exists);
        assert!(!status.runtime.mounted);
        assert!(status.staging.exists);
        assert!(!status.interpreter_executable);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["staging"]["name"], "staging");
    }
}
