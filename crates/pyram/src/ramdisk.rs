//! Runtime mount provisioning.
//!
//! The runtime mount is provisioned on every launch and left in place
//! afterwards; the next launch clears and re-extracts it. Removing it is an
//! explicit operation ([`RamdiskManager::teardown`]) that only `pyramctl`
//! performs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::{LauncherConfig, ToolsConfig};
use crate::error::{LaunchError, LaunchResult};
use crate::exec::{CommandRunner, CommandSpec};
use crate::mounts::MountTable;

/// State of the runtime mount after provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamdiskMount {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub archive_source: PathBuf,
    pub mounted: bool,
}

/// Provisions the tmpfs that hosts the interpreter distribution.
pub struct RamdiskManager<'a, R> {
    config: &'a LauncherConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner> RamdiskManager<'a, R> {
    pub fn new(config: &'a LauncherConfig, runner: &'a R) -> Self {
        Self { config, runner }
    }

    pub fn mount_path(&self) -> &Path {
        &self.config.runtime.mount_path
    }

    /// Clear or create the mount point, (re)mount the tmpfs, extract the
    /// interpreter archive and mark the interpreter executable.
    ///
    /// Safe to call repeatedly: stale contents are always removed first and
    /// an existing mount is resized in place rather than stacked.
    pub fn setup(&self) -> LaunchResult<RamdiskMount> {
        let runtime = &self.config.runtime;
        let path = runtime.mount_path.as_path();

        let table = MountTable::read(&self.config.mounts_file)
            .map_err(|e| LaunchError::provisioning("reading mount table", e))?;
        let already_mounted = table.is_mounted(path);

        if path.exists() {
            debug!("Clearing {}", path.display());
            clear_dir(path).map_err(|e| {
                LaunchError::provisioning(format!("clearing {}", path.display()), e)
            })?;
        } else {
            debug!("Creating {}", path.display());
            fs::create_dir_all(path).map_err(|e| {
                LaunchError::provisioning(format!("creating {}", path.display()), e)
            })?;
        }

        let mount = tmpfs_mount(&self.config.tools, path, runtime.size_bytes, already_mounted);
        run_step(self.runner, &mount)?;

        let extract = CommandSpec::new(&self.config.tools.tar)
            .arg("-xJf")
            .arg(&runtime.archive)
            .arg("-C")
            .arg(path);
        run_step(self.runner, &extract)?;

        let chmod = CommandSpec::new(&self.config.tools.chmod)
            .arg("+x")
            .arg(&self.config.interpreter_path);
        run_step(self.runner, &chmod)?;

        info!(
            "Runtime mount ready at {} ({} bytes)",
            path.display(),
            runtime.size_bytes
        );
        Ok(RamdiskMount {
            path: path.to_path_buf(),
            size_bytes: runtime.size_bytes,
            archive_source: runtime.archive.clone(),
            mounted: true,
        })
    }

    /// Unmount and remove the runtime mount. Returns whether anything was
    /// there to remove.
    pub fn teardown(&self) -> LaunchResult<bool> {
        release_mount(self.config, self.runner, self.mount_path())
    }
}

/// `mount -t tmpfs -o size=N tmpfs <path>`, or a resize of an existing mount.
pub(crate) fn tmpfs_mount(
    tools: &ToolsConfig,
    path: &Path,
    size_bytes: u64,
    remount: bool,
) -> CommandSpec {
    let options = if remount {
        format!("remount,size={size_bytes}")
    } else {
        format!("size={size_bytes}")
    };
    CommandSpec::new(&tools.mount)
        .args(["-t", "tmpfs", "-o"])
        .arg(options)
        .arg("tmpfs")
        .arg(path)
}

/// Run a provisioning command, turning any failure into a fatal error.
fn run_step<R: CommandRunner>(runner: &R, spec: &CommandSpec) -> LaunchResult<()> {
    let result = runner
        .run(spec)
        .map_err(|e| LaunchError::provisioning(spec.to_string(), e))?;
    if !result.success() {
        return Err(LaunchError::provisioning(spec.to_string(), result));
    }
    Ok(())
}

/// Unmount `path` if it is a mount point, then remove the directory tree.
pub(crate) fn release_mount<R: CommandRunner>(
    config: &LauncherConfig,
    runner: &R,
    path: &Path,
) -> LaunchResult<bool> {
    let teardown_err = |reason: String| LaunchError::Teardown {
        path: path.to_path_buf(),
        reason,
    };

    if !path.exists() {
        debug!("{} does not exist, nothing to tear down", path.display());
        return Ok(false);
    }

    let table = MountTable::read(&config.mounts_file).map_err(|e| teardown_err(e.to_string()))?;
    if table.is_mounted(path) {
        let umount = CommandSpec::new(&config.tools.umount).arg(path);
        let result = runner
            .run(&umount)
            .map_err(|e| teardown_err(format!("{umount}: {e}")))?;
        if !result.success() {
            return Err(teardown_err(format!("{umount} failed ({result})")));
        }
    }

    fs::remove_dir_all(path).map_err(|e| teardown_err(e.to_string()))?;
    info!("Removed {}", path.display());
    Ok(true)
}

/// Remove everything inside `dir`, keeping `dir` itself.
fn clear_dir(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
