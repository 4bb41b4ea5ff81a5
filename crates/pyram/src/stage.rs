//! Script staging mount.
//!
//! `--toram` copies the user's script into a small tmpfs so the interpreter
//! never reads it from disk. The mount holds one script by convention; a
//! second stage with a different file name does not remove the first.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::LauncherConfig;
use crate::error::{LaunchError, LaunchResult};
use crate::exec::CommandRunner;
use crate::mounts::MountTable;
use crate::ramdisk::{release_mount, tmpfs_mount};

/// Copy buffer size.
const CHUNK_SIZE: usize = 64 * 1024;

/// State of the staging mount after a script was staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStage {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub staged_file_path: PathBuf,
    pub mounted: bool,
}

pub struct ScriptStager<'a, R> {
    config: &'a LauncherConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner> ScriptStager<'a, R> {
    pub fn new(config: &'a LauncherConfig, runner: &'a R) -> Self {
        Self { config, runner }
    }

    pub fn mount_path(&self) -> &Path {
        &self.config.staging.mount_path
    }

    /// Mount the staging tmpfs if needed and copy `source` into it as
    /// `file_name`, replacing any earlier copy with that name.
    pub fn stage(&self, source: &Path, file_name: &str) -> LaunchResult<ScriptStage> {
        let staging = &self.config.staging;
        let mount_path = staging.mount_path.as_path();

        if !mount_path.exists() {
            debug!("Creating {}", mount_path.display());
            fs::create_dir_all(mount_path).map_err(|e| staging_error(source, e))?;
        }

        let table =
            MountTable::read(&self.config.mounts_file).map_err(|e| staging_error(source, e))?;
        if !table.is_mounted(mount_path) {
            let mount = tmpfs_mount(&self.config.tools, mount_path, staging.size_bytes, false);
            let result = self
                .runner
                .run(&mount)
                .map_err(|e| staging_error(mount_path, format!("{mount} failed to start: {e}")))?;
            if !result.success() {
                return Err(staging_error(mount_path, format!("{mount} failed ({result})")));
            }
        }

        let destination = mount_path.join(file_name);
        copy_chunked(source, &destination)?;
        info!("Staged {} at {}", source.display(), destination.display());

        Ok(ScriptStage {
            path: mount_path.to_path_buf(),
            size_bytes: staging.size_bytes,
            staged_file_path: destination,
            mounted: true,
        })
    }

    /// Unmount and remove the staging mount. A no-op when nothing is there.
    pub fn teardown(&self) -> LaunchResult<bool> {
        release_mount(self.config, self.runner, self.mount_path())
    }
}

fn staging_error(path: &Path, reason: impl ToString) -> LaunchError {
    LaunchError::Staging {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Copy `source` to `destination` in bounded chunks, failing on short writes.
fn copy_chunked(source: &Path, destination: &Path) -> LaunchResult<u64> {
    let mut reader = File::open(source)
        .map_err(|e| staging_error(source, format!("cannot open source: {e}")))?;
    let mut writer = File::create(destination).map_err(|e| {
        staging_error(
            source,
            format!("cannot create {}: {e}", destination.display()),
        )
    })?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(staging_error(source, format!("read failed: {e}"))),
        };
        let written = writer
            .write(&buf[..read])
            .map_err(|e| staging_error(source, format!("write failed: {e}")))?;
        if written != read {
            return Err(staging_error(
                source,
                format!(
                    "short write to {} ({written} of {read} bytes)",
                    destination.display()
                ),
            ));
        }
        total += written as u64;
    }
    writer
        .flush()
        .map_err(|e| staging_error(source, format!("flush failed: {e}")))?;
    Ok(total)
}
