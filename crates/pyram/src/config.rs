//! Launcher configuration.
//!
//! Every path and size the launcher touches comes from here. Values are
//! layered: built-in defaults, then an optional TOML file, then `PYRAM_*`
//! environment overrides (nested keys use `__`, e.g.
//! `PYRAM_RUNTIME__SIZE_BYTES=268435456`).

use std::env;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{LaunchError, LaunchResult};

/// Config file used when neither `--config` nor `$PYRAM_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pyram/config.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "PYRAM_CONFIG";

const ENV_PREFIX: &str = "PYRAM";

/// Full launcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Interpreter binary inside the runtime mount.
    pub interpreter_path: PathBuf,
    /// Mount table consulted to tell whether a path is already mounted.
    pub mounts_file: PathBuf,
    pub runtime: RuntimeMountConfig,
    pub staging: StagingMountConfig,
    pub tools: ToolsConfig,
}

/// The tmpfs hosting the extracted interpreter distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeMountConfig {
    pub mount_path: PathBuf,
    pub size_bytes: u64,
    /// xz-compressed tarball of the interpreter distribution.
    pub archive: PathBuf,
}

/// The small tmpfs holding a single staged script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingMountConfig {
    pub mount_path: PathBuf,
    pub size_bytes: u64,
}

/// External programs invoked during provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub mount: PathBuf,
    pub umount: PathBuf,
    pub tar: PathBuf,
    pub chmod: PathBuf,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            interpreter_path: PathBuf::from("/mnt/pyram_disk/pypy/bin/pypy.elf"),
            mounts_file: PathBuf::from("/proc/self/mounts"),
            runtime: RuntimeMountConfig::default(),
            staging: StagingMountConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl Default for RuntimeMountConfig {
    fn default() -> Self {
        Self {
            mount_path: PathBuf::from("/mnt/pyram_disk"),
            size_bytes: 188_960_770,
            archive: PathBuf::from("/usr/share/pyram/lib/pypy.so"),
        }
    }
}

impl Default for StagingMountConfig {
    fn default() -> Self {
        Self {
            mount_path: PathBuf::from("/mnt/pyram_script"),
            size_bytes: 32 * 1024 * 1024,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            mount: PathBuf::from("mount"),
            umount: PathBuf::from("umount"),
            tar: PathBuf::from("tar"),
            chmod: PathBuf::from("chmod"),
        }
    }
}

/// Resolve which config file to read and whether it must exist.
pub fn config_file_path(explicit: Option<&Path>) -> (PathBuf, bool) {
    if let Some(path) = explicit {
        return (path.to_path_buf(), true);
    }
    match env::var(CONFIG_ENV_VAR) {
        Ok(value) if !value.trim().is_empty() => (PathBuf::from(value), true),
        _ => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    }
}

impl LauncherConfig {
    /// Load the layered configuration and validate it.
    pub fn load(explicit: Option<&Path>) -> LaunchResult<Self> {
        let (path, required) = config_file_path(explicit);
        if required && !path.exists() {
            return Err(LaunchError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        debug!("Loading config from {}", path.display());

        let defaults = Self::default();
        let built = Config::builder()
            .set_default("interpreter_path", path_str(&defaults.interpreter_path))?
            .set_default("mounts_file", path_str(&defaults.mounts_file))?
            .set_default("runtime.mount_path", path_str(&defaults.runtime.mount_path))?
            .set_default("runtime.size_bytes", defaults.runtime.size_bytes as i64)?
            .set_default("runtime.archive", path_str(&defaults.runtime.archive))?
            .set_default("staging.mount_path", path_str(&defaults.staging.mount_path))?
            .set_default("staging.size_bytes", defaults.staging.size_bytes as i64)?
            .set_default("tools.mount", path_str(&defaults.tools.mount))?
            .set_default("tools.umount", path_str(&defaults.tools.umount))?
            .set_default("tools.tar", path_str(&defaults.tools.tar))?
            .set_default("tools.chmod", path_str(&defaults.tools.chmod))?
            .add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: LauncherConfig = built.try_deserialize()?;
        config.expand_paths()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the launcher relies on.
    pub fn validate(&self) -> LaunchResult<()> {
        let paths = [
            ("interpreter_path", &self.interpreter_path),
            ("runtime.mount_path", &self.runtime.mount_path),
            ("runtime.archive", &self.runtime.archive),
            ("staging.mount_path", &self.staging.mount_path),
            ("mounts_file", &self.mounts_file),
        ];
        for (key, path) in paths {
            if path.as_os_str().is_empty() {
                return Err(LaunchError::Config(format!("{key} must not be empty")));
            }
        }

        if self.runtime.size_bytes == 0 || self.staging.size_bytes == 0 {
            return Err(LaunchError::Config(
                "mount sizes must be greater than zero".to_string(),
            ));
        }
        if self.staging.size_bytes >= self.runtime.size_bytes {
            return Err(LaunchError::Config(format!(
                "staging.size_bytes ({}) must be smaller than runtime.size_bytes ({})",
                self.staging.size_bytes, self.runtime.size_bytes
            )));
        }
        if self.staging.mount_path == self.runtime.mount_path {
            return Err(LaunchError::Config(
                "runtime and staging mounts must use different paths".to_string(),
            ));
        }
        if !self.interpreter_path.starts_with(&self.runtime.mount_path) {
            return Err(LaunchError::Config(format!(
                "interpreter_path {} is outside the runtime mount {}",
                self.interpreter_path.display(),
                self.runtime.mount_path.display()
            )));
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> LaunchResult<String> {
        toml::to_string_pretty(self).map_err(|e| LaunchError::Config(e.to_string()))
    }

    fn expand_paths(&mut self) -> LaunchResult<()> {
        for path in [
            &mut self.interpreter_path,
            &mut self.runtime.mount_path,
            &mut self.runtime.archive,
            &mut self.staging.mount_path,
            &mut self.mounts_file,
        ] {
            *path = expand_path(path)?;
        }
        Ok(())
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn expand_path(path: &Path) -> LaunchResult<PathBuf> {
    let Some(text) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    let expanded = shellexpand::full(text)
        .map_err(|e| LaunchError::Config(format!("expanding {text}: {e}")))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
