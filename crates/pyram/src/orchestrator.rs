//! Interpreter command composition and execution.
//!
//! Steps run strictly one after another: each child is waited on and its
//! status inspected before the next step starts. A signalled child counts
//! as a failure exactly like a nonzero exit.

use std::path::{Path, PathBuf};

use log::{error, info};

use crate::args::ScriptRun;
use crate::config::LauncherConfig;
use crate::error::{LaunchError, LaunchResult};
use crate::exec::{ChildProcessResult, CommandRunner, CommandSpec};

pub struct ProcessOrchestrator<'a, R> {
    config: &'a LauncherConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner> ProcessOrchestrator<'a, R> {
    pub fn new(config: &'a LauncherConfig, runner: &'a R) -> Self {
        Self { config, runner }
    }

    /// `pypy -m <module> [args...]`, every token forwarded as given.
    pub fn module_command(&self, forwarded_args: &[String]) -> CommandSpec {
        CommandSpec::interactive(&self.config.interpreter_path).args(forwarded_args)
    }

    /// `pypy <resolved script> [script args...]`.
    pub fn script_command(&self, run: &ScriptRun, cwd: &Path) -> CommandSpec {
        CommandSpec::interactive(&self.config.interpreter_path)
            .arg(self.script_path(run, cwd))
            .args(&run.script_args)
    }

    /// Path the interpreter is pointed at.
    ///
    /// Staged scripts always run from the staging mount. Otherwise the
    /// token's own directory is used, resolved against `cwd` when relative;
    /// a token without a directory part (including `/name.py`, whose
    /// directory part is empty) runs from `cwd`.
    pub fn script_path(&self, run: &ScriptRun, cwd: &Path) -> PathBuf {
        if run.use_ram_stage {
            return self.config.staging.mount_path.join(&run.script_file_name);
        }
        if run.script_dir.is_empty() {
            cwd.join(&run.script_file_name)
        } else {
            cwd.join(&run.script_dir).join(&run.script_file_name)
        }
    }

    /// Run the interpreter; anything but a clean zero exit is fatal.
    pub fn execute(&self, spec: &CommandSpec) -> LaunchResult<ChildProcessResult> {
        info!("Executing {}", spec);
        let result = self.runner.run(spec).map_err(|e| LaunchError::Execution {
            command: spec.to_string(),
            status: format!("failed to start: {e}"),
        })?;
        if !result.success() {
            error!("{} exited with {}", spec, result);
            return Err(LaunchError::execution(spec, &result));
        }
        Ok(result)
    }
}
