//! Launch pipeline: parse, check privilege, provision, stage, execute,
//! tear down staging.

use std::env;
use std::path::PathBuf;

use log::{debug, error, warn};

use crate::args::{self, Intent, ScriptRun};
use crate::config::LauncherConfig;
use crate::error::{LaunchError, LaunchResult};
use crate::exec::{ChildProcessResult, CommandRunner, Identity};
use crate::orchestrator::ProcessOrchestrator;
use crate::ramdisk::RamdiskManager;
use crate::stage::ScriptStager;

/// How a successful invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Help or version text to print; nothing was executed.
    Printed(String),
    /// The interpreter ran and exited successfully.
    Completed(ChildProcessResult),
}

pub struct Launcher<R, I> {
    config: LauncherConfig,
    runner: R,
    identity: I,
    working_dir: Option<PathBuf>,
}

impl<R: CommandRunner, I: Identity> Launcher<R, I> {
    pub fn new(config: LauncherConfig, runner: R, identity: I) -> Self {
        Self {
            config,
            runner,
            identity,
            working_dir: None,
        }
    }

    /// Resolve relative scripts against `dir` instead of the process cwd.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Parse `tokens` (program name excluded) and carry out the request.
    pub fn run(&self, tokens: &[String]) -> LaunchResult<Outcome> {
        let intent = args::parse(tokens)?;
        debug!("Parsed intent: {:?}", intent);
        self.launch(intent)
    }

    pub fn launch(&self, intent: Intent) -> LaunchResult<Outcome> {
        match intent {
            Intent::Help => Ok(Outcome::Printed(args::help_text())),
            Intent::Version => Ok(Outcome::Printed(args::version_text())),
            Intent::ModuleRun { forwarded_args } => {
                let orchestrator = self.provision()?;
                let command = orchestrator.module_command(&forwarded_args);
                orchestrator.execute(&command).map(Outcome::Completed)
            }
            Intent::ScriptRun(run) => {
                let orchestrator = self.provision()?;
                self.run_script(&orchestrator, &run)
            }
        }
    }

    /// Privilege check and runtime mount setup, shared by every run mode.
    fn provision(&self) -> LaunchResult<ProcessOrchestrator<'_, R>> {
        if !self.identity.is_superuser() {
            return Err(LaunchError::Privilege);
        }
        RamdiskManager::new(&self.config, &self.runner).setup()?;
        Ok(ProcessOrchestrator::new(&self.config, &self.runner))
    }

    fn run_script(
        &self,
        orchestrator: &ProcessOrchestrator<'_, R>,
        run: &ScriptRun,
    ) -> LaunchResult<Outcome> {
        let cwd = self.working_dir()?;
        let command = orchestrator.script_command(run, &cwd);

        if !run.use_ram_stage {
            return orchestrator.execute(&command).map(Outcome::Completed);
        }

        let stager = ScriptStager::new(&self.config, &self.runner);
        let source = cwd.join(&run.script_full_path);
        stager.stage(&source, &run.script_file_name)?;

        let executed = orchestrator.execute(&command);
        let torn_down = stager.teardown();

        // The interpreter's status decides the exit; a failed teardown is
        // only reported.
        if let Err(teardown) = torn_down {
            error!("{teardown}");
        }
        executed.map(Outcome::Completed)
    }

    fn working_dir(&self) -> LaunchResult<PathBuf> {
        if let Some(dir) = &self.working_dir {
            return Ok(dir.clone());
        }
        env::current_dir().map_err(|e| {
            warn!("Cannot determine working directory: {e}");
            LaunchError::Execution {
                command: "getcwd".to_string(),
                status: e.to_string(),
            }
        })
    }
}
