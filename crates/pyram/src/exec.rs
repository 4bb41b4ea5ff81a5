//! Subprocess execution for provisioning tools and the interpreter.
//!
//! Commands are always built as an explicit argument vector and spawned
//! directly, never through a shell, so user-supplied script arguments are
//! forwarded byte-for-byte without any shell interpretation.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use log::{debug, error};
use rustix::process::geteuid;

/// Outcome of waiting on a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildProcessResult {
    /// Exit code, or `128 + signal` when the child was killed by a signal.
    pub exit_code: i32,
    /// False when the child terminated abnormally (signalled).
    pub exited_normally: bool,
}

impl ChildProcessResult {
    /// A child that exited normally with `code`.
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: code,
            exited_normally: true,
        }
    }

    /// A child terminated by `signal`.
    pub fn signaled(signal: i32) -> Self {
        Self {
            exit_code: 128 + signal,
            exited_normally: false,
        }
    }

    /// A child that ended without an exit code or a signal.
    pub fn abnormal() -> Self {
        Self {
            exit_code: -1,
            exited_normally: false,
        }
    }

    /// Only a normal exit with status 0 counts as success.
    pub fn success(&self) -> bool {
        self.exited_normally && self.exit_code == 0
    }
}

impl From<ExitStatus> for ChildProcessResult {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::exited(code),
            (None, Some(signal)) => Self::signaled(signal),
            (None, None) => Self::abnormal(),
        }
    }
}

impl fmt::Display for ChildProcessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.exited_normally, self.exit_code) {
            (true, code) => write!(f, "exit {code}"),
            (false, code) if code > 128 => write!(f, "signal {}", code - 128),
            (false, _) => f.write_str("abnormal exit"),
        }
    }
}

/// A program plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Inherit the launcher's stdio instead of capturing output.
    pub interactive: bool,
}

impl CommandSpec {
    /// A captured-output command, used for provisioning tools.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            interactive: false,
        }
    }

    /// A command that shares the terminal with the launcher.
    pub fn interactive(program: impl Into<PathBuf>) -> Self {
        Self {
            interactive: true,
            ..Self::new(program)
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Argument vector as lossy strings, mainly for assertions and logs.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

/// Runs a command to completion and reports how it exited.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<ChildProcessResult>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: &CommandSpec) -> io::Result<ChildProcessResult> {
        (**self).run(spec)
    }
}

/// [`CommandRunner`] backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<ChildProcessResult> {
        debug!("Running: {}", spec);
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);

        if spec.interactive {
            let status = command.status()?;
            return Ok(status.into());
        }

        let output = command.stdin(Stdio::null()).output()?;
        let result = ChildProcessResult::from(output.status);
        if !result.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("{} failed ({}): {}", spec, result, stderr.trim());
        }
        Ok(result)
    }
}

/// Source of the caller's privilege level.
pub trait Identity {
    fn is_superuser(&self) -> bool;
}

/// The real effective user of this process.
#[derive(Debug, Default, Clone, Copy)]
pub struct EffectiveUser;

impl Identity for EffectiveUser {
    fn is_superuser(&self) -> bool {
        geteuid().is_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_success_requires_normal_zero_exit() {
        assert!(ChildProcessResult::exited(0).success());
        assert!(!ChildProcessResult::exited(1).success());
        assert!(!ChildProcessResult::signaled(9).success());
    }

    #[test]
    fn test_result_display() {
        assert_eq!(ChildProcessResult::exited(2).to_string(), "exit 2");
        assert_eq!(ChildProcessResult::signaled(15).to_string(), "signal 15");
        assert_eq!(ChildProcessResult::abnormal().to_string(), "abnormal exit");
        assert!(!ChildProcessResult::abnormal().success());
    }

    #[test]
    fn test_spec_keeps_arguments_separate() {
        let spec = CommandSpec::new("tar").args(["-xJf", "a b.so", "-C", "/mnt/x"]);
        assert_eq!(spec.argv(), vec!["tar", "-xJf", "a b.so", "-C", "/mnt/x"]);
        assert!(!spec.interactive);
        assert!(CommandSpec::interactive("pypy").interactive);
    }

    #[test]
    fn test_system_runner_reports_exit_code() {
        let ok = SystemRunner.run(&CommandSpec::new("true")).unwrap();
        assert!(ok.success());

        let failed = SystemRunner
            .run(&CommandSpec::new("sh").args(["-c", "exit 3"]))
            .unwrap();
        assert_eq!(failed, ChildProcessResult::exited(3));
    }

    #[test]
    fn test_system_runner_does_not_use_a_shell() {
        // `;` would split the command under a shell.
        let result = SystemRunner
            .run(&CommandSpec::new("test").args(["a;b", "=", "a;b"]))
            .unwrap();
        assert!(result.success());
    }

    #[test]
    fn test_system_runner_missing_program() {
        let err = SystemRunner
            .run(&CommandSpec::new("/nonexistent/pyram-test-binary"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
