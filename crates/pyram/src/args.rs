//! Launcher argument grammar.
//!
//! The grammar is order-sensitive and the first token decides the mode, so
//! the raw argv is classified once and the resulting token shape is matched
//! against the accepted forms:
//!
//! ```text
//! pyram --help | --version
//! pyram -m <module> [args...]
//! pyram [--toram] [--args|-a] <script.py> [args...]
//! ```
//!
//! A token is treated as a script when it contains [`SCRIPT_MARKER`]
//! anywhere, not only as a suffix. `pkg.pyc/run` or `notes.python` are
//! accepted as scripts; the check is deliberately a plain substring test.
//!
//! Every token must be valid UTF-8, including the ones a `-m` run forwards
//! to the interpreter. A non-UTF-8 argument is a usage error.

use std::ffi::OsString;

use crate::error::{LaunchError, LaunchResult};

/// Substring identifying a token as a script path.
pub const SCRIPT_MARKER: &str = ".py";

pub const USAGE: &str = "\
Usage:
  pyram --help                           Show this help
  pyram --version                        Show the version
  pyram -m <module> [args...]            Run a module with pypy
  pyram [--toram] [--args|-a] <script.py> [args...]
                                         Run a script with pypy

Options:
  --toram      Copy the script into a RAM disk before running it
  --args, -a   Forward the arguments after the script to it";

/// What the invocation asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Help,
    Version,
    /// Every token, `-m` included, forwarded verbatim to the interpreter.
    ModuleRun { forwarded_args: Vec<String> },
    ScriptRun(ScriptRun),
}

/// A resolved script invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRun {
    /// Stage a copy of the script into the staging tmpfs first.
    pub use_ram_stage: bool,
    /// The script token exactly as given.
    pub script_full_path: String,
    /// Text after the last `/`, or the whole token.
    pub script_file_name: String,
    /// Text before the last `/`; empty means "the current directory".
    pub script_dir: String,
    pub script_args: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Token<'a> {
    Help,
    Version,
    Module,
    ToRam,
    Args,
    Script(&'a str),
    Other,
}

impl<'a> Token<'a> {
    fn classify(token: &'a str) -> Self {
        match token {
            "--help" => Token::Help,
            "--version" => Token::Version,
            "-m" => Token::Module,
            "--toram" => Token::ToRam,
            "--args" | "-a" => Token::Args,
            t if t.contains(SCRIPT_MARKER) => Token::Script(t),
            _ => Token::Other,
        }
    }

    fn is_launcher_flag(self) -> bool {
        matches!(self, Token::ToRam | Token::Args)
    }
}

/// Convert raw process arguments (program name excluded) into tokens.
pub fn utf8_tokens<I>(raw: I) -> LaunchResult<Vec<String>>
where
    I: IntoIterator<Item = OsString>,
{
    raw.into_iter()
        .map(|arg| {
            arg.into_string().map_err(|raw| {
                usage(format!(
                    "argument is not valid UTF-8: {}",
                    raw.to_string_lossy()
                ))
            })
        })
        .collect()
}

/// Turn the launcher's arguments (program name excluded) into an [`Intent`].
pub fn parse(tokens: &[String]) -> LaunchResult<Intent> {
    let shape: Vec<Token<'_>> = tokens.iter().map(|t| Token::classify(t)).collect();

    match shape.as_slice() {
        [] => Err(usage("missing script or module")),
        [Token::Help] => Ok(Intent::Help),
        [Token::Version] => Ok(Intent::Version),
        [Token::Help | Token::Version, ..] => {
            Err(usage(format!("{} does not take arguments", tokens[0])))
        }
        [Token::Module, ..] => Ok(Intent::ModuleRun {
            forwarded_args: tokens.to_vec(),
        }),
        [Token::ToRam, Token::Script(_), ..]
        | [Token::ToRam, Token::Args, Token::Script(_), ..] => {
            Ok(Intent::ScriptRun(script_run(tokens, &shape, true)))
        }
        [Token::ToRam, ..] => Err(usage(
            "--toram must be followed by a script or by --args <script>",
        )),
        [Token::Args, Token::Script(_), ..] => {
            Ok(Intent::ScriptRun(script_run(tokens, &shape, false)))
        }
        [Token::Args, ..] => Err(usage(format!(
            "{} must be followed by a script",
            tokens[0]
        ))),
        [Token::Script(first), ..] if !first.starts_with('-') => {
            Ok(Intent::ScriptRun(script_run(tokens, &shape, false)))
        }
        _ => Err(usage(format!("unrecognized argument '{}'", tokens[0]))),
    }
}

fn usage(reason: impl Into<String>) -> LaunchError {
    LaunchError::Usage(reason.into())
}

/// Build the script fields. Callers guarantee a script token exists.
fn script_run(tokens: &[String], shape: &[Token<'_>], use_ram_stage: bool) -> ScriptRun {
    let script_index = shape
        .iter()
        .position(|t| matches!(t, Token::Script(_)))
        .unwrap_or_default();
    let script = tokens[script_index].as_str();

    let (script_dir, script_file_name) = match script.rfind('/') {
        Some(i) => (&script[..i], &script[i + 1..]),
        None => ("", script),
    };

    let wants_args = shape[..script_index]
        .iter()
        .any(|t| matches!(t, Token::Args));
    let script_args = if wants_args {
        tokens[script_index + 1..]
            .iter()
            .zip(&shape[script_index + 1..])
            .filter(|(_, kind)| !kind.is_launcher_flag())
            .map(|(token, _)| token.clone())
            .collect()
    } else {
        Vec::new()
    };

    ScriptRun {
        use_ram_stage,
        script_full_path: script.to_string(),
        script_file_name: script_file_name.to_string(),
        script_dir: script_dir.to_string(),
        script_args,
    }
}

/// Text printed for `--help`.
pub fn help_text() -> String {
    format!(
        "pyram {} - run pypy from a RAM disk\n\n{USAGE}\n\npyram must be run as root.",
        env!("CARGO_PKG_VERSION")
    )
}

/// Text printed for `--version`.
pub fn version_text() -> String {
    format!("pyram {}", env!("CARGO_PKG_VERSION"))
}
