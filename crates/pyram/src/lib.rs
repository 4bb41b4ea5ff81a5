//! pyram: run PyPy from a RAM-backed tmpfs.
//!
//! Each launch extracts the interpreter distribution into a tmpfs, optionally
//! copies the user's script into a second, smaller tmpfs (`--toram`), runs
//! the interpreter and removes the script mount again. The runtime mount
//! stays in place for the next launch to clear and re-provision.
//!
//! Concurrent launches share the same fixed mount paths with no locking; one
//! launch can clear or unmount a mount another one is still using.

pub mod args;
pub mod config;
pub mod error;
pub mod exec;
pub mod launcher;
pub mod mounts;
pub mod orchestrator;
pub mod ramdisk;
pub mod stage;

pub use args::{Intent, ScriptRun};
pub use config::LauncherConfig;
pub use error::{LaunchError, LaunchResult};
pub use exec::{
    ChildProcessResult, CommandRunner, CommandSpec, EffectiveUser, Identity, SystemRunner,
};
pub use launcher::{Launcher, Outcome};
