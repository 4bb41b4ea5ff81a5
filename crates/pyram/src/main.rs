//! pyram - run pypy (and a Python script) from a RAM disk.
//!
//! ```bash
//! sudo pyram script.py
//! sudo pyram --toram --args script.py input.json
//! sudo pyram -m http.server 8000
//! ```
//!
//! Logging goes to stderr and is controlled by `PYRAM_LOG` (default `warn`).
//! Paths and sizes come from `/etc/pyram/config.toml` or `$PYRAM_CONFIG`.

use std::env;
use std::process::ExitCode;

use log::debug;

use pyram::args::{self, Intent, USAGE};
use pyram::{EffectiveUser, LaunchResult, Launcher, LauncherConfig, Outcome, SystemRunner};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("PYRAM_LOG", "warn"))
        .init();

    match try_main() {
        Ok(Outcome::Printed(text)) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Ok(Outcome::Completed(result)) => {
            debug!("Interpreter finished with {result}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            debug!("launch failed: {err:?}");
            eprintln!("pyram: {err}");
            if err.wants_usage() {
                eprintln!("\n{USAGE}");
            }
            ExitCode::from(err.exit_code())
        }
    }
}

fn try_main() -> LaunchResult<Outcome> {
    let tokens = args::utf8_tokens(env::args_os().skip(1))?;

    let intent = args::parse(&tokens)?;
    if let Intent::Help | Intent::Version = intent {
        // No config needed to print text.
        return Launcher::new(LauncherConfig::default(), SystemRunner, EffectiveUser)
            .launch(intent);
    }

    let config = LauncherConfig::load(None)?;
    Launcher::new(config, SystemRunner, EffectiveUser).launch(intent)
}
