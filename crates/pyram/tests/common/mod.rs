//! Test fixtures: a fake system that emulates mount, umount, tar, chmod and
//! the interpreter inside a temp directory.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use pyram::mounts::MountTable;
use pyram::{ChildProcessResult, CommandRunner, CommandSpec, Identity, Launcher, LauncherConfig};
use tempfile::TempDir;

pub struct Root;

impl Identity for Root {
    fn is_superuser(&self) -> bool {
        true
    }
}

pub struct NonRoot;

impl Identity for NonRoot {
    fn is_superuser(&self) -> bool {
        false
    }
}

/// What the interpreter saw when it was invoked.
#[derive(Debug, Clone)]
pub struct InterpreterCall {
    pub args: Vec<String>,
    /// Contents of the script argument at the time of the call, if readable.
    pub script_contents: Option<String>,
}

pub struct FakeSystem {
    pub root: TempDir,
    pub config: LauncherConfig,
    calls: RefCell<Vec<CommandSpec>>,
    interpreter_calls: RefCell<Vec<InterpreterCall>>,
    extractions: Cell<u32>,
    interpreter_exit: Cell<i32>,
    failing_tool: RefCell<Option<(String, i32)>>,
}

impl FakeSystem {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();

        let mut config = LauncherConfig::default();
        config.runtime.mount_path = base.join("mnt/pyram_disk");
        config.runtime.archive = base.join("share/pypy.so");
        config.runtime.size_bytes = 188_960_770;
        config.interpreter_path = base.join("mnt/pyram_disk/pypy/bin/pypy.elf");
        config.staging.mount_path = base.join("mnt/pyram_script");
        config.mounts_file = base.join("proc/mounts");
        config.validate().unwrap();

        fs::create_dir_all(base.join("mnt")).unwrap();
        fs::create_dir_all(base.join("proc")).unwrap();
        fs::create_dir_all(base.join("work")).unwrap();
        fs::write(&config.mounts_file, "proc /proc proc rw 0 0\n").unwrap();

        let fake = Self {
            root,
            config,
            calls: RefCell::new(Vec::new()),
            interpreter_calls: RefCell::new(Vec::new()),
            extractions: Cell::new(0),
            interpreter_exit: Cell::new(0),
            failing_tool: RefCell::new(None),
        };
        fake.set_archive(&["pypy/bin/pypy.elf", "pypy/lib_pypy/os.py"]);
        fake
    }

    /// Directory used as the launcher's working directory.
    pub fn work_dir(&self) -> PathBuf {
        self.root.path().join("work")
    }

    /// Write a script into the working directory.
    pub fn write_script(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.work_dir().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    /// Replace the list of files the fake archive extracts.
    pub fn set_archive(&self, files: &[&str]) {
        let archive = &self.config.runtime.archive;
        fs::create_dir_all(archive.parent().unwrap()).unwrap();
        fs::write(archive, files.join("\n")).unwrap();
    }

    pub fn set_interpreter_exit(&self, code: i32) {
        self.interpreter_exit.set(code);
    }

    /// Make every call to `tool` exit with `code`.
    pub fn fail_tool(&self, tool: &str, code: i32) {
        *self.failing_tool.borrow_mut() = Some((tool.to_string(), code));
    }

    pub fn launcher<I: Identity>(&self, identity: I) -> Launcher<&Self, I> {
        Launcher::new(self.config.clone(), self, identity).with_working_dir(self.work_dir())
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Program names of every command run so far.
    pub fn programs(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|spec| program_name(spec, &self.config))
            .collect()
    }

    pub fn interpreter_calls(&self) -> Vec<InterpreterCall> {
        self.interpreter_calls.borrow().clone()
    }

    pub fn mount_count(&self, path: &Path) -> usize {
        MountTable::read(&self.config.mounts_file).unwrap().count(path)
    }

    /// Every path below the temp root, for before/after comparisons.
    pub fn snapshot(&self) -> Vec<(PathBuf, Vec<u8>)> {
        let mut out = Vec::new();
        walk(self.root.path(), &mut out);
        out.sort();
        out
    }

    fn emulate(&self, name: &str, argv: &[String]) -> io::Result<ChildProcessResult> {
        match name {
            "mount" => {
                let (options, target) = (&argv[4], &argv[6]);
                if !Path::new(target).is_dir() {
                    return Ok(ChildProcessResult::exited(32));
                }
                if !options.starts_with("remount") {
                    let mut table = fs::read_to_string(&self.config.mounts_file)?;
                    table.push_str(&format!("tmpfs {target} tmpfs rw,{options} 0 0\n"));
                    fs::write(&self.config.mounts_file, table)?;
                }
                Ok(ChildProcessResult::exited(0))
            }
            "umount" => {
                let target = &argv[1];
                let table = fs::read_to_string(&self.config.mounts_file)?;
                let mut lines: Vec<&str> = table.lines().collect();
                let Some(index) = lines
                    .iter()
                    .rposition(|line| line.split_whitespace().nth(1) == Some(target.as_str()))
                else {
                    return Ok(ChildProcessResult::exited(32));
                };
                lines.remove(index);
                let mut rendered = lines.join("\n");
                rendered.push('\n');
                fs::write(&self.config.mounts_file, rendered)?;
                Ok(ChildProcessResult::exited(0))
            }
            "tar" => {
                let (archive, dest) = (&argv[2], &argv[4]);
                let generation = self.extractions.get() + 1;
                self.extractions.set(generation);
                for file in fs::read_to_string(archive)?.lines() {
                    let path = Path::new(dest).join(file);
                    fs::create_dir_all(path.parent().unwrap())?;
                    fs::write(&path, format!("extraction {generation}\n"))?;
                }
                Ok(ChildProcessResult::exited(0))
            }
            "chmod" => {
                let path = Path::new(&argv[2]);
                if !path.exists() {
                    return Ok(ChildProcessResult::exited(1));
                }
                fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
                Ok(ChildProcessResult::exited(0))
            }
            other => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown program {other}"),
            )),
        }
    }
}

impl CommandRunner for FakeSystem {
    fn run(&self, spec: &CommandSpec) -> io::Result<ChildProcessResult> {
        self.calls.borrow_mut().push(spec.clone());
        let name = program_name(spec, &self.config);
        let argv = spec.argv();

        let failing = self.failing_tool.borrow().clone();
        if let Some((_, code)) = failing.filter(|(tool, _)| *tool == name) {
            return Ok(ChildProcessResult::exited(code));
        }

        if name == "pypy" {
            let script_contents = argv.get(1).and_then(|p| fs::read_to_string(p).ok());
            self.interpreter_calls.borrow_mut().push(InterpreterCall {
                args: argv[1..].to_vec(),
                script_contents,
            });
            return Ok(ChildProcessResult::exited(self.interpreter_exit.get()));
        }

        self.emulate(&name, &argv)
    }
}

fn program_name(spec: &CommandSpec, config: &LauncherConfig) -> String {
    if spec.program == config.interpreter_path {
        return "pypy".to_string();
    }
    spec.program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn walk(dir: &Path, out: &mut Vec<(PathBuf, Vec<u8>)>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            out.push((path.clone(), Vec::new()));
            walk(&path, out);
        } else {
            let contents = fs::read(&path).unwrap();
            out.push((path, contents));
        }
    }
}

pub fn argv(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}
