//! Read-only view of the kernel mount table.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One line of `/proc/self/mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fstype: String,
    pub options: String,
}

/// Snapshot of the mounts visible to this process.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Read a mounts file. A missing file yields an empty table.
    pub fn read(path: &Path) -> io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let source = fields.next()?;
                let target = fields.next()?;
                let fstype = fields.next()?;
                let options = fields.next().unwrap_or_default();
                Some(MountEntry {
                    source: unescape(source),
                    target: PathBuf::from(unescape(target)),
                    fstype: fstype.to_string(),
                    options: options.to_string(),
                })
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// Most recent mount stacked on `path`, if any.
    pub fn find(&self, path: &Path) -> Option<&MountEntry> {
        self.entries.iter().rev().find(|e| e.target == path)
    }

    pub fn is_mounted(&self, path: &Path) -> bool {
        self.find(path).is_some()
    }

    /// Number of mounts stacked on `path`.
    pub fn count(&self, path: &Path) -> usize {
        self.entries.iter().filter(|e| e.target == path).count()
    }
}

/// Decode the octal escapes (`\040` for space etc.) used in the mount table.
fn unescape(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() && is_octal(&bytes[i + 1..i + 4]) {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u16, |acc, d| acc * 8 + u16::from(d - b'0'));
            out.push(value as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal(digits: &[u8]) -> bool {
    digits.len() == 3 && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}
