//! Read-only information about the mounted board: the `DETAILS.TXT` file
//! DAPLink publishes, and the files currently on the volume.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

pub const DETAILS_FILE: &str = "DETAILS.TXT";

/// Keys worth showing out of everything DAPLink writes.
const INTERESTING_KEYS: &[&str] = &[
    "Interface Version",
    "Bootloader Version",
    "Unique ID",
    "HIC ID",
    "Daplink Mode",
    "USB Interfaces",
    "URL",
];

/// Parsed `DETAILS.TXT`, keeping the original order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoardDetails {
    entries: Vec<(String, String)>,
}

impl BoardDetails {
    /// Parses `Key: value` lines, skipping comments and unknown keys.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim(), value.trim()))
            .filter(|(key, _)| INTERESTING_KEYS.contains(key))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The DAPLink interface firmware version, e.g. `0255`.
    pub fn firmware_version(&self) -> Option<&str> {
        self.get("Interface Version")
    }

    /// Board revision, derived from the first four digits of the unique ID.
    pub fn board_revision(&self) -> Option<String> {
        let id = self.get("Unique ID")?;
        let prefix = id.get(..4)?;
        Some(match prefix {
            "9900" => "v1.3".to_string(),
            "9901" => "v1.5".to_string(),
            "9903" | "9904" => "v2.0".to_string(),
            other => format!("unknown ({other})"),
        })
    }
}

/// Reads and parses `DETAILS.TXT` from the mount point.
pub fn read_details(mount_point: &Path) -> Result<BoardDetails> {
    let path = mount_point.join(DETAILS_FILE);
    let text =
        fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    Ok(BoardDetails::parse(&text))
}

/// A file on the board's volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoardFile {
    pub name: String,
    /// `None` if the file could not be stat'ed.
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
}

/// Lists the regular files at the root of the mount point, sorted by name.
pub fn list_board_files(mount_point: &Path) -> Result<Vec<BoardFile>> {
    let mut files: Vec<BoardFile> = fs::read_dir(mount_point)
        .with_context(|| format!("listing {}", mount_point.display()))?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| {
            let metadata = entry.metadata().ok();
            BoardFile {
                name: entry.file_name().to_string_lossy().to_string(),
                size: metadata.as_ref().map(|m| m.len()),
                modified: metadata.and_then(|m| m.modified().ok()),
            }
        })
        .collect();
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
