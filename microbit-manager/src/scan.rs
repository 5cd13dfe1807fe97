//! Finding `.hex` files to offer for flashing.

use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use microbit_core::CandidateFile;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Where to look for `.hex` files.
///
/// Under `sudo` the invoking user's `~/Downloads` is used rather than
/// root's, since that is where a browser saves files.
pub fn downloads_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    if let Some(dir) = sudo_downloads(env::var("SUDO_USER").ok().as_deref()) {
        return Ok(dir);
    }
    UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .ok_or_else(|| anyhow!("Could not determine your Downloads folder; pass --downloads."))
}

fn sudo_downloads(sudo_user: Option<&str>) -> Option<PathBuf> {
    match sudo_user {
        Some(user) if !user.is_empty() && user != "root" => {
            Some(Path::new("/home").join(user).join("Downloads"))
        }
        _ => None,
    }
}

/// Lists the `.hex` files directly inside `dir`, newest first.
pub fn hex_files(dir: &Path) -> Result<Vec<CandidateFile>> {
    let mut files: Vec<CandidateFile> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("hex"))
        })
        .filter_map(|path| CandidateFile::from_path(path).ok())
        .collect();
    files.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    #[test]
    fn sudo_user_gets_their_own_downloads() {
        assert_eq!(
            sudo_downloads(Some("alice")),
            Some(PathBuf::from("/home/alice/Downloads"))
        );
        assert_eq!(sudo_downloads(Some("root")), None);
        assert_eq!(sudo_downloads(Some("")), None);
        assert_eq!(sudo_downloads(None), None);
    }

    #[test]
    fn explicit_directory_wins() {
        let dir = downloads_dir(Some(PathBuf::from("/tmp/somewhere"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/somewhere"));
    }

    #[test]
    fn lists_hex_files_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        for (name, age) in [("old.hex", 300), ("new.HEX", 0), ("middle.hex", 60)] {
            let file = File::create(dir.path().join(name)).unwrap();
            file.set_modified(now - Duration::from_secs(age)).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "not a program").unwrap();
        fs::create_dir(dir.path().join("folder.hex")).unwrap();

        let files = hex_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["new.HEX", "middle.hex", "old.hex"]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(hex_files(&dir.path().join("nope")).is_err());
    }
}
