use std::fs;
use std::path::PathBuf;

use anyhow::bail;

const MEMORY_PREFIX: &str = "sqlite::memory:";
const URL_PREFIX: &str = "sqlite://";

pub fn validate_sqlite_path(path: &str) -> anyhow::Result<()> {
    if path.starts_with(MEMORY_PREFIX) {
        return Ok(());
    }
    let Some(rest) = path.strip_prefix(URL_PREFIX) else {
        bail!("sqlite path must start with `sqlite://` or use `sqlite::memory:`");
    };
    if file_part(rest).is_empty() {
        bail!("sqlite path is missing a filesystem component after `sqlite://`");
    }
    Ok(())
}

/// Creates the database file's parent directory so a fresh install can boot.
pub fn ensure_sqlite_parent_dir(path: &str) -> anyhow::Result<()> {
    let Some(rest) = path.strip_prefix(URL_PREFIX) else {
        return Ok(());
    };
    let fs_path = normalize_sqlite_file_path(file_part(rest));
    if let Some(parent) = fs_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn file_part(rest: &str) -> &str {
    rest.split_once('?').map(|(path, _)| path).unwrap_or(rest)
}

/// `sqlite:///C:/db` carries a slash before the drive letter; drop it.
pub fn normalize_sqlite_file_path(path_part: &str) -> PathBuf {
    let bytes = path_part.as_bytes();
    let has_drive = bytes.first() == Some(&b'/')
        && bytes.get(1).is_some_and(u8::is_ascii_alphabetic)
        && bytes.get(2) == Some(&b':');
    if has_drive {
        PathBuf::from(&path_part[1..])
    } else {
        PathBuf::from(path_part)
    }
}
