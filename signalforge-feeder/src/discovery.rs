//! `which`-style lookup of decoder binaries on `PATH`.
//!
//! Never cached: a tool installed after startup is picked up on the next
//! status query or start attempt.

use std::path::{Path, PathBuf};

/// Resolve `command` to an executable path.
///
/// Commands containing a path separator are checked as given; bare names
/// are searched for in each `PATH` entry.
pub fn which(command: &str) -> Option<PathBuf> {
    if command.is_empty() {
        return None;
    }

    if command.contains(std::path::MAIN_SEPARATOR) {
        let path = Path::new(command);
        return is_executable(path).then(|| path.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
}

pub fn is_available(command: &str) -> bool {
    which(command).is_some()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
