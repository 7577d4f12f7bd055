//! Locating the engine binary.
//!
//! Search order, first hit wins:
//!
//!   1. the configured `engine_path`
//!   2. `ATTEST_ENGINE_PATH`
//!   3. every `PATH` entry
//!   4. `./bin/`
//!   5. `bin/` beside the running executable, then beside its parent directory

use std::{
    env,
    path::{Path, PathBuf},
};

use tracing::debug;

use attest_contracts::error::{AttestError, AttestResult};

use crate::config::ENV_ENGINE_PATH;

#[cfg(windows)]
pub const ENGINE_BINARY: &str = "attest-engine.exe";
#[cfg(not(windows))]
pub const ENGINE_BINARY: &str = "attest-engine";

/// Find the engine binary using the process environment.
pub fn find_engine(explicit: Option<&Path>) -> AttestResult<PathBuf> {
    let env_path = env::var_os(ENV_ENGINE_PATH)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    let path_dirs: Vec<PathBuf> = env::var_os("PATH")
        .map(|p| env::split_paths(&p).collect())
        .unwrap_or_default();

    let mut candidates = Vec::new();
    candidates.extend(explicit.map(Path::to_path_buf));
    candidates.extend(env_path);
    candidates.extend(path_dirs.iter().map(|d| d.join(ENGINE_BINARY)));
    candidates.push(Path::new("bin").join(ENGINE_BINARY));
    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join("bin").join(ENGINE_BINARY));
            if let Some(parent) = dir.parent() {
                candidates.push(parent.join("bin").join(ENGINE_BINARY));
            }
        }
    }

    first_executable(&candidates)
}

/// The first candidate that is an executable regular file.
pub fn first_executable(candidates: &[PathBuf]) -> AttestResult<PathBuf> {
    for candidate in candidates {
        if is_executable(candidate) {
            debug!(path = %candidate.display(), "engine binary found");
            return Ok(candidate.clone());
        }
    }
    Err(AttestError::EngineNotFound {
        binary: ENGINE_BINARY.to_string(),
        searched: candidates.iter().map(|c| c.display().to_string()).collect(),
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
