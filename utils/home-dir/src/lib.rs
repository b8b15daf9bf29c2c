use dirs::home_dir;
use std::path::Path;
use std::path::PathBuf;

/// Environment variable that overrides the PyVal home directory.
pub const PYVAL_HOME_ENV_VAR: &str = "PYVAL_HOME";

const DEFAULT_HOME_DIRNAME: &str = ".pyval";

/// Returns the directory holding PyVal's config file, admin/ban lists, help
/// overrides, log file and pid file.
///
/// - If `PYVAL_HOME` is set, the value must exist and be a directory. The
///   value will be canonicalized and this function will Err otherwise.
/// - If `PYVAL_HOME` is not set, `~/.pyval` is returned without checking that
///   it exists; see [`ensure_pyval_home`].
pub fn find_pyval_home() -> std::io::Result<PathBuf> {
    let home_env = std::env::var(PYVAL_HOME_ENV_VAR)
        .ok()
        .filter(|val| !val.is_empty());
    find_pyval_home_from_env(home_env.as_deref())
}

/// Like [`find_pyval_home`], but creates the default directory when missing.
pub fn ensure_pyval_home() -> std::io::Result<PathBuf> {
    let home = find_pyval_home()?;
    if !home.exists() {
        std::fs::create_dir_all(&home)?;
    }
    Ok(home)
}

fn find_pyval_home_from_env(home_env: Option<&str>) -> std::io::Result<PathBuf> {
    match home_env {
        Some(val) => canonical_dir(Path::new(val), val),
        None => {
            let mut p = home_dir().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not find home directory",
                )
            })?;
            p.push(DEFAULT_HOME_DIRNAME);
            Ok(p)
        }
    }
}

fn canonical_dir(path: &Path, raw: &str) -> std::io::Result<PathBuf> {
    let metadata = std::fs::metadata(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{PYVAL_HOME_ENV_VAR} points to {raw:?}, but that path does not exist"),
        ),
        _ => std::io::Error::new(
            err.kind(),
            format!("failed to read {PYVAL_HOME_ENV_VAR} {raw:?}: {err}"),
        ),
    })?;

    if !metadata.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{PYVAL_HOME_ENV_VAR} points to {raw:?}, but that path is not a directory"),
        ));
    }
    path.canonicalize().map_err(|err| {
        std::io::Error::new(
            err.kind(),
            format!("failed to canonicalize {PYVAL_HOME_ENV_VAR} {raw:?}: {err}"),
        )
    })
}
