use std::path::Path;
use std::path::PathBuf;

use crate::error::PyvalErr;
use crate::error::Result;

/// Directories searched after `PATH`, relative to the user's home.
const HOME_BIN_DIRS: &[&str] = &["bin", ".local/bin", "local/bin"];
const SYSTEM_BIN_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin"];

/// Resolve `program` to an executable.
///
/// Anything containing a path separator is checked as given; a bare name is
/// looked up on `PATH` and then in the usual per-user and system bin dirs.
pub fn locate_executable(program: &str) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    if Path::new(program).components().count() > 1 {
        return which::which_in(program, None::<&str>, &cwd).map_err(|_| {
            PyvalErr::MissingDependency {
                name: program.to_string(),
                searched: vec![cwd.join(program)],
            }
        });
    }

    let searched = search_dirs();
    let paths = std::env::join_paths(&searched).map_err(|err| PyvalErr::MissingDependency {
        name: format!("{program} ({err})"),
        searched: searched.clone(),
    })?;
    which::which_in(program, Some(paths), &cwd)
        .map_err(|_| PyvalErr::MissingDependency {
            name: program.to_string(),
            searched,
        })
}

fn search_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|path| std::env::split_paths(&path).collect())
        .unwrap_or_default();
    if let Some(home) = dirs::home_dir() {
        dirs.extend(HOME_BIN_DIRS.iter().map(|dir| home.join(dir)));
    }
    dirs.extend(SYSTEM_BIN_DIRS.iter().map(PathBuf::from));

    let mut seen = std::collections::HashSet::new();
    dirs.retain(|dir| !dir.as_os_str().is_empty() && seen.insert(dir.clone()));
    dirs
}
