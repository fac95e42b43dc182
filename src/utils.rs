//! XDG directory helpers
//!
//! - Config: `~/.config/overlay-fw/` - `config.json`
//! - State: `~/.local/state/overlay-fw/` - audit log
//!
//! When running as root these resolve under `/root`. Packagers shipping a
//! system service pass `--config` explicitly.

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "overlay-fw", "overlay-fw")
}

pub fn get_config_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.config_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

/// Default location of the configuration file
pub fn default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

pub fn ensure_dirs() -> std::io::Result<()> {
    use std::fs::DirBuilder;
    use std::os::unix::fs::DirBuilderExt;

    let mut builder = DirBuilder::new();
    builder.mode(0o700); // User read/write/execute only
    builder.recursive(true);

    if let Some(dir) = get_state_dir() {
        builder.create(dir)?;
    }

    Ok(())
}
