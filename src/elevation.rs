//! Privilege elevation for iptables invocations
//!
//! The daemon normally runs as root and calls iptables directly. Operators
//! running the one-shot commands (`check`, `teardown`) from an unprivileged
//! shell can opt into wrapping each invocation.
//!
//! # Environment Variables
//!
//! - `OVERLAY_FW_ELEVATION_METHOD`: Wrap iptables with `sudo`, `run0` or `pkexec`
//!   when not running as root. Unset or empty means no wrapping.
//!
//! # Security
//!
//! - Only the iptables family of binaries can be elevated
//! - Commands are constructed without shell interpolation
//! - The wrapper binary is checked for availability

use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Environment variable selecting the elevation wrapper
pub const ELEVATION_METHOD_ENV: &str = "OVERLAY_FW_ELEVATION_METHOD";

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `OVERLAY_FW_ELEVATION_METHOD`
    #[error("Invalid OVERLAY_FW_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),

    /// Program is not one of the binaries allowed to be elevated
    #[error("Refusing to elevate '{0}'")]
    NotAllowed(String),
}

/// Binaries that may be run through an elevation wrapper
const ELEVATABLE: &[&str] = &[
    "iptables",
    "ip6tables",
    "iptables-legacy",
    "ip6tables-legacy",
    "iptables-nft",
    "ip6tables-nft",
];

/// Finds a binary in PATH
///
/// # Returns
///
/// The full path of the first match, or `None` if the binary is not in PATH
pub fn find_binary(name: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).find_map(|dir| {
            let full_path = dir.join(name);
            if full_path.is_file() {
                Some(full_path)
            } else {
                None
            }
        })
    })
}

/// Builds the command running `program` with `args`, wrapped if configured.
///
/// Runs `program` directly when already root or when no method is set.
fn build_command(program: &Path, args: &[&str]) -> Result<Command, ElevationError> {
    let direct = || {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd
    };

    if nix::unistd::getuid().is_root() {
        return Ok(direct());
    }

    let method = std::env::var(ELEVATION_METHOD_ENV)
        .unwrap_or_default()
        .to_lowercase();
    if method.is_empty() {
        return Ok(direct());
    }

    match method.as_str() {
        "sudo" | "run0" | "pkexec" => {
            if find_binary(&method).is_none() {
                return Err(ElevationError::MethodNotAvailable(method));
            }
            let mut cmd = Command::new(&method);
            cmd.arg(program).args(args);
            Ok(cmd)
        }
        _ => Err(ElevationError::InvalidMethod(method)),
    }
}

/// Creates an iptables command with the specified arguments
///
/// `program` may be a bare name or a full path; its file name must belong to
/// the iptables family.
///
/// # Security
///
/// Arguments are passed directly without shell interpretation. Rule tokens are
/// built internally from validated configuration.
pub fn create_iptables_command(program: &Path, args: &[&str]) -> Result<Command, ElevationError> {
    let name = program
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if !ELEVATABLE.contains(&name) {
        return Err(ElevationError::NotAllowed(program.display().to_string()));
    }
    build_command(program, args)
}
