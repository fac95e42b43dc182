//! Production backend running `iptables` / `ip6tables`
//!
//! Each backend operation is one child process. The binary is probed once with
//! `--version` when the backend is created:
//!
//! - 1.4.20 and later: every call passes `--wait` so concurrent firewall tools
//!   queue on the xtables lock instead of failing
//! - 1.6.2 and later: MASQUERADE supports `--random-fully`
//!
//! A missing binary or unusable version output is reported as
//! [`Error::EngineUnavailable`].

use crate::core::backend::FirewallBackend;
use crate::core::error::{Error, Result};
use crate::elevation::{create_iptables_command, find_binary};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

const WAIT_SUPPORTED: Version = Version::new(1, 4, 20);
const RANDOM_FULLY_SUPPORTED: Version = Version::new(1, 6, 2);

/// Address family, selecting `iptables` or `ip6tables`
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    pub fn of(network: &IpNetwork) -> Self {
        match network {
            IpNetwork::V4(_) => Family::Ipv4,
            IpNetwork::V6(_) => Family::Ipv6,
        }
    }

    pub const fn binary(self) -> &'static str {
        match self {
            Family::Ipv4 => "iptables",
            Family::Ipv6 => "ip6tables",
        }
    }
}

/// iptables release version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Extracts the version from `--version` output such as `iptables v1.8.7 (nf_tables)`
    pub fn parse(output: &str) -> Option<Self> {
        let raw = output
            .split_whitespace()
            .find_map(|word| {
                word.strip_prefix('v')
                    .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
            })?;
        let mut parts = raw.split('.').map(str::parse::<u32>);
        let major = parts.next()?.ok()?;
        let minor = parts.next()?.ok()?;
        let patch = parts.next().transpose().ok()?.unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// [`FirewallBackend`] that shells out to iptables
#[derive(Debug, Clone)]
pub struct IptablesCommand {
    program: PathBuf,
    family: Family,
    version: Version,
}

impl IptablesCommand {
    /// Locates the binary for `family`, preferring the build-time system directory
    pub async fn locate(family: Family) -> Result<Self> {
        let name = family.binary();
        let program = crate::SYSTEM_IPTABLES_DIR
            .map(|dir| Path::new(dir).join(name))
            .filter(|path| path.is_file())
            .or_else(|| find_binary(name))
            .ok_or_else(|| Error::EngineUnavailable(format!("{name} not found in PATH")))?;

        Self::with_program(program, family).await
    }

    /// Uses `program` when given, otherwise locates the binary for `family`
    pub async fn open(family: Family, program: Option<&Path>) -> Result<Self> {
        match program {
            Some(path) => Self::with_program(path, family).await,
            None => Self::locate(family).await,
        }
    }

    /// Uses an explicit binary, probing its version
    pub async fn with_program(program: impl Into<PathBuf>, family: Family) -> Result<Self> {
        let program = program.into();

        let output = create_iptables_command(&program, &["--version"])
            .map_err(|e| Error::EngineUnavailable(e.to_string()))?
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                Error::EngineUnavailable(format!("failed to run {}: {e}", program.display()))
            })?;

        if !output.status.success() {
            return Err(Error::EngineUnavailable(format!(
                "{} --version exited with {:?}: {}",
                program.display(),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = Version::parse(&stdout).ok_or_else(|| {
            Error::EngineUnavailable(format!(
                "unrecognised version output from {}: {}",
                program.display(),
                stdout.trim()
            ))
        })?;

        info!("Using {} v{version} ({family})", program.display());

        Ok(Self {
            program,
            family,
            version,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn version(&self) -> Version {
        self.version
    }

    fn supports_wait(&self) -> bool {
        self.version >= WAIT_SUPPORTED
    }

    async fn run(
        &self,
        command: &str,
        table: &str,
        chain: &str,
        position: Option<u32>,
        tokens: &[String],
    ) -> Result<()> {
        let position = position.map(|p| p.to_string());

        let mut args: Vec<&str> = Vec::with_capacity(tokens.len() + 6);
        if self.supports_wait() {
            args.push("--wait");
        }
        args.extend(["-t", table, command, chain]);
        if let Some(position) = &position {
            args.push(position);
        }
        args.extend(tokens.iter().map(String::as_str));

        debug!("Running {} {}", self.program.display(), args.join(" "));

        let output = create_iptables_command(&self.program, &args)?
            .stdin(Stdio::null())
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(Error::Iptables {
            message: format!("{} {}: {stderr}", self.family.binary(), args.join(" ")),
            stderr: Some(stderr),
            exit_code: output.status.code(),
        })
    }
}

impl FirewallBackend for IptablesCommand {
    async fn new_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.run("-N", table, chain, None, &[]).await
    }

    async fn append_unique(&self, table: &str, chain: &str, tokens: &[String]) -> Result<()> {
        if self.exists(table, chain, tokens).await? {
            return Ok(());
        }
        self.run("-A", table, chain, None, tokens).await
    }

    async fn delete(&self, table: &str, chain: &str, tokens: &[String]) -> Result<()> {
        self.run("-D", table, chain, None, tokens).await
    }

    async fn exists(&self, table: &str, chain: &str, tokens: &[String]) -> Result<bool> {
        match self.run("-C", table, chain, None, tokens).await {
            Ok(()) => Ok(true),
            // Exit status 1 is "no such rule"
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn insert(&self, table: &str, chain: &str, position: u32, tokens: &[String]) -> Result<()> {
        self.run("-I", table, chain, Some(position), tokens).await
    }

    fn has_random_fully(&self) -> bool {
        self.version >= RANDOM_FULLY_SUPPORTED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::ENV_VAR_MUTEX;

    #[test]
    fn test_parse_version_nf_tables() {
        assert_eq!(
            Version::parse("iptables v1.8.7 (nf_tables)\n"),
            Some(Version::new(1, 8, 7))
        );
    }

    #[test]
    fn test_parse_version_legacy_two_part() {
        assert_eq!(Version::parse("ip6tables v1.6"), Some(Version::new(1, 6, 0)));
    }

    #[test]
    fn test_parse_version_garbage() {
        assert_eq!(Version::parse("command not found"), None);
        assert_eq!(Version::parse("iptables vX.Y"), None);
        assert_eq!(Version::parse(""), None);
        assert_eq!(
            Version::parse("warning via legacy: iptables v1.4.21"),
            Some(Version::new(1, 4, 21))
        );
    }

    #[test]
    fn test_version_ordering_thresholds() {
        assert!(Version::new(1, 6, 1) < RANDOM_FULLY_SUPPORTED);
        assert!(Version::new(1, 6, 2) >= RANDOM_FULLY_SUPPORTED);
        assert!(Version::new(1, 8, 0) >= RANDOM_FULLY_SUPPORTED);
        assert!(Version::new(1, 4, 19) < WAIT_SUPPORTED);
    }

    #[test]
    fn test_family_selection() {
        let v4: IpNetwork = "10.1.0.0/16".parse().unwrap();
        let v6: IpNetwork = "fd00::/64".parse().unwrap();
        assert_eq!(Family::of(&v4).binary(), "iptables");
        assert_eq!(Family::of(&v6).binary(), "ip6tables");
        assert_eq!(Family::Ipv6.to_string(), "ipv6");
        assert_eq!("ipv4".parse::<Family>().unwrap(), Family::Ipv4);
    }

    #[test]
    fn test_missing_program_is_engine_unavailable() {
        // Spawning reads the elevation method from the environment
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let result = runtime.block_on(IptablesCommand::with_program(
            "/nonexistent/overlay-fw/iptables",
            Family::Ipv4,
        ));
        assert!(matches!(result, Err(Error::EngineUnavailable(_))));
    }
}
