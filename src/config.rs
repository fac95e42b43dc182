//! Daemon configuration
//!
//! Loaded from JSON, then overridden field by field from the command line.
//! Every field except `network` has a default, so a minimal file is just:
//!
//! ```json
//! { "network": "10.1.0.0/16", "lease_subnet": "10.1.5.0/24" }
//! ```

use crate::core::builders::{
    Concern, DEFAULT_FORWARD_CHAIN, DEFAULT_INPUT_CHAIN, forward_rules, input_rules, masq_rules,
};
use crate::core::error::{Error, Result};
use crate::core::iptables::Family;
use crate::core::rule::RuleSet;
use crate::validators;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::IntoEnumIterator;
use tracing::{debug, warn};

/// Complete daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Overlay network spanning all nodes
    #[serde(default)]
    pub network: Option<IpNetwork>,
    /// This host's lease inside `network`; required for masquerading
    #[serde(default)]
    pub lease_subnet: Option<IpNetwork>,
    #[serde(default = "default_resync_period")]
    pub resync_period_secs: u64,
    #[serde(default = "default_forward_chain")]
    pub forward_chain: String,
    #[serde(default = "default_input_chain")]
    pub input_chain: String,
    #[serde(default = "default_true")]
    pub manage_masquerade: bool,
    #[serde(default = "default_true")]
    pub manage_forward: bool,
    #[serde(default)]
    pub manage_input: bool,
    /// Explicit iptables binary; located through PATH when unset
    #[serde(default)]
    pub iptables_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            network: None,
            lease_subnet: None,
            resync_period_secs: default_resync_period(),
            forward_chain: default_forward_chain(),
            input_chain: default_input_chain(),
            manage_masquerade: true,
            manage_forward: true,
            manage_input: false,
            iptables_path: None,
        }
    }
}

fn default_resync_period() -> u64 {
    5
}

fn default_forward_chain() -> String {
    DEFAULT_FORWARD_CHAIN.to_string()
}

fn default_input_chain() -> String {
    DEFAULT_INPUT_CHAIN.to_string()
}

fn default_true() -> bool {
    true
}

/// Command-line values taking precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub network: Option<IpNetwork>,
    pub lease_subnet: Option<IpNetwork>,
    pub resync_period_secs: Option<u64>,
    pub iptables_path: Option<PathBuf>,
    pub manage_input: Option<bool>,
}

impl DaemonConfig {
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(network) = overrides.network {
            self.network = Some(network);
        }
        if let Some(lease) = overrides.lease_subnet {
            self.lease_subnet = Some(lease);
        }
        if let Some(secs) = overrides.resync_period_secs {
            self.resync_period_secs = secs;
        }
        if let Some(path) = overrides.iptables_path {
            self.iptables_path = Some(path);
        }
        if let Some(manage_input) = overrides.manage_input {
            self.manage_input = manage_input;
        }
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    /// Address family of the overlay network, if one is configured
    pub fn family(&self) -> Option<Family> {
        self.network.as_ref().map(Family::of)
    }

    /// Concerns turned on, in masquerade, forward, input order
    pub fn enabled_concerns(&self) -> Vec<Concern> {
        Concern::iter()
            .filter(|concern| match concern {
                Concern::Masquerade => self.manage_masquerade,
                Concern::Forward => self.manage_forward,
                Concern::Input => self.manage_input,
            })
            .collect()
    }

    /// Checks the configuration is complete and consistent
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found
    pub fn validate(&self) -> Result<()> {
        let network = self
            .network
            .ok_or_else(|| Error::Config("no overlay network configured".to_string()))?;

        if let Some(warning) = validators::check_network(network) {
            warn!("{warning}");
        }

        if self.manage_masquerade {
            let lease = self.lease_subnet.ok_or_else(|| {
                Error::Config("masquerading requires a lease_subnet".to_string())
            })?;
            validators::validate_lease(network, lease).map_err(Error::Config)?;
        } else if let Some(lease) = self.lease_subnet {
            validators::validate_lease(network, lease).map_err(Error::Config)?;
        }

        validators::validate_resync_period(self.resync_period()).map_err(Error::Config)?;

        if self.manage_forward {
            validators::validate_chain_name(&self.forward_chain).map_err(Error::Config)?;
        }
        if self.manage_input {
            validators::validate_chain_name(&self.input_chain).map_err(Error::Config)?;
        }
        if self.manage_forward && self.manage_input && self.forward_chain == self.input_chain {
            return Err(Error::Config(format!(
                "forward_chain and input_chain must differ (both '{}')",
                self.forward_chain
            )));
        }

        if self.enabled_concerns().is_empty() {
            return Err(Error::Config("every rule set is disabled".to_string()));
        }

        Ok(())
    }

    /// Builds the desired rules for `concern`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a network the concern needs is missing
    pub fn rules_for(&self, concern: Concern, supports_random_fully: bool) -> Result<RuleSet> {
        let network = self
            .network
            .ok_or_else(|| Error::Config("no overlay network configured".to_string()))?;

        Ok(match concern {
            Concern::Masquerade => {
                let lease = self.lease_subnet.ok_or_else(|| {
                    Error::Config("masquerading requires a lease_subnet".to_string())
                })?;
                masq_rules(network, lease, supports_random_fully)
            }
            Concern::Forward => forward_rules(network, &self.forward_chain),
            Concern::Input => input_rules(network, &self.input_chain),
        })
    }
}

/// Loads the configuration from `path`, or from the default location.
///
/// An explicit `path` must exist. A missing default file yields
/// [`DaemonConfig::default`].
///
/// # Errors
///
/// Returns `Err` if the file cannot be read or is not valid JSON
pub async fn load_config(path: Option<&Path>) -> Result<DaemonConfig> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match crate::utils::default_config_path() {
            Some(path) => (path, false),
            None => return Ok(DaemonConfig::default()),
        },
    };

    let json = match tokio::fs::read_to_string(&path).await {
        Ok(json) => json,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No config at {}, using defaults", path.display());
            return Ok(DaemonConfig::default());
        }
        Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&json)
        .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))
}
