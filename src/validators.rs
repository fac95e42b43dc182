//! Input validation for daemon configuration
//!
//! Everything here ends up as an iptables argument, so values are checked
//! against what iptables itself accepts before any rule is built.

use ipnetwork::IpNetwork;
use std::time::Duration;

/// Longest user-defined chain name iptables accepts (`XT_EXTENSION_MAXNAMELEN - 1`)
pub const MAX_CHAIN_NAME_LEN: usize = 28;

/// Shortest accepted resync period
pub const MIN_RESYNC_PERIOD: Duration = Duration::from_secs(1);

/// Longest accepted resync period
pub const MAX_RESYNC_PERIOD: Duration = Duration::from_secs(3600);

/// Chains a custom chain name must not shadow
const BUILTIN_CHAINS: &[&str] = &["INPUT", "OUTPUT", "FORWARD", "PREROUTING", "POSTROUTING"];

/// Targets that cannot double as chain names
const BUILTIN_TARGETS: &[&str] = &["ACCEPT", "DROP", "RETURN", "QUEUE", "MASQUERADE", "REJECT"];

/// Validates a custom chain name.
///
/// # Errors
///
/// Returns `Err` if:
/// - Name is empty or longer than 28 characters
/// - Name starts with `-` (would be parsed as an option)
/// - Name contains whitespace, quotes or non-ASCII characters
/// - Name is a built-in chain or target
///
/// # Examples
///
/// ```
/// use overlay_fw::validators::validate_chain_name;
///
/// assert!(validate_chain_name("OVERLAY-FORWARD").is_ok());
/// assert!(validate_chain_name("-j").is_err());
/// assert!(validate_chain_name("FORWARD").is_err());
/// ```
pub fn validate_chain_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Chain name cannot be empty".to_string());
    }

    if name.len() > MAX_CHAIN_NAME_LEN {
        return Err(format!(
            "Chain name '{name}' too long (max {MAX_CHAIN_NAME_LEN} characters)"
        ));
    }

    if name.starts_with('-') {
        return Err(format!("Chain name '{name}' cannot start with '-'"));
    }

    // SECURITY: ASCII-only so names stay byte-for-byte what iptables prints back
    if !name
        .chars()
        .all(|c| c.is_ascii_graphic() && !matches!(c, '"' | '\'' | '!'))
    {
        return Err(format!("Chain name '{name}' contains invalid characters"));
    }

    let upper = name.to_ascii_uppercase();
    if BUILTIN_CHAINS.contains(&upper.as_str()) || BUILTIN_TARGETS.contains(&upper.as_str()) {
        return Err(format!("Chain name '{name}' is reserved"));
    }

    Ok(())
}

/// Validates the resync period.
///
/// # Errors
///
/// Returns `Err` if the period is outside 1 second to 1 hour.
pub fn validate_resync_period(period: Duration) -> Result<Duration, String> {
    if period < MIN_RESYNC_PERIOD {
        return Err("Resync period must be at least 1 second".to_string());
    }
    if period > MAX_RESYNC_PERIOD {
        return Err("Resync period cannot exceed 1 hour".to_string());
    }
    Ok(period)
}

/// Validates that the host lease lies within the overlay network.
///
/// # Errors
///
/// Returns `Err` if the address families differ or the lease is outside `network`.
pub fn validate_lease(network: IpNetwork, lease_subnet: IpNetwork) -> Result<(), String> {
    if network.is_ipv4() != lease_subnet.is_ipv4() {
        return Err(format!(
            "Lease subnet {lease_subnet} and network {network} are different address families"
        ));
    }

    if !network.contains(lease_subnet.network()) || lease_subnet.prefix() < network.prefix() {
        return Err(format!(
            "Lease subnet {lease_subnet} is not inside network {network}"
        ));
    }

    Ok(())
}

/// Checks if the overlay network is in an unusual range and returns a warning.
///
/// This is informational only and does not stop the daemon.
pub fn check_network(network: IpNetwork) -> Option<String> {
    use std::net::IpAddr;

    if network.prefix() == 0 {
        return Some(format!("Network {network} covers every address"));
    }

    match network.ip() {
        IpAddr::V4(ipv4) => {
            if ipv4.is_loopback() {
                return Some("Loopback range (127.x) cannot carry overlay traffic".to_string());
            }
            if ipv4.is_multicast() {
                return Some(format!("Network {network} is a multicast range"));
            }
            None
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() {
                return Some("IPv6 loopback (::1) cannot carry overlay traffic".to_string());
            }
            if ipv6.is_multicast() {
                return Some(format!("Network {network} is a multicast range"));
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_name_accepts_defaults() {
        assert!(validate_chain_name("OVERLAY-FORWARD").is_ok());
        assert!(validate_chain_name("OVERLAY-INPUT").is_ok());
        assert!(validate_chain_name("flannel_fwd.1").is_ok());
    }

    #[test]
    fn test_chain_name_rejects_invalid() {
        assert!(validate_chain_name("").is_err());
        assert!(validate_chain_name("-A").is_err());
        assert!(validate_chain_name("MY CHAIN").is_err());
        assert!(validate_chain_name("chain\"quote").is_err());
        assert!(validate_chain_name("ÜBERCHAIN").is_err());
        assert!(validate_chain_name(&"X".repeat(29)).is_err());
        assert!(validate_chain_name(&"X".repeat(28)).is_ok());
    }

    #[test]
    fn test_chain_name_rejects_reserved() {
        assert!(validate_chain_name("FORWARD").is_err());
        assert!(validate_chain_name("postrouting").is_err());
        assert!(validate_chain_name("ACCEPT").is_err());
    }

    #[test]
    fn test_resync_period_bounds() {
        assert!(validate_resync_period(Duration::from_millis(500)).is_err());
        assert!(validate_resync_period(Duration::from_secs(1)).is_ok());
        assert!(validate_resync_period(Duration::from_secs(3600)).is_ok());
        assert!(validate_resync_period(Duration::from_secs(3601)).is_err());
    }

    #[test]
    fn test_lease_inside_network() {
        let network: IpNetwork = "10.1.0.0/16".parse().unwrap();
        assert!(validate_lease(network, "10.1.5.0/24".parse().unwrap()).is_ok());
        assert!(validate_lease(network, "10.2.5.0/24".parse().unwrap()).is_err());
        assert!(validate_lease(network, "10.0.0.0/8".parse().unwrap()).is_err());
        assert!(validate_lease(network, "fd00::/64".parse().unwrap()).is_err());
    }

    #[test]
    fn test_check_network() {
        assert!(check_network("10.1.0.0/16".parse().unwrap()).is_none());
        assert!(check_network("fd00::/48".parse().unwrap()).is_none());
        assert!(check_network("0.0.0.0/0".parse().unwrap()).is_some());
        assert!(check_network("127.0.0.0/8".parse().unwrap()).is_some());
        assert!(check_network("224.0.0.0/4".parse().unwrap()).is_some());
    }
}
