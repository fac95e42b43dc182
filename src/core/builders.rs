//! Rule set builders for the three managed concerns
//!
//! - [`masq_rules`]: NAT for traffic leaving the overlay network
//! - [`forward_rules`]: forwarding of overlay traffic through `FORWARD`
//! - [`input_rules`]: admission of overlay traffic through `INPUT`
//!
//! Builders are pure. Each call returns a fresh [`RuleSet`] for its inputs.

use crate::core::backend::FirewallBackend;
use crate::core::rule::{Rule, RuleSet};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

/// Default custom chain reached from `FORWARD`
pub const DEFAULT_FORWARD_CHAIN: &str = "OVERLAY-FORWARD";

/// Default custom chain reached from `INPUT`
pub const DEFAULT_INPUT_CHAIN: &str = "OVERLAY-INPUT";

const NAT_TABLE: &str = "nat";
const FILTER_TABLE: &str = "filter";
const POSTROUTING: &str = "POSTROUTING";

const IPV4_MULTICAST: &str = "224.0.0.0/4";
const IPV6_MULTICAST: &str = "ff00::/8";

/// Policy concern a rule set implements
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Concern {
    Masquerade,
    Forward,
    Input,
}

/// Builds the masquerade rules for `network`, with `lease_subnet` being this host's lease.
///
/// Rule order is significant: both exemptions are appended ahead of the
/// MASQUERADE rule they guard.
pub fn masq_rules(
    network: IpNetwork,
    lease_subnet: IpNetwork,
    supports_random_fully: bool,
) -> RuleSet {
    let n = network.to_string();
    let n = n.as_str();
    let sn = lease_subnet.to_string();
    let sn = sn.as_str();
    let multicast = match network {
        IpNetwork::V4(_) => IPV4_MULTICAST,
        IpNetwork::V6(_) => IPV6_MULTICAST,
    };

    let masquerade = |mut tokens: Vec<&str>| {
        tokens.extend(["-j", "MASQUERADE"]);
        if supports_random_fully {
            tokens.push("--random-fully");
        }
        Rule::new(NAT_TABLE, POSTROUTING, tokens)
    };

    RuleSet::from_rules(vec![
        // Traffic within the overlay network keeps its source address
        Rule::new(NAT_TABLE, POSTROUTING, ["-s", n, "-d", n, "-j", "RETURN"]),
        // NAT if it's not multicast traffic
        masquerade(vec!["-s", n, "!", "-d", multicast]),
        // Traffic arriving from a peer node for this host's lease is already correctly addressed
        Rule::new(NAT_TABLE, POSTROUTING, ["!", "-s", n, "-d", sn, "-j", "RETURN"]),
        // Masquerade anything headed towards the overlay from the host
        masquerade(vec!["!", "-s", n, "-d", n]),
    ])
}

/// Builds the masquerade rules, probing the backend for `--random-fully` support
pub fn masq_rules_for<B: FirewallBackend>(
    backend: &B,
    network: IpNetwork,
    lease_subnet: IpNetwork,
) -> RuleSet {
    masq_rules(network, lease_subnet, backend.has_random_fully())
}

/// Builds the rules letting traffic to or from `network` be forwarded
pub fn forward_rules(network: IpNetwork, chain: &str) -> RuleSet {
    admission_rules(network, "FORWARD", chain, "overlay forwarding rules")
}

/// Builds the rules letting traffic to or from `network` reach this host
pub fn input_rules(network: IpNetwork, chain: &str) -> RuleSet {
    admission_rules(network, "INPUT", chain, "overlay input rules")
}

fn admission_rules(network: IpNetwork, builtin: &str, chain: &str, comment: &str) -> RuleSet {
    let n = network.to_string();
    let n = n.as_str();

    RuleSet::from_rules(vec![
        Rule::new(
            FILTER_TABLE,
            builtin,
            ["-m", "comment", "--comment", comment, "-j", chain],
        )
        .at_position(1),
        Rule::new(FILTER_TABLE, chain, ["-s", n, "-j", "ACCEPT"]),
        Rule::new(FILTER_TABLE, chain, ["-d", n, "-j", "ACCEPT"]),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    fn tokens(rule: &Rule) -> Vec<&str> {
        rule.tokens.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_masq_rules_scenario_without_random_fully() {
        let rules = masq_rules(net("10.1.0.0/16"), net("10.1.15.0/24"), false);
        let rules = rules.as_slice();

        assert_eq!(rules.len(), 4);
        assert!(rules.iter().all(|r| r.table == "nat" && r.chain == "POSTROUTING"));
        assert!(rules.iter().all(|r| r.position.is_none()));

        assert_eq!(
            tokens(&rules[0]),
            ["-s", "10.1.0.0/16", "-d", "10.1.0.0/16", "-j", "RETURN"]
        );
        assert_eq!(
            tokens(&rules[1]),
            ["-s", "10.1.0.0/16", "!", "-d", "224.0.0.0/4", "-j", "MASQUERADE"]
        );
        assert_eq!(
            tokens(&rules[2]),
            ["!", "-s", "10.1.0.0/16", "-d", "10.1.15.0/24", "-j", "RETURN"]
        );
        assert_eq!(
            tokens(&rules[3]),
            ["!", "-s", "10.1.0.0/16", "-d", "10.1.0.0/16", "-j", "MASQUERADE"]
        );
    }

    #[test]
    fn test_masq_rules_random_fully_only_on_masquerade() {
        let plain = masq_rules(net("10.1.0.0/16"), net("10.1.15.0/24"), false);
        let random = masq_rules(net("10.1.0.0/16"), net("10.1.15.0/24"), true);

        for (p, r) in plain.iter().zip(random.iter()) {
            if p.tokens.contains(&"MASQUERADE".to_string()) {
                assert_eq!(r.tokens.last().map(String::as_str), Some("--random-fully"));
                assert_eq!(&r.tokens[..r.tokens.len() - 1], p.tokens.as_slice());
            } else {
                assert_eq!(p, r);
            }
        }
    }

    #[test]
    fn test_masq_rules_ipv6_multicast() {
        let rules = masq_rules(net("fd00:10::/64"), net("fd00:10::/80"), false);
        assert_eq!(rules.as_slice()[1].tokens[4], "ff00::/8");
    }

    #[test]
    fn test_forward_rules_layout() {
        let rules = forward_rules(net("10.1.0.0/16"), DEFAULT_FORWARD_CHAIN);
        let rules = rules.as_slice();

        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].chain, "FORWARD");
        assert_eq!(rules[0].position, Some(1));
        assert_eq!(
            tokens(&rules[0]),
            ["-m", "comment", "--comment", "overlay forwarding rules", "-j", "OVERLAY-FORWARD"]
        );
        assert_eq!(tokens(&rules[1]), ["-s", "10.1.0.0/16", "-j", "ACCEPT"]);
        assert_eq!(tokens(&rules[2]), ["-d", "10.1.0.0/16", "-j", "ACCEPT"]);
        assert!(rules[1..].iter().all(|r| r.chain == "OVERLAY-FORWARD"));
    }

    #[test]
    fn test_input_rules_use_configured_chain() {
        let rules = input_rules(net("10.1.0.0/16"), "MESH-IN");
        let rules = rules.as_slice();

        assert_eq!(rules[0].chain, "INPUT");
        assert_eq!(rules[0].tokens.last().map(String::as_str), Some("MESH-IN"));
        assert!(rules.iter().all(|r| r.table == "filter"));
        assert_eq!(rules[2].chain, "MESH-IN");
    }

    #[test]
    fn test_concern_display() {
        assert_eq!(Concern::Masquerade.to_string(), "masquerade");
        assert_eq!(Concern::Input.as_ref(), "input");
    }
}
