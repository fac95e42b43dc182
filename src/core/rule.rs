//! Rule model and ordered rule sets
//!
//! A [`Rule`] describes one iptables rule exactly as the engine accepts it. The
//! match conditions and target live in an opaque token list that is passed to
//! the backend verbatim.
//!
//! A [`RuleSet`] is an ordered, immutable collection of rules. Order matters in
//! two ways:
//! - positioned rules (e.g. a jump at the top of `FORWARD`) must land at a
//!   fixed index of their chain
//! - unpositioned rules of one chain are appended in list order, so exemptions
//!   listed before a catch-all rule are evaluated first
//!
//! # Example
//!
//! ```
//! use overlay_fw::core::rule::{Rule, RuleSet};
//!
//! let rules = RuleSet::from_rules(vec![
//!     Rule::new("filter", "OVERLAY-FORWARD", ["-s", "10.1.0.0/16", "-j", "ACCEPT"]),
//!     Rule::new("filter", "OVERLAY-FORWARD", ["-d", "10.1.0.0/16", "-j", "ACCEPT"]),
//! ]);
//! assert_eq!(rules.table_chains(), vec![("filter", "OVERLAY-FORWARD")]);
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A single firewall rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub table: String,
    pub chain: String,
    /// 1-based index within the chain, `None` to append at the tail.
    /// A position of 0 means no fixed position.
    #[serde(
        default,
        deserialize_with = "deserialize_position",
        skip_serializing_if = "Option::is_none"
    )]
    pub position: Option<u32>,
    pub tokens: Vec<String>,
}

impl Rule {
    /// Creates an unpositioned rule
    pub fn new<I, S>(table: &str, chain: &str, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.to_string(),
            chain: chain.to_string(),
            position: None,
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    /// Pins the rule to a 1-based position within its chain; 0 leaves it unpositioned
    pub fn at_position(mut self, position: u32) -> Self {
        self.position = Some(position).filter(|&p| p > 0);
        self
    }

    /// The index to insert at, or `None` when the rule is appended
    pub fn insert_position(&self) -> Option<u32> {
        self.position.filter(|&p| p > 0)
    }

    pub fn is_positioned(&self) -> bool {
        self.insert_position().is_some()
    }
}

fn deserialize_position<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let position = Option::<u32>::deserialize(deserializer)?;
    Ok(position.filter(|&p| p > 0))
}

/// Renders the rule as the iptables arguments that would install it
impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.insert_position() {
            Some(pos) => write!(f, "-t {} -I {} {}", self.table, self.chain, pos)?,
            None => write!(f, "-t {} -A {}", self.table, self.chain)?,
        }
        for token in &self.tokens {
            if token.is_empty() || token.contains(char::is_whitespace) {
                write!(f, " \"{token}\"")?;
            } else {
                write!(f, " {token}")?;
            }
        }
        Ok(())
    }
}

/// Ordered, immutable sequence of rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn as_slice(&self) -> &[Rule] {
        &self.rules
    }

    /// Distinct `(table, chain)` pairs referenced by the set, in first-seen order
    pub fn table_chains(&self) -> Vec<(&str, &str)> {
        let mut seen = HashSet::new();
        self.rules
            .iter()
            .map(|rule| (rule.table.as_str(), rule.chain.as_str()))
            .filter(|pair| seen.insert(*pair))
            .collect()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<T: IntoIterator<Item = Rule>>(iter: T) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}
