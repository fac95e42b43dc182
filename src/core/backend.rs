//! Capability interface to the firewall engine
//!
//! Reconciliation only ever talks to the engine through [`FirewallBackend`].
//! Every operation is keyed by `(table, chain, tokens)` and mirrors one
//! iptables invocation. [`IptablesCommand`](crate::core::iptables::IptablesCommand)
//! is the production implementation; tests use an in-memory fake.

use crate::core::error::Result;
use std::future::Future;

/// Narrow set of firewall operations consumed by the reconciler
pub trait FirewallBackend: Send + Sync {
    /// Creates a custom chain.
    ///
    /// An existing chain must be reported as an error for which
    /// [`Error::is_conflict`](crate::Error::is_conflict) returns `true`.
    fn new_chain(&self, table: &str, chain: &str) -> impl Future<Output = Result<()>> + Send;

    /// Appends the rule to the tail of the chain unless it is already present
    fn append_unique(
        &self,
        table: &str,
        chain: &str,
        tokens: &[String],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Deletes the rule. Deleting an absent rule may fail; callers decide whether that matters.
    fn delete(
        &self,
        table: &str,
        chain: &str,
        tokens: &[String],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Reports whether the rule is currently present
    fn exists(
        &self,
        table: &str,
        chain: &str,
        tokens: &[String],
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Inserts the rule at a 1-based position within the chain
    fn insert(
        &self,
        table: &str,
        chain: &str,
        position: u32,
        tokens: &[String],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Whether the engine accepts `--random-fully` on MASQUERADE rules
    fn has_random_fully(&self) -> bool {
        false
    }
}
