//! Idempotent custom chain creation
//!
//! Chains must exist before any rule inside them, or any jump to them, is
//! checked or applied. Built-in chains go through the same path: iptables
//! reports them as already existing, which counts as success.

use crate::core::backend::FirewallBackend;
use crate::core::error::{Error, Result};
use crate::core::rule::RuleSet;
use tracing::{debug, info};

/// Creates `chain` in `table` unless it already exists
pub async fn ensure_chain<B: FirewallBackend>(backend: &B, table: &str, chain: &str) -> Result<()> {
    match backend.new_chain(table, chain).await {
        Ok(()) => {
            info!("New chain created: {table}/{chain}");
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            debug!("Chain {table}/{chain} already exists");
            Ok(())
        }
        Err(e) => Err(Error::ChainCreate {
            table: table.to_string(),
            chain: chain.to_string(),
            source: Box::new(e),
        }),
    }
}

/// Ensures every distinct `(table, chain)` pair referenced by `rules`, once each
pub async fn ensure_chains<B: FirewallBackend>(backend: &B, rules: &RuleSet) -> Result<()> {
    for (table, chain) in rules.table_chains() {
        ensure_chain(backend, table, chain).await?;
    }
    Ok(())
}
