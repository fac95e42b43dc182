//! Drift detection and repair
//!
//! iptables has no atomic "replace this ordered set" operation and no diff, so
//! repair is coarse: when any rule of a set is missing, the whole set is
//! deleted and reapplied in order. That is the only way to guarantee that
//! positioned rules and order-sensitive exemptions land correctly relative to
//! each other. Rules that were still present get recreated too.
//!
//! # Tick
//!
//! 1. Ensure every referenced chain exists
//! 2. Check whether every rule is present (stops at the first absent one)
//! 3. All present: [`SyncState::Synced`], nothing is mutated
//! 4. Otherwise tear the set down and apply it again

use crate::core::backend::FirewallBackend;
use crate::core::chain::ensure_chains;
use crate::core::error::{Error, Result};
use crate::core::rule::RuleSet;
use tracing::{debug, info, warn};

/// Whether the live firewall matched the rule set at the end of the last tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum SyncState {
    #[default]
    Unsynced,
    Synced,
}

/// What a successful tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Every rule was present, nothing was touched
    InSync,
    /// Rules were missing and the set was torn down and reapplied
    Repaired,
}

/// Reports whether every rule is present, stopping at the first absent one
pub async fn all_exist<B: FirewallBackend>(backend: &B, rules: &RuleSet) -> Result<bool> {
    for rule in rules {
        let present = backend
            .exists(&rule.table, &rule.chain, &rule.tokens)
            .await
            .map_err(|e| Error::ExistenceCheck(Box::new(e)))?;
        if !present {
            debug!("Missing rule: {rule}");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Applies the rule set in order.
///
/// Positioned rules are inserted unless already present; the rest are appended
/// if absent. The first failure stops the walk, leaving earlier rules applied.
pub async fn apply<B: FirewallBackend>(backend: &B, rules: &RuleSet) -> Result<()> {
    for rule in rules {
        let applied = match rule.insert_position() {
            Some(position) => {
                info!("Inserting rule: {rule}");
                match backend.exists(&rule.table, &rule.chain, &rule.tokens).await {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        backend
                            .insert(&rule.table, &rule.chain, position, &rule.tokens)
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            None => {
                info!("Appending rule: {rule}");
                backend
                    .append_unique(&rule.table, &rule.chain, &rule.tokens)
                    .await
            }
        };

        applied.map_err(|e| Error::Apply {
            rule: rule.to_string(),
            source: Box::new(e),
        })?;
    }
    Ok(())
}

/// Deletes every rule of the set, ignoring failures.
///
/// A failed delete almost always means the rule is already gone.
pub async fn teardown<B: FirewallBackend>(backend: &B, rules: &RuleSet) {
    for rule in rules {
        info!("Deleting rule: {rule}");
        if let Err(e) = backend.delete(&rule.table, &rule.chain, &rule.tokens).await {
            debug!("Ignoring delete failure for {}/{}: {e}", rule.table, rule.chain);
        }
    }
}

/// Keeps one rule set in place on one backend
#[derive(Debug)]
pub struct Reconciler<B> {
    backend: B,
    rules: RuleSet,
    state: SyncState,
}

impl<B: FirewallBackend> Reconciler<B> {
    pub fn new(backend: B, rules: RuleSet) -> Self {
        Self {
            backend,
            rules,
            state: SyncState::Unsynced,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Runs one detect-and-repair pass
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        self.state = SyncState::Unsynced;

        ensure_chains(&self.backend, &self.rules).await?;

        if all_exist(&self.backend, &self.rules).await? {
            self.state = SyncState::Synced;
            return Ok(TickOutcome::InSync);
        }

        warn!("Some rules are missing; deleting and recreating rules");
        teardown(&self.backend, &self.rules).await;
        apply(&self.backend, &self.rules).await?;

        self.state = SyncState::Synced;
        Ok(TickOutcome::Repaired)
    }

    /// Removes the whole rule set from the live firewall
    pub async fn teardown(&mut self) {
        teardown(&self.backend, &self.rules).await;
        self.state = SyncState::Unsynced;
    }
}
