//! Periodic resync loop
//!
//! One loop owns one rule set for the lifetime of the daemon. It ticks the
//! [`Reconciler`], sleeps for the resync period, and repeats until its shutdown
//! future completes. Whatever ends the loop, the rule set is torn down once
//! before [`ResyncLoop::run`] returns, so the host is not left with stale
//! overlay rules.
//!
//! Tick failures are logged and retried on the next period. There is no
//! backoff: rule application is idempotent and cheap next to the interval.

use crate::audit::{self, AuditLog};
use crate::core::backend::FirewallBackend;
use crate::core::error::Result;
use crate::core::iptables::{Family, IptablesCommand};
use crate::core::reconcile::{self, Reconciler, TickOutcome};
use crate::core::rule::RuleSet;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

/// Drives one [`Reconciler`] on a fixed interval
pub struct ResyncLoop<B> {
    name: String,
    reconciler: Reconciler<B>,
    interval: Duration,
    audit: Option<AuditLog>,
}

impl<B: FirewallBackend> ResyncLoop<B> {
    pub fn new(name: impl Into<String>, backend: B, rules: RuleSet, interval: Duration) -> Self {
        Self {
            name: name.into(),
            reconciler: Reconciler::new(backend, rules),
            interval,
            audit: None,
        }
    }

    /// Records repairs and teardowns in `audit`
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Runs until `shutdown` completes, then removes the managed rules
    pub async fn run<F>(mut self, shutdown: F) -> Reconciler<B>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "[{}] Ensuring {} rules every {}s",
            self.name,
            self.reconciler.rules().len(),
            self.interval.as_secs()
        );

        loop {
            self.tick().await;

            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("[{}] Shutting down, removing managed rules", self.name);
        self.reconciler.teardown().await;
        if let Some(audit) = &self.audit {
            audit::log_teardown(audit, &self.name, self.reconciler.rules().len()).await;
        }
        self.reconciler
    }

    async fn tick(&mut self) {
        match self.reconciler.tick().await {
            Ok(TickOutcome::InSync) => {}
            Ok(TickOutcome::Repaired) => {
                info!("[{}] Rules restored", self.name);
                if let Some(audit) = &self.audit {
                    audit::log_repair(audit, &self.name, self.reconciler.rules().len(), None)
                        .await;
                }
            }
            Err(e) => {
                error!("[{}] Failed to ensure rules: {e}", self.name);
                if let Some(audit) = &self.audit {
                    audit::log_repair(
                        audit,
                        &self.name,
                        self.reconciler.rules().len(),
                        Some(e.to_string()),
                    )
                    .await;
                }
            }
        }
    }
}

/// Locates iptables and keeps the rules produced by `build_rules` in place until
/// `shutdown` completes.
///
/// `build_rules` sees the located backend so capability probes (such as
/// `--random-fully` support) run against the binary actually in use. If
/// iptables cannot be located, or `build_rules` fails, the loop never starts
/// and the error is returned.
pub async fn setup_and_ensure<R, F>(
    name: &str,
    family: Family,
    program: Option<&Path>,
    build_rules: R,
    interval: Duration,
    audit: Option<AuditLog>,
    shutdown: F,
) -> Result<()>
where
    R: FnOnce(&IptablesCommand) -> Result<RuleSet>,
    F: Future<Output = ()>,
{
    let backend = IptablesCommand::open(family, program).await?;
    let rules = build_rules(&backend)?;

    let mut resync = ResyncLoop::new(name, backend, rules, interval);
    if let Some(audit) = audit {
        resync = resync.with_audit(audit);
    }
    resync.run(shutdown).await;
    Ok(())
}

/// Removes `rules` once, ignoring rules that are already gone
pub async fn delete_rules<B: FirewallBackend>(backend: &B, rules: &RuleSet) {
    reconcile::teardown(backend, rules).await;
}
