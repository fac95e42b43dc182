//! Shared test utilities for core module tests
//!
//! Provides an in-memory [`FirewallBackend`] that behaves like iptables for the
//! operations the reconciler uses, records every call, and can inject failures.
//! This module is only compiled in test mode.

use crate::core::backend::FirewallBackend;
use crate::core::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mutex for tests that need exclusive access to environment variables.
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("OVERLAY_FW_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("OVERLAY_FW_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

const BUILTIN_CHAINS: &[(&str, &str)] = &[
    ("filter", "INPUT"),
    ("filter", "FORWARD"),
    ("filter", "OUTPUT"),
    ("nat", "PREROUTING"),
    ("nat", "INPUT"),
    ("nat", "OUTPUT"),
    ("nat", "POSTROUTING"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    NewChain,
    AppendUnique,
    Delete,
    Exists,
    Insert,
}

impl Op {
    pub fn is_mutation(self) -> bool {
        matches!(self, Op::AppendUnique | Op::Delete | Op::Insert)
    }
}

/// One recorded backend invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub table: String,
    pub chain: String,
    pub position: Option<u32>,
    pub tokens: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    chains: HashMap<(String, String), Vec<Vec<String>>>,
    calls: Vec<Call>,
    failures: Vec<(Op, i32)>,
}

/// In-memory iptables stand-in, cheap to clone and shared between clones
#[derive(Debug, Clone)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
    random_fully: bool,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// Creates a backend with the built-in filter and nat chains, all empty
    pub fn new() -> Self {
        let mut state = FakeState::default();
        for (table, chain) in BUILTIN_CHAINS {
            state
                .chains
                .insert(((*table).to_string(), (*chain).to_string()), Vec::new());
        }
        Self {
            state: Arc::new(Mutex::new(state)),
            random_fully: false,
        }
    }

    pub fn with_random_fully(mut self, supported: bool) -> Self {
        self.random_fully = supported;
        self
    }

    /// Makes the next call of `op` fail with the given iptables exit status
    pub fn fail_next(&self, op: Op, exit_code: i32) {
        self.state.lock().unwrap().failures.push((op, exit_code));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn mutation_count(&self) -> usize {
        self.calls().iter().filter(|c| c.op.is_mutation()).count()
    }

    pub fn has_chain(&self, table: &str, chain: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .chains
            .contains_key(&(table.to_string(), chain.to_string()))
    }

    /// Current contents of a chain, top first
    pub fn rules(&self, table: &str, chain: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .chains
            .get(&(table.to_string(), chain.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of rules across every chain
    pub fn rule_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .chains
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Creates an empty chain without recording a call
    pub fn add_chain(&self, table: &str, chain: &str) {
        self.state
            .lock()
            .unwrap()
            .chains
            .entry(key(table, chain))
            .or_default();
    }

    /// Removes a rule behind the reconciler's back
    pub fn remove_externally(&self, table: &str, chain: &str, tokens: &[String]) {
        let mut state = self.state.lock().unwrap();
        if let Some(rules) = state.chains.get_mut(&(table.to_string(), chain.to_string()))
            && let Some(idx) = rules.iter().position(|r| r == tokens)
        {
            rules.remove(idx);
        }
    }

    /// Places a foreign rule at the top of a chain, as another tool would
    pub fn insert_externally(&self, table: &str, chain: &str, tokens: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state
            .chains
            .entry((table.to_string(), chain.to_string()))
            .or_default()
            .insert(0, tokens.iter().map(ToString::to_string).collect());
    }

    fn record(
        &self,
        op: Op,
        table: &str,
        chain: &str,
        position: Option<u32>,
        tokens: &[String],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            op,
            table: table.to_string(),
            chain: chain.to_string(),
            position,
            tokens: tokens.to_vec(),
        });

        if let Some(idx) = state.failures.iter().position(|(o, _)| *o == op) {
            let (_, exit_code) = state.failures.remove(idx);
            return Err(iptables_error("injected failure", exit_code));
        }
        Ok(())
    }
}

fn iptables_error(message: &str, exit_code: i32) -> Error {
    Error::Iptables {
        message: message.to_string(),
        stderr: Some(message.to_string()),
        exit_code: Some(exit_code),
    }
}

fn key(table: &str, chain: &str) -> (String, String) {
    (table.to_string(), chain.to_string())
}

impl FirewallBackend for FakeBackend {
    async fn new_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.record(Op::NewChain, table, chain, None, &[])?;
        let mut state = self.state.lock().unwrap();
        if state.chains.contains_key(&key(table, chain)) {
            return Err(iptables_error("iptables: Chain already exists.", 1));
        }
        state.chains.insert(key(table, chain), Vec::new());
        Ok(())
    }

    async fn append_unique(&self, table: &str, chain: &str, tokens: &[String]) -> Result<()> {
        self.record(Op::AppendUnique, table, chain, None, tokens)?;
        let mut state = self.state.lock().unwrap();
        let rules = state
            .chains
            .get_mut(&key(table, chain))
            .ok_or_else(|| iptables_error("iptables: No chain/target/match by that name.", 1))?;
        if !rules.iter().any(|r| r == tokens) {
            rules.push(tokens.to_vec());
        }
        Ok(())
    }

    async fn delete(&self, table: &str, chain: &str, tokens: &[String]) -> Result<()> {
        self.record(Op::Delete, table, chain, None, tokens)?;
        let mut state = self.state.lock().unwrap();
        let rules = state
            .chains
            .get_mut(&key(table, chain))
            .ok_or_else(|| iptables_error("iptables: No chain/target/match by that name.", 1))?;
        let idx = rules
            .iter()
            .position(|r| r == tokens)
            .ok_or_else(|| iptables_error("iptables: Bad rule (does a matching rule exist in that chain?).", 1))?;
        rules.remove(idx);
        Ok(())
    }

    async fn exists(&self, table: &str, chain: &str, tokens: &[String]) -> Result<bool> {
        self.record(Op::Exists, table, chain, None, tokens)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .chains
            .get(&key(table, chain))
            .is_some_and(|rules| rules.iter().any(|r| r == tokens)))
    }

    async fn insert(&self, table: &str, chain: &str, position: u32, tokens: &[String]) -> Result<()> {
        self.record(Op::Insert, table, chain, Some(position), tokens)?;
        let mut state = self.state.lock().unwrap();
        let rules = state
            .chains
            .get_mut(&key(table, chain))
            .ok_or_else(|| iptables_error("iptables: No chain/target/match by that name.", 1))?;
        let idx = position.saturating_sub(1) as usize;
        if position == 0 || idx > rules.len() {
            return Err(iptables_error("iptables: Index of insertion too big.", 1));
        }
        rules.insert(idx, tokens.to_vec());
        Ok(())
    }

    fn has_random_fully(&self) -> bool {
        self.random_fully
    }
}
