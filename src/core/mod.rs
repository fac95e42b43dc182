//! Core rule management functionality
//!
//! This module contains the types and logic for keeping overlay rules in place.
//! It provides:
//!
//! - [`rule`]: The rule model and ordered rule sets
//! - [`builders`]: Masquerade, forward and input rule set builders
//! - [`backend`]: The narrow capability interface to the firewall engine
//! - [`iptables`]: The production backend driving `iptables`/`ip6tables`
//! - [`chain`]: Idempotent custom chain creation
//! - [`reconcile`]: Existence checking, application, teardown and the reconciler
//! - [`resync`]: The periodic resync loop with guaranteed cleanup
//! - [`error`]: Error types for firewall operations

pub mod backend;
pub mod builders;
pub mod chain;
pub mod error;
pub mod iptables;
pub mod reconcile;
pub mod resync;
pub mod rule;

#[cfg(test)]
pub mod test_helpers;
