//! overlay-fw - iptables rule keeper for overlay network hosts
//!
//! Keeps the masquerade, forward and input rules an overlay network needs in
//! place, repairing them when something else removes or reorders them.
//!
//! # Architecture
//!
//! - [`core`] - Rule model, rule builders, reconciliation and the resync loop
//! - [`audit`] - Audit logging of every mutation applied to the live firewall
//! - [`validators`] - Input validation and sanitization
//! - [`config`] - Daemon configuration loading and validation
//! - [`elevation`] - Optional privilege wrapping for iptables invocations
//! - [`utils`] - Utility functions (XDG directories, etc.)
//!
//! # Reconciliation
//!
//! - Custom chains are created before any rule referencing them is touched
//! - A cheap all-or-nothing existence check runs every resync period
//! - Any drift triggers a full teardown and ordered reapply of the rule set
//! - Rules are removed again when the resync loop exits

#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod utils;
pub mod validators;

/// Directory holding the iptables binaries, pinned at build time by distro packagers
pub const SYSTEM_IPTABLES_DIR: Option<&str> = option_env!("OVERLAY_FW_SYSTEM_IPTABLES_DIR");

// Re-export commonly used types
pub use core::backend::FirewallBackend;
pub use core::error::{Error, Result};
pub use core::rule::{Rule, RuleSet};
