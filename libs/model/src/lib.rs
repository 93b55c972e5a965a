//! # netplane-model
//!
//! Record types shared across the netplane network services.
//!
//! ## Design Principles
//!
//! - Records mirror what the address ledger stores; this crate holds no
//!   behavior beyond parsing and display
//! - Tenant and instance identifiers are opaque: their lifecycles are owned
//!   by other systems
//! - The topology kind is a closed set; unknown kinds are rejected at the
//!   edge, never defaulted past the documented substitution rule
//!
//! ## Records
//!
//! - [`Network`]: a tenant's network segment and its host assignment
//! - [`FixedIp`]: a private address drawn from a network's pool
//! - [`FloatingIp`]: a public address, NAT-associated with a fixed address

mod error;
mod types;

pub use error::ModelError;
pub use types::*;
