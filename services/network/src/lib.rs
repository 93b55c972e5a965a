//! netplane network service
//!
//! Assigns network resources to compute instances: decides which
//! control-plane host serves a tenant's network, allocates and reclaims
//! fixed (private) addresses, and manages floating (public) addresses and
//! their NAT associations.
//!
//! Two topologies are supported behind one interface:
//! - **Flat**: a manually provisioned shared network; host assignment only
//!   records static parameters.
//! - **Vlan**: per-tenant VLAN bridges with DHCP leases and a reserved VPN
//!   endpoint address per network.
//!
//! The service itself holds no state and no locks. The address ledger
//! ([`ledger::AddressLedger`]) is the single source of truth for pools and
//! host assignment, and its atomic updates provide all mutual exclusion;
//! the topology driver ([`driver::TopologyDriver`]) realizes host-visible
//! configuration through idempotent ensure/remove commands. Both are
//! injected at construction so they can be substituted in tests.

pub mod config;
pub mod driver;
pub mod ledger;
pub mod registry;
pub mod service;

pub use config::Config;
pub use driver::{DriverCall, DriverError, MockDriver, TopologyDriver};
pub use ledger::{AddressLedger, LedgerError, MemoryLedger};
pub use registry::{resolve_topology, service_for_tenant};
pub use service::{
    FlatTopology, NetworkService, ServiceError, Topology, TopologyContext, VlanTopology,
};
