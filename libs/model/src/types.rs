//! Record definitions for networks and addresses.
//!
//! Addresses are held as [`Ipv4Addr`] rather than strings so malformed
//! addresses cannot enter the system past the ledger boundary.

use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Defines an opaque string identifier type.
///
/// Tenant and instance identifiers are owned by other systems; netplane
/// only carries them, so a validated wrapper over `String` is enough.
macro_rules! define_opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_opaque_id!(
    /// Tenant owning a network and its addresses.
    TenantId
);
define_opaque_id!(
    /// Compute instance an address is bound to. Lifecycle owned elsewhere.
    InstanceId
);
define_opaque_id!(
    /// Ledger key for a network record.
    NetworkId
);
define_opaque_id!(
    /// Control-plane host that can serve networks.
    HostId
);

/// Network topology kind.
///
/// Closed set: anything outside `flat`/`vlan` is rejected when parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    /// Static, pre-provisioned network shared by all tenants.
    Flat,
    /// Per-tenant VLAN bridge with DHCP leases and VPN access.
    Vlan,
}

impl TopologyKind {
    /// Returns the wire identifier for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Vlan => "vlan",
        }
    }
}

impl FromStr for TopologyKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(Self::Flat),
            "vlan" => Ok(Self::Vlan),
            other => Err(ModelError::UnknownTopology(other.to_string())),
        }
    }
}

impl std::fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tenant's network segment as recorded in the address ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    /// Ledger key.
    pub id: NetworkId,

    /// Owning tenant.
    pub tenant: TenantId,

    /// Topology kind realizing this network.
    pub kind: TopologyKind,

    /// Control-plane host currently responsible, if any.
    ///
    /// At most one host at a time; the ledger's `set_network_host` is the
    /// single writer.
    pub host: Option<HostId>,

    /// Whether static parameters have been injected (flat topology).
    pub injected: bool,

    /// VLAN tag (vlan topology only).
    pub vlan: Option<u16>,

    /// Bridge device name on the serving host.
    pub bridge: String,

    /// Network address in CIDR notation.
    pub cidr: String,

    /// Subnet mask.
    pub netmask: Ipv4Addr,

    /// Gateway address.
    pub gateway: Ipv4Addr,

    /// Broadcast address.
    pub broadcast: Ipv4Addr,

    /// DNS resolver handed to instances.
    pub dns: Ipv4Addr,

    /// Public address the tenant's VPN endpoint is reachable at.
    pub vpn_public_ip: Option<Ipv4Addr>,

    /// Public port forwarded to the VPN endpoint.
    pub vpn_public_port: Option<u16>,

    /// Reserved in-network address for the VPN endpoint. Never drawn from
    /// the dynamic pool.
    pub vpn_private_ip: Option<Ipv4Addr>,
}

/// Partial update applied to a network record.
///
/// `None` fields are left untouched by the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkUpdate {
    pub kind: Option<TopologyKind>,
    pub injected: Option<bool>,
    pub bridge: Option<String>,
    pub cidr: Option<String>,
    pub netmask: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub broadcast: Option<Ipv4Addr>,
    pub dns: Option<Ipv4Addr>,
}

/// A private address drawn from a network's pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedIp {
    /// The address itself.
    pub address: Ipv4Addr,

    /// Network whose pool this address belongs to.
    pub network_id: NetworkId,

    /// Instance the address is bound to, if any. At most one at a time.
    pub instance: Option<InstanceId>,

    /// Whether the address is allocated out of the pool.
    pub allocated: bool,

    /// Reserved addresses (the network's VPN endpoint) are never drawn by
    /// dynamic pool allocation.
    pub reserved: bool,

    /// Whether the driver has confirmed an active lease.
    ///
    /// A leased address cannot be fully deallocated; it must transition
    /// through release first.
    pub leased: bool,

    /// When the address was last allocated.
    pub allocated_at: Option<DateTime<Utc>>,
}

/// A public address that can be NAT-associated with a fixed address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatingIp {
    /// The address itself.
    pub address: Ipv4Addr,

    /// Host whose pool the address belongs to.
    pub host: HostId,

    /// Tenant the address is reserved for once allocated.
    pub tenant: Option<TenantId>,

    /// Fixed address this floating address forwards to, if associated.
    /// At most one at a time; disassociation must precede deallocation.
    pub fixed_address: Option<Ipv4Addr>,

    /// When the address was last allocated.
    pub allocated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_kind_round_trips() {
        assert_eq!("flat".parse::<TopologyKind>().unwrap(), TopologyKind::Flat);
        assert_eq!("vlan".parse::<TopologyKind>().unwrap(), TopologyKind::Vlan);
        assert_eq!(TopologyKind::Flat.as_str(), "flat");
        assert_eq!(TopologyKind::Vlan.as_str(), "vlan");
    }

    #[test]
    fn topology_kind_rejects_unknown() {
        let err = "overlay".parse::<TopologyKind>().unwrap_err();
        assert_eq!(err, ModelError::UnknownTopology("overlay".to_string()));
    }

    #[test]
    fn opaque_ids_display_raw() {
        let tenant = TenantId::from("tenant-a");
        assert_eq!(tenant.to_string(), "tenant-a");
        assert_eq!(tenant.as_str(), "tenant-a");
    }
}
