//! Service configuration.
//!
//! Loaded from `NETPLANE_*` environment variables with defaults suitable
//! for development. Flat-network parameters are what the flat topology
//! writes into the ledger on host assignment.

use std::net::Ipv4Addr;

use thiserror::Error;

use netplane_model::{HostId, TopologyKind};

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable did not parse as the expected type.
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of the host this service runs on. Host assignment and
    /// floating allocation are made on behalf of this host.
    pub host: HostId,

    /// Topology substituted when a network record carries none.
    pub default_topology: TopologyKind,

    /// Bridge for flat network instances.
    pub flat_bridge: String,

    /// Flat network address block (CIDR).
    pub flat_network: String,

    /// Netmask for the flat network.
    pub flat_netmask: Ipv4Addr,

    /// Gateway for the flat network.
    pub flat_gateway: Ipv4Addr,

    /// Broadcast address for the flat network.
    pub flat_broadcast: Ipv4Addr,

    /// DNS resolver for the flat network.
    pub flat_dns: Ipv4Addr,

    /// Number of networks the VLAN index bootstrap covers.
    pub num_networks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: HostId::from("netplane-dev"),
            default_topology: TopologyKind::Flat,
            flat_bridge: "br100".to_string(),
            flat_network: "192.168.0.0/24".to_string(),
            flat_netmask: Ipv4Addr::new(255, 255, 255, 0),
            flat_gateway: Ipv4Addr::new(192, 168, 0, 1),
            flat_broadcast: Ipv4Addr::new(192, 168, 0, 255),
            flat_dns: Ipv4Addr::new(8, 8, 4, 4),
            num_networks: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = std::env::var("NETPLANE_HOST")
            .map(HostId::from)
            .unwrap_or(defaults.host);

        let default_topology = match std::env::var("NETPLANE_NETWORK_TYPE") {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    var: "NETPLANE_NETWORK_TYPE",
                    value,
                })?,
            Err(_) => defaults.default_topology,
        };

        let flat_bridge =
            std::env::var("NETPLANE_FLAT_BRIDGE").unwrap_or(defaults.flat_bridge);
        let flat_network =
            std::env::var("NETPLANE_FLAT_NETWORK").unwrap_or(defaults.flat_network);

        let flat_netmask = env_addr("NETPLANE_FLAT_NETMASK", defaults.flat_netmask)?;
        let flat_gateway = env_addr("NETPLANE_FLAT_GATEWAY", defaults.flat_gateway)?;
        let flat_broadcast = env_addr("NETPLANE_FLAT_BROADCAST", defaults.flat_broadcast)?;
        let flat_dns = env_addr("NETPLANE_FLAT_DNS", defaults.flat_dns)?;

        let num_networks = match std::env::var("NETPLANE_NUM_NETWORKS") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                var: "NETPLANE_NUM_NETWORKS",
                value,
            })?,
            Err(_) => defaults.num_networks,
        };

        Ok(Self {
            host,
            default_topology,
            flat_bridge,
            flat_network,
            flat_netmask,
            flat_gateway,
            flat_broadcast,
            flat_dns,
            num_networks,
        })
    }
}

fn env_addr(var: &'static str, default: Ipv4Addr) -> Result<Ipv4Addr, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_flat_network_conventions() {
        let config = Config::default();
        assert_eq!(config.flat_bridge, "br100");
        assert_eq!(config.flat_netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(config.flat_gateway, Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(config.default_topology, TopologyKind::Flat);
        assert_eq!(config.num_networks, 1000);
    }

    // Each test uses its own variable name so they can run in parallel
    // without stepping on the process environment.
    #[test]
    fn env_addr_rejects_unparseable_value() {
        std::env::set_var("NETPLANE_TEST_BAD_GATEWAY", "not-an-address");
        let err = env_addr("NETPLANE_TEST_BAD_GATEWAY", Ipv4Addr::new(192, 168, 0, 1))
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { var, value } => {
                assert_eq!(var, "NETPLANE_TEST_BAD_GATEWAY");
                assert_eq!(value, "not-an-address");
            }
        }
        std::env::remove_var("NETPLANE_TEST_BAD_GATEWAY");
    }

    #[test]
    fn env_addr_parses_set_value() {
        std::env::set_var("NETPLANE_TEST_GOOD_DNS", "1.1.1.1");
        let addr =
            env_addr("NETPLANE_TEST_GOOD_DNS", Ipv4Addr::new(8, 8, 4, 4)).unwrap();
        assert_eq!(addr, Ipv4Addr::new(1, 1, 1, 1));
        std::env::remove_var("NETPLANE_TEST_GOOD_DNS");
    }

    #[test]
    fn env_addr_falls_back_to_default_when_unset() {
        let addr =
            env_addr("NETPLANE_TEST_UNSET_ADDR", Ipv4Addr::new(8, 8, 4, 4)).unwrap();
        assert_eq!(addr, Ipv4Addr::new(8, 8, 4, 4));
    }
}
