//! Topology driver interface and recording mock.
//!
//! The driver realizes network state on a host: VLAN bridges, VPN
//! forwarding, floating IP binding and NAT rules. Every operation has
//! ensure/remove semantics and is idempotent, so a caller that hits a
//! failure can retry the whole lifecycle operation safely. The service
//! never interprets driver state, only success or failure.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Driver command errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// A driver command failed on the host.
    #[error("driver command {op} failed: {reason}")]
    CommandFailed { op: &'static str, reason: String },
}

/// Host-side network configuration commands.
#[async_trait]
pub trait TopologyDriver: Send + Sync {
    /// Ensure the VLAN interface and bridge exist on this host.
    async fn ensure_vlan_bridge(&self, vlan: u16, bridge: &str) -> Result<(), DriverError>;

    /// Ensure forwarding from the VPN public endpoint to the in-network
    /// VPN address.
    async fn ensure_vlan_forward(
        &self,
        public_ip: Ipv4Addr,
        public_port: u16,
        private_ip: Ipv4Addr,
    ) -> Result<(), DriverError>;

    /// Bind a floating address to this host.
    async fn bind_floating_ip(&self, address: Ipv4Addr) -> Result<(), DriverError>;

    /// Unbind a floating address from this host.
    async fn unbind_floating_ip(&self, address: Ipv4Addr) -> Result<(), DriverError>;

    /// Ensure NAT forwarding from a floating address to a fixed address.
    async fn ensure_floating_forward(
        &self,
        floating: Ipv4Addr,
        fixed: Ipv4Addr,
    ) -> Result<(), DriverError>;

    /// Remove NAT forwarding from a floating address to a fixed address.
    async fn remove_floating_forward(
        &self,
        floating: Ipv4Addr,
        fixed: Ipv4Addr,
    ) -> Result<(), DriverError>;
}

/// A driver command as observed by [`MockDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    EnsureVlanBridge {
        vlan: u16,
        bridge: String,
    },
    EnsureVlanForward {
        public_ip: Ipv4Addr,
        public_port: u16,
        private_ip: Ipv4Addr,
    },
    BindFloatingIp(Ipv4Addr),
    UnbindFloatingIp(Ipv4Addr),
    EnsureFloatingForward {
        floating: Ipv4Addr,
        fixed: Ipv4Addr,
    },
    RemoveFloatingForward {
        floating: Ipv4Addr,
        fixed: Ipv4Addr,
    },
}

/// Mock driver for testing and development.
///
/// Records every command in order; can be configured to fail all commands
/// to exercise partial-failure paths.
#[derive(Default)]
pub struct MockDriver {
    calls: Mutex<Vec<DriverCall>>,
    fail: bool,
}

impl MockDriver {
    /// Create a mock driver where every command succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock driver where every command fails.
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// The commands issued so far, in order.
    pub async fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, op: &'static str, call: DriverCall) -> Result<(), DriverError> {
        if self.fail {
            return Err(DriverError::CommandFailed {
                op,
                reason: "mock driver configured to fail".to_string(),
            });
        }
        debug!(?call, "[MOCK] driver command");
        self.calls.lock().await.push(call);
        Ok(())
    }
}

#[async_trait]
impl TopologyDriver for MockDriver {
    async fn ensure_vlan_bridge(&self, vlan: u16, bridge: &str) -> Result<(), DriverError> {
        self.record(
            "ensure_vlan_bridge",
            DriverCall::EnsureVlanBridge {
                vlan,
                bridge: bridge.to_string(),
            },
        )
        .await
    }

    async fn ensure_vlan_forward(
        &self,
        public_ip: Ipv4Addr,
        public_port: u16,
        private_ip: Ipv4Addr,
    ) -> Result<(), DriverError> {
        self.record(
            "ensure_vlan_forward",
            DriverCall::EnsureVlanForward {
                public_ip,
                public_port,
                private_ip,
            },
        )
        .await
    }

    async fn bind_floating_ip(&self, address: Ipv4Addr) -> Result<(), DriverError> {
        self.record("bind_floating_ip", DriverCall::BindFloatingIp(address))
            .await
    }

    async fn unbind_floating_ip(&self, address: Ipv4Addr) -> Result<(), DriverError> {
        self.record("unbind_floating_ip", DriverCall::UnbindFloatingIp(address))
            .await
    }

    async fn ensure_floating_forward(
        &self,
        floating: Ipv4Addr,
        fixed: Ipv4Addr,
    ) -> Result<(), DriverError> {
        self.record(
            "ensure_floating_forward",
            DriverCall::EnsureFloatingForward { floating, fixed },
        )
        .await
    }

    async fn remove_floating_forward(
        &self,
        floating: Ipv4Addr,
        fixed: Ipv4Addr,
    ) -> Result<(), DriverError> {
        self.record(
            "remove_floating_forward",
            DriverCall::RemoveFloatingForward { floating, fixed },
        )
        .await
    }
}
