//! Network lifecycle service.
//!
//! [`NetworkService`] implements the lifecycle operations shared by all
//! topologies (host assignment, fixed and floating address allocation,
//! floating association) once, against a [`Topology`] strategy that
//! supplies the topology-specific pieces (host-assignment hook, fixed-IP
//! setup and deallocation, compute-host setup).
//!
//! Ordering rules the operations follow:
//! - Ledger writes come before driver commands. A driver failure does not
//!   roll the ledger write back; a durable-but-unprovisioned state is
//!   preferred over a provisioned-but-unrecorded one, and retrying the
//!   operation is safe because driver commands are idempotent.
//! - No error advances address state past the failing step.

mod flat;
mod vlan;

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use netplane_model::{HostId, InstanceId, Network, TenantId, TopologyKind};

use crate::config::Config;
use crate::driver::{DriverError, TopologyDriver};
use crate::ledger::{AddressLedger, LedgerError};

pub use flat::FlatTopology;
pub use vlan::VlanTopology;

/// Lifecycle operation errors.
///
/// Collaborator failures propagate unchanged, tagged with the lifecycle
/// step that issued the failing call.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The topology identifier is not one of the supported kinds. Fatal
    /// to the request; not retried.
    #[error("unknown network topology: {0}")]
    UnknownTopology(String),

    /// A network record lacks a field its topology requires.
    #[error("network {network} is missing {field}")]
    MissingField {
        network: String,
        field: &'static str,
    },

    /// A ledger call failed.
    #[error("{step}: {source}")]
    Ledger {
        step: &'static str,
        #[source]
        source: LedgerError,
    },

    /// A driver command failed.
    #[error("{step}: {source}")]
    Driver {
        step: &'static str,
        #[source]
        source: DriverError,
    },
}

impl ServiceError {
    /// The address pool was empty. May be retried after capacity changes.
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            Self::Ledger {
                source: LedgerError::Exhausted { .. },
                ..
            }
        )
    }

    /// A precondition on a specific address was violated.
    pub fn is_not_allocated(&self) -> bool {
        matches!(
            self,
            Self::Ledger {
                source: LedgerError::NotAllocated(_),
                ..
            }
        )
    }

    /// The address still carries an association that must be cleared first.
    pub fn is_still_associated(&self) -> bool {
        matches!(
            self,
            Self::Ledger {
                source: LedgerError::StillAssociated(_),
                ..
            }
        )
    }

    /// The address is already bound elsewhere.
    pub fn is_already_allocated(&self) -> bool {
        matches!(
            self,
            Self::Ledger {
                source: LedgerError::AlreadyAllocated(_),
                ..
            }
        )
    }
}

/// Attaches the lifecycle step to a collaborator error.
pub(crate) trait StepExt<T> {
    fn step(self, step: &'static str) -> Result<T, ServiceError>;
}

impl<T> StepExt<T> for Result<T, LedgerError> {
    fn step(self, step: &'static str) -> Result<T, ServiceError> {
        self.map_err(|source| ServiceError::Ledger { step, source })
    }
}

impl<T> StepExt<T> for Result<T, DriverError> {
    fn step(self, step: &'static str) -> Result<T, ServiceError> {
        self.map_err(|source| ServiceError::Driver { step, source })
    }
}

/// Collaborators handed to topology hooks.
pub struct TopologyContext<'a> {
    pub ledger: &'a dyn AddressLedger,
    pub driver: &'a dyn TopologyDriver,
    pub config: &'a Config,
}

/// Topology-specific strategy behind [`NetworkService`].
#[async_trait]
pub trait Topology: Send + Sync {
    /// The kind this strategy realizes.
    fn kind(&self) -> TopologyKind;

    /// Called after this host is recorded as the network's owner.
    /// Performs whatever provisioning the host needs to serve the network.
    /// Must be idempotent; runs again on ownership-retained retries.
    async fn on_host_assigned(
        &self,
        ctx: &TopologyContext<'_>,
        network: &Network,
    ) -> Result<(), ServiceError>;

    /// Set up a fixed address for an instance.
    async fn setup_fixed_ip(
        &self,
        ctx: &TopologyContext<'_>,
        tenant: &TenantId,
        instance: &InstanceId,
    ) -> Result<Ipv4Addr, ServiceError>;

    /// Return a fixed address to the pool.
    async fn deallocate_fixed_ip(
        &self,
        ctx: &TopologyContext<'_>,
        address: Ipv4Addr,
    ) -> Result<(), ServiceError>;

    /// Prepare a compute-only host (not the network's host-of-record) to
    /// attach instances to the network.
    async fn setup_compute_network(
        &self,
        ctx: &TopologyContext<'_>,
        network: &Network,
    ) -> Result<(), ServiceError>;
}

/// Base allocation path: draw the next pool address for the tenant's
/// network and bind it to the instance. The ledger's allocation call is
/// the sole arbiter of uniqueness.
pub(crate) async fn allocate_from_pool(
    ctx: &TopologyContext<'_>,
    tenant: &TenantId,
    instance: &InstanceId,
) -> Result<Ipv4Addr, ServiceError> {
    let network = ctx
        .ledger
        .network_for_tenant(tenant)
        .await
        .step("read tenant network")?;
    let address = ctx
        .ledger
        .allocate_fixed_address(&network.id)
        .await
        .step("allocate fixed address")?;
    ctx.ledger
        .associate_fixed_instance(address, instance)
        .await
        .step("associate fixed address")?;
    debug!(%address, %instance, network = %network.id, "allocated fixed ip");
    Ok(address)
}

/// Topology-agnostic lifecycle operations over an injected strategy.
pub struct NetworkService {
    ledger: Arc<dyn AddressLedger>,
    driver: Arc<dyn TopologyDriver>,
    config: Config,
    topology: Box<dyn Topology>,
}

impl NetworkService {
    /// Build a service for a flat network.
    pub fn flat(
        ledger: Arc<dyn AddressLedger>,
        driver: Arc<dyn TopologyDriver>,
        config: Config,
    ) -> Self {
        Self {
            ledger,
            driver,
            config,
            topology: Box::new(FlatTopology),
        }
    }

    /// Build a service for a VLAN network.
    ///
    /// Bootstraps the ledger's network indexes for the configured maximum
    /// number of networks; idempotent across constructions.
    pub async fn vlan(
        ledger: Arc<dyn AddressLedger>,
        driver: Arc<dyn TopologyDriver>,
        config: Config,
    ) -> Result<Self, ServiceError> {
        let topology = VlanTopology::bootstrap(ledger.as_ref(), config.num_networks).await?;
        Ok(Self {
            ledger,
            driver,
            config,
            topology: Box::new(topology),
        })
    }

    /// Build a service for the given topology kind.
    pub async fn for_kind(
        kind: TopologyKind,
        ledger: Arc<dyn AddressLedger>,
        driver: Arc<dyn TopologyDriver>,
        config: Config,
    ) -> Result<Self, ServiceError> {
        match kind {
            TopologyKind::Flat => Ok(Self::flat(ledger, driver, config)),
            TopologyKind::Vlan => Self::vlan(ledger, driver, config).await,
        }
    }

    /// The topology kind this service realizes.
    pub fn kind(&self) -> TopologyKind {
        self.topology.kind()
    }

    fn context(&self) -> TopologyContext<'_> {
        TopologyContext {
            ledger: self.ledger.as_ref(),
            driver: self.driver.as_ref(),
            config: &self.config,
        }
    }

    /// Record this host as the owner of the tenant's network, then run the
    /// topology's provisioning hook.
    ///
    /// The ledger update is the serialization point: concurrent callers
    /// observe one owner. If the ledger update fails the hook never runs;
    /// if the hook fails, ownership stays recorded and the caller retries
    /// provisioning, not assignment.
    pub async fn assign_host(&self, tenant: &TenantId) -> Result<HostId, ServiceError> {
        let network = self
            .ledger
            .network_for_tenant(tenant)
            .await
            .step("read tenant network")?;
        let host = self
            .ledger
            .set_network_host(&network.id, &self.config.host)
            .await
            .step("set network host")?;
        self.topology
            .on_host_assigned(&self.context(), &network)
            .await?;
        Ok(host)
    }

    /// The host currently recorded for the tenant's network, if any.
    pub async fn host_for_tenant(&self, tenant: &TenantId) -> Result<Option<HostId>, ServiceError> {
        let network = self
            .ledger
            .network_for_tenant(tenant)
            .await
            .step("read tenant network")?;
        Ok(network.host)
    }

    /// Allocate the next fixed address from the tenant's pool and bind it
    /// to the instance.
    pub async fn allocate_fixed_ip(
        &self,
        tenant: &TenantId,
        instance: &InstanceId,
    ) -> Result<Ipv4Addr, ServiceError> {
        allocate_from_pool(&self.context(), tenant, instance).await
    }

    /// Set up a fixed address for an instance through the topology's path
    /// (VPN carve-out on VLAN networks, plain allocation otherwise).
    pub async fn setup_fixed_ip(
        &self,
        tenant: &TenantId,
        instance: &InstanceId,
    ) -> Result<Ipv4Addr, ServiceError> {
        self.topology
            .setup_fixed_ip(&self.context(), tenant, instance)
            .await
    }

    /// Return a fixed address to the pool through the topology's path.
    pub async fn deallocate_fixed_ip(&self, address: Ipv4Addr) -> Result<(), ServiceError> {
        self.topology
            .deallocate_fixed_ip(&self.context(), address)
            .await
    }

    /// Driver callback: the address now has an active lease.
    ///
    /// Only the VLAN DHCP bridge invokes this; flat networks have no lease
    /// lifecycle.
    pub async fn lease_fixed_ip(&self, address: Ipv4Addr) -> Result<(), ServiceError> {
        debug!(%address, "leasing fixed ip");
        self.ledger.lease_fixed(address).await.step("lease fixed ip")
    }

    /// Driver callback: the lease is gone. Returns the address to the pool
    /// and severs the instance binding. This is the only path that fully
    /// does so for a VLAN network.
    pub async fn release_fixed_ip(&self, address: Ipv4Addr) -> Result<(), ServiceError> {
        debug!(%address, "releasing fixed ip");
        self.ledger
            .release_fixed(address)
            .await
            .step("release fixed ip")?;
        self.ledger
            .disassociate_fixed_instance(address)
            .await
            .step("disassociate fixed ip")
    }

    /// Reserve a floating address for the tenant from this host's pool.
    pub async fn allocate_floating_ip(&self, tenant: &TenantId) -> Result<Ipv4Addr, ServiceError> {
        self.ledger
            .allocate_floating_address(&self.config.host, tenant)
            .await
            .step("allocate floating address")
    }

    /// Associate a floating address with a fixed address: record it, bind
    /// the floating address to this host, then establish forwarding.
    ///
    /// Both driver commands must succeed for the association to be
    /// externally effective. A failure between them leaves a
    /// bound-but-unforwarded address; the recorded association survives
    /// and the caller retries the operation.
    pub async fn associate_floating_ip(
        &self,
        floating: Ipv4Addr,
        fixed: Ipv4Addr,
    ) -> Result<(), ServiceError> {
        self.ledger
            .associate_floating_fixed(floating, fixed)
            .await
            .step("associate floating address")?;
        self.driver
            .bind_floating_ip(floating)
            .await
            .step("bind floating address")?;
        self.driver
            .ensure_floating_forward(floating, fixed)
            .await
            .step("ensure floating forward")?;
        debug!(%floating, %fixed, "associated floating ip");
        Ok(())
    }

    /// Clear a floating association, returning the fixed address it
    /// pointed at, then unbind and remove forwarding in that order.
    pub async fn disassociate_floating_ip(
        &self,
        floating: Ipv4Addr,
    ) -> Result<Ipv4Addr, ServiceError> {
        let fixed = self
            .ledger
            .disassociate_floating(floating)
            .await
            .step("disassociate floating address")?;
        self.driver
            .unbind_floating_ip(floating)
            .await
            .step("unbind floating address")?;
        self.driver
            .remove_floating_forward(floating, fixed)
            .await
            .step("remove floating forward")?;
        debug!(%floating, %fixed, "disassociated floating ip");
        Ok(fixed)
    }

    /// Return a floating address to the pool. Disassociation must already
    /// have happened; a still-associated address is rejected so the pool
    /// never hands out an address with live NAT state.
    pub async fn deallocate_floating_ip(&self, floating: Ipv4Addr) -> Result<(), ServiceError> {
        self.ledger
            .deallocate_floating_address(floating)
            .await
            .step("deallocate floating address")
    }

    /// Prepare this host to attach instances to the tenant's network.
    pub async fn setup_compute_network(&self, tenant: &TenantId) -> Result<(), ServiceError> {
        let network = self
            .ledger
            .network_for_tenant(tenant)
            .await
            .step("read tenant network")?;
        self.topology
            .setup_compute_network(&self.context(), &network)
            .await
    }
}
