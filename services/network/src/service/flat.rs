//! Flat topology: a manually provisioned shared network.
//!
//! No dynamic provisioning happens anywhere in this path. Host assignment
//! records the static network parameters in the ledger and nothing else;
//! compute hosts need no setup because the network exists out-of-band.

use std::net::Ipv4Addr;

use async_trait::async_trait;

use netplane_model::{InstanceId, Network, NetworkUpdate, TenantId, TopologyKind};

use super::{allocate_from_pool, ServiceError, StepExt, Topology, TopologyContext};

pub struct FlatTopology;

#[async_trait]
impl Topology for FlatTopology {
    fn kind(&self) -> TopologyKind {
        TopologyKind::Flat
    }

    async fn on_host_assigned(
        &self,
        ctx: &TopologyContext<'_>,
        network: &Network,
    ) -> Result<(), ServiceError> {
        // Mark the network injected and copy the static parameters in.
        // Zero driver interaction for flat networks.
        let update = NetworkUpdate {
            kind: Some(TopologyKind::Flat),
            injected: Some(true),
            bridge: Some(ctx.config.flat_bridge.clone()),
            cidr: Some(ctx.config.flat_network.clone()),
            netmask: Some(ctx.config.flat_netmask),
            gateway: Some(ctx.config.flat_gateway),
            broadcast: Some(ctx.config.flat_broadcast),
            dns: Some(ctx.config.flat_dns),
        };
        ctx.ledger
            .update_network(&network.id, update)
            .await
            .step("write flat network parameters")
    }

    async fn setup_fixed_ip(
        &self,
        ctx: &TopologyContext<'_>,
        tenant: &TenantId,
        instance: &InstanceId,
    ) -> Result<Ipv4Addr, ServiceError> {
        allocate_from_pool(ctx, tenant, instance).await
    }

    async fn deallocate_fixed_ip(
        &self,
        ctx: &TopologyContext<'_>,
        address: Ipv4Addr,
    ) -> Result<(), ServiceError> {
        // Unconditional: no lease lifecycle on flat networks.
        ctx.ledger
            .deallocate_fixed_address(address)
            .await
            .step("deallocate fixed address")?;
        ctx.ledger
            .disassociate_fixed_instance(address)
            .await
            .step("disassociate fixed address")
    }

    async fn setup_compute_network(
        &self,
        _ctx: &TopologyContext<'_>,
        _network: &Network,
    ) -> Result<(), ServiceError> {
        // Network is created manually.
        Ok(())
    }
}
