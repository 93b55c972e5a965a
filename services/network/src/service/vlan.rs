//! VLAN topology: per-tenant bridges, DHCP leases, VPN carve-out.
//!
//! Fixed addresses on a VLAN network have a two-phase teardown: a DHCP
//! lease can outlive the instance's own deallocation request, so
//! deallocating a leased address only returns it to the pool's
//! bookkeeping and the instance binding survives until the driver reports
//! the lease released.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use tracing::debug;

use netplane_model::{InstanceId, Network, TenantId, TopologyKind};

use super::{allocate_from_pool, ServiceError, StepExt, Topology, TopologyContext};
use crate::ledger::AddressLedger;

pub struct VlanTopology;

impl VlanTopology {
    /// Bootstrap the ledger's index structures for up to `max_networks`
    /// networks. Idempotent; safe to run on every construction.
    pub async fn bootstrap(
        ledger: &dyn AddressLedger,
        max_networks: usize,
    ) -> Result<Self, ServiceError> {
        ledger
            .ensure_network_indexes(max_networks)
            .await
            .step("ensure network indexes")?;
        Ok(Self)
    }
}

#[async_trait]
impl Topology for VlanTopology {
    fn kind(&self) -> TopologyKind {
        TopologyKind::Vlan
    }

    async fn on_host_assigned(
        &self,
        ctx: &TopologyContext<'_>,
        network: &Network,
    ) -> Result<(), ServiceError> {
        // Re-read the record: another caller may have filled in the VLAN
        // parameters between the lookup and the ownership write.
        let network = ctx
            .ledger
            .network_by_id(&network.id)
            .await
            .step("read network")?;
        let vlan = network.vlan.ok_or_else(|| ServiceError::MissingField {
            network: network.id.to_string(),
            field: "vlan tag",
        })?;
        ctx.driver
            .ensure_vlan_bridge(vlan, &network.bridge)
            .await
            .step("ensure vlan bridge")
    }

    async fn setup_fixed_ip(
        &self,
        ctx: &TopologyContext<'_>,
        tenant: &TenantId,
        instance: &InstanceId,
    ) -> Result<Ipv4Addr, ServiceError> {
        let is_vpn = ctx
            .ledger
            .instance_is_vpn(instance)
            .await
            .step("check vpn flag")?;
        if !is_vpn {
            return allocate_from_pool(ctx, tenant, instance).await;
        }

        // VPN endpoints get the network's reserved address, never one from
        // the dynamic pool, so the endpoint stays at a well-known address.
        let network = ctx
            .ledger
            .network_for_tenant(tenant)
            .await
            .step("read tenant network")?;
        let address = ctx
            .ledger
            .vpn_address_for_network(&network.id)
            .await
            .step("read vpn address")?;
        debug!(%address, %instance, "allocating vpn ip");
        ctx.ledger
            .associate_fixed_instance(address, instance)
            .await
            .step("associate vpn address")?;

        let public_ip = network
            .vpn_public_ip
            .ok_or_else(|| ServiceError::MissingField {
                network: network.id.to_string(),
                field: "vpn public ip",
            })?;
        let public_port = network
            .vpn_public_port
            .ok_or_else(|| ServiceError::MissingField {
                network: network.id.to_string(),
                field: "vpn public port",
            })?;
        ctx.driver
            .ensure_vlan_forward(public_ip, public_port, address)
            .await
            .step("ensure vlan forward")?;
        Ok(address)
    }

    async fn deallocate_fixed_ip(
        &self,
        ctx: &TopologyContext<'_>,
        address: Ipv4Addr,
    ) -> Result<(), ServiceError> {
        let fixed = ctx
            .ledger
            .fixed_by_address(address)
            .await
            .step("read fixed ip")?;
        if fixed.leased {
            // The lease outlives the deallocation request: return the
            // address to pool bookkeeping but keep the instance binding
            // until the driver reports the lease released.
            debug!(%address, "deallocating leased fixed ip");
            ctx.ledger
                .deallocate_fixed_address(address)
                .await
                .step("deallocate fixed address")
        } else {
            debug!(%address, "releasing unleased fixed ip");
            ctx.ledger
                .release_fixed(address)
                .await
                .step("release fixed ip")?;
            ctx.ledger
                .disassociate_fixed_instance(address)
                .await
                .step("disassociate fixed ip")
        }
    }

    async fn setup_compute_network(
        &self,
        ctx: &TopologyContext<'_>,
        network: &Network,
    ) -> Result<(), ServiceError> {
        // Same bridge as the host-of-record, ensured locally so instances
        // on this host can attach.
        let vlan = network.vlan.ok_or_else(|| ServiceError::MissingField {
            network: network.id.to_string(),
            field: "vlan tag",
        })?;
        ctx.driver
            .ensure_vlan_bridge(vlan, &network.bridge)
            .await
            .step("ensure vlan bridge")
    }
}
