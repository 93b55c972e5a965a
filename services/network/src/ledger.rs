//! Address ledger interface and in-memory implementation.
//!
//! The ledger is the authoritative record of networks, fixed IPs, floating
//! IPs, and instance associations. The service never caches its contents
//! across calls; every mutation is written as if concurrent callers may
//! race, and the ledger's update primitives provide the serialization
//! ("allocate next address" and "set host" are atomic there).
//!
//! [`MemoryLedger`] is a complete implementation over an in-process mutex.
//! It backs every test in this crate and is usable for development.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;

use netplane_model::{
    FixedIp, FloatingIp, HostId, InstanceId, Network, NetworkId, NetworkUpdate, TenantId,
};

/// Ledger operation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No network record matched the lookup.
    #[error("network not found: {0}")]
    NetworkNotFound(String),

    /// No fixed IP record exists for the address.
    #[error("fixed ip not found: {0}")]
    FixedIpNotFound(Ipv4Addr),

    /// The address pool has no free addresses left.
    #[error("address pool exhausted: {pool}")]
    Exhausted { pool: String },

    /// The address is already bound to another instance.
    #[error("address already allocated: {0}")]
    AlreadyAllocated(Ipv4Addr),

    /// The address was never allocated (or never associated).
    #[error("address not allocated: {0}")]
    NotAllocated(Ipv4Addr),

    /// The address still carries a fixed association; disassociation must
    /// precede deallocation.
    #[error("address still associated: {0}")]
    StillAssociated(Ipv4Addr),

    /// The ledger could not be reached. Transient; callers may retry the
    /// whole lifecycle operation.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Authoritative store for networks and address pools.
///
/// All mutating operations are atomic per record. `set_network_host` and
/// the two `allocate_*` operations are the serialization points the
/// service relies on; implementations must make them first-writer-wins
/// and duplicate-free respectively.
#[async_trait]
pub trait AddressLedger: Send + Sync {
    /// Look up the network owned by a tenant.
    async fn network_for_tenant(&self, tenant: &TenantId) -> Result<Network, LedgerError>;

    /// Look up a network by its ledger key.
    async fn network_by_id(&self, id: &NetworkId) -> Result<Network, LedgerError>;

    /// Record `host` as the network's owner unless one is already recorded.
    ///
    /// Returns the host that is now authoritative, which is the existing
    /// owner when the network was already assigned.
    async fn set_network_host(&self, id: &NetworkId, host: &HostId) -> Result<HostId, LedgerError>;

    /// Apply a partial update to a network record.
    async fn update_network(&self, id: &NetworkId, update: NetworkUpdate)
        -> Result<(), LedgerError>;

    /// Draw the next free address from a network's fixed pool.
    async fn allocate_fixed_address(&self, network: &NetworkId) -> Result<Ipv4Addr, LedgerError>;

    /// Bind a fixed address to an instance.
    async fn associate_fixed_instance(
        &self,
        address: Ipv4Addr,
        instance: &InstanceId,
    ) -> Result<(), LedgerError>;

    /// Clear a fixed address's instance binding.
    async fn disassociate_fixed_instance(&self, address: Ipv4Addr) -> Result<(), LedgerError>;

    /// Return a fixed address to the pool. The lease flag and instance
    /// binding are left untouched; a still-leased address stays out of
    /// circulation until released.
    async fn deallocate_fixed_address(&self, address: Ipv4Addr) -> Result<(), LedgerError>;

    /// Read a fixed IP record.
    async fn fixed_by_address(&self, address: Ipv4Addr) -> Result<FixedIp, LedgerError>;

    /// Mark a fixed address as actively leased.
    async fn lease_fixed(&self, address: Ipv4Addr) -> Result<(), LedgerError>;

    /// Clear the lease flag and return the address to the pool.
    async fn release_fixed(&self, address: Ipv4Addr) -> Result<(), LedgerError>;

    /// Reserve a floating address from `host`'s pool for a tenant.
    async fn allocate_floating_address(
        &self,
        host: &HostId,
        tenant: &TenantId,
    ) -> Result<Ipv4Addr, LedgerError>;

    /// Record the floating-to-fixed association.
    async fn associate_floating_fixed(
        &self,
        floating: Ipv4Addr,
        fixed: Ipv4Addr,
    ) -> Result<(), LedgerError>;

    /// Clear the association, returning the fixed address it pointed at.
    async fn disassociate_floating(&self, floating: Ipv4Addr) -> Result<Ipv4Addr, LedgerError>;

    /// Return a floating address to the pool. Fails with `StillAssociated`
    /// until the association has been cleared, so a pooled address never
    /// carries a stale NAT binding.
    async fn deallocate_floating_address(&self, floating: Ipv4Addr) -> Result<(), LedgerError>;

    /// Ensure index structures exist for up to `max_networks` networks.
    /// Idempotent administrative bootstrap.
    async fn ensure_network_indexes(&self, max_networks: usize) -> Result<(), LedgerError>;

    /// Whether the instance is flagged as a VPN endpoint.
    async fn instance_is_vpn(&self, instance: &InstanceId) -> Result<bool, LedgerError>;

    /// The reserved VPN address for a network.
    async fn vpn_address_for_network(&self, id: &NetworkId) -> Result<Ipv4Addr, LedgerError>;
}

#[derive(Default)]
struct LedgerState {
    networks: HashMap<NetworkId, Network>,
    // BTreeMap so allocation order is deterministic (lowest address first).
    fixed: BTreeMap<Ipv4Addr, FixedIp>,
    floating: BTreeMap<Ipv4Addr, FloatingIp>,
    vpn_instances: HashSet<InstanceId>,
    indexed_networks: usize,
}

/// In-memory ledger with the contract's atomic semantics.
///
/// A single mutex serializes every operation, standing in for the
/// conditional-update semantics a durable ledger would provide.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a network record.
    pub async fn add_network(&self, network: Network) {
        let mut state = self.state.lock().await;
        state.networks.insert(network.id.clone(), network);
    }

    /// Seed unallocated fixed addresses into a network's pool.
    pub async fn add_fixed_range(&self, network: &NetworkId, addresses: &[Ipv4Addr]) {
        let mut state = self.state.lock().await;
        for &address in addresses {
            state.fixed.insert(
                address,
                FixedIp {
                    address,
                    network_id: network.clone(),
                    instance: None,
                    allocated: false,
                    reserved: false,
                    leased: false,
                    allocated_at: None,
                },
            );
        }
    }

    /// Seed unallocated floating addresses into a host's pool.
    pub async fn add_floating_range(&self, host: &HostId, addresses: &[Ipv4Addr]) {
        let mut state = self.state.lock().await;
        for &address in addresses {
            state.floating.insert(
                address,
                FloatingIp {
                    address,
                    host: host.clone(),
                    tenant: None,
                    fixed_address: None,
                    allocated_at: None,
                },
            );
        }
    }

    /// Seed a reserved address (the network's VPN endpoint). Reserved
    /// addresses can be associated but are never drawn by
    /// `allocate_fixed_address`.
    pub async fn add_reserved_fixed(&self, network: &NetworkId, address: Ipv4Addr) {
        let mut state = self.state.lock().await;
        state.fixed.insert(
            address,
            FixedIp {
                address,
                network_id: network.clone(),
                instance: None,
                allocated: false,
                reserved: true,
                leased: false,
                allocated_at: None,
            },
        );
    }

    /// Flag an instance as a VPN endpoint.
    pub async fn flag_vpn_instance(&self, instance: &InstanceId) {
        let mut state = self.state.lock().await;
        state.vpn_instances.insert(instance.clone());
    }

    /// Read a floating IP record, if present. Inspection helper for tests.
    pub async fn floating_by_address(&self, address: Ipv4Addr) -> Option<FloatingIp> {
        let state = self.state.lock().await;
        state.floating.get(&address).cloned()
    }

    /// Number of networks the index bootstrap has covered.
    pub async fn indexed_networks(&self) -> usize {
        self.state.lock().await.indexed_networks
    }
}

#[async_trait]
impl AddressLedger for MemoryLedger {
    async fn network_for_tenant(&self, tenant: &TenantId) -> Result<Network, LedgerError> {
        let state = self.state.lock().await;
        state
            .networks
            .values()
            .find(|n| &n.tenant == tenant)
            .cloned()
            .ok_or_else(|| LedgerError::NetworkNotFound(tenant.to_string()))
    }

    async fn network_by_id(&self, id: &NetworkId) -> Result<Network, LedgerError> {
        let state = self.state.lock().await;
        state
            .networks
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NetworkNotFound(id.to_string()))
    }

    async fn set_network_host(&self, id: &NetworkId, host: &HostId) -> Result<HostId, LedgerError> {
        let mut state = self.state.lock().await;
        let network = state
            .networks
            .get_mut(id)
            .ok_or_else(|| LedgerError::NetworkNotFound(id.to_string()))?;
        // First writer wins; later callers observe the recorded owner.
        match &network.host {
            Some(existing) => Ok(existing.clone()),
            None => {
                network.host = Some(host.clone());
                Ok(host.clone())
            }
        }
    }

    async fn update_network(
        &self,
        id: &NetworkId,
        update: NetworkUpdate,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let network = state
            .networks
            .get_mut(id)
            .ok_or_else(|| LedgerError::NetworkNotFound(id.to_string()))?;
        if let Some(kind) = update.kind {
            network.kind = kind;
        }
        if let Some(injected) = update.injected {
            network.injected = injected;
        }
        if let Some(bridge) = update.bridge {
            network.bridge = bridge;
        }
        if let Some(cidr) = update.cidr {
            network.cidr = cidr;
        }
        if let Some(netmask) = update.netmask {
            network.netmask = netmask;
        }
        if let Some(gateway) = update.gateway {
            network.gateway = gateway;
        }
        if let Some(broadcast) = update.broadcast {
            network.broadcast = broadcast;
        }
        if let Some(dns) = update.dns {
            network.dns = dns;
        }
        Ok(())
    }

    async fn allocate_fixed_address(&self, network: &NetworkId) -> Result<Ipv4Addr, LedgerError> {
        let mut state = self.state.lock().await;
        // A still-leased address stays out of circulation even though it
        // was returned to the pool's bookkeeping.
        let free = state
            .fixed
            .values_mut()
            .find(|ip| &ip.network_id == network && !ip.allocated && !ip.leased && !ip.reserved);
        match free {
            Some(ip) => {
                ip.allocated = true;
                ip.allocated_at = Some(Utc::now());
                Ok(ip.address)
            }
            None => Err(LedgerError::Exhausted {
                pool: network.to_string(),
            }),
        }
    }

    async fn associate_fixed_instance(
        &self,
        address: Ipv4Addr,
        instance: &InstanceId,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let ip = state
            .fixed
            .get_mut(&address)
            .ok_or(LedgerError::FixedIpNotFound(address))?;
        if let Some(existing) = &ip.instance {
            if existing != instance {
                return Err(LedgerError::AlreadyAllocated(address));
            }
        }
        ip.instance = Some(instance.clone());
        ip.allocated = true;
        if ip.allocated_at.is_none() {
            ip.allocated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn disassociate_fixed_instance(&self, address: Ipv4Addr) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let ip = state
            .fixed
            .get_mut(&address)
            .ok_or(LedgerError::FixedIpNotFound(address))?;
        ip.instance = None;
        Ok(())
    }

    async fn deallocate_fixed_address(&self, address: Ipv4Addr) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let ip = state
            .fixed
            .get_mut(&address)
            .ok_or(LedgerError::FixedIpNotFound(address))?;
        ip.allocated = false;
        ip.allocated_at = None;
        Ok(())
    }

    async fn fixed_by_address(&self, address: Ipv4Addr) -> Result<FixedIp, LedgerError> {
        let state = self.state.lock().await;
        state
            .fixed
            .get(&address)
            .cloned()
            .ok_or(LedgerError::FixedIpNotFound(address))
    }

    async fn lease_fixed(&self, address: Ipv4Addr) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let ip = state
            .fixed
            .get_mut(&address)
            .ok_or(LedgerError::FixedIpNotFound(address))?;
        ip.leased = true;
        Ok(())
    }

    async fn release_fixed(&self, address: Ipv4Addr) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let ip = state
            .fixed
            .get_mut(&address)
            .ok_or(LedgerError::FixedIpNotFound(address))?;
        ip.leased = false;
        ip.allocated = false;
        ip.allocated_at = None;
        Ok(())
    }

    async fn allocate_floating_address(
        &self,
        host: &HostId,
        tenant: &TenantId,
    ) -> Result<Ipv4Addr, LedgerError> {
        let mut state = self.state.lock().await;
        let free = state
            .floating
            .values_mut()
            .find(|ip| &ip.host == host && ip.tenant.is_none());
        match free {
            Some(ip) => {
                ip.tenant = Some(tenant.clone());
                ip.allocated_at = Some(Utc::now());
                Ok(ip.address)
            }
            None => Err(LedgerError::Exhausted {
                pool: host.to_string(),
            }),
        }
    }

    async fn associate_floating_fixed(
        &self,
        floating: Ipv4Addr,
        fixed: Ipv4Addr,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let ip = state
            .floating
            .get_mut(&floating)
            .ok_or(LedgerError::NotAllocated(floating))?;
        if ip.tenant.is_none() {
            return Err(LedgerError::NotAllocated(floating));
        }
        ip.fixed_address = Some(fixed);
        Ok(())
    }

    async fn disassociate_floating(&self, floating: Ipv4Addr) -> Result<Ipv4Addr, LedgerError> {
        let mut state = self.state.lock().await;
        let ip = state
            .floating
            .get_mut(&floating)
            .ok_or(LedgerError::NotAllocated(floating))?;
        ip.fixed_address
            .take()
            .ok_or(LedgerError::NotAllocated(floating))
    }

    async fn deallocate_floating_address(&self, floating: Ipv4Addr) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let ip = state
            .floating
            .get_mut(&floating)
            .ok_or(LedgerError::NotAllocated(floating))?;
        if ip.tenant.is_none() {
            return Err(LedgerError::NotAllocated(floating));
        }
        if ip.fixed_address.is_some() {
            return Err(LedgerError::StillAssociated(floating));
        }
        ip.tenant = None;
        ip.allocated_at = None;
        Ok(())
    }

    async fn ensure_network_indexes(&self, max_networks: usize) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if state.indexed_networks < max_networks {
            state.indexed_networks = max_networks;
        }
        Ok(())
    }

    async fn instance_is_vpn(&self, instance: &InstanceId) -> Result<bool, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.vpn_instances.contains(instance))
    }

    async fn vpn_address_for_network(&self, id: &NetworkId) -> Result<Ipv4Addr, LedgerError> {
        let state = self.state.lock().await;
        let network = state
            .networks
            .get(id)
            .ok_or_else(|| LedgerError::NetworkNotFound(id.to_string()))?;
        network
            .vpn_private_ip
            .ok_or_else(|| LedgerError::NetworkNotFound(format!("vpn address for {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netplane_model::TopologyKind;

    fn network(id: &str, tenant: &str) -> Network {
        Network {
            id: NetworkId::from(id),
            tenant: TenantId::from(tenant),
            kind: TopologyKind::Vlan,
            host: None,
            injected: false,
            vlan: Some(100),
            bridge: "br100".to_string(),
            cidr: "10.0.0.0/24".to_string(),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            broadcast: Ipv4Addr::new(10, 0, 0, 255),
            dns: Ipv4Addr::new(8, 8, 4, 4),
            vpn_public_ip: None,
            vpn_public_port: None,
            vpn_private_ip: None,
        }
    }

    #[tokio::test]
    async fn fixed_allocation_is_unique_until_exhausted() {
        let ledger = MemoryLedger::new();
        let net_id = NetworkId::from("net-1");
        ledger.add_network(network("net-1", "tenant-a")).await;
        ledger
            .add_fixed_range(
                &net_id,
                &[
                    Ipv4Addr::new(10, 0, 0, 2),
                    Ipv4Addr::new(10, 0, 0, 3),
                    Ipv4Addr::new(10, 0, 0, 4),
                ],
            )
            .await;

        let mut seen = Vec::new();
        for _ in 0..3 {
            let addr = ledger.allocate_fixed_address(&net_id).await.unwrap();
            assert!(!seen.contains(&addr));
            seen.push(addr);
        }

        let err = ledger.allocate_fixed_address(&net_id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn set_network_host_first_writer_wins() {
        let ledger = MemoryLedger::new();
        let net_id = NetworkId::from("net-1");
        ledger.add_network(network("net-1", "tenant-a")).await;

        let first = ledger
            .set_network_host(&net_id, &HostId::from("host-a"))
            .await
            .unwrap();
        let second = ledger
            .set_network_host(&net_id, &HostId::from("host-b"))
            .await
            .unwrap();

        assert_eq!(first, HostId::from("host-a"));
        assert_eq!(second, HostId::from("host-a"));
    }

    #[tokio::test]
    async fn leased_address_stays_out_of_circulation_after_deallocate() {
        let ledger = MemoryLedger::new();
        let net_id = NetworkId::from("net-1");
        let addr = Ipv4Addr::new(10, 0, 0, 2);
        ledger.add_network(network("net-1", "tenant-a")).await;
        ledger.add_fixed_range(&net_id, &[addr]).await;

        assert_eq!(ledger.allocate_fixed_address(&net_id).await.unwrap(), addr);
        ledger.lease_fixed(addr).await.unwrap();
        ledger.deallocate_fixed_address(addr).await.unwrap();

        // Deallocated but still leased: not re-allocatable yet.
        assert!(matches!(
            ledger.allocate_fixed_address(&net_id).await,
            Err(LedgerError::Exhausted { .. })
        ));

        ledger.release_fixed(addr).await.unwrap();
        assert_eq!(ledger.allocate_fixed_address(&net_id).await.unwrap(), addr);
    }

    #[tokio::test]
    async fn associate_fixed_rejects_second_instance() {
        let ledger = MemoryLedger::new();
        let net_id = NetworkId::from("net-1");
        let addr = Ipv4Addr::new(10, 0, 0, 2);
        ledger.add_network(network("net-1", "tenant-a")).await;
        ledger.add_fixed_range(&net_id, &[addr]).await;

        ledger
            .associate_fixed_instance(addr, &InstanceId::from("i-1"))
            .await
            .unwrap();
        let err = ledger
            .associate_fixed_instance(addr, &InstanceId::from("i-2"))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::AlreadyAllocated(addr));
    }

    #[tokio::test]
    async fn floating_errors_when_not_allocated() {
        let ledger = MemoryLedger::new();
        let host = HostId::from("host-a");
        let addr = Ipv4Addr::new(4, 4, 4, 10);
        ledger.add_floating_range(&host, &[addr]).await;

        assert_eq!(
            ledger.disassociate_floating(addr).await.unwrap_err(),
            LedgerError::NotAllocated(addr)
        );
        assert_eq!(
            ledger.deallocate_floating_address(addr).await.unwrap_err(),
            LedgerError::NotAllocated(addr)
        );
    }

    #[tokio::test]
    async fn floating_deallocate_rejects_live_association() {
        let ledger = MemoryLedger::new();
        let host = HostId::from("host-a");
        let floating = Ipv4Addr::new(4, 4, 4, 10);
        let fixed = Ipv4Addr::new(10, 0, 0, 2);
        ledger.add_floating_range(&host, &[floating]).await;

        ledger
            .allocate_floating_address(&host, &TenantId::from("tenant-a"))
            .await
            .unwrap();
        ledger.associate_floating_fixed(floating, fixed).await.unwrap();

        assert_eq!(
            ledger.deallocate_floating_address(floating).await.unwrap_err(),
            LedgerError::StillAssociated(floating)
        );

        // Clearing the association unblocks deallocation.
        assert_eq!(ledger.disassociate_floating(floating).await.unwrap(), fixed);
        ledger.deallocate_floating_address(floating).await.unwrap();
    }

    #[tokio::test]
    async fn ensure_network_indexes_is_idempotent() {
        let ledger = MemoryLedger::new();
        ledger.ensure_network_indexes(1000).await.unwrap();
        ledger.ensure_network_indexes(1000).await.unwrap();
        ledger.ensure_network_indexes(10).await.unwrap();
        assert_eq!(ledger.indexed_networks().await, 1000);
    }
}
