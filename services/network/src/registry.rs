//! Topology resolution.
//!
//! Maps a topology identifier string to its [`TopologyKind`] and builds
//! the matching [`NetworkService`]. Pure lookup: the only permitted
//! fallback is substituting the configured default when the identifier is
//! unset; every other unknown identifier is rejected.

use std::sync::Arc;

use tracing::warn;

use netplane_model::{TenantId, TopologyKind};

use crate::config::Config;
use crate::driver::TopologyDriver;
use crate::ledger::AddressLedger;
use crate::service::{NetworkService, ServiceError, StepExt};

/// Resolve a topology identifier, substituting `default` when unset.
///
/// An empty string counts as unset. Unknown identifiers fail with
/// [`ServiceError::UnknownTopology`]; there is no silent fallthrough.
pub fn resolve_topology(
    identifier: Option<&str>,
    default: TopologyKind,
) -> Result<TopologyKind, ServiceError> {
    match identifier {
        None | Some("") => {
            warn!(%default, "network topology not set, using default");
            Ok(default)
        }
        Some(id) => id
            .parse()
            .map_err(|_| ServiceError::UnknownTopology(id.to_string())),
    }
}

/// Build the service matching a tenant's network record.
///
/// Resolves the tenant's network, then constructs the service for its
/// recorded topology kind.
pub async fn service_for_tenant(
    tenant: &TenantId,
    ledger: Arc<dyn AddressLedger>,
    driver: Arc<dyn TopologyDriver>,
    config: Config,
) -> Result<NetworkService, ServiceError> {
    let network = ledger
        .network_for_tenant(tenant)
        .await
        .step("read tenant network")?;
    NetworkService::for_kind(network.kind, ledger, driver, config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_identifiers() {
        assert_eq!(
            resolve_topology(Some("flat"), TopologyKind::Vlan).unwrap(),
            TopologyKind::Flat
        );
        assert_eq!(
            resolve_topology(Some("vlan"), TopologyKind::Flat).unwrap(),
            TopologyKind::Vlan
        );
    }

    #[test]
    fn substitutes_default_when_unset() {
        assert_eq!(
            resolve_topology(None, TopologyKind::Flat).unwrap(),
            TopologyKind::Flat
        );
        assert_eq!(
            resolve_topology(Some(""), TopologyKind::Vlan).unwrap(),
            TopologyKind::Vlan
        );
    }

    #[test]
    fn rejects_unknown_identifier() {
        let err = resolve_topology(Some("overlay"), TopologyKind::Flat).unwrap_err();
        assert!(matches!(err, ServiceError::UnknownTopology(id) if id == "overlay"));
    }
}
