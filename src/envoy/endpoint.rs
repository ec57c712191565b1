//! The endpoint (EDS) visitor.

use crate::hashname::{hashname, MAX_NAME_LEN};
use crate::k8s::Endpoints;
use std::collections::BTreeMap;
use xds_api::pb::envoy::config::{core::v3 as core, endpoint::v3 as endpoint};

/// Emits one ClusterLoadAssignment per `(namespace, name, port)` of every
/// ready endpoint subset. Subsets without ready addresses are skipped. Named
/// subset ports additionally answer under the named form, so that both
/// cluster name forms resolve.
pub fn visit<'a>(
    endpoints: impl Iterator<Item = &'a Endpoints>,
) -> Vec<endpoint::ClusterLoadAssignment> {
    let mut assignments: BTreeMap<String, Vec<endpoint::LbEndpoint>> = BTreeMap::new();
    for ep in endpoints {
        let namespace = ep.metadata.namespace.as_deref().unwrap_or("default");
        let name = ep.metadata.name.as_deref().unwrap_or_default();
        for subset in ep.subsets.as_deref().unwrap_or_default() {
            // Only ready addresses count; not-ready subsets are invisible to
            // the data plane.
            let mut addresses: Vec<&str> = subset
                .addresses
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|a| a.ip.as_str())
                .collect();
            let ports = subset.ports.as_deref().unwrap_or_default();
            if addresses.is_empty() || ports.is_empty() {
                continue;
            }
            addresses.sort_unstable();

            for port in ports {
                let lb: Vec<endpoint::LbEndpoint> = addresses
                    .iter()
                    .map(|ip| lb_endpoint(ip, port.port as u32))
                    .collect();
                let numbered = hashname(
                    MAX_NAME_LEN,
                    &[namespace, name, &port.port.to_string()],
                );
                assignments
                    .entry(numbered)
                    .or_default()
                    .extend(lb.iter().cloned());
                if let Some(port_name) = port.name.as_deref().filter(|n| !n.is_empty()) {
                    let named = hashname(MAX_NAME_LEN, &[namespace, name, port_name]);
                    assignments.entry(named).or_default().extend(lb);
                }
            }
        }
    }

    assignments
        .into_iter()
        .map(|(cluster_name, lb_endpoints)| endpoint::ClusterLoadAssignment {
            cluster_name,
            endpoints: vec![endpoint::LocalityLbEndpoints {
                lb_endpoints,
                ..Default::default()
            }],
            ..Default::default()
        })
        .collect()
}

fn lb_endpoint(ip: &str, port: u32) -> endpoint::LbEndpoint {
    endpoint::LbEndpoint {
        host_identifier: Some(endpoint::lb_endpoint::HostIdentifier::Endpoint(
            endpoint::Endpoint {
                address: Some(core::Address {
                    address: Some(core::address::Address::SocketAddress(
                        core::SocketAddress {
                            address: ip.to_owned(),
                            port_specifier: Some(
                                core::socket_address::PortSpecifier::PortValue(port),
                            ),
                            ..Default::default()
                        },
                    )),
                }),
                ..Default::default()
            },
        )),
        ..Default::default()
    }
}
