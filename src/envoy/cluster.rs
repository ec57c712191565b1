//! The cluster (CDS) visitor.

use super::{duration, xds_config_source};
use crate::dag::{Dag, Service, Vertex};
use std::collections::BTreeMap;
use std::time::Duration;
use xds_api::pb::envoy::config::{
    cluster::v3::{
        cluster::{ClusterDiscoveryType, DiscoveryType, EdsClusterConfig, LbPolicy},
        Cluster,
    },
    core::v3 as core,
};
use xds_api::pb::google::protobuf::UInt32Value;

/// Fixed connection establishment timeout for upstream clusters.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Emits one EDS cluster per upstream service referenced anywhere in the
/// DAG. Services with named ports answer under the named form as well.
/// Duplicate names are suppressed, first occurrence wins.
pub fn visit(dag: &Dag) -> Vec<Cluster> {
    let mut services: Vec<&Service> = Vec::new();
    dag.visit(|vertex| match vertex {
        Vertex::VirtualHost(vh) => vh.visit(|v| {
            if let Vertex::Route(route) = v {
                route.visit(|v| {
                    if let Vertex::Service(svc) = v {
                        services.push(svc);
                    }
                });
            }
        }),
        Vertex::SecureVirtualHost(vh) => vh.visit(|v| {
            if let Vertex::Route(route) = v {
                route.visit(|v| {
                    if let Vertex::Service(svc) = v {
                        services.push(svc);
                    }
                });
            }
        }),
        Vertex::TcpProxy(tp) => tp.visit(|v| {
            if let Vertex::Service(svc) = v {
                services.push(svc);
            }
        }),
        _ => {}
    });

    let mut clusters: BTreeMap<String, Cluster> = BTreeMap::new();
    for svc in services {
        let name = svc.cluster_name();
        clusters
            .entry(name.clone())
            .or_insert_with(|| cluster(name, svc));
        if let Some(named) = svc.named_cluster_name() {
            clusters
                .entry(named.clone())
                .or_insert_with(|| cluster(named, svc));
        }
    }
    clusters.into_values().collect()
}

fn cluster(name: String, svc: &Service) -> Cluster {
    // The EDS service name equals the cluster name: the same triple yields
    // the same identifier on both sides of the protocol.
    let service_name = name.clone();
    Cluster {
        name,
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::Eds.into())),
        eds_cluster_config: Some(EdsClusterConfig {
            eds_config: Some(xds_config_source()),
            service_name,
        }),
        connect_timeout: Some(duration(CONNECT_TIMEOUT)),
        lb_policy: LbPolicy::RoundRobin.into(),
        health_checks: health_checks(svc),
        ..Default::default()
    }
}

fn health_checks(svc: &Service) -> Vec<core::HealthCheck> {
    let Some(path) = svc.health_check_path.as_deref() else {
        return Vec::new();
    };
    vec![core::HealthCheck {
        timeout: Some(duration(HEALTH_CHECK_TIMEOUT)),
        interval: Some(duration(HEALTH_CHECK_INTERVAL)),
        unhealthy_threshold: Some(UInt32Value { value: 3 }),
        healthy_threshold: Some(UInt32Value { value: 2 }),
        health_checker: Some(core::health_check::HealthChecker::HttpHealthCheck(
            core::health_check::HttpHealthCheck {
                path: path.to_owned(),
                ..Default::default()
            },
        )),
        ..Default::default()
    }]
}
