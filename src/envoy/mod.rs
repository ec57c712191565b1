//! Envoy resource construction.
//!
//! Four pure visitors walk the DAG (or, for endpoints, the raw object cache)
//! and produce fresh collections of the four xDS resource kinds. The bundle
//! of [`Caches`] they feed is shared with the discovery server.

pub mod bootstrap;
pub mod cluster;
pub mod endpoint;
pub mod listener;
pub mod route;

use crate::cache::{Cache, Resource};
use std::sync::Arc;
use xds_api::pb::envoy::config::{
    cluster::v3::Cluster,
    core::v3 as core,
    endpoint::v3::ClusterLoadAssignment,
    listener::v3::Listener,
    route::v3::RouteConfiguration,
};
use xds_api::pb::google::protobuf;

/// The HTTP listener and its route configuration share this name.
pub const HTTP_LISTENER_NAME: &str = "ingress_http";
/// The HTTPS listener and its route configuration share this name.
pub const HTTPS_LISTENER_NAME: &str = "ingress_https";

/// The bootstrap cluster Envoy reaches this management server through.
pub(crate) const XDS_CLUSTER_NAME: &str = "xds_cluster";

impl Resource for Cluster {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Resource for ClusterLoadAssignment {
    fn name(&self) -> &str {
        &self.cluster_name
    }
}

impl Resource for Listener {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Resource for RouteConfiguration {
    fn name(&self) -> &str {
        &self.name
    }
}

/// The four resource tables the visitors fill and the discovery server
/// serves.
#[derive(Clone, Default)]
pub struct Caches {
    pub clusters: Arc<Cache<Cluster>>,
    pub endpoints: Arc<Cache<ClusterLoadAssignment>>,
    pub listeners: Arc<Cache<Listener>>,
    pub routes: Arc<Cache<RouteConfiguration>>,
}

/// A config source directing the proxy back at this management server for
/// EDS, RDS, and SDS subscriptions.
pub(crate) fn xds_config_source() -> core::ConfigSource {
    core::ConfigSource {
        resource_api_version: core::ApiVersion::V3.into(),
        config_source_specifier: Some(core::config_source::ConfigSourceSpecifier::ApiConfigSource(
            core::ApiConfigSource {
                api_type: core::api_config_source::ApiType::Grpc.into(),
                transport_api_version: core::ApiVersion::V3.into(),
                grpc_services: vec![core::GrpcService {
                    target_specifier: Some(core::grpc_service::TargetSpecifier::EnvoyGrpc(
                        core::grpc_service::EnvoyGrpc {
                            cluster_name: XDS_CLUSTER_NAME.to_owned(),
                            ..Default::default()
                        },
                    )),
                    ..Default::default()
                }],
                ..Default::default()
            },
        )),
        ..Default::default()
    }
}

pub(crate) fn duration(d: std::time::Duration) -> protobuf::Duration {
    protobuf::Duration {
        seconds: d.as_secs() as i64,
        nanos: d.subsec_nanos() as i32,
    }
}

pub(crate) fn socket_address(address: &str, port: u32) -> core::Address {
    core::Address {
        address: Some(core::address::Address::SocketAddress(core::SocketAddress {
            address: address.to_owned(),
            port_specifier: Some(core::socket_address::PortSpecifier::PortValue(port)),
            ..Default::default()
        })),
    }
}
