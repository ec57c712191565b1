//! The listener (LDS) visitor.

use super::{socket_address, xds_config_source, HTTPS_LISTENER_NAME, HTTP_LISTENER_NAME};
use crate::dag::{self, Dag};
use xds_api::pb::envoy::config::{
    core::v3 as core,
    listener::v3::{filter, Filter, FilterChain, FilterChainMatch, Listener},
};
use xds_api::pb::envoy::extensions::{
    filters::{
        http::router::v3::Router,
        network::{
            http_connection_manager::v3::{
                self as hcm, HttpConnectionManager, HttpFilter,
            },
            tcp_proxy::v3 as tcp,
        },
    },
    transport_sockets::tls::v3::{CommonTlsContext, DownstreamTlsContext, SdsSecretConfig},
};
use xds_api::pb::google::protobuf::{Any, BoolValue};

const HTTP_ADDRESS: &str = "0.0.0.0";
const HTTP_PORT: u32 = 8080;
const HTTPS_PORT: u32 = 8443;

/// Emits the plain listener whenever any virtual host exists and the TLS
/// listener whenever any secure virtual host (or SNI passthrough proxy)
/// exists; an empty vhost set removes the respective listener.
pub fn visit(dag: &Dag) -> Vec<Listener> {
    let mut listeners = Vec::with_capacity(2);

    if !dag.virtual_hosts().is_empty() {
        listeners.push(Listener {
            name: HTTP_LISTENER_NAME.to_owned(),
            address: Some(socket_address(HTTP_ADDRESS, HTTP_PORT)),
            filter_chains: vec![FilterChain {
                filters: vec![http_connection_manager(HTTP_LISTENER_NAME)],
                ..Default::default()
            }],
            ..Default::default()
        });
    }

    // One filter chain per SNI server name; secure vhosts shadow any TCP
    // proxy claiming the same name.
    let mut chains = Vec::new();
    for vh in dag.secure_virtual_hosts() {
        chains.push(FilterChain {
            filter_chain_match: Some(FilterChainMatch {
                server_names: vec![vh.host.clone()],
                ..Default::default()
            }),
            transport_socket: Some(tls_transport_socket(&vh.secret)),
            filters: vec![http_connection_manager(HTTPS_LISTENER_NAME)],
            ..Default::default()
        });
    }
    for proxy in dag.tcp_proxies() {
        if dag.secure_virtual_hosts().iter().any(|vh| vh.host == proxy.host) {
            continue;
        }
        chains.push(FilterChain {
            filter_chain_match: Some(FilterChainMatch {
                server_names: vec![proxy.host.clone()],
                ..Default::default()
            }),
            filters: vec![tcp_proxy(proxy)],
            ..Default::default()
        });
    }
    if !chains.is_empty() {
        listeners.push(Listener {
            name: HTTPS_LISTENER_NAME.to_owned(),
            address: Some(socket_address(HTTP_ADDRESS, HTTPS_PORT)),
            filter_chains: chains,
            ..Default::default()
        });
    }

    listeners
}

fn http_connection_manager(name: &str) -> Filter {
    let router = Router::default();
    let manager = HttpConnectionManager {
        stat_prefix: name.to_owned(),
        route_specifier: Some(hcm::http_connection_manager::RouteSpecifier::Rds(hcm::Rds {
            config_source: Some(xds_config_source()),
            route_config_name: name.to_owned(),
        })),
        http_filters: vec![HttpFilter {
            name: "envoy.filters.http.router".to_owned(),
            config_type: Some(hcm::http_filter::ConfigType::TypedConfig(
                Any::from_msg(&router).expect("constructed invalid Router"),
            )),
            ..Default::default()
        }],
        use_remote_address: Some(BoolValue { value: true }),
        ..Default::default()
    };
    Filter {
        name: "envoy.filters.network.http_connection_manager".to_owned(),
        config_type: Some(filter::ConfigType::TypedConfig(
            Any::from_msg(&manager).expect("constructed invalid HttpConnectionManager"),
        )),
    }
}

fn tcp_proxy(proxy: &dag::TcpProxy) -> Filter {
    let cluster_specifier = if proxy.services.len() == 1 {
        tcp::tcp_proxy::ClusterSpecifier::Cluster(proxy.services[0].cluster_name())
    } else {
        tcp::tcp_proxy::ClusterSpecifier::WeightedClusters(tcp::tcp_proxy::WeightedCluster {
            clusters: proxy
                .services
                .iter()
                .map(|svc| tcp::tcp_proxy::weighted_cluster::ClusterWeight {
                    name: svc.cluster_name(),
                    weight: svc.weight,
                    ..Default::default()
                })
                .collect(),
        })
    };
    let config = tcp::TcpProxy {
        stat_prefix: HTTPS_LISTENER_NAME.to_owned(),
        cluster_specifier: Some(cluster_specifier),
        ..Default::default()
    };
    Filter {
        name: "envoy.filters.network.tcp_proxy".to_owned(),
        config_type: Some(filter::ConfigType::TypedConfig(
            Any::from_msg(&config).expect("constructed invalid TcpProxy"),
        )),
    }
}

fn tls_transport_socket(secret: &dag::Secret) -> core::TransportSocket {
    let context = DownstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            tls_certificate_sds_secret_configs: vec![SdsSecretConfig {
                name: secret.qualified_name(),
                sds_config: Some(xds_config_source()),
            }],
            ..Default::default()
        }),
        ..Default::default()
    };
    core::TransportSocket {
        name: "envoy.transport_sockets.tls".to_owned(),
        config_type: Some(core::transport_socket::ConfigType::TypedConfig(
            Any::from_msg(&context).expect("constructed invalid DownstreamTlsContext"),
        )),
    }
}
