//! The route configuration (RDS) visitor.

use super::{duration, HTTPS_LISTENER_NAME, HTTP_LISTENER_NAME};
use crate::dag::{self, Dag, RouteMatch, Timeout};
use crate::hashname::{hashname, MAX_NAME_LEN};
use std::time::Duration;
use xds_api::pb::envoy::config::route::v3 as xds_route;
use xds_api::pb::envoy::r#type::matcher::v3::{regex_matcher, RegexMatcher};
use xds_api::pb::google::protobuf::UInt32Value;

/// Emits the two route configurations, `ingress_http` and `ingress_https`.
/// Virtual hosts are listed sorted by name; within a virtual host, routes
/// follow the DAG order (longest prefix first).
pub fn visit(dag: &Dag) -> Vec<xds_route::RouteConfiguration> {
    let mut http: Vec<xds_route::VirtualHost> = dag
        .virtual_hosts()
        .iter()
        .map(|vh| virtual_host(&vh.host, &vh.routes, 80))
        .collect();
    http.sort_by(|a, b| a.name.cmp(&b.name));

    let mut https: Vec<xds_route::VirtualHost> = dag
        .secure_virtual_hosts()
        .iter()
        .map(|vh| virtual_host(&vh.host, &vh.routes, 443))
        .collect();
    https.sort_by(|a, b| a.name.cmp(&b.name));

    vec![
        xds_route::RouteConfiguration {
            name: HTTP_LISTENER_NAME.to_owned(),
            virtual_hosts: http,
            ..Default::default()
        },
        xds_route::RouteConfiguration {
            name: HTTPS_LISTENER_NAME.to_owned(),
            virtual_hosts: https,
            ..Default::default()
        },
    ]
}

fn virtual_host(host: &str, routes: &[dag::Route], port: u16) -> xds_route::VirtualHost {
    let mut domains = vec![host.to_owned()];
    if host != "*" {
        domains.push(format!("{}:{}", host, port));
    }
    xds_route::VirtualHost {
        name: hashname(MAX_NAME_LEN, &[host]),
        domains,
        routes: routes.iter().map(route).collect(),
        ..Default::default()
    }
}

fn route(route: &dag::Route) -> xds_route::Route {
    xds_route::Route {
        r#match: Some(route_match(&route.matching)),
        action: Some(action(route)),
        ..Default::default()
    }
}

fn route_match(matching: &RouteMatch) -> xds_route::RouteMatch {
    let path_specifier = match matching {
        RouteMatch::Prefix(prefix) => {
            xds_route::route_match::PathSpecifier::Prefix(prefix.clone())
        }
        RouteMatch::Regex(regex) => {
            xds_route::route_match::PathSpecifier::SafeRegex(RegexMatcher {
                engine_type: Some(regex_matcher::EngineType::GoogleRe2(
                    regex_matcher::GoogleRe2::default(),
                )),
                regex: regex.clone(),
            })
        }
    };
    xds_route::RouteMatch {
        path_specifier: Some(path_specifier),
        ..Default::default()
    }
}

fn action(route: &dag::Route) -> xds_route::route::Action {
    if route.https_upgrade {
        // 301 redirect to the https scheme in place of a cluster action.
        return xds_route::route::Action::Redirect(xds_route::RedirectAction {
            scheme_rewrite_specifier: Some(
                xds_route::redirect_action::SchemeRewriteSpecifier::HttpsRedirect(true),
            ),
            ..Default::default()
        });
    }

    let cluster_specifier = if route.services.len() == 1 {
        xds_route::route_action::ClusterSpecifier::Cluster(route.services[0].cluster_name())
    } else {
        // Weight is preserved in declaration order.
        xds_route::route_action::ClusterSpecifier::WeightedClusters(
            xds_route::WeightedCluster {
                clusters: route
                    .services
                    .iter()
                    .map(|svc| xds_route::weighted_cluster::ClusterWeight {
                        name: svc.cluster_name(),
                        weight: Some(UInt32Value { value: svc.weight }),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            },
        )
    };

    let mut action = xds_route::RouteAction {
        cluster_specifier: Some(cluster_specifier),
        ..Default::default()
    };
    match route.timeout {
        Timeout::Unset => {}
        // A zero wire duration tells the proxy "never time out".
        Timeout::Infinite => action.timeout = Some(duration(Duration::ZERO)),
        Timeout::Finite(d) => action.timeout = Some(duration(d)),
    }
    if route.websocket {
        action.upgrade_configs = vec![xds_route::route_action::UpgradeConfig {
            upgrade_type: "websocket".to_owned(),
            ..Default::default()
        }];
    }
    xds_route::route::Action::Route(action)
}
