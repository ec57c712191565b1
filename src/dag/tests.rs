use super::*;
use crate::envoy;
use crate::k8s::{ingressroute, KubeObject};
use crate::status::StatusKind;
use k8s_openapi::api::core::v1 as core_v1;
use k8s_openapi::api::networking::v1 as net_v1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;

fn object_meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(namespace.to_owned()),
        name: Some(name.to_owned()),
        ..Default::default()
    }
}

fn service(namespace: &str, name: &str, ports: &[(Option<&str>, i32)]) -> KubeObject {
    KubeObject::Service(core_v1::Service {
        metadata: object_meta(namespace, name),
        spec: Some(core_v1::ServiceSpec {
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, port)| core_v1::ServicePort {
                        name: port_name.map(str::to_owned),
                        port: *port,
                        protocol: Some("TCP".to_owned()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn backend(name: &str, port: i32) -> net_v1::IngressBackend {
    net_v1::IngressBackend {
        service: Some(net_v1::IngressServiceBackend {
            name: name.to_owned(),
            port: Some(net_v1::ServiceBackendPort {
                number: Some(port),
                ..Default::default()
            }),
        }),
        ..Default::default()
    }
}

fn ingress(namespace: &str, name: &str, spec: net_v1::IngressSpec) -> KubeObject {
    KubeObject::Ingress(net_v1::Ingress {
        metadata: object_meta(namespace, name),
        spec: Some(spec),
        ..Default::default()
    })
}

fn ingress_with_annotations(
    namespace: &str,
    name: &str,
    spec: net_v1::IngressSpec,
    annotations: &[(&str, &str)],
) -> KubeObject {
    let mut meta = object_meta(namespace, name);
    meta.annotations = Some(
        annotations
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect(),
    );
    KubeObject::Ingress(net_v1::Ingress {
        metadata: meta,
        spec: Some(spec),
        ..Default::default()
    })
}

fn rule(host: Option<&str>, paths: &[(&str, &str, i32)]) -> net_v1::IngressRule {
    net_v1::IngressRule {
        host: host.map(str::to_owned),
        http: Some(net_v1::HTTPIngressRuleValue {
            paths: paths
                .iter()
                .map(|(path, svc, port)| net_v1::HTTPIngressPath {
                    path: Some((*path).to_owned()),
                    path_type: "Prefix".to_owned(),
                    backend: backend(svc, *port),
                })
                .collect(),
        }),
    }
}

fn tls_secret(namespace: &str, name: &str) -> KubeObject {
    KubeObject::Secret(core_v1::Secret {
        metadata: object_meta(namespace, name),
        data: Some(
            [
                ("tls.crt".to_owned(), ByteString(b"certificate".to_vec())),
                ("tls.key".to_owned(), ByteString(b"key".to_vec())),
            ]
            .into_iter()
            .collect(),
        ),
        ..Default::default()
    })
}

fn ingress_route(
    namespace: &str,
    name: &str,
    spec: ingressroute::IngressRouteSpec,
) -> KubeObject {
    let mut route = crate::k8s::IngressRoute::new(name, spec);
    route.metadata.namespace = Some(namespace.to_owned());
    KubeObject::IngressRoute(route)
}

fn route_to(prefix: &str, svc: &str, port: i32) -> ingressroute::Route {
    ingressroute::Route {
        match_prefix: prefix.to_owned(),
        services: vec![ingressroute::Service {
            name: svc.to_owned(),
            port,
            weight: None,
            health_check: None,
        }],
        delegate: None,
        enable_websockets: false,
    }
}

fn route_delegate(prefix: &str, name: &str, namespace: Option<&str>) -> ingressroute::Route {
    ingressroute::Route {
        match_prefix: prefix.to_owned(),
        services: vec![],
        delegate: Some(ingressroute::Delegate {
            name: name.to_owned(),
            namespace: namespace.map(str::to_owned),
        }),
        enable_websockets: false,
    }
}

fn root_spec(fqdn: &str, routes: Vec<ingressroute::Route>) -> ingressroute::IngressRouteSpec {
    ingressroute::IngressRouteSpec {
        virtualhost: Some(ingressroute::VirtualHost {
            fqdn: Some(fqdn.to_owned()),
            tls: None,
        }),
        routes,
        tcpproxy: None,
    }
}

fn delegate_spec(routes: Vec<ingressroute::Route>) -> ingressroute::IngressRouteSpec {
    ingressroute::IngressRouteSpec {
        virtualhost: None,
        routes,
        tcpproxy: None,
    }
}

fn status_of<'a>(builder: &'a Builder, namespace: &str, name: &str) -> &'a ObjectStatus {
    builder
        .dag()
        .statuses()
        .iter()
        .find(|s| s.meta == Meta::new(namespace, name))
        .unwrap_or_else(|| panic!("no status for {}/{}", namespace, name))
}

#[test]
fn default_backend_produces_wildcard_vhost() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 80)]));
    builder.insert(ingress(
        "default",
        "kuard",
        net_v1::IngressSpec {
            default_backend: Some(backend("kuard", 80)),
            ..Default::default()
        },
    ));
    builder.recompute();

    let dag = builder.dag();
    assert_eq!(dag.virtual_hosts().len(), 1);
    let vhost = &dag.virtual_hosts()[0];
    assert_eq!(vhost.host, "*");
    assert_eq!(vhost.routes.len(), 1);
    assert_eq!(vhost.routes[0].matching, RouteMatch::Prefix("/".to_owned()));
    assert_eq!(vhost.routes[0].services[0].cluster_name(), "default/kuard/80");
    assert!(dag.secure_virtual_hosts().is_empty());
}

#[test]
fn unresolvable_backend_drops_route_and_vhost() {
    let mut builder = Builder::default();
    builder.insert(ingress(
        "default",
        "kuard",
        net_v1::IngressSpec {
            default_backend: Some(backend("kuard", 80)),
            ..Default::default()
        },
    ));
    builder.recompute();
    assert!(builder.dag().virtual_hosts().is_empty());

    // The service arriving later heals the vhost.
    builder.insert(service("default", "kuard", &[(None, 80)]));
    builder.recompute();
    assert_eq!(builder.dag().virtual_hosts().len(), 1);
}

#[test]
fn editing_an_ingress_replaces_its_routes() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 80)]));
    let old = ingress(
        "default",
        "kuard",
        net_v1::IngressSpec {
            default_backend: Some(backend("kuard", 80)),
            ..Default::default()
        },
    );
    builder.insert(old.clone());
    builder.recompute();

    builder.remove(&old);
    builder.insert(ingress(
        "default",
        "kuard",
        net_v1::IngressSpec {
            rules: Some(vec![rule(None, &[("/testing", "kuard", 80)])]),
            ..Default::default()
        },
    ));
    builder.recompute();

    let vhost = &builder.dag().virtual_hosts()[0];
    assert_eq!(vhost.host, "*");
    assert_eq!(vhost.routes.len(), 1);
    assert_eq!(
        vhost.routes[0].matching,
        RouteMatch::Prefix("/testing".to_owned())
    );
}

#[test]
fn tls_ingress_emits_both_vhosts() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 8080)]));
    builder.insert(tls_secret("default", "secret"));
    builder.insert(ingress(
        "default",
        "simple",
        net_v1::IngressSpec {
            tls: Some(vec![net_v1::IngressTLS {
                hosts: Some(vec!["www.example.com".to_owned()]),
                secret_name: Some("secret".to_owned()),
            }]),
            rules: Some(vec![rule(
                Some("www.example.com"),
                &[("/", "kuard", 8080)],
            )]),
            ..Default::default()
        },
    ));
    builder.recompute();

    let dag = builder.dag();
    assert_eq!(dag.virtual_hosts().len(), 1);
    assert_eq!(dag.virtual_hosts()[0].host, "www.example.com");
    assert_eq!(dag.secure_virtual_hosts().len(), 1);
    let secure = &dag.secure_virtual_hosts()[0];
    assert_eq!(secure.host, "www.example.com");
    assert_eq!(secure.secret.qualified_name(), "default/secret");
    assert_eq!(secure.routes.len(), 1);
}

#[test]
fn allow_http_false_suppresses_the_plain_vhost() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 8080)]));
    builder.insert(tls_secret("default", "secret"));
    builder.insert(ingress_with_annotations(
        "default",
        "simple",
        net_v1::IngressSpec {
            tls: Some(vec![net_v1::IngressTLS {
                hosts: Some(vec!["www.example.com".to_owned()]),
                secret_name: Some("secret".to_owned()),
            }]),
            rules: Some(vec![rule(
                Some("www.example.com"),
                &[("/", "kuard", 8080)],
            )]),
            ..Default::default()
        },
        &[("kubernetes.io/ingress.allow-http", "false")],
    ));
    builder.recompute();

    let dag = builder.dag();
    assert!(dag.virtual_hosts().is_empty());
    assert_eq!(dag.secure_virtual_hosts().len(), 1);
}

#[test]
fn force_ssl_redirect_upgrades_plain_routes() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 8080)]));
    builder.insert(tls_secret("default", "secret"));
    builder.insert(ingress_with_annotations(
        "default",
        "simple",
        net_v1::IngressSpec {
            tls: Some(vec![net_v1::IngressTLS {
                hosts: Some(vec!["www.example.com".to_owned()]),
                secret_name: Some("secret".to_owned()),
            }]),
            rules: Some(vec![rule(
                Some("www.example.com"),
                &[("/", "kuard", 8080)],
            )]),
            ..Default::default()
        },
        &[("ingress.kubernetes.io/force-ssl-redirect", "true")],
    ));
    builder.recompute();

    let dag = builder.dag();
    assert!(dag.virtual_hosts()[0].routes[0].https_upgrade);
    // The secure side is never redirected.
    assert!(!dag.secure_virtual_hosts()[0].routes[0].https_upgrade);
}

#[test]
fn missing_secret_leaves_only_the_plain_vhost() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 8080)]));
    builder.insert(ingress(
        "default",
        "simple",
        net_v1::IngressSpec {
            tls: Some(vec![net_v1::IngressTLS {
                hosts: Some(vec!["www.example.com".to_owned()]),
                secret_name: Some("missing".to_owned()),
            }]),
            rules: Some(vec![rule(
                Some("www.example.com"),
                &[("/", "kuard", 8080)],
            )]),
            ..Default::default()
        },
    ));
    builder.recompute();

    let dag = builder.dag();
    assert_eq!(dag.virtual_hosts().len(), 1);
    assert!(dag.secure_virtual_hosts().is_empty());
    assert!(envoy::listener::visit(dag)
        .iter()
        .all(|l| l.name != envoy::HTTPS_LISTENER_NAME));
}

#[test]
fn secret_without_key_material_is_invalid() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 8080)]));
    builder.insert(KubeObject::Secret(core_v1::Secret {
        metadata: object_meta("default", "secret"),
        data: Some(
            [("tls.crt".to_owned(), ByteString(Vec::new()))]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    }));
    builder.insert(ingress(
        "default",
        "simple",
        net_v1::IngressSpec {
            tls: Some(vec![net_v1::IngressTLS {
                hosts: Some(vec!["www.example.com".to_owned()]),
                secret_name: Some("secret".to_owned()),
            }]),
            rules: Some(vec![rule(
                Some("www.example.com"),
                &[("/", "kuard", 8080)],
            )]),
            ..Default::default()
        },
    ));
    builder.recompute();
    assert!(builder.dag().secure_virtual_hosts().is_empty());
}

#[test]
fn mismatched_ingress_class_is_skipped() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 80)]));
    builder.insert(ingress_with_annotations(
        "default",
        "kuard",
        net_v1::IngressSpec {
            default_backend: Some(backend("kuard", 80)),
            ..Default::default()
        },
        &[("kubernetes.io/ingress.class", "nginx")],
    ));
    builder.recompute();
    assert!(builder.dag().virtual_hosts().is_empty());
}

#[test]
fn routes_sort_longest_prefix_first() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 80)]));
    builder.insert(ingress(
        "default",
        "kuard",
        net_v1::IngressSpec {
            rules: Some(vec![rule(
                Some("example.com"),
                &[
                    ("/", "kuard", 80),
                    ("/static/assets", "kuard", 80),
                    ("/testing", "kuard", 80),
                    ("/static", "kuard", 80),
                ],
            )]),
            ..Default::default()
        },
    ));
    builder.recompute();

    let prefixes: Vec<&str> = builder.dag().virtual_hosts()[0]
        .routes
        .iter()
        .map(|r| r.matching.as_str())
        .collect();
    assert_eq!(prefixes, vec!["/static/assets", "/testing", "/static", "/"]);
}

#[test]
fn paths_with_metacharacters_become_regex_matches() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 80)]));
    builder.insert(ingress(
        "default",
        "kuard",
        net_v1::IngressSpec {
            rules: Some(vec![rule(
                Some("example.com"),
                &[("/api/.*", "kuard", 80), ("/plain", "kuard", 80)],
            )]),
            ..Default::default()
        },
    ));
    builder.recompute();

    let routes = &builder.dag().virtual_hosts()[0].routes;
    assert!(routes
        .iter()
        .any(|r| r.matching == RouteMatch::Regex("/api/.*".to_owned())));
    assert!(routes
        .iter()
        .any(|r| r.matching == RouteMatch::Prefix("/plain".to_owned())));
}

#[test]
fn websocket_annotation_flags_matching_routes() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 80)]));
    builder.insert(ingress_with_annotations(
        "default",
        "kuard",
        net_v1::IngressSpec {
            rules: Some(vec![rule(
                Some("example.com"),
                &[("/ws", "kuard", 80), ("/", "kuard", 80)],
            )]),
            ..Default::default()
        },
        &[("contour.heptio.com/websocket-routes", "/ws")],
    ));
    builder.recompute();

    let routes = &builder.dag().virtual_hosts()[0].routes;
    assert!(routes.iter().find(|r| r.matching.as_str() == "/ws").unwrap().websocket);
    assert!(!routes.iter().find(|r| r.matching.as_str() == "/").unwrap().websocket);
}

#[test]
fn request_timeout_annotation() {
    fn annotations(value: Option<&str>) -> BTreeMap<String, String> {
        value
            .map(|v| {
                [("contour.heptio.com/request-timeout".to_owned(), v.to_owned())]
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default()
    }

    assert_eq!(Timeout::parse(&annotations(None)), Timeout::Unset);
    assert_eq!(Timeout::parse(&annotations(Some(""))), Timeout::Unset);
    assert_eq!(
        Timeout::parse(&annotations(Some("infinity"))),
        Timeout::Infinite
    );
    assert_eq!(
        Timeout::parse(&annotations(Some("90s"))),
        Timeout::Finite(Duration::from_secs(90))
    );
    assert_eq!(
        Timeout::parse(&annotations(Some("1m30s"))),
        Timeout::Finite(Duration::from_secs(90))
    );
    assert_eq!(
        Timeout::parse(&annotations(Some("250ms"))),
        Timeout::Finite(Duration::from_millis(250))
    );
    // A parse failure must read as infinite, never as the proxy default.
    assert_eq!(
        Timeout::parse(&annotations(Some("not-a-duration"))),
        Timeout::Infinite
    );
}

#[test]
fn ingress_route_root_builds_a_vhost() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 8080)]));
    builder.insert(ingress_route(
        "default",
        "kuard",
        root_spec("kuard.example.com", vec![route_to("/", "kuard", 8080)]),
    ));
    builder.recompute();

    let dag = builder.dag();
    assert_eq!(dag.virtual_hosts().len(), 1);
    assert_eq!(dag.virtual_hosts()[0].host, "kuard.example.com");
    let status = status_of(&builder, "default", "kuard");
    assert_eq!(status.kind, StatusKind::Valid);
    assert_eq!(status.vhost.as_deref(), Some("kuard.example.com"));
}

#[test]
fn ingress_route_weights_are_preserved_in_order() {
    let mut builder = Builder::default();
    builder.insert(service("default", "a", &[(None, 80)]));
    builder.insert(service("default", "b", &[(None, 80)]));
    builder.insert(ingress_route(
        "default",
        "split",
        root_spec(
            "split.example.com",
            vec![ingressroute::Route {
                match_prefix: "/".to_owned(),
                services: vec![
                    ingressroute::Service {
                        name: "a".to_owned(),
                        port: 80,
                        weight: Some(90),
                        health_check: None,
                    },
                    ingressroute::Service {
                        name: "b".to_owned(),
                        port: 80,
                        weight: Some(10),
                        health_check: None,
                    },
                ],
                delegate: None,
                enable_websockets: false,
            }],
        ),
    ));
    builder.recompute();

    let route = &builder.dag().virtual_hosts()[0].routes[0];
    let weights: Vec<(String, u32)> = route
        .services
        .iter()
        .map(|s| (s.name.clone(), s.weight))
        .collect();
    assert_eq!(
        weights,
        vec![("a".to_owned(), 90), ("b".to_owned(), 10)]
    );
}

#[test]
fn ingress_route_without_fqdn_is_invalid() {
    let mut builder = Builder::default();
    builder.insert(ingress_route(
        "default",
        "kuard",
        ingressroute::IngressRouteSpec {
            virtualhost: Some(ingressroute::VirtualHost {
                fqdn: None,
                tls: None,
            }),
            routes: vec![route_to("/", "kuard", 8080)],
            tcpproxy: None,
        },
    ));
    builder.recompute();

    assert!(builder.dag().virtual_hosts().is_empty());
    assert_eq!(
        status_of(&builder, "default", "kuard").kind,
        StatusKind::Invalid
    );
}

#[test]
fn delegation_grafts_routes_across_namespaces() {
    let mut builder = Builder::default();
    builder.insert(service("marketing", "blog", &[(None, 80)]));
    builder.insert(ingress_route(
        "default",
        "root",
        root_spec(
            "example.com",
            vec![route_delegate("/blog", "blog", Some("marketing"))],
        ),
    ));
    builder.insert(ingress_route(
        "marketing",
        "blog",
        delegate_spec(vec![route_to("/blog", "blog", 80)]),
    ));
    builder.recompute();

    let dag = builder.dag();
    assert_eq!(dag.virtual_hosts().len(), 1);
    let vhost = &dag.virtual_hosts()[0];
    assert_eq!(vhost.host, "example.com");
    assert_eq!(vhost.routes.len(), 1);
    assert_eq!(vhost.routes[0].services[0].namespace, "marketing");

    assert_eq!(
        status_of(&builder, "default", "root").kind,
        StatusKind::Valid
    );
    let delegate = status_of(&builder, "marketing", "blog");
    assert_eq!(delegate.kind, StatusKind::Valid);
    assert_eq!(delegate.description, "delegated IngressRoute");
}

#[test]
fn delegate_prefix_must_extend_the_parent() {
    let mut builder = Builder::default();
    builder.insert(service("default", "blog", &[(None, 80)]));
    builder.insert(ingress_route(
        "default",
        "root",
        root_spec("example.com", vec![route_delegate("/blog", "blog", None)]),
    ));
    builder.insert(ingress_route(
        "default",
        "blog",
        delegate_spec(vec![route_to("/elsewhere", "blog", 80)]),
    ));
    builder.recompute();

    assert!(builder.dag().virtual_hosts().is_empty());
    assert_eq!(
        status_of(&builder, "default", "root").kind,
        StatusKind::Invalid
    );
}

#[test]
fn unreferenced_non_root_is_orphaned() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 80)]));
    builder.insert(ingress_route(
        "default",
        "stray",
        delegate_spec(vec![route_to("/", "kuard", 80)]),
    ));
    builder.recompute();

    assert!(builder.dag().virtual_hosts().is_empty());
    assert_eq!(
        status_of(&builder, "default", "stray").kind,
        StatusKind::Orphaned
    );
}

#[test]
fn delegation_cycle_marks_every_member_invalid() {
    let mut builder = Builder::default();
    builder.insert(ingress_route(
        "default",
        "a",
        root_spec("a.example.com", vec![route_delegate("/", "b", None)]),
    ));
    builder.insert(ingress_route(
        "default",
        "b",
        delegate_spec(vec![route_delegate("/", "a", None)]),
    ));
    builder.recompute();

    let dag = builder.dag();
    assert!(dag.virtual_hosts().is_empty());
    assert_eq!(status_of(&builder, "default", "a").kind, StatusKind::Invalid);
    assert_eq!(status_of(&builder, "default", "b").kind, StatusKind::Invalid);
}

#[test]
fn ingress_route_tls_requires_a_resolvable_secret() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 8080)]));
    let spec = ingressroute::IngressRouteSpec {
        virtualhost: Some(ingressroute::VirtualHost {
            fqdn: Some("kuard.example.com".to_owned()),
            tls: Some(ingressroute::Tls {
                secret_name: Some("secret".to_owned()),
            }),
        }),
        routes: vec![route_to("/", "kuard", 8080)],
        tcpproxy: None,
    };
    builder.insert(ingress_route("default", "kuard", spec.clone()));
    builder.recompute();

    assert!(builder.dag().secure_virtual_hosts().is_empty());
    assert_eq!(
        status_of(&builder, "default", "kuard").kind,
        StatusKind::Invalid
    );

    builder.insert(tls_secret("default", "secret"));
    builder.insert(ingress_route("default", "kuard", spec));
    builder.recompute();

    let dag = builder.dag();
    assert_eq!(dag.secure_virtual_hosts().len(), 1);
    assert_eq!(dag.secure_virtual_hosts()[0].host, "kuard.example.com");
    assert_eq!(
        status_of(&builder, "default", "kuard").kind,
        StatusKind::Valid
    );
}

#[test]
fn tcpproxy_becomes_a_passthrough_vertex() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 443)]));
    builder.insert(ingress_route(
        "default",
        "kuard",
        ingressroute::IngressRouteSpec {
            virtualhost: Some(ingressroute::VirtualHost {
                fqdn: Some("tcp.example.com".to_owned()),
                tls: None,
            }),
            routes: vec![],
            tcpproxy: Some(ingressroute::TcpProxy {
                services: vec![ingressroute::Service {
                    name: "kuard".to_owned(),
                    port: 443,
                    weight: None,
                    health_check: None,
                }],
            }),
        },
    ));
    builder.recompute();

    let dag = builder.dag();
    assert_eq!(dag.tcp_proxies().len(), 1);
    assert_eq!(dag.tcp_proxies()[0].host, "tcp.example.com");
    let listeners = envoy::listener::visit(dag);
    assert!(listeners
        .iter()
        .any(|l| l.name == envoy::HTTPS_LISTENER_NAME));
}

#[test]
fn every_route_cluster_exists_in_the_cluster_set() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(Some("http"), 80)]));
    builder.insert(service("default", "other", &[(None, 8080)]));
    builder.insert(tls_secret("default", "secret"));
    builder.insert(ingress(
        "default",
        "kuard",
        net_v1::IngressSpec {
            tls: Some(vec![net_v1::IngressTLS {
                hosts: Some(vec!["example.com".to_owned()]),
                secret_name: Some("secret".to_owned()),
            }]),
            rules: Some(vec![rule(
                Some("example.com"),
                &[("/", "kuard", 80), ("/other", "other", 8080)],
            )]),
            ..Default::default()
        },
    ));
    builder.recompute();

    let dag = builder.dag();
    let clusters: HashSet<String> = envoy::cluster::visit(dag)
        .into_iter()
        .map(|c| c.name)
        .collect();
    for config in envoy::route::visit(dag) {
        for vhost in &config.virtual_hosts {
            for route in &vhost.routes {
                use xds_api::pb::envoy::config::route::v3::route::Action;
                use xds_api::pb::envoy::config::route::v3::route_action::ClusterSpecifier;
                let Some(Action::Route(action)) = &route.action else {
                    continue;
                };
                match action.cluster_specifier.as_ref().unwrap() {
                    ClusterSpecifier::Cluster(name) => {
                        assert!(clusters.contains(name), "missing cluster {}", name);
                    }
                    ClusterSpecifier::WeightedClusters(wc) => {
                        for cw in &wc.clusters {
                            assert!(clusters.contains(&cw.name), "missing cluster {}", cw.name);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

#[test]
fn recompute_is_idempotent() {
    let mut builder = Builder::default();
    builder.insert(service("default", "kuard", &[(None, 80)]));
    builder.insert(ingress(
        "default",
        "kuard",
        net_v1::IngressSpec {
            default_backend: Some(backend("kuard", 80)),
            ..Default::default()
        },
    ));
    builder.recompute();
    let first = builder.dag().clone();
    builder.recompute();
    assert_eq!(builder.dag().virtual_hosts(), first.virtual_hosts());
    assert_eq!(builder.dag().statuses(), first.statuses());
}
