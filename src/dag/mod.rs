//! The translation DAG.
//!
//! A [`Builder`] owns the cache of watched objects and derives from it a
//! [`Dag`] of virtual hosts, routes, upstream services, and TLS secrets. The
//! DAG is rebuilt from scratch on every mutation; vertices have no identity
//! across rebuilds, so cross-references (Ingress to Service, Ingress to
//! Secret, IngressRoute to IngressRoute) are resolved against the object
//! cache each time and can never dangle.
//!
//! A rebuild never fails. Malformed or unresolvable inputs cause the affected
//! routes or documents to be dropped, and the reasons land in the status
//! table.

use crate::{
    hashname::{hashname, MAX_NAME_LEN},
    k8s::{self, KubeObject},
    status::{BuildError, ObjectStatus},
    DEFAULT_INGRESS_CLASS, INGRESS_CLASS_ANNOTATION,
};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
mod tests;

const ALLOW_HTTP_ANNOTATION: &str = "kubernetes.io/ingress.allow-http";
const FORCE_SSL_REDIRECT_ANNOTATION: &str = "ingress.kubernetes.io/force-ssl-redirect";
const REQUEST_TIMEOUT_ANNOTATION: &str = "contour.heptio.com/request-timeout";
const WEBSOCKET_ROUTES_ANNOTATION: &str = "contour.heptio.com/websocket-routes";

/// `(namespace, name)` identity of a watched object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Meta {
    pub namespace: String,
    pub name: String,
}

// === impl Meta ===

impl Meta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn of(obj: &KubeObject) -> Self {
        Self {
            namespace: obj.namespace(),
            name: obj.name(),
        }
    }
}

impl std::fmt::Display for Meta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A route's upstream request timeout.
///
/// `Unset` leaves the proxy's default in place; `Infinite` is encoded as a
/// zero duration on the wire, which the proxy reads as "never time out".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Timeout {
    #[default]
    Unset,
    Infinite,
    Finite(Duration),
}

// === impl Timeout ===

impl Timeout {
    /// Reads the request-timeout annotation.
    ///
    /// Absent or empty means no timeout is set; the literal `infinity` and
    /// any unparseable value both mean infinite. An unparseable value must
    /// never fall back to the proxy's implicit default.
    fn parse(annotations: &BTreeMap<String, String>) -> Self {
        match annotations
            .get(REQUEST_TIMEOUT_ANNOTATION)
            .map(String::as_str)
        {
            None | Some("") => Timeout::Unset,
            Some("infinity") => Timeout::Infinite,
            Some(s) => parse_duration(s)
                .map(Timeout::Finite)
                .unwrap_or(Timeout::Infinite),
        }
    }
}

/// Parses a Go-style duration string: a sequence of decimal numbers, each
/// with a unit suffix out of `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`.
fn parse_duration(s: &str) -> Option<Duration> {
    if s.is_empty() {
        return None;
    }
    let mut rest = s;
    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: f64 = rest[..digits].parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        rest = &rest[digits..];
        let (unit, len) = if let Some(u) = ["ns", "us", "µs", "ms"]
            .iter()
            .find(|u| rest.starts_with(**u))
        {
            (*u, u.len())
        } else if rest.starts_with('s') || rest.starts_with('m') || rest.starts_with('h') {
            (&rest[..1], 1)
        } else {
            return None;
        };
        let secs = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => unreachable!(),
        };
        total += Duration::try_from_secs_f64(value * secs).ok()?;
        rest = &rest[len..];
    }
    Some(total)
}

/// A resolved upstream: one port of one Service.
#[derive(Clone, Debug, PartialEq)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    pub port: i32,
    /// Set when the service port is named; such upstreams also answer to the
    /// named cluster form.
    pub port_name: Option<String>,
    pub weight: u32,
    pub health_check_path: Option<String>,
}

// === impl Service ===

impl Service {
    /// The cluster name shared by every emitter referencing this upstream.
    pub fn cluster_name(&self) -> String {
        hashname(
            MAX_NAME_LEN,
            &[&self.namespace, &self.name, &self.port.to_string()],
        )
    }

    /// The named-port alias, when the service port carries a name.
    pub fn named_cluster_name(&self) -> Option<String> {
        self.port_name
            .as_deref()
            .map(|n| hashname(MAX_NAME_LEN, &[&self.namespace, &self.name, n]))
    }
}

/// How a route matches request paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteMatch {
    Prefix(String),
    Regex(String),
}

// === impl RouteMatch ===

impl RouteMatch {
    /// A literal ingress path becomes a prefix match; a path containing any
    /// regex metacharacter becomes a regex match; an empty path catches all.
    fn from_path(path: &str) -> Self {
        if path.is_empty() {
            return RouteMatch::Prefix("/".to_owned());
        }
        if path
            .chars()
            .any(|c| matches!(c, '[' | '(' | '*' | '\\'))
        {
            RouteMatch::Regex(path.to_owned())
        } else {
            RouteMatch::Prefix(path.to_owned())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RouteMatch::Prefix(s) | RouteMatch::Regex(s) => s,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub matching: RouteMatch,
    pub websocket: bool,
    pub https_upgrade: bool,
    pub timeout: Timeout,
    /// Always non-empty; routes that lose every upstream are dropped.
    pub services: Vec<Service>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VirtualHost {
    pub host: String,
    pub routes: Vec<Route>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SecureVirtualHost {
    pub host: String,
    pub secret: Secret,
    pub routes: Vec<Route>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TcpProxy {
    /// SNI server name.
    pub host: String,
    pub services: Vec<Service>,
}

/// A validated TLS secret: both halves present and non-empty.
#[derive(Clone, Debug, PartialEq)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

// === impl Secret ===

impl Secret {
    /// The `namespace/name` form the listener references the secret by.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A vertex handed to [`Dag::visit`] callbacks.
#[derive(Clone, Copy, Debug)]
pub enum Vertex<'a> {
    VirtualHost(&'a VirtualHost),
    SecureVirtualHost(&'a SecureVirtualHost),
    TcpProxy(&'a TcpProxy),
    Route(&'a Route),
    Service(&'a Service),
    Secret(&'a Secret),
}

/// The derived graph: root vertices plus the status table of the rebuild
/// that produced it.
#[derive(Clone, Debug, Default)]
pub struct Dag {
    virtual_hosts: Vec<VirtualHost>,
    secure_virtual_hosts: Vec<SecureVirtualHost>,
    tcp_proxies: Vec<TcpProxy>,
    statuses: Vec<ObjectStatus>,
}

// === impl Dag ===

impl Dag {
    /// Calls `f` for every root vertex. Child edges are walked through the
    /// per-vertex `visit` methods.
    pub fn visit<'a, F: FnMut(Vertex<'a>)>(&'a self, mut f: F) {
        for vh in &self.virtual_hosts {
            f(Vertex::VirtualHost(vh));
        }
        for vh in &self.secure_virtual_hosts {
            f(Vertex::SecureVirtualHost(vh));
        }
        for tp in &self.tcp_proxies {
            f(Vertex::TcpProxy(tp));
        }
    }

    pub fn virtual_hosts(&self) -> &[VirtualHost] {
        &self.virtual_hosts
    }

    pub fn secure_virtual_hosts(&self) -> &[SecureVirtualHost] {
        &self.secure_virtual_hosts
    }

    pub fn tcp_proxies(&self) -> &[TcpProxy] {
        &self.tcp_proxies
    }

    /// The status table of the rebuild: one entry per IngressRoute document.
    pub fn statuses(&self) -> &[ObjectStatus] {
        &self.statuses
    }
}

// === impl VirtualHost ===

impl VirtualHost {
    pub fn visit<'a, F: FnMut(Vertex<'a>)>(&'a self, mut f: F) {
        for r in &self.routes {
            f(Vertex::Route(r));
        }
    }
}

// === impl SecureVirtualHost ===

impl SecureVirtualHost {
    pub fn visit<'a, F: FnMut(Vertex<'a>)>(&'a self, mut f: F) {
        f(Vertex::Secret(&self.secret));
        for r in &self.routes {
            f(Vertex::Route(r));
        }
    }
}

// === impl Route ===

impl Route {
    pub fn visit<'a, F: FnMut(Vertex<'a>)>(&'a self, mut f: F) {
        for s in &self.services {
            f(Vertex::Service(s));
        }
    }
}

// === impl TcpProxy ===

impl TcpProxy {
    pub fn visit<'a, F: FnMut(Vertex<'a>)>(&'a self, mut f: F) {
        for s in &self.services {
            f(Vertex::Service(s));
        }
    }
}

/// Owns the object cache and rebuilds the [`Dag`] on demand.
///
/// The builder has a single writer (the event handler); no locking happens
/// here.
pub struct Builder {
    ingress_class: String,
    ingresses: BTreeMap<Meta, k8s::Ingress>,
    ingress_routes: BTreeMap<Meta, k8s::IngressRoute>,
    services: BTreeMap<Meta, k8s::Service>,
    endpoints: BTreeMap<Meta, k8s::Endpoints>,
    secrets: BTreeMap<Meta, k8s::Secret>,
    dag: Dag,
    dirty: bool,
}

// === impl Builder ===

impl Default for Builder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Builder {
    pub fn new(ingress_class: Option<String>) -> Self {
        Self {
            ingress_class: ingress_class.unwrap_or_else(|| DEFAULT_INGRESS_CLASS.to_owned()),
            ingresses: BTreeMap::new(),
            ingress_routes: BTreeMap::new(),
            services: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            secrets: BTreeMap::new(),
            dag: Dag::default(),
            dirty: true,
        }
    }

    /// Inserts or replaces `obj` in the object cache and marks the DAG dirty.
    pub fn insert(&mut self, obj: KubeObject) {
        let meta = Meta::of(&obj);
        match obj {
            KubeObject::Ingress(o) => {
                self.ingresses.insert(meta, o);
            }
            KubeObject::IngressRoute(o) => {
                self.ingress_routes.insert(meta, o);
            }
            KubeObject::Service(o) => {
                self.services.insert(meta, o);
            }
            KubeObject::Endpoints(o) => {
                self.endpoints.insert(meta, o);
            }
            KubeObject::Secret(o) => {
                self.secrets.insert(meta, o);
            }
        }
        self.dirty = true;
    }

    /// Removes `obj` from the object cache and marks the DAG dirty.
    pub fn remove(&mut self, obj: &KubeObject) {
        let meta = Meta::of(obj);
        match obj {
            KubeObject::Ingress(_) => {
                self.ingresses.remove(&meta);
            }
            KubeObject::IngressRoute(_) => {
                self.ingress_routes.remove(&meta);
            }
            KubeObject::Service(_) => {
                self.services.remove(&meta);
            }
            KubeObject::Endpoints(_) => {
                self.endpoints.remove(&meta);
            }
            KubeObject::Secret(_) => {
                self.secrets.remove(&meta);
            }
        }
        self.dirty = true;
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// The raw Endpoints objects, in deterministic order, for the endpoint
    /// visitor. Endpoints do not take part in the graph itself.
    pub fn endpoints(&self) -> impl Iterator<Item = &k8s::Endpoints> {
        self.endpoints.values()
    }

    /// Rebuilds the DAG from the current object cache. No-op when nothing
    /// changed since the last rebuild.
    pub fn recompute(&mut self) {
        if !self.dirty {
            return;
        }
        let mut rebuild = Rebuild::default();
        for ingress in self.ingresses.values() {
            self.process_ingress(ingress, &mut rebuild);
        }
        self.process_ingress_routes(&mut rebuild);
        self.dag = rebuild.finish();
        self.dirty = false;
        debug!(
            virtual_hosts = self.dag.virtual_hosts.len(),
            secure_virtual_hosts = self.dag.secure_virtual_hosts.len(),
            tcp_proxies = self.dag.tcp_proxies.len(),
            "recomputed"
        );
    }

    // === object resolution ===

    /// Resolves one port of a Service into an upstream vertex.
    fn resolve_service(&self, namespace: &str, name: &str, port: PortRef<'_>) -> Option<Service> {
        let svc = self.services.get(&Meta::new(namespace, name))?;
        let spec = svc.spec.as_ref()?;
        for p in spec.ports.as_deref().unwrap_or_default() {
            if matches!(p.protocol.as_deref(), Some(proto) if proto != "TCP") {
                continue;
            }
            let hit = match port {
                PortRef::Number(n) => p.port == n,
                PortRef::Name(n) => p.name.as_deref() == Some(n),
            };
            if hit {
                return Some(Service {
                    namespace: namespace.to_owned(),
                    name: name.to_owned(),
                    port: p.port,
                    port_name: p.name.clone().filter(|n| !n.is_empty()),
                    weight: 1,
                    health_check_path: None,
                });
            }
        }
        None
    }

    /// Resolves a TLS secret, requiring non-empty certificate and key.
    fn resolve_secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        let secret = self.secrets.get(&Meta::new(namespace, name))?;
        let data = secret.data.as_ref()?;
        let cert = data.get("tls.crt").filter(|b| !b.0.is_empty())?;
        let key = data.get("tls.key").filter(|b| !b.0.is_empty())?;
        Some(Secret {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            cert: cert.0.clone(),
            key: key.0.clone(),
        })
    }

    fn resolve_backend(
        &self,
        namespace: &str,
        backend: &k8s_openapi::api::networking::v1::IngressBackend,
    ) -> Option<Service> {
        let svc = backend.service.as_ref()?;
        let port = svc.port.as_ref()?;
        let port = match (&port.name, port.number) {
            (Some(name), _) if !name.is_empty() => PortRef::Name(name),
            (_, Some(number)) => PortRef::Number(number),
            _ => return None,
        };
        self.resolve_service(namespace, &svc.name, port)
    }

    // === Ingress translation ===

    fn process_ingress(&self, ingress: &k8s::Ingress, out: &mut Rebuild) {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        let annotations = ingress.metadata.annotations.as_ref().unwrap_or(&EMPTY);
        if let Some(class) = annotations.get(INGRESS_CLASS_ANNOTATION) {
            if *class != self.ingress_class {
                return;
            }
        }
        let namespace = ingress
            .metadata
            .namespace
            .as_deref()
            .unwrap_or("default");
        let Some(spec) = ingress.spec.as_ref() else {
            return;
        };

        let timeout = Timeout::parse(annotations);
        let websocket_paths: HashSet<&str> = annotations
            .get(WEBSOCKET_ROUTES_ANNOTATION)
            .map(|v| v.split(',').map(str::trim).collect())
            .unwrap_or_default();
        let allow_http = annotations.get(ALLOW_HTTP_ANNOTATION).map(String::as_str) != Some("false");
        let force_ssl =
            annotations.get(FORCE_SSL_REDIRECT_ANNOTATION).map(String::as_str) == Some("true");

        // Hosts with a usable TLS configuration, with their secret.
        let mut tls_hosts: BTreeMap<&str, Secret> = BTreeMap::new();
        for tls in spec.tls.as_deref().unwrap_or_default() {
            let Some(secret_name) = tls.secret_name.as_deref().filter(|s| !s.is_empty()) else {
                continue;
            };
            let Some(secret) = self.resolve_secret(namespace, secret_name) else {
                continue;
            };
            for host in tls.hosts.as_deref().unwrap_or_default() {
                tls_hosts.insert(host, secret.clone());
            }
        }

        let mut routes: Vec<(&str, Route)> = Vec::new();
        let rules = spec.rules.as_deref().unwrap_or_default();
        if let Some(backend) = spec.default_backend.as_ref() {
            if rules.is_empty() {
                if let Some(svc) = self.resolve_backend(namespace, backend) {
                    routes.push((
                        "*",
                        Route {
                            matching: RouteMatch::Prefix("/".to_owned()),
                            websocket: websocket_paths.contains("/"),
                            https_upgrade: false,
                            timeout,
                            services: vec![svc],
                        },
                    ));
                }
            }
        }
        for rule in rules {
            let host = match rule.host.as_deref() {
                Some(h) if !h.is_empty() => h,
                _ => "*",
            };
            let Some(http) = rule.http.as_ref() else {
                continue;
            };
            for path in &http.paths {
                let Some(svc) = self.resolve_backend(namespace, &path.backend) else {
                    // Unresolvable backend: the route is dropped.
                    continue;
                };
                let raw = path.path.as_deref().unwrap_or_default();
                routes.push((
                    host,
                    Route {
                        matching: RouteMatch::from_path(raw),
                        websocket: websocket_paths.contains(raw),
                        https_upgrade: false,
                        timeout,
                        services: vec![svc],
                    },
                ));
            }
        }

        for (host, mut route) in routes {
            if let Some(secret) = tls_hosts.get(host) {
                out.https(host, secret.clone()).push(route.clone());
            }
            if allow_http {
                route.https_upgrade = force_ssl;
                out.http(host).push(route);
            }
        }
    }

    // === IngressRoute translation ===

    fn process_ingress_routes(&self, out: &mut Rebuild) {
        let mut reached: BTreeMap<Meta, String> = BTreeMap::new();
        let mut cycles: Vec<(Meta, BuildError)> = Vec::new();

        for (meta, root) in &self.ingress_routes {
            let Some(vhost) = root.spec.virtualhost.as_ref() else {
                continue;
            };
            let Some(fqdn) = vhost.fqdn.as_deref().filter(|f| !f.is_empty()) else {
                out.status(ObjectStatus::invalid(
                    meta.clone(),
                    &BuildError::MissingFqdn,
                    None,
                ));
                continue;
            };

            let mut secret = None;
            if let Some(secret_name) = vhost
                .tls
                .as_ref()
                .and_then(|t| t.secret_name.as_deref())
                .filter(|s| !s.is_empty())
            {
                match self.resolve_secret(&meta.namespace, secret_name) {
                    Some(s) => secret = Some(s),
                    None => {
                        out.status(ObjectStatus::invalid(
                            meta.clone(),
                            &BuildError::UnresolvableSecret(secret_name.to_owned()),
                            Some(fqdn.to_owned()),
                        ));
                        continue;
                    }
                }
            }

            let mut walk = Walk {
                builder: self,
                fqdn,
                path: vec![meta.clone()],
                reached: &mut reached,
                routes: Vec::new(),
                errors: Vec::new(),
                cycle_members: Vec::new(),
            };
            walk.routes_of(root, "");
            let Walk {
                routes,
                errors,
                cycle_members,
                ..
            } = walk;

            if !cycle_members.is_empty() {
                // Everything on the cycle shares the blame, and the root's
                // virtual host is withheld entirely. The root itself may sit
                // outside the cycle, so its status is recorded here.
                if let Some(err) = errors.first() {
                    out.status(ObjectStatus::invalid(
                        meta.clone(),
                        err,
                        Some(fqdn.to_owned()),
                    ));
                }
                cycles.extend(cycle_members);
                continue;
            }

            match errors.first() {
                Some(err) => out.status(ObjectStatus::invalid(
                    meta.clone(),
                    err,
                    Some(fqdn.to_owned()),
                )),
                None => out.status(ObjectStatus::valid(
                    meta.clone(),
                    "valid IngressRoute",
                    Some(fqdn.to_owned()),
                )),
            }

            if !routes.is_empty() {
                if let Some(secret) = secret.as_ref() {
                    out.https(fqdn, secret.clone()).extend(routes.iter().cloned());
                }
                out.http(fqdn).extend(routes);
            }

            if let Some(tcpproxy) = root.spec.tcpproxy.as_ref() {
                let services = self.resolve_route_services(&meta.namespace, &tcpproxy.services);
                if !services.is_empty() {
                    out.tcp(fqdn).extend(services);
                }
            }
        }

        for (meta, err) in cycles {
            out.status(ObjectStatus::invalid(meta, &err, None));
        }

        for (meta, fqdn) in reached {
            out.status(ObjectStatus::valid(
                meta,
                "delegated IngressRoute",
                Some(fqdn),
            ));
        }

        for meta in self.ingress_routes.iter().filter_map(|(m, ir)| {
            ir.spec.virtualhost.is_none().then(|| m.clone())
        }) {
            out.status(ObjectStatus::orphaned(meta));
        }
    }

    fn resolve_route_services(
        &self,
        namespace: &str,
        services: &[k8s::ingressroute::Service],
    ) -> Vec<Service> {
        let mut out = Vec::with_capacity(services.len());
        for rs in services {
            if let Some(mut svc) = self.resolve_service(namespace, &rs.name, PortRef::Number(rs.port))
            {
                svc.weight = rs.weight.unwrap_or(1);
                svc.health_check_path = rs.health_check.as_ref().map(|h| h.path.clone());
                out.push(svc);
            }
        }
        out
    }
}

#[derive(Clone, Copy)]
enum PortRef<'a> {
    Name(&'a str),
    Number(i32),
}

/// One root's depth-first walk over its delegation chain.
struct Walk<'a> {
    builder: &'a Builder,
    fqdn: &'a str,
    /// The documents on the active delegation path, root first.
    path: Vec<Meta>,
    reached: &'a mut BTreeMap<Meta, String>,
    routes: Vec<Route>,
    errors: Vec<BuildError>,
    /// Populated at the moment a cycle is detected: every document on the
    /// cycle, with the offending route recorded against each.
    cycle_members: Vec<(Meta, BuildError)>,
}

// === impl Walk ===

impl Walk<'_> {
    fn routes_of(&mut self, doc: &k8s::IngressRoute, parent_prefix: &str) {
        let namespace = doc.metadata.namespace.as_deref().unwrap_or("default");
        for route in &doc.spec.routes {
            let prefix = route.match_prefix.as_str();
            if !parent_prefix.is_empty() && !prefix.starts_with(parent_prefix) {
                self.errors.push(BuildError::PrefixMismatch {
                    child: prefix.to_owned(),
                    parent: parent_prefix.to_owned(),
                });
                continue;
            }

            if let Some(delegate) = route.delegate.as_ref() {
                let target = Meta::new(
                    delegate.namespace.as_deref().unwrap_or(namespace),
                    delegate.name.as_str(),
                );
                if let Some(pos) = self.path.iter().position(|m| *m == target) {
                    let err = BuildError::DelegationCycle(prefix.to_owned());
                    self.cycle_members
                        .extend(self.path[pos..].iter().map(|m| (m.clone(), err.clone())));
                    self.errors.push(err);
                    continue;
                }
                let Some(next) = self.builder.ingress_routes.get(&target) else {
                    self.errors
                        .push(BuildError::MissingDelegate(target.to_string()));
                    continue;
                };
                if next.spec.virtualhost.is_some() {
                    self.errors.push(BuildError::DelegateIsRoot);
                    continue;
                }
                self.reached.insert(target.clone(), self.fqdn.to_owned());
                self.path.push(target);
                self.routes_of(next, prefix);
                self.path.pop();
                continue;
            }

            if route.services.is_empty() {
                self.errors
                    .push(BuildError::MissingRouteTarget(prefix.to_owned()));
                continue;
            }
            let services = self
                .builder
                .resolve_route_services(namespace, &route.services);
            if services.is_empty() {
                let name = route
                    .services
                    .first()
                    .map(|s| s.name.clone())
                    .unwrap_or_default();
                self.errors.push(BuildError::UnresolvableService(name));
                continue;
            }
            self.routes.push(Route {
                matching: RouteMatch::Prefix(prefix.to_owned()),
                websocket: route.enable_websockets,
                https_upgrade: false,
                timeout: Timeout::Unset,
                services,
            });
        }
    }
}

/// Accumulates one rebuild's outputs before they are frozen into a [`Dag`].
#[derive(Default)]
struct Rebuild {
    http: BTreeMap<String, Vec<Route>>,
    https: BTreeMap<String, (Secret, Vec<Route>)>,
    tcp: BTreeMap<String, Vec<Service>>,
    statuses: Vec<ObjectStatus>,
}

// === impl Rebuild ===

impl Rebuild {
    fn http(&mut self, host: &str) -> &mut Vec<Route> {
        self.http.entry(host.to_owned()).or_default()
    }

    fn https(&mut self, host: &str, secret: Secret) -> &mut Vec<Route> {
        &mut self
            .https
            .entry(host.to_owned())
            .or_insert_with(|| (secret, Vec::new()))
            .1
    }

    fn tcp(&mut self, host: &str) -> &mut Vec<Service> {
        self.tcp.entry(host.to_owned()).or_default()
    }

    /// Records a status, keeping the first entry per object. Root statuses
    /// are recorded before delegate and orphan sweeps, so they win.
    fn status(&mut self, status: ObjectStatus) {
        if !self.statuses.iter().any(|s| s.meta == status.meta) {
            self.statuses.push(status);
        }
    }

    fn finish(self) -> Dag {
        // Longest prefix first; equal lengths tie-break on the match string
        // so rebuilds are reproducible.
        fn order(a: &Route, b: &Route) -> std::cmp::Ordering {
            b.matching
                .as_str()
                .len()
                .cmp(&a.matching.as_str().len())
                .then_with(|| a.matching.as_str().cmp(b.matching.as_str()))
        }

        let virtual_hosts = self
            .http
            .into_iter()
            .filter(|(_, routes)| !routes.is_empty())
            .map(|(host, mut routes)| {
                routes.sort_by(order);
                VirtualHost { host, routes }
            })
            .collect();
        let secure_virtual_hosts = self
            .https
            .into_iter()
            .filter(|(_, (_, routes))| !routes.is_empty())
            .map(|(host, (secret, mut routes))| {
                routes.sort_by(order);
                SecureVirtualHost {
                    host,
                    secret,
                    routes,
                }
            })
            .collect();
        let tcp_proxies = self
            .tcp
            .into_iter()
            .map(|(host, services)| TcpProxy { host, services })
            .collect();

        Dag {
            virtual_hosts,
            secure_virtual_hosts,
            tcp_proxies,
            statuses: self.statuses,
        }
    }
}
