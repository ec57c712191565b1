//! The IngressRoute custom resource.
//!
//! IngressRoute extends the stock Ingress object with cross-namespace
//! delegation: a root document (one with a `virtualhost` block) owns a fully
//! qualified domain name and may hand sub-prefixes of its route space to
//! IngressRoutes in other namespaces.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "contour.heptio.com",
    version = "v1beta1",
    kind = "IngressRoute",
    namespaced,
    status = "IngressRouteStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct IngressRouteSpec {
    /// Present only on root documents; delegated documents inherit the
    /// virtual host of the root that reaches them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtualhost: Option<VirtualHost>,

    #[serde(default)]
    pub routes: Vec<Route>,

    /// Forwards raw TLS connections for the root's fqdn by SNI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcpproxy: Option<TcpProxy>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Tls>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Path prefix this route matches.
    #[serde(rename = "match")]
    pub match_prefix: String,

    /// Upstream services, weighted in declaration order. Mutually exclusive
    /// with `delegate`.
    #[serde(default)]
    pub services: Vec<Service>,

    /// Hands this prefix to another IngressRoute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<Delegate>,

    #[serde(default)]
    pub enable_websockets: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,
    pub port: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    /// HTTP path probed on the upstream.
    pub path: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Delegate {
    pub name: String,

    /// Defaults to the delegating document's namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpProxy {
    #[serde(default)]
    pub services: Vec<Service>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressRouteStatus {
    #[serde(default)]
    pub current_status: String,

    #[serde(default)]
    pub description: String,
}
