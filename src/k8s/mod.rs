//! The watched object model.

pub mod ingressroute;
mod watch;

pub use self::{
    ingressroute::IngressRoute,
    watch::{Event, Watch},
};
pub use k8s_openapi::{
    api::{
        core::v1::{Endpoints, Secret, Service},
        networking::v1::Ingress,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
pub use kube::ResourceExt;

use kube::{api::Api, runtime::watcher};

/// One of the five object kinds fed to the event handler, either freshly
/// observed or as the final state of a deleted object.
#[derive(Clone, Debug)]
pub enum KubeObject {
    Ingress(Ingress),
    IngressRoute(IngressRoute),
    Service(Service),
    Endpoints(Endpoints),
    Secret(Secret),
}

// === impl KubeObject ===

impl KubeObject {
    pub fn namespace(&self) -> String {
        self.metadata()
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_owned())
    }

    pub fn name(&self) -> String {
        self.metadata().name.clone().unwrap_or_default()
    }

    fn metadata(&self) -> &ObjectMeta {
        match self {
            KubeObject::Ingress(o) => &o.metadata,
            KubeObject::IngressRoute(o) => &o.metadata,
            KubeObject::Service(o) => &o.metadata,
            KubeObject::Endpoints(o) => &o.metadata,
            KubeObject::Secret(o) => &o.metadata,
        }
    }
}

/// Watches for every resource type feeding the event handler.
pub struct ResourceWatches {
    pub ingresses: Watch<Ingress>,
    pub ingress_routes: Watch<IngressRoute>,
    pub services: Watch<Service>,
    pub endpoints: Watch<Endpoints>,
    pub secrets: Watch<Secret>,
}

// === impl ResourceWatches ===

impl From<kube::Client> for ResourceWatches {
    fn from(client: kube::Client) -> Self {
        let config = watcher::Config::default();
        Self {
            ingresses: watcher(Api::all(client.clone()), config.clone()).into(),
            ingress_routes: watcher(Api::all(client.clone()), config.clone()).into(),
            services: watcher(Api::all(client.clone()), config.clone()).into(),
            endpoints: watcher(Api::all(client.clone()), config.clone()).into(),
            secrets: watcher(Api::all(client), config).into(),
        }
    }
}
