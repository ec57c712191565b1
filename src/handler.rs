//! The event handler.
//!
//! Adapts object add/update/delete notifications into DAG mutations and
//! drives the downstream update after each change: rebuild the DAG, publish
//! statuses, run the visitors, install the results into the resource caches,
//! and recompute the metrics. All of this happens on one task; the caches
//! are the only shared state.

use crate::{
    dag::Builder,
    envoy::{self, Caches},
    k8s::{Event, KubeObject, ResourceExt, ResourceWatches},
    metrics::Registry,
    status::StatusSink,
    DEFAULT_INGRESS_CLASS, INGRESS_CLASS_ANNOTATION,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub struct EventHandler<S> {
    builder: Builder,
    caches: Caches,
    status: S,
    metrics: Arc<Registry>,
    ingress_class: String,
}

// === impl EventHandler ===

impl<S: StatusSink> EventHandler<S> {
    pub fn new(
        ingress_class: Option<String>,
        caches: Caches,
        status: S,
        metrics: Arc<Registry>,
    ) -> Self {
        let class = ingress_class
            .clone()
            .unwrap_or_else(|| DEFAULT_INGRESS_CLASS.to_owned());
        Self {
            builder: Builder::new(ingress_class),
            caches,
            status,
            metrics,
            ingress_class: class,
        }
    }

    pub fn on_add(&mut self, obj: KubeObject) {
        if !self.valid_ingress_class(&obj) {
            return;
        }
        self.builder.insert(obj);
        self.update();
    }

    pub fn on_update(&mut self, old: KubeObject, new: KubeObject) {
        let old_valid = self.valid_ingress_class(&old);
        let new_valid = self.valid_ingress_class(&new);
        match (old_valid, new_valid) {
            // Neither version is ours.
            (false, false) => {}
            // The replacement opted out of our class: retract the old
            // object and do not insert the new one.
            (true, false) => self.on_delete(old),
            _ => {
                self.builder.remove(&old);
                self.builder.insert(new);
                self.update();
            }
        }
    }

    pub fn on_delete(&mut self, obj: KubeObject) {
        // No class check here: a tracked object must be removable even if
        // its final state mutated the annotation.
        self.builder.remove(&obj);
        self.update();
    }

    /// Admits everything except an Ingress whose class annotation names a
    /// different controller.
    fn valid_ingress_class(&self, obj: &KubeObject) -> bool {
        let KubeObject::Ingress(ingress) = obj else {
            return true;
        };
        match ingress
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(INGRESS_CLASS_ANNOTATION))
        {
            Some(class) => *class == self.ingress_class,
            None => true,
        }
    }

    fn update(&mut self) {
        self.builder.recompute();
        for status in self.builder.dag().statuses() {
            if let Err(error) = self.status.set_status(status) {
                warn!(object = %status.meta, %error, "failed to publish status");
            }
        }
        let dag = self.builder.dag();
        self.caches.clusters.update(envoy::cluster::visit(dag));
        self.caches.listeners.update(envoy::listener::visit(dag));
        self.caches.routes.update(envoy::route::visit(dag));
        self.caches
            .endpoints
            .update(envoy::endpoint::visit(self.builder.endpoints()));
        self.metrics.update(self.builder.dag().statuses());
    }

    /// Drives the handler from the cluster watches. The handler is the
    /// single writer; every mutation happens on this task.
    pub async fn run(mut self, mut watches: ResourceWatches) {
        let mut ingresses = Store::default();
        let mut ingress_routes = Store::default();
        let mut services = Store::default();
        let mut endpoints = Store::default();
        let mut secrets = Store::default();
        loop {
            tokio::select! {
                ev = watches.ingresses.recv() => self.sync(ev, &mut ingresses, KubeObject::Ingress),
                ev = watches.ingress_routes.recv() => self.sync(ev, &mut ingress_routes, KubeObject::IngressRoute),
                ev = watches.services.recv() => self.sync(ev, &mut services, KubeObject::Service),
                ev = watches.endpoints.recv() => self.sync(ev, &mut endpoints, KubeObject::Endpoints),
                ev = watches.secrets.recv() => self.sync(ev, &mut secrets, KubeObject::Secret),
            }
        }
    }

    fn sync<T>(&mut self, ev: Event<T>, store: &mut Store<T>, wrap: fn(T) -> KubeObject)
    where
        T: Clone + kube::Resource<DynamicType = ()>,
    {
        match ev {
            Event::Applied(obj) => match store.apply(&obj) {
                Some(old) => self.on_update(wrap(old), wrap(obj)),
                None => self.on_add(wrap(obj)),
            },
            Event::Deleted(obj) => {
                store.delete(&obj);
                self.on_delete(wrap(obj));
            }
            Event::Restarted(objs) => {
                // The watch re-listed: replay the full state, retracting
                // anything that disappeared while we were away.
                let (applied, removed) = store.reset(objs);
                for old in removed {
                    self.on_delete(wrap(old));
                }
                for (old, new) in applied {
                    match old {
                        Some(old) => self.on_update(wrap(old), wrap(new)),
                        None => self.on_add(wrap(new)),
                    }
                }
            }
        }
    }
}

/// Remembers the last observed copy of each object so updates and re-lists
/// can be replayed to the handler as old/new pairs.
struct Store<T> {
    objects: HashMap<(String, String), T>,
}

// === impl Store ===

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
        }
    }
}

impl<T: Clone + kube::Resource<DynamicType = ()>> Store<T> {
    fn key(obj: &T) -> (String, String) {
        (
            obj.namespace().unwrap_or_else(|| "default".to_owned()),
            obj.name_any(),
        )
    }

    fn apply(&mut self, obj: &T) -> Option<T> {
        self.objects.insert(Self::key(obj), obj.clone())
    }

    fn delete(&mut self, obj: &T) -> Option<T> {
        self.objects.remove(&Self::key(obj))
    }

    /// Replaces the store contents with `objs`, returning the (old, new)
    /// pairs to apply and the objects that are gone.
    fn reset(&mut self, objs: Vec<T>) -> (Vec<(Option<T>, T)>, Vec<T>) {
        let mut prior = std::mem::take(&mut self.objects);
        let mut applied = Vec::with_capacity(objs.len());
        for obj in objs {
            let key = Self::key(&obj);
            let old = prior.remove(&key);
            self.objects.insert(key, obj.clone());
            applied.push((old, obj));
        }
        (applied, prior.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MemorySink;
    use k8s_openapi::api::core::v1 as core_v1;
    use k8s_openapi::api::networking::v1 as net_v1;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn kuard_service() -> KubeObject {
        KubeObject::Service(core_v1::Service {
            metadata: ObjectMeta {
                namespace: Some("default".to_owned()),
                name: Some("kuard".to_owned()),
                ..Default::default()
            },
            spec: Some(core_v1::ServiceSpec {
                ports: Some(vec![core_v1::ServicePort {
                    port: 80,
                    protocol: Some("TCP".to_owned()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn kuard_ingress(class: Option<&str>) -> KubeObject {
        KubeObject::Ingress(net_v1::Ingress {
            metadata: ObjectMeta {
                namespace: Some("default".to_owned()),
                name: Some("kuard".to_owned()),
                annotations: class.map(|c| {
                    [(INGRESS_CLASS_ANNOTATION.to_owned(), c.to_owned())]
                        .into_iter()
                        .collect()
                }),
                ..Default::default()
            },
            spec: Some(net_v1::IngressSpec {
                default_backend: Some(net_v1::IngressBackend {
                    service: Some(net_v1::IngressServiceBackend {
                        name: "kuard".to_owned(),
                        port: Some(net_v1::ServiceBackendPort {
                            number: Some(80),
                            ..Default::default()
                        }),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn handler(caches: Caches) -> EventHandler<MemorySink> {
        EventHandler::new(None, caches, MemorySink::default(), Arc::new(Registry::default()))
    }

    fn http_vhost_count(caches: &Caches) -> usize {
        caches
            .routes
            .values()
            .iter()
            .find(|rc| rc.name == envoy::HTTP_LISTENER_NAME)
            .map(|rc| rc.virtual_hosts.len())
            .unwrap_or(0)
    }

    #[test]
    fn foreign_ingress_class_is_dropped_silently() {
        let caches = Caches::default();
        let mut handler = handler(caches.clone());
        handler.on_add(kuard_ingress(Some("nginx")));
        // Nothing was admitted: no update ran, no version advanced.
        assert_eq!(caches.routes.version(), 0);
    }

    #[test]
    fn matching_and_absent_classes_are_admitted() {
        let caches = Caches::default();
        let mut handler = handler(caches.clone());
        handler.on_add(kuard_service());
        handler.on_add(kuard_ingress(None));
        assert_eq!(http_vhost_count(&caches), 1);

        handler.on_delete(kuard_ingress(None));
        assert_eq!(http_vhost_count(&caches), 0);

        handler.on_add(kuard_ingress(Some("contour")));
        assert_eq!(http_vhost_count(&caches), 1);
    }

    #[test]
    fn update_that_leaves_the_class_behaves_as_delete() {
        let caches = Caches::default();
        let mut handler = handler(caches.clone());
        handler.on_add(kuard_service());
        handler.on_add(kuard_ingress(None));
        assert_eq!(http_vhost_count(&caches), 1);

        handler.on_update(kuard_ingress(None), kuard_ingress(Some("nginx")));
        assert_eq!(http_vhost_count(&caches), 0);
    }

    #[test]
    fn update_between_foreign_classes_is_a_no_op() {
        let caches = Caches::default();
        let mut handler = handler(caches.clone());
        handler.on_add(kuard_service());
        let version = caches.routes.version();
        handler.on_update(kuard_ingress(Some("nginx")), kuard_ingress(Some("haproxy")));
        assert_eq!(caches.routes.version(), version);
    }
}
