#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! An xDS control plane for Envoy.
//!
//! The control plane watches Kubernetes cluster state (Ingresses, IngressRoutes,
//! Services, Endpoints, and TLS Secrets) and continuously translates it into the
//! four Envoy resource sets (clusters, cluster load assignments, listeners, and
//! route configurations), pushing fresh snapshots to connected proxies over
//! long-lived discovery streams whenever the derived state changes.
//!
//! Data flows one way: watch events feed the [`handler::EventHandler`], which
//! rebuilds the [`dag`] from the current object set, runs the [`envoy`] visitors
//! over it, and installs the results into the versioned [`cache`]s that the
//! [`grpc`] discovery services serve from.

pub mod cache;
pub mod dag;
pub mod envoy;
pub mod grpc;
pub mod handler;
pub mod hashname;
pub mod k8s;
pub mod metrics;
pub mod status;

/// The ingress class served when none is configured.
pub const DEFAULT_INGRESS_CLASS: &str = "contour";

/// Ingresses carrying this annotation are admitted only when its value
/// matches the configured ingress class.
pub(crate) const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
