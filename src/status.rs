//! Build status reporting.
//!
//! Every DAG rebuild produces a status table describing what became of each
//! IngressRoute document: whether it was accepted, why it was rejected, and
//! which virtual host it contributes to. The table is published through a
//! [`StatusSink`] after every rebuild; publication failures are logged and
//! dropped so that a flaky status backend can never stall translation.

use crate::{dag::Meta, k8s::IngressRoute};
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;
use tracing::{debug, warn};

/// Why an object was rejected or sidelined during a DAG rebuild.
///
/// These never abort a rebuild; they become status descriptions.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("Spec.VirtualHost.Fqdn must be specified")]
    MissingFqdn,

    #[error("TLS Secret {0:?} is missing or has an empty certificate or key")]
    UnresolvableSecret(String),

    #[error("Service {0:?} not found or has no matching port")]
    UnresolvableService(String),

    #[error("cannot delegate to IngressRoute {0:?}: not found")]
    MissingDelegate(String),

    #[error("route {0:?} creates a delegation cycle")]
    DelegationCycle(String),

    #[error("route {0:?} declares neither services nor a delegate")]
    MissingRouteTarget(String),

    #[error("root IngressRoute cannot delegate to another root")]
    DelegateIsRoot,

    #[error("the path prefix {child:?} does not match the parent's path prefix {parent:?}")]
    PrefixMismatch { child: String, parent: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusKind {
    Valid,
    Invalid,
    Orphaned,
}

// === impl StatusKind ===

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Valid => "valid",
            StatusKind::Invalid => "invalid",
            StatusKind::Orphaned => "orphaned",
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one IngressRoute document in the last rebuild.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectStatus {
    pub meta: Meta,
    pub kind: StatusKind,
    pub description: String,
    /// The fqdn the document contributes to, when reachable from a root.
    pub vhost: Option<String>,
}

// === impl ObjectStatus ===

impl ObjectStatus {
    pub fn valid(meta: Meta, description: impl Into<String>, vhost: Option<String>) -> Self {
        Self {
            meta,
            kind: StatusKind::Valid,
            description: description.into(),
            vhost,
        }
    }

    pub fn invalid(meta: Meta, err: &BuildError, vhost: Option<String>) -> Self {
        Self {
            meta,
            kind: StatusKind::Invalid,
            description: err.to_string(),
            vhost,
        }
    }

    pub fn orphaned(meta: Meta) -> Self {
        Self {
            meta,
            kind: StatusKind::Orphaned,
            description: "this IngressRoute is not part of a delegation chain from a root IngressRoute"
                .to_owned(),
            vhost: None,
        }
    }
}

/// Where statuses go after a rebuild.
///
/// `set_status` may fail; the caller logs and ignores the failure.
pub trait StatusSink {
    fn set_status(&self, status: &ObjectStatus) -> anyhow::Result<()>;
}

/// Publishes statuses to the IngressRoute status subresource.
///
/// Publication happens on a background task so the (synchronous) event
/// handler path never waits on the API server; per-object failures are
/// logged from the task.
#[derive(Clone)]
pub struct KubeStatusSink {
    client: kube::Client,
}

// === impl KubeStatusSink ===

impl KubeStatusSink {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

impl StatusSink for KubeStatusSink {
    fn set_status(&self, status: &ObjectStatus) -> anyhow::Result<()> {
        let api: Api<IngressRoute> = Api::namespaced(self.client.clone(), &status.meta.namespace);
        let name = status.meta.name.clone();
        let patch = json!({
            "status": {
                "currentStatus": status.kind.as_str(),
                "description": status.description,
            }
        });
        tokio::spawn(async move {
            match api
                .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                Ok(_) => debug!(%name, "status updated"),
                Err(error) => warn!(%name, %error, "failed to update status"),
            }
        });
        Ok(())
    }
}

/// Records statuses in memory; the sink used by tests.
#[derive(Clone, Debug, Default)]
pub struct MemorySink(std::sync::Arc<parking_lot::Mutex<Vec<ObjectStatus>>>);

// === impl MemorySink ===

impl MemorySink {
    pub fn statuses(&self) -> Vec<ObjectStatus> {
        self.0.lock().clone()
    }
}

impl StatusSink for MemorySink {
    fn set_status(&self, status: &ObjectStatus) -> anyhow::Result<()> {
        self.0.lock().push(status.clone());
        Ok(())
    }
}
