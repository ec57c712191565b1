//! The xDS discovery server.
//!
//! Four per-type services (CDS, EDS, LDS, RDS) share one generic driver. A
//! stream registers with its cache at the client's last known version, waits
//! for the version to advance, sends the whole snapshot with a fresh nonce,
//! and re-registers. Waiters are single-shot, so a stream that falls behind
//! observes only the newest version; snapshots are idempotent, so nothing is
//! lost.
//!
//! Requests after the first are ACK bookkeeping: they are drained and logged
//! but never gate the send loop, and `resource_names` is ignored (the full
//! set is always returned).

use crate::cache::{Cache, Resource};
use crate::envoy::Caches;
use async_stream::try_stream;
use futures::prelude::*;
use prost::Message;
use std::{net::SocketAddr, pin::Pin, sync::Arc};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, trace};
use xds_api::pb::envoy::config::{
    cluster::v3::Cluster, endpoint::v3::ClusterLoadAssignment, listener::v3::Listener,
    route::v3::RouteConfiguration,
};
use xds_api::pb::envoy::service::{
    cluster::v3::cluster_discovery_service_server::{
        ClusterDiscoveryService, ClusterDiscoveryServiceServer,
    },
    discovery::v3::{
        DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
    },
    endpoint::v3::endpoint_discovery_service_server::{
        EndpointDiscoveryService, EndpointDiscoveryServiceServer,
    },
    listener::v3::listener_discovery_service_server::{
        ListenerDiscoveryService, ListenerDiscoveryServiceServer,
    },
    route::v3::route_discovery_service_server::{
        RouteDiscoveryService, RouteDiscoveryServiceServer,
    },
};
use xds_api::pb::google::protobuf::Any;

/// Envoy opens one EDS stream per cluster; the HTTP/2 default of ~100
/// concurrent streams per connection is far too small.
const MAX_CONCURRENT_STREAMS: u32 = 1 << 20;

// Resource type URLs, fixed per kind and echoed in every response.
pub const CLUSTER_TYPE: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ENDPOINT_TYPE: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const LISTENER_TYPE: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const ROUTE_TYPE: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

/// A resource kind servable over discovery, with its fixed type URL.
pub trait XdsResource: Resource + Message {
    const TYPE_URL: &'static str;
}

impl XdsResource for Cluster {
    const TYPE_URL: &'static str = CLUSTER_TYPE;
}

impl XdsResource for ClusterLoadAssignment {
    const TYPE_URL: &'static str = ENDPOINT_TYPE;
}

impl XdsResource for Listener {
    const TYPE_URL: &'static str = LISTENER_TYPE;
}

impl XdsResource for RouteConfiguration {
    const TYPE_URL: &'static str = ROUTE_TYPE;
}

pub type DiscoveryStream = Pin<Box<dyn Stream<Item = Result<DiscoveryResponse, Status>> + Send>>;
pub type DeltaDiscoveryStream =
    Pin<Box<dyn Stream<Item = Result<DeltaDiscoveryResponse, Status>> + Send>>;

/// The four discovery services bundled over one transport.
pub struct Server {
    caches: Caches,
    drain: drain::Watch,
}

impl Server {
    pub fn new(caches: Caches, drain: drain::Watch) -> Self {
        Self { caches, drain }
    }

    /// Assembles the tonic router serving all four resource types.
    pub fn into_router(self) -> tonic::transport::server::Router {
        let Self { caches, drain } = self;
        tonic::transport::Server::builder()
            .max_concurrent_streams(MAX_CONCURRENT_STREAMS)
            .add_service(ClusterDiscoveryServiceServer::new(Discovery::new(
                caches.clusters,
                drain.clone(),
            )))
            .add_service(EndpointDiscoveryServiceServer::new(Discovery::new(
                caches.endpoints,
                drain.clone(),
            )))
            .add_service(ListenerDiscoveryServiceServer::new(Discovery::new(
                caches.listeners,
                drain.clone(),
            )))
            .add_service(RouteDiscoveryServiceServer::new(Discovery::new(
                caches.routes,
                drain,
            )))
    }

    /// Serves until the drain signal fires.
    pub async fn serve(self, addr: SocketAddr) -> Result<(), tonic::transport::Error> {
        let drain = self.drain.clone();
        self.into_router()
            .serve_with_shutdown(addr, async move {
                let _ = drain.signaled().await;
            })
            .await
    }
}

/// One resource kind's fetch and stream endpoints, backed by its cache.
#[derive(Clone)]
pub struct Discovery<T> {
    cache: Arc<Cache<T>>,
    drain: drain::Watch,
}

impl<T: XdsResource> Discovery<T> {
    pub fn new(cache: Arc<Cache<T>>, drain: drain::Watch) -> Self {
        Self { cache, drain }
    }

    /// Returns the current snapshot once, at the current version.
    fn fetch(&self) -> DiscoveryResponse {
        response(self.cache.as_ref(), self.cache.version(), 0)
    }

    fn stream(&self, requests: Streaming<DiscoveryRequest>) -> DiscoveryStream {
        stream_resources(self.cache.clone(), requests, self.drain.clone())
    }
}

/// Serializes the cache snapshot into a response. Entries are emitted in
/// cache order (sorted by name).
fn response<T: XdsResource>(cache: &Cache<T>, version: u64, nonce: u64) -> DiscoveryResponse {
    let resources = cache
        .values()
        .iter()
        .map(|value| Any {
            type_url: T::TYPE_URL.to_owned(),
            value: value.encode_to_vec(),
        })
        .collect();
    DiscoveryResponse {
        version_info: version.to_string(),
        resources,
        type_url: T::TYPE_URL.to_owned(),
        nonce: nonce.to_string(),
        ..Default::default()
    }
}

fn stream_resources<T: XdsResource>(
    cache: Arc<Cache<T>>,
    mut requests: Streaming<DiscoveryRequest>,
    drain: drain::Watch,
) -> DiscoveryStream {
    Box::pin(try_stream! {
        tokio::pin! {
            let shutdown = drain.signaled();
        }

        // The first request opens the subscription and carries the last
        // version the client acknowledged, if any.
        let mut last: u64 = match requests.next().await {
            Some(req) => req?.version_info.parse().unwrap_or(0),
            None => return,
        };
        let mut nonce: u64 = 0;

        loop {
            let notify = cache.register(last);
            tokio::select! {
                version = notify => {
                    let version = match version {
                        Ok(version) => version,
                        // The cache is gone; the server is shutting down.
                        Err(_) => return,
                    };
                    last = version;
                    nonce += 1;
                    trace!(version, nonce, "sending snapshot");
                    yield response(cache.as_ref(), version, nonce);
                }

                req = requests.next() => match req {
                    Some(Ok(req)) => {
                        trace!(
                            version_info = %req.version_info,
                            response_nonce = %req.response_nonce,
                            type_url = %req.type_url,
                            "request",
                        );
                    }
                    Some(Err(status)) => {
                        debug!(%status, "stream read failed");
                        return;
                    }
                    None => return,
                },

                _ = &mut shutdown => return,
            }
        }
    })
}

#[tonic::async_trait]
impl ClusterDiscoveryService for Discovery<Cluster> {
    type StreamClustersStream = DiscoveryStream;
    type DeltaClustersStream = DeltaDiscoveryStream;

    async fn stream_clusters(
        &self,
        req: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamClustersStream>, Status> {
        Ok(Response::new(self.stream(req.into_inner())))
    }

    async fn delta_clusters(
        &self,
        _req: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaClustersStream>, Status> {
        Err(Status::unimplemented("delta xDS is not supported"))
    }

    async fn fetch_clusters(
        &self,
        _req: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        Ok(Response::new(self.fetch()))
    }
}

#[tonic::async_trait]
impl EndpointDiscoveryService for Discovery<ClusterLoadAssignment> {
    type StreamEndpointsStream = DiscoveryStream;
    type DeltaEndpointsStream = DeltaDiscoveryStream;

    async fn stream_endpoints(
        &self,
        req: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamEndpointsStream>, Status> {
        Ok(Response::new(self.stream(req.into_inner())))
    }

    async fn delta_endpoints(
        &self,
        _req: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaEndpointsStream>, Status> {
        Err(Status::unimplemented("delta xDS is not supported"))
    }

    async fn fetch_endpoints(
        &self,
        _req: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        Ok(Response::new(self.fetch()))
    }
}

#[tonic::async_trait]
impl ListenerDiscoveryService for Discovery<Listener> {
    type StreamListenersStream = DiscoveryStream;
    type DeltaListenersStream = DeltaDiscoveryStream;

    async fn stream_listeners(
        &self,
        req: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamListenersStream>, Status> {
        Ok(Response::new(self.stream(req.into_inner())))
    }

    async fn delta_listeners(
        &self,
        _req: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaListenersStream>, Status> {
        Err(Status::unimplemented("delta xDS is not supported"))
    }

    async fn fetch_listeners(
        &self,
        _req: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        Ok(Response::new(self.fetch()))
    }
}

#[tonic::async_trait]
impl RouteDiscoveryService for Discovery<RouteConfiguration> {
    type StreamRoutesStream = DiscoveryStream;
    type DeltaRoutesStream = DeltaDiscoveryStream;

    async fn stream_routes(
        &self,
        req: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamRoutesStream>, Status> {
        Ok(Response::new(self.stream(req.into_inner())))
    }

    async fn delta_routes(
        &self,
        _req: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaRoutesStream>, Status> {
        Err(Status::unimplemented("delta xDS is not supported"))
    }

    async fn fetch_routes(
        &self,
        _req: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        Ok(Response::new(self.fetch()))
    }
}
