#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use contour::{
    envoy::{bootstrap, Caches},
    grpc,
    handler::EventHandler,
    k8s::ResourceWatches,
    metrics::Registry,
    status::KubeStatusSink,
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "contour", about = "An xDS control plane for Envoy")]
struct Args {
    #[arg(long, default_value = "contour=info,warn", env = "CONTOUR_LOG")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch the cluster and serve discovery to proxies.
    Serve {
        /// Address the xDS gRPC server listens on.
        #[arg(long, default_value = "127.0.0.1:8001")]
        xds_addr: SocketAddr,

        /// The ingress class this instance serves.
        #[arg(long)]
        ingress_class: Option<String>,
    },

    /// Write a proxy bootstrap configuration and exit.
    Bootstrap {
        /// Path the YAML is written to.
        path: PathBuf,

        #[arg(long, default_value = "/dev/null")]
        admin_access_log_path: String,

        #[arg(long, default_value = "127.0.0.1")]
        admin_address: String,

        #[arg(long, default_value_t = 9001)]
        admin_port: u16,

        #[arg(long, default_value = "127.0.0.1")]
        xds_address: String,

        #[arg(long, default_value_t = 8001)]
        xds_port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(&args.log_level)?)
        .init();

    match args.command {
        Command::Bootstrap {
            path,
            admin_access_log_path,
            admin_address,
            admin_port,
            xds_address,
            xds_port,
        } => {
            let config = bootstrap::Config {
                admin_access_log_path,
                admin_address,
                admin_port,
                xds_address,
                xds_grpc_port: xds_port,
            };
            let file = std::fs::File::create(&path)?;
            bootstrap::write(&config, file)?;
            info!(path = %path.display(), "wrote bootstrap configuration");
            Ok(())
        }
        Command::Serve {
            xds_addr,
            ingress_class,
        } => serve(xds_addr, ingress_class).await,
    }
}

async fn serve(addr: SocketAddr, ingress_class: Option<String>) -> Result<()> {
    let client = kube::Client::try_default().await?;

    let caches = Caches::default();
    let metrics = Arc::new(Registry::default());
    let handler = EventHandler::new(
        ingress_class,
        caches.clone(),
        KubeStatusSink::new(client.clone()),
        metrics,
    );
    tokio::spawn(handler.run(ResourceWatches::from(client)));

    let (close, watch) = drain::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
        close.drain().await;
    });

    info!(%addr, "serving xDS");
    grpc::Server::new(caches, watch).serve(addr).await?;
    Ok(())
}
