//! Bootstrap configuration for the proxy.
//!
//! Renders the static YAML that points a freshly started Envoy at this
//! management server: an admin endpoint plus a single static `xds_cluster`
//! that the dynamic LDS/CDS subscriptions flow through.

use super::XDS_CLUSTER_NAME;
use serde::Serialize;
use serde_json::{json, Value};

/// Parameters of the rendered bootstrap.
#[derive(Clone, Debug)]
pub struct Config {
    /// Access log target for the administration server.
    pub admin_access_log_path: String,
    pub admin_address: String,
    pub admin_port: u16,
    /// Address of the xDS management server.
    pub xds_address: String,
    pub xds_grpc_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admin_access_log_path: "/dev/null".to_owned(),
            admin_address: "127.0.0.1".to_owned(),
            admin_port: 9001,
            xds_address: "127.0.0.1".to_owned(),
            xds_grpc_port: 8001,
        }
    }
}

/// Writes the bootstrap YAML for `config` to `w`.
pub fn write(config: &Config, w: impl std::io::Write) -> anyhow::Result<()> {
    serde_yaml::to_writer(w, &bootstrap(config))?;
    Ok(())
}

#[derive(Serialize)]
struct Bootstrap {
    dynamic_resources: Value,
    static_resources: Value,
    admin: Value,
}

fn bootstrap(config: &Config) -> Bootstrap {
    let api_config_source = json!({
        "api_type": "GRPC",
        "transport_api_version": "V3",
        "grpc_services": [{"envoy_grpc": {"cluster_name": XDS_CLUSTER_NAME}}],
    });
    Bootstrap {
        dynamic_resources: json!({
            "lds_config": {
                "resource_api_version": "V3",
                "api_config_source": api_config_source.clone(),
            },
            "cds_config": {
                "resource_api_version": "V3",
                "api_config_source": api_config_source,
            },
        }),
        static_resources: json!({
            "clusters": [{
                "name": XDS_CLUSTER_NAME,
                "connect_timeout": "5s",
                "type": "STATIC",
                "lb_policy": "ROUND_ROBIN",
                "typed_extension_protocol_options": {
                    "envoy.extensions.upstreams.http.v3.HttpProtocolOptions": {
                        "@type": "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions",
                        "explicit_http_config": {"http2_protocol_options": {}},
                    },
                },
                "load_assignment": {
                    "cluster_name": XDS_CLUSTER_NAME,
                    "endpoints": [{
                        "lb_endpoints": [{
                            "endpoint": {
                                "address": {
                                    "socket_address": {
                                        "address": config.xds_address,
                                        "port_value": config.xds_grpc_port,
                                    },
                                },
                            },
                        }],
                    }],
                },
            }],
        }),
        admin: json!({
            "access_log_path": config.admin_access_log_path,
            "address": {
                "socket_address": {
                    "address": config.admin_address,
                    "port_value": config.admin_port,
                },
            },
        }),
    }
}
