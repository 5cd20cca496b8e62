//! HTCP demo server
//!
//! Serves a handful of example transactions. Configuration is layered
//! from an optional `htcp.toml` next to the working directory and
//! `HTCP_*` environment variables (`.env` is honored).

use anyhow::Result;
use htcp_core::utils::json_to_bytes;
use htcp_core::HandlerRegistry;
use htcp_server::{Server, ServerConfig};
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::info;

fn load_config() -> Result<ServerConfig> {
    let settings = config::Config::builder()
        .set_default("host", "127.0.0.1")?
        .set_default("port", 9576i64)?
        .add_source(config::File::with_name("htcp").required(false))
        .add_source(config::Environment::with_prefix("HTCP"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Register the demo handlers
///
/// `get_server_info` reports on the server itself, which only exists
/// once the registry is frozen; the slot is filled right after
/// construction, before the first connection can be accepted.
fn build_registry(server_slot: Arc<OnceLock<Server>>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register_fn("echo", |req| Ok(req.data().to_vec()));

    registry.register_fn("ping", |_| {
        json_to_bytes(&serde_json::json!({ "status": "pong" }))
    });

    registry.register_fn("get_my_ip", |req| {
        json_to_bytes(&serde_json::json!({ "your_ip": req.client.ip.to_string() }))
    });

    registry.register_fn("get_server_info", move |_| {
        let Some(server) = server_slot.get() else {
            anyhow::bail!("server is still starting up")
        };
        json_to_bytes(&serde_json::json!({
            "server_name": server.config().name,
            "active_connections": server.active_connections(),
            "encryption_enabled": server.config().dh_encryption,
            "max_connections": server.config().max_connections,
            "handle_connections": server.config().handle_connections,
        }))
    });

    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = load_config()?;

    if config.enable_logging {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(config.logging_level.parse()?),
            )
            .init();
    }

    info!("HTCP server v{}", env!("CARGO_PKG_VERSION"));

    let server_slot = Arc::new(OnceLock::new());
    let server = Server::new(config, build_registry(Arc::clone(&server_slot)))?;
    let _ = server_slot.set(server.clone());

    let listener = tokio::net::TcpListener::bind(server.config().bind_addr()).await?;
    info!(
        "{} listening on {}",
        server.config().name,
        server.config().bind_addr()
    );

    server
        .serve_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
