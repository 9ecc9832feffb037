use std::sync::Arc;

use flittig_devserver::{serve, ServerState};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:9001";

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Get bind address from env or use default
    let addr =
        std::env::var("FLITTIG_DEVSERVER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());

    let state = Arc::new(ServerState::new());

    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Flittig dev relay listening on ws://{}/chat", addr);

    serve(listener, state).await;
}
