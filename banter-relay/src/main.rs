//! Banter Signaling Relay - Server Binary
//!
//! Usage:
//!   cargo run --release
//!   RELAY_ADDR=0.0.0.0:9090 cargo run --release

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use banter_relay::metrics::Metrics;
use banter_relay::server;

/// Default listen address when RELAY_ADDR is unset
const DEFAULT_ADDR: &str = "0.0.0.0:9090";

/// Cadence of the periodic status line
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("banter_relay=info".parse()?)
                .add_directive("tungstenite=warn".parse()?),
        )
        .init();

    let listen_addr = std::env::var("RELAY_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let metrics = Arc::new(RwLock::new(Metrics::new()));

    server::spawn_metrics_log(Arc::clone(&metrics), METRICS_LOG_INTERVAL);
    server::run(&listen_addr, metrics).await
}
