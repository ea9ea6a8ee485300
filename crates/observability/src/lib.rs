//! # voicemesh-observability
//!
//! Observability-Crate fuer voicemesh:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Structured Logging (Text oder JSON) via tracing-subscriber

pub mod logging;
pub mod metrics;

pub use logging::{log_format_gueltig, log_level_gueltig, logging_initialisieren};
pub use metrics::{metrics_router, MeshMetrics};

use anyhow::Result;
use std::net::SocketAddr;

/// Startet den Metrik-Server (`GET /metrics`)
pub async fn metrics_server_starten(bind_addr: SocketAddr, metriken: MeshMetrics) -> Result<()> {
    let app = metrics_router(metriken);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Metrik-Server gestartet");

    axum::serve(listener, app).await?;
    Ok(())
}
