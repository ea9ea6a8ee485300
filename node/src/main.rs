//! voicemesh-node – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging, startet optional den
//! Metrik-Server und laeuft bis Ctrl-C.

use anyhow::Result;
use voicemesh_node::{config::NodeConfig, Node};
use voicemesh_observability::{logging_initialisieren, metrics_server_starten};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("VOICEMESH_CONFIG").unwrap_or_else(|_| "voicemesh.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = NodeConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "voicemesh-node wird initialisiert"
    );

    let node = Node::neu(config)?;

    if node.config.metrics.aktiviert {
        let adresse = node.config.metrics_bind_adresse()?;
        let metriken = node.metrics().clone();
        tokio::spawn(async move {
            if let Err(e) = metrics_server_starten(adresse, metriken).await {
                tracing::error!("Metrik-Server beendet: {}", e);
            }
        });
    }

    node.starten().await
}
