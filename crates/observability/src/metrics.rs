//! Prometheus-kompatible Metriken fuer voicemesh
//!
//! Registrierte Metriken:
//! - `voicemesh_connected_peers` – Gauge: Peers mit aufgebauter Verbindung
//! - `voicemesh_reconcile_ticks_total` – Counter: Abgleich-Durchlaeufe
//! - `voicemesh_reconcile_duration_seconds` – Histogram: Dauer eines Abgleichs
//! - `voicemesh_signal_ingest_failures_total` – Counter: Verworfene Signale
//! - `voicemesh_self_heals_total` – Counter: Neu veroeffentlichte Ankuendigungen
//! - `voicemesh_stale_entries_removed_total` – Counter: Entfernte Geister-Eintraege
//! - `voicemesh_link_failures_total` – Counter: Fehlgeschlagene Peer-Verbindungen
//! - `voicemesh_joins_total` – Counter: Join-Versuche (ergebnis)
//! - `voicemesh_stream_swaps_total` – Counter: Geraete-Wechsel (ergebnis)

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle voicemesh-Prometheus-Metriken
#[derive(Clone)]
pub struct MeshMetrics {
    pub registry: Arc<Registry>,

    pub connected_peers: IntGauge,
    pub reconcile_ticks: IntCounter,
    pub reconcile_duration_seconds: Histogram,
    pub signal_ingest_failures: IntCounter,
    pub self_heals: IntCounter,
    pub stale_entries_removed: IntCounter,
    pub link_failures: IntCounter,
    pub joins_total: IntCounterVec,
    pub stream_swaps_total: IntCounterVec,
}

impl MeshMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_peers = IntGauge::with_opts(Opts::new(
            "voicemesh_connected_peers",
            "Anzahl der Peers mit aufgebauter Verbindung",
        ))?;
        registry.register(Box::new(connected_peers.clone()))?;

        let reconcile_ticks = IntCounter::with_opts(Opts::new(
            "voicemesh_reconcile_ticks_total",
            "Anzahl der Abgleich-Durchlaeufe",
        ))?;
        registry.register(Box::new(reconcile_ticks.clone()))?;

        let reconcile_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "voicemesh_reconcile_duration_seconds",
                "Dauer eines Abgleich-Durchlaufs in Sekunden",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;

        let signal_ingest_failures = IntCounter::with_opts(Opts::new(
            "voicemesh_signal_ingest_failures_total",
            "Anzahl fehlerhafter oder unerwarteter Signale",
        ))?;
        registry.register(Box::new(signal_ingest_failures.clone()))?;

        let self_heals = IntCounter::with_opts(Opts::new(
            "voicemesh_self_heals_total",
            "Anzahl neu veroeffentlichter lokaler Ankuendigungen",
        ))?;
        registry.register(Box::new(self_heals.clone()))?;

        let stale_entries_removed = IntCounter::with_opts(Opts::new(
            "voicemesh_stale_entries_removed_total",
            "Anzahl entfernter Geister-Eintraege",
        ))?;
        registry.register(Box::new(stale_entries_removed.clone()))?;

        let link_failures = IntCounter::with_opts(Opts::new(
            "voicemesh_link_failures_total",
            "Anzahl fehlgeschlagener Peer-Verbindungen",
        ))?;
        registry.register(Box::new(link_failures.clone()))?;

        let joins_total = IntCounterVec::new(
            Opts::new("voicemesh_joins_total", "Anzahl der Join-Versuche"),
            &["ergebnis"],
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        let stream_swaps_total = IntCounterVec::new(
            Opts::new("voicemesh_stream_swaps_total", "Anzahl der Geraete-Wechsel"),
            &["ergebnis"],
        )?;
        registry.register(Box::new(stream_swaps_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_peers,
            reconcile_ticks,
            reconcile_duration_seconds,
            signal_ingest_failures,
            self_heals,
            stale_entries_removed,
            link_failures,
            joins_total,
            stream_swaps_total,
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: MeshMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<MeshMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = MeshMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn registries_sind_unabhaengig() {
        let a = MeshMetrics::neu().unwrap();
        let b = MeshMetrics::neu().unwrap();
        a.self_heals.inc();
        assert_eq!(a.self_heals.get(), 1);
        assert_eq!(b.self_heals.get(), 0);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = MeshMetrics::neu().unwrap();
        metriken.connected_peers.set(3);
        metriken.reconcile_ticks.inc();
        metriken.joins_total.with_label_values(&["ok"]).inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("voicemesh_connected_peers 3"));
        assert!(output.contains("voicemesh_reconcile_ticks_total 1"));
        assert!(output.contains("voicemesh_joins_total{ergebnis=\"ok\"} 1"));
        assert!(output.contains("# HELP"));
    }

    #[tokio::test]
    async fn metrics_endpunkt_liefert_text() {
        let metriken = MeshMetrics::neu().unwrap();
        metriken.link_failures.inc();
        let app = metrics_router(metriken);

        let antwort = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/metrics")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(antwort.status(), axum::http::StatusCode::OK);

        let body = axum::body::to_bytes(antwort.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("voicemesh_link_failures_total 1"));
    }
}
