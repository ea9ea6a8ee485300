//! voicemesh-node – Bibliotheks-Root
//!
//! Baut aus der Konfiguration einen lauffaehigen Knoten: gemeinsames
//! In-Memory-Verzeichnis, Loopback-Transport, der lokale Teilnehmer und
//! optional simulierte Teilnehmer im selben Prozess.

pub mod config;

use anyhow::Result;
use std::sync::Arc;
use voicemesh_audio::{SharedCapture, SpectralDenoiserLoader, SyntheticCapture, ToneSpec};
use voicemesh_core::{SessionEvent, UserId};
use voicemesh_directory::{DirectoryClient, InMemoryList};
use voicemesh_mesh::{
    LoopbackNetwork, MediaAcquirer, SessionController, SessionIdentity, VoiceMesh,
    VoiceMeshHandle,
};
use voicemesh_observability::MeshMetrics;

use config::{CaptureArt, NodeConfig};

/// Haelt den laufenden Knoten zusammen
pub struct Node {
    pub config: NodeConfig,
    directory: DirectoryClient,
    network: LoopbackNetwork,
    metrics: MeshMetrics,
}

impl Node {
    /// Erstellt einen neuen Knoten aus der gegebenen Konfiguration
    pub fn neu(config: NodeConfig) -> Result<Self> {
        Ok(Self {
            config,
            directory: DirectoryClient::new(Arc::new(InMemoryList::new())),
            network: LoopbackNetwork::new(),
            metrics: MeshMetrics::neu()?,
        })
    }

    pub fn metrics(&self) -> &MeshMetrics {
        &self.metrics
    }

    pub fn directory(&self) -> &DirectoryClient {
        &self.directory
    }

    /// Startet den lokalen Teilnehmer
    pub fn lokal_starten(&self) -> Result<VoiceMeshHandle> {
        let identity = SessionIdentity {
            user_id: UserId::from(self.config.identitaet.user_id.as_str()),
            display_name: self.config.identitaet.display_name.clone(),
        };
        let controller = SessionController::new(
            identity,
            self.config.audio.dsp.clone(),
            self.directory.clone(),
            Arc::new(self.network.transport()),
            MediaAcquirer::new(self.lokale_capture()?, Some(Arc::new(SpectralDenoiserLoader))),
            self.metrics.clone(),
        );
        Ok(VoiceMesh::spawn(controller, self.config.timing.mesh_timings()))
    }

    /// Startet die simulierten Teilnehmer aus `[demo]`
    pub fn demo_starten(&self) -> Result<Vec<VoiceMeshHandle>> {
        let mut handles = Vec::with_capacity(self.config.demo.peers.len());
        for (i, name) in self.config.demo.peers.iter().enumerate() {
            let capture = SyntheticCapture::new();
            capture.set_tone(Some(ToneSpec {
                frequency_hz: self.config.demo.ton_hz + 110.0 * i as f32,
                amplitude: 0.2,
            }));
            // Eigene Registry, damit die Metriken nur den lokalen Teilnehmer zeigen
            let controller = SessionController::new(
                SessionIdentity {
                    user_id: UserId::from(name.as_str()),
                    display_name: name.clone(),
                },
                Default::default(),
                self.directory.clone(),
                Arc::new(self.network.transport()),
                MediaAcquirer::new(Arc::new(capture), None),
                MeshMetrics::neu()?,
            );
            handles.push(VoiceMesh::spawn(controller, self.config.timing.mesh_timings()));
            tracing::debug!(peer = %name, "Simulierter Teilnehmer gestartet");
        }
        Ok(handles)
    }

    fn lokale_capture(&self) -> Result<SharedCapture> {
        match self.config.audio.capture {
            CaptureArt::Synthetisch => {
                let capture = SyntheticCapture::new();
                capture.set_tone(Some(ToneSpec {
                    frequency_hz: self.config.audio.ton_hz,
                    amplitude: self.config.audio.ton_amplitude,
                }));
                Ok(Arc::new(capture))
            }
            #[cfg(feature = "hardware")]
            CaptureArt::Cpal => Ok(Arc::new(voicemesh_audio::CpalCapture::new(
                voicemesh_audio::EchoReference::new(),
            ))),
            #[cfg(not(feature = "hardware"))]
            CaptureArt::Cpal => Err(anyhow::anyhow!(
                "audio.capture = \"cpal\" benoetigt das Feature `hardware`"
            )),
        }
    }

    /// Laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Simulierte Teilnehmer starten und beitreten
    /// 2. Lokalen Teilnehmer starten und beitreten
    /// 3. Ereignisse loggen bis Ctrl-C
    /// 4. Alle Teilnehmer verlassen den Kanal (best-effort)
    pub async fn starten(self) -> Result<()> {
        let demo = self.demo_starten()?;
        for handle in &demo {
            handle.join().await?;
        }

        let lokal = self.lokal_starten()?;
        let mut events = lokal.events();
        lokal.join().await?;

        tracing::info!(
            user_id = %self.config.identitaet.user_id,
            demo_peers = demo.len(),
            "Knoten laeuft. Warte auf Shutdown-Signal (Ctrl-C)..."
        );

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => ereignis_loggen(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(verpasst = n, "Ereignisse uebersprungen");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        tracing::info!("Shutdown-Signal empfangen, Knoten wird beendet");
        lokal.shutdown().await;
        for handle in &demo {
            handle.shutdown().await;
        }
        Ok(())
    }
}

fn ereignis_loggen(event: &SessionEvent) {
    match event {
        SessionEvent::JoinFailed { message } | SessionEvent::SwapFailed { message } => {
            tracing::warn!("{}", message);
        }
        SessionEvent::SpeakingChanged { .. } => tracing::trace!(?event, "Ereignis"),
        other => tracing::info!(event = ?other, "Ereignis"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> NodeConfig {
        let mut cfg = NodeConfig::default();
        cfg.timing.reconcile_ms = 20;
        cfg.timing.activity_ms = 10;
        cfg.timing.early_reconcile_gap_ms = 5;
        cfg
    }

    #[tokio::test]
    async fn lokaler_teilnehmer_sieht_demo_peers() {
        let node = Node::neu(test_config()).unwrap();
        let demo = node.demo_starten().unwrap();
        for h in &demo {
            h.join().await.unwrap();
        }
        let lokal = node.lokal_starten().unwrap();
        lokal.join().await.unwrap();

        let mut view = lokal.view();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let v = view.borrow_and_update();
                    if v.peers.len() == 2 && v.peers.iter().all(|p| p.is_connected) {
                        break;
                    }
                }
                view.changed().await.unwrap();
            }
        })
        .await
        .expect("Demo-Peers nicht verbunden");

        assert_eq!(node.metrics().connected_peers.get(), 2);
        assert_eq!(node.directory().entries().len(), 3);

        lokal.shutdown().await;
        for h in &demo {
            h.shutdown().await;
        }
        assert!(node.directory().entries().is_empty());
    }

    #[cfg(not(feature = "hardware"))]
    #[test]
    fn cpal_ohne_feature_schlaegt_fehl() {
        let mut cfg = NodeConfig::default();
        cfg.audio.capture = CaptureArt::Cpal;
        let node = Node::neu(cfg).unwrap();
        assert!(node.lokal_starten().is_err());
    }
}
