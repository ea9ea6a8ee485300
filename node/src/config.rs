//! Knoten-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Knoten ohne Konfigurationsdatei
//! lauffaehig ist.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use voicemesh_audio::DspConfig;
use voicemesh_mesh::MeshTimings;
use voicemesh_observability::{log_format_gueltig, log_level_gueltig};

/// Vollstaendige Knoten-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Wer lokal teilnimmt
    pub identitaet: IdentitaetEinstellungen,
    /// Capture-Backend und DSP-Kette
    pub audio: AudioEinstellungen,
    /// Perioden der Laufzeit
    pub timing: TimingEinstellungen,
    pub logging: LoggingEinstellungen,
    pub metrics: MetrikEinstellungen,
    /// Simulierte Teilnehmer im selben Prozess
    pub demo: DemoEinstellungen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitaetEinstellungen {
    /// Stabile Konto-ID
    pub user_id: String,
    pub display_name: String,
}

impl Default for IdentitaetEinstellungen {
    fn default() -> Self {
        Self {
            user_id: "lokal".into(),
            display_name: "Lokal".into(),
        }
    }
}

/// Capture-Backend fuer den lokalen Teilnehmer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureArt {
    /// Sinuston ohne Hardware
    #[default]
    Synthetisch,
    /// Mikrofon via cpal (Feature `hardware`)
    Cpal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    pub capture: CaptureArt,
    /// Frequenz des synthetischen Tons in Hz
    pub ton_hz: f32,
    /// Amplitude des synthetischen Tons (0.0..=1.0)
    pub ton_amplitude: f32,
    /// DSP-Konfiguration beim Start
    #[serde(flatten)]
    pub dsp: DspConfig,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            capture: CaptureArt::Synthetisch,
            ton_hz: 440.0,
            ton_amplitude: 0.3,
            dsp: DspConfig::default(),
        }
    }
}

/// Perioden in Millisekunden
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingEinstellungen {
    pub reconcile_ms: u64,
    pub activity_ms: u64,
    pub device_poll_ms: u64,
    pub early_reconcile_gap_ms: u64,
}

impl Default for TimingEinstellungen {
    fn default() -> Self {
        let t = MeshTimings::default();
        Self {
            reconcile_ms: t.reconcile.as_millis() as u64,
            activity_ms: t.activity.as_millis() as u64,
            device_poll_ms: t.device_poll.as_millis() as u64,
            early_reconcile_gap_ms: t.early_reconcile_gap.as_millis() as u64,
        }
    }
}

impl TimingEinstellungen {
    /// Perioden fuer die Laufzeit. Null wird auf 1ms angehoben.
    pub fn mesh_timings(&self) -> MeshTimings {
        let ms = |v: u64| Duration::from_millis(v.max(1));
        MeshTimings {
            reconcile: ms(self.reconcile_ms),
            activity: ms(self.activity_ms),
            device_poll: ms(self.device_poll_ms),
            early_reconcile_gap: Duration::from_millis(self.early_reconcile_gap_ms),
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Prometheus-Endpunkt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetrikEinstellungen {
    pub aktiviert: bool,
    pub bind_adresse: String,
    pub port: u16,
}

impl Default for MetrikEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: false,
            bind_adresse: "127.0.0.1".into(),
            port: 9300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoEinstellungen {
    /// Namen der simulierten Teilnehmer (leer = keine)
    pub peers: Vec<String>,
    /// Grundfrequenz; jeder weitere Teilnehmer liegt 110 Hz hoeher
    pub ton_hz: f32,
}

impl Default for DemoEinstellungen {
    fn default() -> Self {
        Self {
            peers: vec!["anna".into(), "ben".into()],
            ton_hz: 220.0,
        }
    }
}

impl NodeConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                config.pruefen()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft Werte, die serde nicht abfangen kann
    pub fn pruefen(&self) -> anyhow::Result<()> {
        if self.identitaet.user_id.trim().is_empty() {
            anyhow::bail!("identitaet.user_id darf nicht leer sein");
        }
        if !(0.0..=1.0).contains(&self.audio.dsp.output_volume) {
            anyhow::bail!(
                "audio.output_volume muss zwischen 0.0 und 1.0 liegen, war {}",
                self.audio.dsp.output_volume
            );
        }
        if self
            .demo
            .peers
            .iter()
            .any(|p| p == &self.identitaet.user_id)
        {
            anyhow::bail!("demo.peers enthaelt die eigene user_id");
        }
        if !log_level_gueltig(&self.logging.level) {
            anyhow::bail!(
                "logging.level muss trace, debug, info, warn oder error sein, war '{}'",
                self.logging.level
            );
        }
        if !log_format_gueltig(&self.logging.format) {
            anyhow::bail!(
                "logging.format muss text oder json sein, war '{}'",
                self.logging.format
            );
        }
        Ok(())
    }

    /// Bind-Adresse des Metrik-Servers
    pub fn metrics_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let adresse = format!("{}:{}", self.metrics.bind_adresse, self.metrics.port);
        adresse
            .parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Metrik-Adresse '{adresse}': {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = NodeConfig::default();
        assert!(cfg.pruefen().is_ok());
        assert_eq!(cfg.identitaet.user_id, "lokal");
        assert_eq!(cfg.audio.capture, CaptureArt::Synthetisch);
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.metrics.aktiviert);
        assert_eq!(cfg.demo.peers.len(), 2);
    }

    #[test]
    fn standard_timings_entsprechen_der_laufzeit() {
        assert_eq!(
            TimingEinstellungen::default().mesh_timings(),
            MeshTimings::default()
        );
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [identitaet]
            user_id = "alice"
            display_name = "Alice"

            [audio]
            capture = "cpal"
            neural_denoise = true
            output_volume = 0.5

            [timing]
            reconcile_ms = 500

            [demo]
            peers = ["bob"]
        "#;
        let cfg: NodeConfig = toml::from_str(toml).unwrap();
        assert!(cfg.pruefen().is_ok());
        assert_eq!(cfg.identitaet.display_name, "Alice");
        assert_eq!(cfg.audio.capture, CaptureArt::Cpal);
        assert!(cfg.audio.dsp.neural_denoise);
        assert!((cfg.audio.dsp.output_volume - 0.5).abs() < f32::EPSILON);
        // Nicht angegebene Felder behalten Standardwerte
        assert!(cfg.audio.dsp.echo_cancellation);
        assert_eq!(cfg.timing.mesh_timings().reconcile, Duration::from_millis(500));
        assert_eq!(cfg.timing.activity_ms, 100);
        assert_eq!(cfg.demo.peers, vec!["bob".to_string()]);
    }

    #[test]
    fn null_perioden_werden_angehoben() {
        let timing = TimingEinstellungen {
            reconcile_ms: 0,
            ..Default::default()
        };
        assert_eq!(timing.mesh_timings().reconcile, Duration::from_millis(1));
    }

    #[test]
    fn ungueltige_werte_werden_abgelehnt() {
        let mut cfg = NodeConfig::default();
        cfg.audio.dsp.output_volume = 1.5;
        assert!(cfg.pruefen().is_err());

        let mut cfg = NodeConfig::default();
        cfg.identitaet.user_id = " ".into();
        assert!(cfg.pruefen().is_err());

        let mut cfg = NodeConfig::default();
        cfg.demo.peers = vec!["lokal".into()];
        assert!(cfg.pruefen().is_err());
    }

    #[test]
    fn ungueltige_logging_werte_werden_abgelehnt() {
        let toml = r#"
            [logging]
            level = "verbose"
        "#;
        let cfg: NodeConfig = toml::from_str(toml).unwrap();
        let fehler = cfg.pruefen().unwrap_err().to_string();
        assert!(fehler.contains("logging.level"));

        let mut cfg = NodeConfig::default();
        cfg.logging.format = "xml".into();
        assert!(cfg.pruefen().is_err());

        cfg.logging.format = "json".into();
        cfg.logging.level = "debug".into();
        assert!(cfg.pruefen().is_ok());
    }

    #[test]
    fn fehlende_datei_liefert_standardwerte() {
        let cfg = NodeConfig::laden("/nicht/vorhanden/voicemesh.toml").unwrap();
        assert_eq!(cfg.identitaet.user_id, "lokal");
    }

    #[test]
    fn metrik_adresse() {
        let cfg = NodeConfig::default();
        assert_eq!(
            cfg.metrics_bind_adresse().unwrap(),
            "127.0.0.1:9300".parse::<SocketAddr>().unwrap()
        );
    }
}
