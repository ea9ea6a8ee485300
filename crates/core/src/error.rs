//! Fehlertypen fuer voicemesh
//!
//! Zentraler Fehler-Enum des Voice-Mesh. Die Untercrates definieren eigene
//! Fehler (`AudioError`, `DirectoryError`) und konvertieren via `From`.

use thiserror::Error;

/// Globaler Result-Alias fuer voicemesh
pub type Result<T> = std::result::Result<T, MeshError>;

/// Alle moeglichen Fehler im Voice-Mesh
#[derive(Debug, Error)]
pub enum MeshError {
    // --- Capture ---
    #[error("Mikrofonzugriff verweigert: {0}")]
    ZugriffVerweigert(String),

    #[error("Kein Eingabegeraet verfuegbar: {0}")]
    KeinGeraet(String),

    #[error("Audiofehler: {0}")]
    Audio(String),

    // --- Verzeichnis & Signaling ---
    #[error("Verzeichnisfehler: {0}")]
    Verzeichnis(String),

    #[error("Ungueltiges Signal: {0}")]
    Signal(String),

    #[error("Verbindungsfehler zu {peer}: {grund}")]
    Transport { peer: String, grund: String },

    // --- Laufzeit ---
    #[error("Vorgang abgebrochen")]
    Abgebrochen,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl MeshError {
    /// Gibt true zurueck wenn ein erneuter Versuch sinnvoll sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Verzeichnis(_) | Self::Audio(_)
        )
    }

    /// Gibt true zurueck wenn der Fehler beim Mikrofon-Capture entstand
    pub fn is_capture_failure(&self) -> bool {
        matches!(
            self,
            Self::ZugriffVerweigert(_) | Self::KeinGeraet(_) | Self::Audio(_)
        )
    }

    /// Handlungsorientierte Meldung fuer die Oberflaeche
    pub fn user_message(&self) -> String {
        match self {
            Self::ZugriffVerweigert(_) => {
                "Mikrofonzugriff wurde verweigert. Bitte die Berechtigung erteilen und erneut beitreten."
                    .into()
            }
            Self::KeinGeraet(_) => {
                "Kein Mikrofon gefunden. Bitte ein Eingabegeraet anschliessen oder in den Einstellungen auswaehlen."
                    .into()
            }
            Self::Audio(detail) => {
                format!("Das Mikrofon konnte nicht geoeffnet werden ({detail}). Bitte ein anderes Geraet waehlen.")
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = MeshError::Transport {
            peer: "b2".into(),
            grund: "ICE fehlgeschlagen".into(),
        };
        assert_eq!(e.to_string(), "Verbindungsfehler zu b2: ICE fehlgeschlagen");
    }

    #[test]
    fn capture_fehler_erkennung() {
        assert!(MeshError::ZugriffVerweigert("x".into()).is_capture_failure());
        assert!(MeshError::KeinGeraet("x".into()).is_capture_failure());
        assert!(!MeshError::Signal("x".into()).is_capture_failure());
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(MeshError::Verzeichnis("x".into()).ist_wiederholbar());
        assert!(!MeshError::ZugriffVerweigert("x".into()).ist_wiederholbar());
    }

    #[test]
    fn nutzermeldung_ist_handlungsorientiert() {
        let msg = MeshError::ZugriffVerweigert("NotAllowedError".into()).user_message();
        assert!(msg.contains("Berechtigung"));
        let msg = MeshError::KeinGeraet("keins".into()).user_message();
        assert!(msg.contains("Eingabegeraet"));
    }
}
