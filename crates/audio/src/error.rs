//! Fehlertypen fuer die Audio-Engine

use thiserror::Error;
use voicemesh_core::MeshError;

/// Alle moeglichen Fehler der Audio-Engine
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Zugriff auf das Mikrofon verweigert: {0}")]
    ZugriffVerweigert(String),

    #[error("Audio-Geraet nicht gefunden: {0}")]
    GeraetNichtGefunden(String),

    #[error("Kein Eingabegeraet verfuegbar")]
    KeinEingabegeraet,

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    #[error("Denoiser-Fehler: {0}")]
    Denoiser(String),

    #[error("Unerwarteter Fehler: {0}")]
    Anyhow(#[from] anyhow::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;

impl From<AudioError> for MeshError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::ZugriffVerweigert(m) => MeshError::ZugriffVerweigert(m),
            AudioError::GeraetNichtGefunden(m) => MeshError::KeinGeraet(m),
            AudioError::KeinEingabegeraet => MeshError::KeinGeraet("kein Eingabegeraet".into()),
            other => MeshError::Audio(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_fehler_werden_zu_mesh_capture_fehlern() {
        let e: MeshError = AudioError::ZugriffVerweigert("NotAllowedError".into()).into();
        assert!(matches!(e, MeshError::ZugriffVerweigert(_)));
        let e: MeshError = AudioError::KeinEingabegeraet.into();
        assert!(matches!(e, MeshError::KeinGeraet(_)));
        let e: MeshError = AudioError::StreamFehler("x".into()).into();
        assert!(e.is_capture_failure());
    }
}
