//! Session-Ereignisse fuer die Oberflaeche
//!
//! Der Session-Controller sendet diese Ereignisse ueber einen
//! tokio-Broadcast-Kanal. Abgeleiteter Zustand (Peer-Liste, Sprechstatus)
//! wird zusaetzlich als Snapshot bereitgestellt; die Ereignisse sind fuer
//! Toasts, Logs und Sounds gedacht.

use crate::types::{PeerId, SessionId};
use serde::{Deserialize, Serialize};

/// Alle Ereignisse des Voice-Mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "typ", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Lokale Teilnahme aktiv, Ankuendigung veroeffentlicht
    Joined { session_id: SessionId },
    /// Lokale Teilnahme beendet
    Left { session_id: SessionId },
    /// Beitritt fehlgeschlagen, Zustand bleibt Idle
    JoinFailed { message: String },
    /// Hot-Swap fehlgeschlagen, alter Stream bleibt aktiv
    SwapFailed { message: String },
    /// Neuer Remote-Teilnehmer im Verzeichnis
    PeerJoined { peer_id: PeerId, peer_name: String },
    /// Remote-Teilnehmer verschwunden
    PeerLeft { peer_id: PeerId },
    /// Sprechstatus geaendert (`peer_id = None` = lokal)
    SpeakingChanged {
        peer_id: Option<PeerId>,
        speaking: bool,
    },
    MuteChanged { muted: bool, published: bool },
    DeafenChanged { deafened: bool },
    /// Capture-Stream ausgetauscht ohne Neuverhandlung
    StreamSwapped,
    /// Eigener Eintrag fehlte und wurde neu veroeffentlicht
    SelfHealed { session_id: SessionId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ist_serde_kompatibel() {
        let event = SessionEvent::SpeakingChanged {
            peer_id: Some(SessionId::from("b2")),
            speaking: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"typ\":\"speaking_changed\""));
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
