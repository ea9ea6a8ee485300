//! Signaling ueber das Verzeichnis
//!
//! Das Feld `signalPayload` eines Eintrags ist der einzige Kanal fuer
//! Offer/Answer/Candidate-Nachrichten. Da ein Teilnehmer mit mehreren Peers
//! gleichzeitig verhandelt, enthaelt das Feld eine Mailbox: pro Ziel-Session
//! eine fortlaufend nummerierte Liste der letzten Nachrichten.
//!
//! ```json
//! { "b2": { "seq": 2, "messages": [ { "seq": 1, "signal": { "type": "offer", "sdp": "..." } } ] } }
//! ```
//!
//! Empfaenger verarbeiten nur Nachrichten an sich selbst mit einer
//! Sequenznummer groesser als die zuletzt verarbeitete. Dadurch ist das
//! wiederholte Lesen desselben Payloads folgenlos.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use voicemesh_core::{MeshError, Result, SessionId};

/// Anzahl der pro Ziel aufbewahrten Nachrichten
pub const MAILBOX_RETENTION: usize = 32;

/// Eine Signaling-Nachricht des Transports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    #[serde(rename_all = "camelCase")]
    Candidate {
        candidate: String,
        #[serde(default)]
        sdp_mid: Option<String>,
        #[serde(default)]
        sdp_m_line_index: Option<u16>,
    },
}

impl SignalMessage {
    /// Kurzname fuer Logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
        }
    }

    pub fn is_offer(&self) -> bool {
        matches!(self, Self::Offer { .. })
    }
}

/// Nachricht mit Sequenznummer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedSignal {
    pub seq: u64,
    pub signal: SignalMessage,
}

/// Nachrichten an ein Ziel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxSlot {
    /// Zuletzt vergebene Sequenznummer
    pub seq: u64,
    #[serde(default)]
    pub messages: Vec<SequencedSignal>,
}

/// Inhalt des `signalPayload` Feldes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalMailbox {
    slots: BTreeMap<SessionId, MailboxSlot>,
    /// Hoechste je vergebene Nummer, auch fuer inzwischen entfernte Ziele
    #[serde(skip)]
    high_water: u64,
}

impl PartialEq for SignalMailbox {
    fn eq(&self, other: &Self) -> bool {
        self.slots == other.slots
    }
}

impl Eq for SignalMailbox {}

impl SignalMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parst einen Payload. Ein leerer Payload ist eine leere Mailbox.
    pub fn parse(payload: &str) -> Result<Self> {
        if payload.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(payload)
            .map_err(|e| MeshError::Signal(format!("Payload nicht lesbar: {e}")))
    }

    /// Serialisiert die Mailbox (leer ergibt einen leeren String)
    pub fn encode(&self) -> String {
        if self.slots.is_empty() {
            return String::new();
        }
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Legt eine Nachricht fuer `target` ab und gibt ihre Sequenznummer zurueck.
    ///
    /// Die Nummern steigen ueber alle Ziele hinweg, damit ein entferntes und
    /// spaeter neu angelegtes Ziel nicht wieder bei 1 beginnt.
    pub fn push(&mut self, target: &SessionId, signal: SignalMessage) -> u64 {
        let slot = self.slots.entry(target.clone()).or_default();
        slot.seq = slot.seq.max(self.high_water) + 1;
        self.high_water = slot.seq;
        slot.messages.push(SequencedSignal {
            seq: slot.seq,
            signal,
        });
        let excess = slot.messages.len().saturating_sub(MAILBOX_RETENTION);
        slot.messages.drain(..excess);
        slot.seq
    }

    /// Nachrichten an `target` mit Sequenznummer groesser `after`
    pub fn messages_for<'a>(
        &'a self,
        target: &SessionId,
        after: u64,
    ) -> impl Iterator<Item = &'a SequencedSignal> + 'a {
        self.slots
            .get(target)
            .into_iter()
            .flat_map(|slot| slot.messages.iter())
            .filter(move |m| m.seq > after)
    }

    /// Entfernt alle Nachrichten an `target`
    pub fn remove_target(&mut self, target: &SessionId) -> bool {
        self.slots.remove(target).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
