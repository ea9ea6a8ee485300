//! Identifikationstypen fuer voicemesh
//!
//! Session- und Benutzer-IDs verwenden das Newtype-Pattern, damit eine
//! Session-ID nie versehentlich als User-ID verglichen wird. Beide sind
//! Strings, weil sie unveraendert im gemeinsamen Verzeichnis landen und
//! dort lexikalisch verglichen werden (Initiator-Auswahl).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Zufaellige ID einer einzelnen Teilnahme (neu bei jedem Join)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Erzeugt eine neue zufaellige Session-ID (UUIDv4)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stabile Konto-ID, ueber Rejoins hinweg gleich
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote-Teilnehmer werden ueber ihre Session-ID adressiert
pub type PeerId = SessionId;
