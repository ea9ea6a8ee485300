//! Verzeichnis-Eintraege
//!
//! Ein `DirectoryEntry` pro aktiver lokaler Teilnahme wird in die gemeinsame
//! Liste geschrieben. Der Speicher selbst liefert nur opakes JSON; diese
//! Schicht parst defensiv und verwirft Datensaetze ohne Session- oder User-ID.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{SessionId, UserId};

/// Praesenz- und Signaling-Datensatz einer Teilnahme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub session_id: SessionId,
    pub user_id: UserId,
    #[serde(default)]
    pub display_name: String,
    /// Serialisierte Signaling-Mailbox, leer bei reiner Ankuendigung
    #[serde(default)]
    pub signal_payload: String,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_deafened: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
}

impl DirectoryEntry {
    /// Erstellt eine Ankuendigung (leerer Signal-Payload)
    pub fn announcement(
        session_id: SessionId,
        user_id: UserId,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            user_id,
            display_name: display_name.into(),
            signal_payload: String::new(),
            is_muted: false,
            is_deafened: false,
            joined_at: Some(Utc::now()),
        }
    }

    pub fn is_announcement(&self) -> bool {
        self.signal_payload.is_empty()
    }

    /// Parst einen Datensatz aus dem Speicher.
    ///
    /// Gibt `None` zurueck wenn Pflichtfelder fehlen oder den falschen Typ haben.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let session_id = obj.get("sessionId")?.as_str()?;
        let user_id = obj.get("userId")?.as_str()?;
        if session_id.is_empty() {
            return None;
        }

        let text = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let flag = |key: &str| obj.get(key).and_then(Value::as_bool).unwrap_or(false);

        Some(Self {
            session_id: SessionId::from(session_id),
            user_id: UserId::from(user_id),
            display_name: text("displayName"),
            signal_payload: text("signalPayload"),
            is_muted: flag("isMuted"),
            is_deafened: flag("isDeafened"),
            joined_at: obj
                .get("joinedAt")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc)),
        })
    }

    pub fn to_value(&self) -> Value {
        // Serialisierung eines Structs mit String-Keys schlaegt nicht fehl
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Einzeln aktualisierbare Felder eines Eintrags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryField {
    DisplayName,
    SignalPayload,
    IsMuted,
    IsDeafened,
}

impl EntryField {
    /// Feldname im gespeicherten JSON
    pub fn key(&self) -> &'static str {
        match self {
            Self::DisplayName => "displayName",
            Self::SignalPayload => "signalPayload",
            Self::IsMuted => "isMuted",
            Self::IsDeafened => "isDeafened",
        }
    }
}
