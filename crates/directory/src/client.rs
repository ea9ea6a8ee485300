//! Typisierter Verzeichnis-Client
//!
//! Uebersetzt `DirectoryEntry` in die opaken Datensaetze der gemeinsamen
//! Liste und zurueck. Entfernen per Index ist gegen konkurrierende Schreiber
//! nicht atomar, deshalb wird der Index direkt vor jedem Entfernen auf einem
//! frischen Snapshot neu bestimmt.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use voicemesh_core::{DirectoryEntry, EntryField, SessionId};

use crate::error::DirectoryResult;
use crate::list::{EntryRef, ListChange, SharedList};

/// Ein geparster Eintrag aus einem Snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedEntry {
    pub entry_ref: EntryRef,
    /// Position im Snapshot (nur fuer diesen Snapshot gueltig)
    pub index: usize,
    pub entry: DirectoryEntry,
}

/// Client fuer die gemeinsame Liste
#[derive(Clone)]
pub struct DirectoryClient {
    list: Arc<dyn SharedList>,
}

impl DirectoryClient {
    pub fn new(list: Arc<dyn SharedList>) -> Self {
        Self { list }
    }

    /// Veroeffentlicht einen Eintrag und gibt seinen stabilen Verweis zurueck
    pub fn publish(&self, entry: &DirectoryEntry) -> EntryRef {
        let entry_ref = self.list.append(entry.to_value());
        tracing::debug!(
            session_id = %entry.session_id,
            user_id = %entry.user_id,
            entry = %entry_ref,
            "Eintrag veroeffentlicht"
        );
        entry_ref
    }

    /// Liest alle gueltigen Eintraege. Unlesbare Datensaetze werden uebersprungen.
    pub fn entries(&self) -> Vec<ObservedEntry> {
        self.list
            .snapshot_as_array()
            .into_iter()
            .enumerate()
            .filter_map(|(index, stored)| match DirectoryEntry::from_value(&stored.value) {
                Some(entry) => Some(ObservedEntry {
                    entry_ref: stored.entry_ref,
                    index,
                    entry,
                }),
                None => {
                    tracing::debug!(entry = %stored.entry_ref, "Unlesbarer Datensatz ignoriert");
                    None
                }
            })
            .collect()
    }

    /// Sucht den Eintrag einer Session
    pub fn find_session(&self, session_id: &SessionId) -> Option<ObservedEntry> {
        self.entries()
            .into_iter()
            .find(|o| &o.entry.session_id == session_id)
    }

    pub fn set_field(&self, entry: EntryRef, field: EntryField, value: Value) -> DirectoryResult<()> {
        self.list.set_field(entry, field.key(), value)
    }

    pub fn set_signal_payload(&self, entry: EntryRef, payload: &str) -> DirectoryResult<()> {
        self.set_field(entry, EntryField::SignalPayload, Value::String(payload.to_string()))
    }

    pub fn set_muted(&self, entry: EntryRef, muted: bool) -> DirectoryResult<()> {
        self.set_field(entry, EntryField::IsMuted, Value::Bool(muted))
    }

    pub fn set_deafened(&self, entry: EntryRef, deafened: bool) -> DirectoryResult<()> {
        self.set_field(entry, EntryField::IsDeafened, Value::Bool(deafened))
    }

    /// Entfernt einen Eintrag anhand seines Verweises.
    ///
    /// Gibt `false` zurueck wenn der Eintrag bereits verschwunden war.
    pub fn remove_entry(&self, entry: EntryRef) -> DirectoryResult<bool> {
        let index = self
            .list
            .snapshot_as_array()
            .iter()
            .position(|s| s.entry_ref == entry);
        match index {
            Some(i) => {
                self.list.remove_at(i)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Entfernt alle Eintraege fuer die `pred` zutrifft und gibt ihre Anzahl zurueck.
    pub fn remove_where<F>(&self, pred: F) -> usize
    where
        F: Fn(&DirectoryEntry) -> bool,
    {
        let mut targets: Vec<(usize, EntryRef)> = self
            .entries()
            .into_iter()
            .filter(|o| pred(&o.entry))
            .map(|o| (o.index, o.entry_ref))
            .collect();
        // Hoechster Index zuerst, damit fruehere Positionen stabil bleiben
        targets.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed = 0;
        for (_, entry_ref) in targets {
            match self.remove_entry(entry_ref) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(entry = %entry_ref, "Entfernen fehlgeschlagen: {}", e),
            }
        }
        removed
    }

    /// Entfernt alle Eintraege einer Session
    pub fn remove_session(&self, session_id: &SessionId) -> usize {
        self.remove_where(|e| &e.session_id == session_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ListChange> {
        self.list.subscribe()
    }
}
