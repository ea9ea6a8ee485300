//! In-Memory-Implementierung der gemeinsamen Liste
//!
//! Alle Klone teilen denselben Zustand und verhalten sich wie Repliken
//! mit sofortiger Konvergenz. Genutzt fuer Tests und den Demo-Knoten.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{DirectoryError, DirectoryResult};
use crate::list::{EntryRef, ListChange, SharedList, StoredEntry};

/// Groesse des Broadcast-Kanals fuer Aenderungen
const AENDERUNGS_KANAL_GROESSE: usize = 256;

/// Thread-sichere In-Memory-Liste
#[derive(Clone)]
pub struct InMemoryList {
    inner: Arc<InMemoryListInner>,
}

struct InMemoryListInner {
    entries: RwLock<Vec<StoredEntry>>,
    next_ref: AtomicU64,
    change_tx: broadcast::Sender<ListChange>,
}

impl InMemoryList {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(AENDERUNGS_KANAL_GROESSE);
        Self {
            inner: Arc::new(InMemoryListInner {
                entries: RwLock::new(Vec::new()),
                next_ref: AtomicU64::new(1),
                change_tx,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    fn notify(&self, change: ListChange) {
        // Keine Abonnenten ist kein Fehler
        let _ = self.inner.change_tx.send(change);
    }
}

impl Default for InMemoryList {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedList for InMemoryList {
    fn append(&self, value: Value) -> EntryRef {
        let entry_ref = EntryRef(self.inner.next_ref.fetch_add(1, Ordering::Relaxed));
        self.inner
            .entries
            .write()
            .push(StoredEntry { entry_ref, value });
        tracing::trace!(entry = %entry_ref, "Datensatz angehaengt");
        self.notify(ListChange::Appended(entry_ref));
        entry_ref
    }

    fn remove_at(&self, index: usize) -> DirectoryResult<()> {
        let removed = {
            let mut entries = self.inner.entries.write();
            if index >= entries.len() {
                return Err(DirectoryError::IndexUngueltig {
                    index,
                    len: entries.len(),
                });
            }
            entries.remove(index).entry_ref
        };
        tracing::trace!(entry = %removed, index, "Datensatz entfernt");
        self.notify(ListChange::Removed(removed));
        Ok(())
    }

    fn set_field(&self, entry: EntryRef, field: &str, value: Value) -> DirectoryResult<()> {
        {
            let mut entries = self.inner.entries.write();
            let stored = entries
                .iter_mut()
                .find(|e| e.entry_ref == entry)
                .ok_or(DirectoryError::EintragNichtGefunden(entry))?;
            let obj = stored
                .value
                .as_object_mut()
                .ok_or(DirectoryError::KeinObjekt(entry))?;
            obj.insert(field.to_string(), value);
        }
        self.notify(ListChange::Updated(entry));
        Ok(())
    }

    fn snapshot_as_array(&self) -> Vec<StoredEntry> {
        self.inner.entries.read().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ListChange> {
        self.inner.change_tx.subscribe()
    }
}
