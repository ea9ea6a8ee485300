//! Schnittstelle der gemeinsamen Liste
//!
//! Die Liste ist ein externer, eventual-konsistenter Multi-Writer-Speicher.
//! Alle Operationen sind best-effort und koennen mit anderen Schreibern
//! konkurrieren; es gibt weder Transaktionen noch Compare-and-Swap.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::DirectoryResult;

/// Stabiler Verweis auf einen Datensatz, unabhaengig von seiner Position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryRef(pub u64);

impl std::fmt::Display for EntryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry:{}", self.0)
    }
}

/// Ein Datensatz im Snapshot, in Listenreihenfolge
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub entry_ref: EntryRef,
    pub value: Value,
}

/// Aenderungs-Benachrichtigung der Liste
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChange {
    Appended(EntryRef),
    Updated(EntryRef),
    Removed(EntryRef),
}

/// Die gemeinsame Liste (externer Kollaborateur)
pub trait SharedList: Send + Sync + 'static {
    /// Haengt einen Datensatz an
    fn append(&self, value: Value) -> EntryRef;

    /// Entfernt den Datensatz an Position `index`
    fn remove_at(&self, index: usize) -> DirectoryResult<()>;

    /// Setzt ein einzelnes Feld eines Datensatzes
    fn set_field(&self, entry: EntryRef, field: &str, value: Value) -> DirectoryResult<()>;

    /// Liefert den aktuellen Inhalt als Array
    fn snapshot_as_array(&self) -> Vec<StoredEntry>;

    /// Abonniert Aenderungen (optional nutzbar statt reinem Polling)
    fn subscribe(&self) -> broadcast::Receiver<ListChange>;
}
