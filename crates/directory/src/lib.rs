//! voicemesh-directory – Verzeichnis-Client
//!
//! Typisierte Lese-, Anhaenge- und Entfernen-Operationen auf der extern
//! bereitgestellten, eventual-konsistenten Liste. Die Liste ist der einzige
//! Signaling-Kanal des Mesh: Praesenz und Signaling-Nachrichten liegen im
//! selben Datensatz.
//!
//! ```text
//! SharedList (extern, Multi-Writer)
//!     ^
//!     |  append / remove_at / set_field / snapshot_as_array
//!     |
//! DirectoryClient  ->  DirectoryEntry (defensiv geparst)
//! ```

pub mod client;
pub mod error;
pub mod list;
pub mod memory;

// Bequeme Re-Exporte
pub use client::{DirectoryClient, ObservedEntry};
pub use error::{DirectoryError, DirectoryResult};
pub use list::{EntryRef, ListChange, SharedList, StoredEntry};
pub use memory::InMemoryList;
