//! voicemesh-core – Gemeinsame Typen, Eintraege und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die vom
//! Verzeichnis-Client, der Audio-Engine und dem Mesh gemeinsam genutzt werden.

pub mod entry;
pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use entry::{DirectoryEntry, EntryField};
pub use error::{MeshError, Result};
pub use event::SessionEvent;
pub use types::{PeerId, SessionId, UserId};
