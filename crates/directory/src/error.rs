//! Fehlertypen fuer den Verzeichnis-Client

use thiserror::Error;
use voicemesh_core::MeshError;

use crate::list::EntryRef;

/// Fehlertyp fuer Operationen auf der gemeinsamen Liste
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Index ausserhalb der aktuellen Liste (konkurrierend entfernt)
    #[error("Index {index} ausserhalb der Liste (Laenge {len})")]
    IndexUngueltig { index: usize, len: usize },

    /// Eintrag existiert nicht mehr
    #[error("Eintrag {0} nicht gefunden")]
    EintragNichtGefunden(EntryRef),

    /// Datensatz ist kein Objekt und hat daher keine Felder
    #[error("Eintrag {0} ist kein Objekt")]
    KeinObjekt(EntryRef),

    /// Fehler des externen Speichers
    #[error("Speicherfehler: {0}")]
    Speicher(String),
}

/// Result-Typ fuer den Verzeichnis-Client
pub type DirectoryResult<T> = Result<T, DirectoryError>;

impl From<DirectoryError> for MeshError {
    fn from(e: DirectoryError) -> Self {
        MeshError::Verzeichnis(e.to_string())
    }
}
