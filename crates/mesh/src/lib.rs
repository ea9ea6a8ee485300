//! voicemesh-mesh – Full-Mesh Voice ueber ein gemeinsames Verzeichnis
//!
//! Jeder Teilnehmer veroeffentlicht einen Eintrag im Verzeichnis und baut zu
//! jedem anderen Eintrag genau eine Punkt-zu-Punkt-Verbindung auf. Das
//! Signaling laeuft ausschliesslich ueber das Feld `signalPayload`.
//!
//! ```text
//! VoiceMeshHandle --Kommandos--> MeshActor
//!                                   |
//!                            SessionController
//!                             |            |
//!              PeerConnectionManager    ActivityMonitor
//!                 |          |
//!         PeerTransport   SignalMailbox -> DirectoryClient
//! ```

pub mod connection;
pub mod loopback;
pub mod manager;
pub mod runtime;
pub mod session;
pub mod signal;
pub mod transport;

// Bequeme Re-Exporte
pub use connection::{ConnectionInput, ConnectionState, ConnectionUpdate, RemoteConnection};
pub use loopback::{LoopbackLink, LoopbackNetwork, LoopbackTransport};
pub use manager::{is_initiator, DerivedPeerView, PeerConnectionManager, ReconcileOutcome};
pub use runtime::{MeshTimings, VoiceMesh, VoiceMeshHandle};
pub use session::{
    ActivityKey, JoinTicket, LocalSession, MediaAcquirer, PhaseKind, RemoteStreamView,
    SessionController, SessionIdentity, SessionView, SwapTicket,
};
pub use signal::{MailboxSlot, SequencedSignal, SignalMailbox, SignalMessage, MAILBOX_RETENTION};
pub use transport::{LinkEvent, LinkRequest, PeerLink, PeerTransport};
