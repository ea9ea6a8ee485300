//! Punkt-zu-Punkt Transport zwischen zwei Teilnehmern
//!
//! Ein `PeerTransport` baut pro Peer einen `PeerLink` auf. Der Link meldet
//! alles was die Gegenseite betrifft als `LinkEvent` (ausgehende Signale,
//! eingehender Stream, Verbindungsstatus); der Manager fragt die Events pro
//! Abgleich ab.

use voicemesh_audio::{AudioTrack, MediaStream};
use voicemesh_core::{Result, SessionId};

use crate::signal::SignalMessage;

/// Parameter fuer den Aufbau eines Links
#[derive(Debug, Clone)]
pub struct LinkRequest {
    pub local: SessionId,
    pub remote: SessionId,
    /// Diese Seite erzeugt das Offer
    pub initiator: bool,
    /// Ausgehender Audio-Track
    pub local_track: AudioTrack,
}

/// Ereignisse eines Links
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Signal an die Gegenseite, muss ueber das Verzeichnis zugestellt werden
    Signal(SignalMessage),
    /// Audio der Gegenseite ist verfuegbar
    Stream(MediaStream),
    Connected,
    Closed,
    Error(String),
}

/// Eine Verbindung zu genau einem Peer
pub trait PeerLink: Send {
    /// Uebergibt ein von der Gegenseite empfangenes Signal
    fn signal(&mut self, message: SignalMessage) -> Result<()>;

    /// Tauscht den ausgehenden Track ohne Neuverhandlung
    fn replace_track(&mut self, old: &AudioTrack, new: &AudioTrack) -> Result<()>;

    /// Naechstes ausstehendes Ereignis
    fn poll_event(&mut self) -> Option<LinkEvent>;

    /// Baut den Link ab und gibt alle Ressourcen frei
    fn destroy(&mut self);
}

/// Fabrik fuer Peer-Links
pub trait PeerTransport: Send + Sync + 'static {
    fn connect(&self, request: LinkRequest) -> Result<Box<dyn PeerLink>>;
}
