//! Verbindung zu einem einzelnen Remote-Teilnehmer
//!
//! ```text
//! Pending --signal--> Negotiating --connected--> Connected
//!    |                     |                         |
//!    +---------------------+---- closed / error -----+--> Closed
//! ```
//!
//! `Closed` ist endgueltig. Eine geschlossene Verbindung wird vom Manager
//! verworfen und bei Bedarf als neue Verbindung aufgebaut.

use voicemesh_audio::{AudioTrack, MediaStream};
use voicemesh_core::{PeerId, Result, SessionId, UserId};

use crate::signal::SignalMessage;
use crate::transport::{LinkEvent, PeerLink};

/// Zustand einer Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Negotiating,
    Connected,
    Closed,
}

/// Eingaben der Zustandsmaschine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionInput {
    SignalSent,
    SignalReceived,
    Connected,
    Closed,
    Error,
}

impl ConnectionState {
    /// Folgezustand fuer eine Eingabe
    pub fn transition(self, input: ConnectionInput) -> Self {
        use ConnectionInput as I;
        use ConnectionState as S;
        match (self, input) {
            (S::Closed, _) => S::Closed,
            (_, I::Closed | I::Error) => S::Closed,
            (S::Pending, I::SignalSent | I::SignalReceived) => S::Negotiating,
            (_, I::Connected) => S::Connected,
            (state, _) => state,
        }
    }

    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

/// Von `RemoteConnection::poll` aufbereitete Ereignisse
#[derive(Debug)]
pub enum ConnectionUpdate {
    /// Ausgehendes Signal fuer die Mailbox
    Outgoing(SignalMessage),
    /// Remote-Stream verfuegbar
    Stream(MediaStream),
    Connected,
    Closed { error: Option<String> },
}

/// Verbindung zu einem Peer samt Link und Remote-Stream
pub struct RemoteConnection {
    peer_id: PeerId,
    user_id: UserId,
    peer_name: String,
    initiator: bool,
    state: ConnectionState,
    link: Box<dyn PeerLink>,
    remote_stream: Option<MediaStream>,
}

impl RemoteConnection {
    pub fn new(
        peer_id: PeerId,
        user_id: UserId,
        peer_name: impl Into<String>,
        initiator: bool,
        link: Box<dyn PeerLink>,
    ) -> Self {
        Self {
            peer_id,
            user_id,
            peer_name: peer_name.into(),
            initiator,
            state: ConnectionState::Pending,
            link,
            remote_stream: None,
        }
    }

    pub fn peer_id(&self) -> &SessionId {
        &self.peer_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    pub fn set_peer_name(&mut self, name: &str) {
        if self.peer_name != name {
            self.peer_name = name.to_string();
        }
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn remote_stream(&self) -> Option<&MediaStream> {
        self.remote_stream.as_ref()
    }

    fn apply(&mut self, input: ConnectionInput) {
        let next = self.state.transition(input);
        if next != self.state {
            tracing::debug!(
                peer = %self.peer_id,
                von = ?self.state,
                nach = ?next,
                "Verbindungszustand geaendert"
            );
            self.state = next;
        }
    }

    /// Uebergibt ein empfangenes Signal an den Link
    pub fn handle_signal(&mut self, message: SignalMessage) -> Result<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        self.apply(ConnectionInput::SignalReceived);
        self.link.signal(message)
    }

    /// Holt alle ausstehenden Link-Ereignisse ab
    pub fn poll(&mut self) -> Vec<ConnectionUpdate> {
        let mut updates = Vec::new();
        while let Some(event) = self.link.poll_event() {
            if self.state.is_closed() {
                break;
            }
            match event {
                LinkEvent::Signal(signal) => {
                    self.apply(ConnectionInput::SignalSent);
                    updates.push(ConnectionUpdate::Outgoing(signal));
                }
                LinkEvent::Stream(stream) => {
                    self.remote_stream = Some(stream.clone());
                    updates.push(ConnectionUpdate::Stream(stream));
                }
                LinkEvent::Connected => {
                    self.apply(ConnectionInput::Connected);
                    updates.push(ConnectionUpdate::Connected);
                }
                LinkEvent::Closed => {
                    self.apply(ConnectionInput::Closed);
                    updates.push(ConnectionUpdate::Closed { error: None });
                }
                LinkEvent::Error(reason) => {
                    tracing::warn!(peer = %self.peer_id, "Verbindungsfehler: {}", reason);
                    self.apply(ConnectionInput::Error);
                    updates.push(ConnectionUpdate::Closed {
                        error: Some(reason),
                    });
                }
            }
        }
        updates
    }

    /// Tauscht den ausgehenden Track
    pub fn replace_track(&mut self, old: &AudioTrack, new: &AudioTrack) -> Result<()> {
        self.link.replace_track(old, new)
    }

    /// Baut den Link ab und stoppt den Remote-Stream
    pub fn destroy(&mut self) {
        self.apply(ConnectionInput::Closed);
        self.link.destroy();
        if let Some(stream) = self.remote_stream.take() {
            stream.stop();
        }
    }
}

impl std::fmt::Debug for RemoteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConnection")
            .field("peer_id", &self.peer_id)
            .field("initiator", &self.initiator)
            .field("state", &self.state)
            .finish()
    }
}
