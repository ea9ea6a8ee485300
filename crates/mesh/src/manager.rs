//! Peer Connection Manager
//!
//! Haelt genau eine `RemoteConnection` pro Remote-Session im Verzeichnis.
//! Ein Abgleich (`reconcile`) laeuft in fester Reihenfolge:
//!
//! 1. Link-Ereignisse abholen, geschlossene Links verwerfen
//! 2. Verbindungen zu verschwundenen Eintraegen abbauen
//! 3. Fehlende Verbindungen aufbauen (Initiator per ID-Vergleich)
//! 4. Geaenderte Payloads einlesen
//! 5. Erneut Ereignisse abholen (Antworten auf eben gelesene Signale)
//! 6. Ausgehende Mailbox in den eigenen Eintrag schreiben
//!
//! Einlesefehler werden geloggt und gezaehlt, brechen aber nie den Abgleich ab.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use voicemesh_audio::{AudioTrack, MediaStream};
use voicemesh_core::{DirectoryEntry, MeshError, PeerId, SessionId, UserId};
use voicemesh_directory::{DirectoryClient, EntryRef, ObservedEntry};

use crate::connection::{ConnectionState, ConnectionUpdate, RemoteConnection};
use crate::signal::{SequencedSignal, SignalMailbox};
use crate::transport::{LinkRequest, PeerTransport};

/// Bestimmt ob `local` gegenueber `remote` das Offer erzeugt.
///
/// Die lexikalisch groessere Session-ID initiiert. Fuer `a != b` gilt
/// immer genau eines von `is_initiator(a, b)` und `is_initiator(b, a)`.
pub fn is_initiator(local: &SessionId, remote: &SessionId) -> bool {
    local > remote
}

/// Abgeleiteter Zustand eines Remote-Teilnehmers fuer die Oberflaeche
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedPeerView {
    pub peer_id: PeerId,
    pub user_id: UserId,
    pub peer_name: String,
    pub is_muted: bool,
    pub is_deafened: bool,
    pub is_speaking: bool,
    pub is_connected: bool,
}

/// Ergebnis eines Abgleichs
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub views: Vec<DerivedPeerView>,
    /// Erstmals gesehene Peers (ID, Anzeigename)
    pub joined: Vec<(PeerId, String)>,
    /// Aus dem Verzeichnis verschwundene Peers
    pub departed: Vec<PeerId>,
    /// Neu eingetroffene Remote-Streams
    pub added_streams: Vec<(PeerId, MediaStream)>,
    /// Geschlossene oder fehlerhafte Links (im naechsten Abgleich neu)
    pub closed_links: Vec<PeerId>,
    pub link_failures: u64,
    pub signal_failures: u64,
}

/// Verwaltet alle Verbindungen einer lokalen Session
pub struct PeerConnectionManager {
    transport: Arc<dyn PeerTransport>,
    directory: DirectoryClient,
    connections: HashMap<PeerId, RemoteConnection>,
    /// Bekannte Peers mit Anzeigename
    known: HashMap<PeerId, String>,
    /// Zuletzt eingelesener Payload pro Peer
    last_payload: HashMap<PeerId, String>,
    /// Zuletzt verarbeitete Sequenznummer pro Peer, ueberlebt Link-Neuaufbau
    ingested_seq: HashMap<PeerId, u64>,
    outbox: SignalMailbox,
    published_payload: String,
}

impl PeerConnectionManager {
    pub fn new(transport: Arc<dyn PeerTransport>, directory: DirectoryClient) -> Self {
        Self {
            transport,
            directory,
            connections: HashMap::new(),
            known: HashMap::new(),
            last_payload: HashMap::new(),
            ingested_seq: HashMap::new(),
            outbox: SignalMailbox::new(),
            published_payload: String::new(),
        }
    }

    /// Gleicht die Verbindungen mit einem Verzeichnis-Snapshot ab
    pub fn reconcile(
        &mut self,
        snapshot: &[ObservedEntry],
        local_session_id: &SessionId,
        local_track: &AudioTrack,
        local_entry: Option<EntryRef>,
        speaking: impl Fn(&PeerId) -> bool,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        // Eigene Session ausblenden, doppelte Eintraege nur einmal
        let mut seen = HashSet::new();
        let remote: Vec<&DirectoryEntry> = snapshot
            .iter()
            .map(|o| &o.entry)
            .filter(|e| &e.session_id != local_session_id)
            .filter(|e| seen.insert(e.session_id.clone()))
            .collect();

        self.drain_events(&mut outcome);

        let gone: Vec<PeerId> = self
            .known
            .keys()
            .filter(|p| !seen.contains(*p))
            .cloned()
            .collect();
        for peer in gone {
            self.forget(&peer);
            tracing::info!(peer = %peer, "Peer hat den Kanal verlassen");
            outcome.departed.push(peer);
        }

        for entry in &remote {
            let name = entry.display_name.clone();
            match self.known.insert(entry.session_id.clone(), name.clone()) {
                None => {
                    tracing::info!(peer = %entry.session_id, name = %name, "Neuer Peer im Kanal");
                    outcome.joined.push((entry.session_id.clone(), name));
                }
                Some(_) => {
                    if let Some(conn) = self.connections.get_mut(&entry.session_id) {
                        conn.set_peer_name(&entry.display_name);
                    }
                }
            }
            // Eben verworfene Links erst im naechsten Abgleich neu aufbauen
            if !self.connections.contains_key(&entry.session_id)
                && !outcome.closed_links.contains(&entry.session_id)
            {
                self.open(entry, local_session_id, local_track, &mut outcome);
            }
        }

        for entry in &remote {
            self.ingest(entry, local_session_id, local_track, &mut outcome);
        }

        self.drain_events(&mut outcome);

        if let Some(entry_ref) = local_entry {
            self.flush(entry_ref);
        }

        outcome.views = remote
            .iter()
            .map(|e| DerivedPeerView {
                peer_id: e.session_id.clone(),
                user_id: e.user_id.clone(),
                peer_name: e.display_name.clone(),
                is_muted: e.is_muted,
                is_deafened: e.is_deafened,
                is_speaking: speaking(&e.session_id),
                is_connected: self
                    .connections
                    .get(&e.session_id)
                    .map(|c| c.is_connected())
                    .unwrap_or(false),
            })
            .collect();
        outcome
    }

    fn open(
        &mut self,
        entry: &DirectoryEntry,
        local: &SessionId,
        local_track: &AudioTrack,
        outcome: &mut ReconcileOutcome,
    ) {
        let peer = entry.session_id.clone();
        let initiator = is_initiator(local, &peer);
        let request = LinkRequest {
            local: local.clone(),
            remote: peer.clone(),
            initiator,
            local_track: local_track.clone(),
        };
        match self.transport.connect(request) {
            Ok(link) => {
                tracing::debug!(peer = %peer, initiator, "Verbindung angelegt");
                let conn = RemoteConnection::new(
                    peer.clone(),
                    entry.user_id.clone(),
                    entry.display_name.clone(),
                    initiator,
                    link,
                );
                self.connections.insert(peer, conn);
            }
            Err(e) => {
                tracing::warn!(peer = %peer, "Verbindungsaufbau fehlgeschlagen: {}", e);
                outcome.link_failures += 1;
            }
        }
    }

    fn ingest(
        &mut self,
        entry: &DirectoryEntry,
        local: &SessionId,
        local_track: &AudioTrack,
        outcome: &mut ReconcileOutcome,
    ) {
        let peer = &entry.session_id;
        let payload = &entry.signal_payload;
        // Ohne Verbindung bleibt der Payload ungelesen
        if !self.connections.contains_key(peer) || self.last_payload.get(peer) == Some(payload) {
            return;
        }
        self.last_payload.insert(peer.clone(), payload.clone());
        if payload.is_empty() {
            return;
        }

        let mailbox = match SignalMailbox::parse(payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(peer = %peer, "Signal-Payload verworfen: {}", e);
                outcome.signal_failures += 1;
                return;
            }
        };

        let after = self.ingested_seq.get(peer).copied().unwrap_or(0);
        let messages: Vec<SequencedSignal> = mailbox.messages_for(local, after).cloned().collect();
        for message in messages {
            self.ingested_seq.insert(peer.clone(), message.seq);

            // Neues Offer an eine laufende Verbindung: die Gegenseite hat neu
            // aufgebaut, also hier ebenfalls frisch beginnen
            let restart = message.signal.is_offer()
                && self
                    .connections
                    .get(peer)
                    .map(|c| !c.is_initiator() && c.state() != ConnectionState::Pending)
                    .unwrap_or(false);
            if restart {
                tracing::debug!(peer = %peer, "Neues Offer, Verbindung wird neu aufgebaut");
                if let Some(mut old) = self.connections.remove(peer) {
                    old.destroy();
                    outcome.closed_links.push(peer.clone());
                }
                self.open(entry, local, local_track, outcome);
            }

            let Some(conn) = self.connections.get_mut(peer) else {
                continue;
            };
            if let Err(e) = conn.handle_signal(message.signal) {
                tracing::warn!(peer = %peer, seq = message.seq, "Signal nicht verarbeitet: {}", e);
                outcome.signal_failures += 1;
            }
        }
    }

    fn drain_events(&mut self, outcome: &mut ReconcileOutcome) {
        let mut closed = Vec::new();
        for (peer, conn) in self.connections.iter_mut() {
            for update in conn.poll() {
                match update {
                    ConnectionUpdate::Outgoing(signal) => {
                        let seq = self.outbox.push(peer, signal);
                        tracing::trace!(peer = %peer, seq, "Signal in Mailbox");
                    }
                    ConnectionUpdate::Stream(stream) => {
                        outcome.added_streams.push((peer.clone(), stream));
                    }
                    ConnectionUpdate::Connected => {
                        tracing::info!(peer = %peer, "Verbindung hergestellt");
                    }
                    ConnectionUpdate::Closed { error } => {
                        if error.is_some() {
                            outcome.link_failures += 1;
                        }
                        closed.push(peer.clone());
                    }
                }
            }
        }
        for peer in closed {
            if let Some(mut conn) = self.connections.remove(&peer) {
                conn.destroy();
                tracing::debug!(peer = %peer, "Link verworfen, Neuaufbau im naechsten Abgleich");
                outcome.closed_links.push(peer);
            }
        }
    }

    fn flush(&mut self, entry_ref: EntryRef) {
        let encoded = self.outbox.encode();
        if encoded == self.published_payload {
            return;
        }
        match self.directory.set_signal_payload(entry_ref, &encoded) {
            Ok(()) => self.published_payload = encoded,
            Err(e) => tracing::warn!(entry = %entry_ref, "Signal-Payload nicht geschrieben: {}", e),
        }
    }

    /// Baut alles zu einem Peer ab und verwirft seine Signaling-Daten
    fn forget(&mut self, peer: &PeerId) {
        if let Some(mut conn) = self.connections.remove(peer) {
            conn.destroy();
        }
        self.known.remove(peer);
        self.last_payload.remove(peer);
        self.ingested_seq.remove(peer);
        self.outbox.remove_target(peer);
    }

    /// Aktueller Inhalt der ausgehenden Mailbox
    pub fn outbound_payload(&self) -> String {
        self.outbox.encode()
    }

    /// Merkt sich einen anderweitig veroeffentlichten Payload (Neuveroeffentlichung)
    pub fn mark_published(&mut self, payload: &str) {
        self.published_payload = payload.to_string();
    }

    /// Tauscht den ausgehenden Track auf allen Verbindungen.
    ///
    /// Verbindungen bei denen der Tausch scheitert werden abgebaut und im
    /// naechsten Abgleich mit dem neuen Track neu aufgebaut.
    pub fn replace_stream(&mut self, old: &AudioTrack, new: &AudioTrack) -> Vec<(PeerId, MeshError)> {
        let mut failed = Vec::new();
        for (peer, conn) in self.connections.iter_mut() {
            if let Err(e) = conn.replace_track(old, new) {
                tracing::warn!(peer = %peer, "Track-Tausch fehlgeschlagen: {}", e);
                failed.push((peer.clone(), e));
            }
        }
        for (peer, _) in &failed {
            if let Some(mut conn) = self.connections.remove(peer) {
                conn.destroy();
            }
        }
        failed
    }

    /// Baut alle Verbindungen ab und leert alle Tabellen
    pub fn destroy_all(&mut self) {
        let n = self.connections.len();
        for (_, mut conn) in self.connections.drain() {
            conn.destroy();
        }
        self.known.clear();
        self.last_payload.clear();
        self.ingested_seq.clear();
        self.outbox = SignalMailbox::new();
        self.published_payload.clear();
        if n > 0 {
            tracing::debug!(anzahl = n, "Alle Verbindungen abgebaut");
        }
    }

    pub fn connection(&self, peer: &PeerId) -> Option<&RemoteConnection> {
        self.connections.get(peer)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connected_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_connected()).count()
    }

    /// Remote-Streams aller Verbindungen
    pub fn remote_streams(&self) -> Vec<(PeerId, MediaStream)> {
        self.connections
            .iter()
            .filter_map(|(p, c)| c.remote_stream().map(|s| (p.clone(), s.clone())))
            .collect()
    }
}
