//! In-Process Transport
//!
//! Verbindet Links innerhalb eines Prozesses ueber ein gemeinsames
//! `LoopbackNetwork`. Die Aushandlung folgt dem ueblichen Ablauf: der
//! Initiator erzeugt Offer und Candidate, die Gegenseite antwortet mit Answer
//! und Candidate. Sobald eine Seite Beschreibung und Candidate der
//! Gegenseite kennt, haengt sie sich an deren ausgehenden Track und meldet
//! `Stream` und `Connected`.
//!
//! Fehler lassen sich gezielt einspeisen (nicht erreichbare Paare,
//! abgelehnter Verbindungsaufbau, Abbruch einer laufenden Verbindung).

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use voicemesh_audio::{AudioTrack, MediaStream, SinkId};
use voicemesh_core::{MeshError, Result, SessionId};

use crate::signal::SignalMessage;
use crate::transport::{LinkEvent, LinkRequest, PeerLink, PeerTransport};

type LinkKey = (SessionId, SessionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Negotiation {
    /// Antwortende Seite wartet auf das Offer
    AwaitingOffer,
    /// Offer verschickt, Answer ausstehend
    OfferSent { nonce: u64 },
    /// Beschreibung der Gegenseite bekannt
    Described { nonce: u64 },
    Established,
    Closed,
}

struct Endpoint {
    local: SessionId,
    remote: SessionId,
    initiator: bool,
    outbound: AudioTrack,
    negotiation: Negotiation,
    /// Kennung der Aushandlung, beide Seiten einer Verbindung teilen sie
    nonce: Option<u64>,
    remote_candidate: bool,
    events: VecDeque<LinkEvent>,
    inbound: Option<AudioTrack>,
    /// Ausgehender Track der Gegenseite und unsere Senke daran
    forward: Option<(AudioTrack, SinkId)>,
}

impl Endpoint {
    fn ready_to_establish(&self) -> bool {
        matches!(self.negotiation, Negotiation::Described { .. }) && self.remote_candidate
    }
}

struct NetworkInner {
    endpoints: Mutex<HashMap<LinkKey, Arc<Mutex<Endpoint>>>>,
    unreachable: Mutex<HashSet<LinkKey>>,
    refused: Mutex<HashSet<SessionId>>,
    /// Serialisiert das Verdrahten der Tracks zwischen zwei Endpunkten
    wiring: Mutex<()>,
    next_nonce: AtomicU64,
}

/// Gemeinsames Netz aller Loopback-Links eines Prozesses
#[derive(Clone)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

fn pair(a: &SessionId, b: &SessionId) -> LinkKey {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                endpoints: Mutex::new(HashMap::new()),
                unreachable: Mutex::new(HashSet::new()),
                refused: Mutex::new(HashSet::new()),
                wiring: Mutex::new(()),
                next_nonce: AtomicU64::new(1),
            }),
        }
    }

    /// Transport-Handle fuer einen Teilnehmer
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            network: self.clone(),
        }
    }

    /// Laesst den Verbindungsaufbau zwischen `a` und `b` scheitern
    pub fn set_unreachable(&self, a: &SessionId, b: &SessionId, unreachable: bool) {
        let key = pair(a, b);
        let mut set = self.inner.unreachable.lock();
        if unreachable {
            set.insert(key);
        } else {
            set.remove(&key);
        }
    }

    /// Laesst `connect()` fuer `local` sofort fehlschlagen
    pub fn refuse_connections(&self, local: &SessionId, refuse: bool) {
        let mut set = self.inner.refused.lock();
        if refuse {
            set.insert(local.clone());
        } else {
            set.remove(local);
        }
    }

    /// Bricht eine bestehende Verbindung auf der Seite von `local` ab
    pub fn fail_link(&self, local: &SessionId, remote: &SessionId, reason: &str) -> bool {
        match self.endpoint(local, remote) {
            Some(ep) => {
                ep.lock().events.push_back(LinkEvent::Error(reason.to_string()));
                true
            }
            None => false,
        }
    }

    /// Anzahl offener Links
    pub fn link_count(&self) -> usize {
        self.inner.endpoints.lock().len()
    }

    pub fn has_link(&self, local: &SessionId, remote: &SessionId) -> bool {
        self.endpoint(local, remote).is_some()
    }

    pub fn is_established(&self, local: &SessionId, remote: &SessionId) -> bool {
        self.endpoint(local, remote)
            .map(|ep| ep.lock().negotiation == Negotiation::Established)
            .unwrap_or(false)
    }

    fn endpoint(&self, local: &SessionId, remote: &SessionId) -> Option<Arc<Mutex<Endpoint>>> {
        self.inner
            .endpoints
            .lock()
            .get(&(local.clone(), remote.clone()))
            .cloned()
    }

    fn is_unreachable(&self, a: &SessionId, b: &SessionId) -> bool {
        self.inner.unreachable.lock().contains(&pair(a, b))
    }

    fn nonce(&self) -> u64 {
        self.inner.next_nonce.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// `PeerTransport` auf einem `LoopbackNetwork`
#[derive(Clone)]
pub struct LoopbackTransport {
    network: LoopbackNetwork,
}

impl LoopbackTransport {
    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }
}

fn candidate(nonce: u64) -> SignalMessage {
    SignalMessage::Candidate {
        candidate: format!(
            "candidate:{nonce} 1 udp 2130706431 127.0.0.1 {} typ host",
            40000 + nonce % 20000
        ),
        sdp_mid: Some("0".into()),
        sdp_m_line_index: Some(0),
    }
}

fn sdp_nonce(sdp: &str) -> Result<u64> {
    sdp.split_whitespace()
        .nth(2)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| MeshError::Signal(format!("SDP nicht lesbar: {sdp}")))
}

impl PeerTransport for LoopbackTransport {
    fn connect(&self, request: LinkRequest) -> Result<Box<dyn PeerLink>> {
        if self.network.inner.refused.lock().contains(&request.local) {
            return Err(MeshError::Transport {
                peer: request.remote.to_string(),
                grund: "Verbindungsaufbau abgelehnt".into(),
            });
        }

        let mut events = VecDeque::new();
        let (negotiation, nonce) = if request.initiator {
            let nonce = self.network.nonce();
            events.push_back(LinkEvent::Signal(SignalMessage::Offer {
                sdp: format!("loopback offer {nonce} {}->{}", request.local, request.remote),
            }));
            events.push_back(LinkEvent::Signal(candidate(nonce)));
            (Negotiation::OfferSent { nonce }, Some(nonce))
        } else {
            (Negotiation::AwaitingOffer, None)
        };

        let key = (request.local.clone(), request.remote.clone());
        let endpoint = Arc::new(Mutex::new(Endpoint {
            local: request.local,
            remote: request.remote,
            initiator: request.initiator,
            outbound: request.local_track,
            negotiation,
            nonce,
            remote_candidate: false,
            events,
            inbound: None,
            forward: None,
        }));
        self.network
            .inner
            .endpoints
            .lock()
            .insert(key, Arc::clone(&endpoint));

        Ok(Box::new(LoopbackLink {
            network: self.network.clone(),
            endpoint,
        }))
    }
}

/// Ein Loopback-Link
pub struct LoopbackLink {
    network: LoopbackNetwork,
    endpoint: Arc<Mutex<Endpoint>>,
}

impl LoopbackLink {
    fn establish(&self) {
        let _wiring = self.network.inner.wiring.lock();
        let (local, remote) = {
            let ep = self.endpoint.lock();
            (ep.local.clone(), ep.remote.clone())
        };

        if self.network.is_unreachable(&local, &remote) {
            self.push(LinkEvent::Error("ICE-Verbindung fehlgeschlagen".into()));
            return;
        }
        let partner_outbound = match self.network.endpoint(&remote, &local) {
            Some(partner) => {
                let partner = partner.lock();
                (partner.negotiation != Negotiation::Closed).then(|| partner.outbound.clone())
            }
            None => None,
        };
        let Some(source) = partner_outbound else {
            self.push(LinkEvent::Error("Gegenstelle nicht erreichbar".into()));
            return;
        };

        let inbound = AudioTrack::new(format!("remote {remote}"));
        let sink = source.connect(Arc::new(inbound.clone()));

        let mut ep = self.endpoint.lock();
        ep.inbound = Some(inbound.clone());
        ep.forward = Some((source, sink));
        ep.negotiation = Negotiation::Established;
        ep.events.push_back(LinkEvent::Stream(MediaStream::new(inbound)));
        ep.events.push_back(LinkEvent::Connected);
        tracing::debug!(local = %local, peer = %remote, "Loopback-Verbindung hergestellt");
    }

    fn push(&self, event: LinkEvent) {
        self.endpoint.lock().events.push_back(event);
    }
}

impl PeerLink for LoopbackLink {
    fn signal(&mut self, message: SignalMessage) -> Result<()> {
        let establish = {
            let mut ep = self.endpoint.lock();
            match (&message, ep.negotiation) {
                (_, Negotiation::Closed) => {
                    return Err(MeshError::Signal("Link bereits geschlossen".into()));
                }
                (SignalMessage::Offer { sdp }, Negotiation::AwaitingOffer) if !ep.initiator => {
                    let nonce = sdp_nonce(sdp)?;
                    let answer = format!("loopback answer {nonce} {}->{}", ep.local, ep.remote);
                    ep.events
                        .push_back(LinkEvent::Signal(SignalMessage::Answer { sdp: answer }));
                    ep.events.push_back(LinkEvent::Signal(candidate(nonce)));
                    ep.negotiation = Negotiation::Described { nonce };
                    ep.nonce = Some(nonce);
                }
                (SignalMessage::Answer { sdp }, Negotiation::OfferSent { nonce }) => {
                    let answered = sdp_nonce(sdp)?;
                    if answered != nonce {
                        return Err(MeshError::Signal(format!(
                            "Answer zu veraltetem Offer ({answered} statt {nonce})"
                        )));
                    }
                    ep.negotiation = Negotiation::Described { nonce };
                }
                (SignalMessage::Candidate { .. }, _) => {
                    ep.remote_candidate = true;
                }
                (other, state) => {
                    return Err(MeshError::Signal(format!(
                        "unerwartetes {} im Zustand {:?}",
                        other.kind(),
                        state
                    )));
                }
            }
            ep.ready_to_establish()
        };

        if establish {
            self.establish();
        }
        Ok(())
    }

    fn replace_track(&mut self, old: &AudioTrack, new: &AudioTrack) -> Result<()> {
        let _wiring = self.network.inner.wiring.lock();
        let (local, remote) = {
            let mut ep = self.endpoint.lock();
            if !ep.outbound.same_track(old) {
                return Err(MeshError::Transport {
                    peer: ep.remote.to_string(),
                    grund: "zu ersetzender Track ist nicht der aktuelle".into(),
                });
            }
            ep.outbound = new.clone();
            (ep.local.clone(), ep.remote.clone())
        };

        // Die Gegenseite haengt an unserem Track: umverdrahten
        if let Some(partner) = self.network.endpoint(&remote, &local) {
            let mut partner = partner.lock();
            let inbound = partner.inbound.clone();
            if let (Some((source, sink)), Some(inbound)) = (partner.forward.take(), inbound) {
                source.disconnect(sink);
                let new_sink = new.connect(Arc::new(inbound));
                partner.forward = Some((new.clone(), new_sink));
            }
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Option<LinkEvent> {
        self.endpoint.lock().events.pop_front()
    }

    fn destroy(&mut self) {
        let (local, remote, nonce) = {
            let mut ep = self.endpoint.lock();
            if ep.negotiation == Negotiation::Closed {
                return;
            }
            ep.negotiation = Negotiation::Closed;
            ep.events.clear();
            if let Some(inbound) = ep.inbound.take() {
                inbound.stop();
            }
            if let Some((source, sink)) = ep.forward.take() {
                source.disconnect(sink);
            }
            (ep.local.clone(), ep.remote.clone(), ep.nonce)
        };

        {
            let mut endpoints = self.network.inner.endpoints.lock();
            let key = (local.clone(), remote.clone());
            if endpoints
                .get(&key)
                .map(|ep| Arc::ptr_eq(ep, &self.endpoint))
                .unwrap_or(false)
            {
                endpoints.remove(&key);
            }
        }

        // Nur die Gegenseite derselben Aushandlung erfaehrt vom Abbau,
        // ein bereits neu aufgebauter Link bleibt unberuehrt
        if let (Some(partner), Some(nonce)) = (self.network.endpoint(&remote, &local), nonce) {
            let mut partner = partner.lock();
            if partner.negotiation != Negotiation::Closed && partner.nonce == Some(nonce) {
                partner.events.push_back(LinkEvent::Closed);
            }
        }
        tracing::trace!(local = %local, peer = %remote, "Loopback-Link abgebaut");
    }
}

impl Drop for LoopbackLink {
    fn drop(&mut self) {
        self.destroy();
    }
}
