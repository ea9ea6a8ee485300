//! Session-Controller
//!
//! Besitzt die lokale Teilnahme und alle davon abhaengigen Tabellen
//! (Verbindungen, Analyser, Remote-Streams). Der Controller selbst ist
//! synchron; die asynchronen Schritte (Capture anfordern, Geraet wechseln)
//! sind in Ticket-Paare aufgeteilt:
//!
//! ```text
//! begin_join()        -> JoinTicket  --acquire().await-->  complete_join()
//! begin_dsp_update()  -> SwapTicket  --acquire().await-->  complete_dsp_swap()
//! ```
//!
//! `complete_join()` gibt selbst ein `SwapTicket` zurueck, wenn sich die
//! Capture-Konfiguration waehrend des Beitritts geaendert hat.
//!
//! Jedes Ticket traegt die Generation zum Zeitpunkt seiner Ausgabe. `leave()`
//! erhoeht die Generation, spaet eintreffende Ergebnisse werden verworfen und
//! ihre Tracks sofort gestoppt.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use voicemesh_audio::{
    acquire_local_media, ActivityDetector, ActivityMonitor, AudioDevice, AudioResult, DenoiserLoader,
    DenoiserState, DeviceRegistry, DspConfig, LocalMedia, MediaStream, PeerPlayback, PlaybackRouting,
    SharedCapture,
};
use voicemesh_core::{DirectoryEntry, MeshError, PeerId, SessionEvent, SessionId, UserId};
use voicemesh_directory::{DirectoryClient, EntryRef, ListChange};
use voicemesh_observability::MeshMetrics;

use crate::manager::{DerivedPeerView, PeerConnectionManager, ReconcileOutcome};
use crate::transport::PeerTransport;

const EVENT_KANAL_GROESSE: usize = 256;

/// Schluessel der Speaking-Erkennung
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivityKey {
    Local,
    Remote(PeerId),
}

/// Wer lokal teilnimmt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: UserId,
    pub display_name: String,
}

/// Capture-Backend und optionaler Denoise-Loader
#[derive(Clone)]
pub struct MediaAcquirer {
    capture: SharedCapture,
    loader: Option<Arc<dyn DenoiserLoader>>,
}

impl MediaAcquirer {
    pub fn new(capture: SharedCapture, loader: Option<Arc<dyn DenoiserLoader>>) -> Self {
        Self { capture, loader }
    }

    pub async fn acquire(&self, config: &DspConfig) -> AudioResult<LocalMedia> {
        acquire_local_media(self.capture.as_ref(), self.loader.as_deref(), config).await
    }

    pub async fn enumerate_devices(&self) -> AudioResult<Vec<AudioDevice>> {
        self.capture.enumerate_devices().await
    }
}

/// Ausstehender Beitritt
pub struct JoinTicket {
    generation: u64,
    config: DspConfig,
    acquirer: MediaAcquirer,
}

impl JoinTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fordert die lokalen Medien an (kann beliebig lange dauern)
    pub async fn acquire(&self) -> AudioResult<LocalMedia> {
        self.acquirer.acquire(&self.config).await
    }
}

/// Ausstehender Hot-Swap des Capture-Streams
pub struct SwapTicket {
    generation: u64,
    seq: u64,
    config: DspConfig,
    acquirer: MediaAcquirer,
}

impl SwapTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn acquire(&self) -> AudioResult<LocalMedia> {
        self.acquirer.acquire(&self.config).await
    }
}

/// Lokale Teilnahme, existiert nur im Zustand `Connected`
#[derive(Debug)]
pub struct LocalSession {
    pub session_id: SessionId,
    pub entry_ref: EntryRef,
    pub user_id: UserId,
    pub display_name: String,
    pub media: LocalMedia,
    pub dsp_config: DspConfig,
}

#[derive(Debug)]
enum Phase {
    Idle,
    Joining { generation: u64 },
    Connected(Box<LocalSession>),
}

/// Zustand des Controllers fuer die Oberflaeche
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseKind {
    #[default]
    Idle,
    Joining,
    Connected,
}

/// Remote-Stream samt Wiedergabe-Parametern
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStreamView {
    pub peer_id: PeerId,
    pub stream: MediaStream,
    pub playback: PeerPlayback,
}

/// Snapshot des abgeleiteten Zustands
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionView {
    pub phase: PhaseKind,
    pub session_id: Option<SessionId>,
    pub is_connected: bool,
    pub is_muted: bool,
    pub is_deafened: bool,
    pub is_speaking: bool,
    pub peers: Vec<DerivedPeerView>,
    pub remote_streams: Vec<RemoteStreamView>,
    pub denoiser: Option<DenoiserState>,
}

/// Steuert Beitritt, Abgleich und Audio-Zustand einer lokalen Teilnahme
pub struct SessionController {
    identity: SessionIdentity,
    directory: DirectoryClient,
    manager: PeerConnectionManager,
    acquirer: MediaAcquirer,
    devices: DeviceRegistry,
    dsp_config: DspConfig,
    routing: PlaybackRouting,
    monitor: ActivityMonitor<ActivityKey>,
    phase: Phase,
    generation: u64,
    swap_seq: u64,
    /// Private Mute-Praeferenz, bleibt ueber Sessions erhalten
    muted: bool,
    deafened: bool,
    local_speaking: bool,
    peers: Vec<DerivedPeerView>,
    remote_streams: HashMap<PeerId, MediaStream>,
    events: broadcast::Sender<SessionEvent>,
    metrics: MeshMetrics,
}

impl SessionController {
    pub fn new(
        identity: SessionIdentity,
        dsp_config: DspConfig,
        directory: DirectoryClient,
        transport: Arc<dyn PeerTransport>,
        acquirer: MediaAcquirer,
        metrics: MeshMetrics,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_KANAL_GROESSE);
        Self {
            manager: PeerConnectionManager::new(transport, directory.clone()),
            identity,
            directory,
            acquirer,
            devices: DeviceRegistry::new(dsp_config.input_device_id.clone()),
            routing: PlaybackRouting::from_config(&dsp_config),
            dsp_config,
            monitor: ActivityMonitor::new(),
            phase: Phase::Idle,
            generation: 0,
            swap_seq: 0,
            muted: false,
            deafened: false,
            local_speaking: false,
            peers: Vec::new(),
            remote_streams: HashMap::new(),
            events,
            metrics,
        }
    }

    // -----------------------------------------------------------------------
    // Zustand
    // -----------------------------------------------------------------------

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn phase(&self) -> PhaseKind {
        match self.phase {
            Phase::Idle => PhaseKind::Idle,
            Phase::Joining { .. } => PhaseKind::Joining,
            Phase::Connected(_) => PhaseKind::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.phase, Phase::Connected(_))
    }

    pub fn local_session(&self) -> Option<&LocalSession> {
        match &self.phase {
            Phase::Connected(session) => Some(session.as_ref()),
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.local_session().map(|s| &s.session_id)
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_deafened(&self) -> bool {
        self.deafened
    }

    /// Im Verzeichnis veroeffentlichter Mute-Status
    pub fn wire_muted(&self) -> bool {
        self.muted || self.deafened
    }

    pub fn is_speaking(&self) -> bool {
        self.local_speaking
    }

    pub fn peers(&self) -> &[DerivedPeerView] {
        &self.peers
    }

    pub fn remote_stream(&self, peer: &PeerId) -> Option<&MediaStream> {
        self.remote_streams.get(peer)
    }

    pub fn dsp_config(&self) -> &DspConfig {
        &self.dsp_config
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn manager(&self) -> &PeerConnectionManager {
        &self.manager
    }

    pub fn acquirer(&self) -> &MediaAcquirer {
        &self.acquirer
    }

    pub fn metrics(&self) -> &MeshMetrics {
        &self.metrics
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    /// Aenderungs-Benachrichtigungen des Verzeichnisses
    pub fn subscribe_directory(&self) -> broadcast::Receiver<ListChange> {
        self.directory.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // Ohne Abonnenten geht das Ereignis verloren
        let _ = self.events.send(event);
    }

    /// Snapshot fuer die Oberflaeche
    pub fn view(&self) -> SessionView {
        let mut remote_streams: Vec<RemoteStreamView> = self
            .remote_streams
            .iter()
            .map(|(peer, stream)| RemoteStreamView {
                peer_id: peer.clone(),
                stream: stream.clone(),
                playback: self.routing.routing_for(peer),
            })
            .collect();
        remote_streams.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

        SessionView {
            phase: self.phase(),
            session_id: self.session_id().cloned(),
            is_connected: self.is_connected(),
            is_muted: self.muted,
            is_deafened: self.deafened,
            is_speaking: self.local_speaking,
            peers: self.peers.clone(),
            remote_streams,
            denoiser: self.denoiser_state(),
        }
    }

    /// Waehrend eines Beitritts mit Neural-Denoise wird das Modell geladen
    fn denoiser_state(&self) -> Option<DenoiserState> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Joining { .. } => self
                .dsp_config
                .neural_denoise
                .then_some(DenoiserState::Loading),
            Phase::Connected(session) => Some(session.media.denoiser_state().clone()),
        }
    }

    // -----------------------------------------------------------------------
    // Join / Leave
    // -----------------------------------------------------------------------

    /// Startet einen Beitritt. `None` wenn bereits verbunden oder ein
    /// Beitritt laeuft.
    pub fn begin_join(&mut self) -> Option<JoinTicket> {
        if !matches!(self.phase, Phase::Idle) {
            tracing::debug!(phase = ?self.phase(), "Join ignoriert");
            return None;
        }
        self.generation += 1;
        self.phase = Phase::Joining {
            generation: self.generation,
        };
        tracing::info!(user_id = %self.identity.user_id, "Beitritt gestartet");
        Some(JoinTicket {
            generation: self.generation,
            config: self.dsp_config.clone(),
            acquirer: self.acquirer.clone(),
        })
    }

    /// Schliesst einen Beitritt mit dem Ergebnis der Medienanforderung ab.
    ///
    /// Wurde die Capture-Konfiguration waehrend der Anforderung geaendert,
    /// liefert der Abschluss ein `SwapTicket`, das die aktuelle Konfiguration
    /// nachzieht.
    pub fn complete_join(
        &mut self,
        ticket: JoinTicket,
        result: AudioResult<LocalMedia>,
    ) -> Option<SwapTicket> {
        let current = matches!(
            self.phase,
            Phase::Joining { generation } if generation == ticket.generation
        );
        if !current {
            if let Ok(media) = result {
                media.stop();
            }
            tracing::debug!(generation = ticket.generation, "Veraltetes Join-Ergebnis verworfen");
            return None;
        }

        let media = match result {
            Ok(media) => media,
            Err(e) => {
                let error = MeshError::from(e);
                tracing::warn!(
                    wiederholbar = error.ist_wiederholbar(),
                    "Beitritt fehlgeschlagen: {}",
                    error
                );
                self.phase = Phase::Idle;
                self.metrics.joins_total.with_label_values(&["fehler"]).inc();
                self.emit(SessionEvent::JoinFailed {
                    message: error.user_message(),
                });
                return None;
            }
        };

        let session_id = SessionId::generate();
        let user_id = self.identity.user_id.clone();
        let removed = self.directory.remove_where(|e| {
            e.session_id == session_id || (e.user_id == user_id && e.session_id != session_id)
        });
        if removed > 0 {
            tracing::info!(anzahl = removed, user_id = %user_id, "Geister-Eintraege entfernt");
            self.metrics.stale_entries_removed.inc_by(removed as u64);
        }

        let mut entry = DirectoryEntry::announcement(
            session_id.clone(),
            user_id.clone(),
            self.identity.display_name.clone(),
        );
        entry.is_muted = self.wire_muted();
        entry.is_deafened = self.deafened;
        let entry_ref = self.directory.publish(&entry);

        let track = media.outbound_track().clone();
        track.set_enabled(!self.wire_muted());
        self.monitor
            .register(ActivityKey::Local, ActivityDetector::for_track(track));

        let nachziehen = ticket.config.requires_reacquire(&self.dsp_config);
        self.phase = Phase::Connected(Box::new(LocalSession {
            session_id: session_id.clone(),
            entry_ref,
            user_id,
            display_name: self.identity.display_name.clone(),
            media,
            dsp_config: ticket.config,
        }));
        self.metrics.joins_total.with_label_values(&["ok"]).inc();
        tracing::info!(session_id = %session_id, entry = %entry_ref, "Kanal beigetreten");
        self.emit(SessionEvent::Joined { session_id });

        if !nachziehen {
            return None;
        }
        tracing::debug!("DSP-Konfiguration hat sich waehrend des Beitritts geaendert");
        Some(self.next_swap_ticket())
    }

    /// Beitritt in einem Schritt (Medien anfordern und abschliessen)
    pub async fn join(&mut self) {
        if let Some(ticket) = self.begin_join() {
            let result = ticket.acquire().await;
            if let Some(swap) = self.complete_join(ticket, result) {
                let result = swap.acquire().await;
                self.complete_dsp_swap(swap, result);
            }
        }
    }

    /// Verlaesst den Kanal. Im Zustand `Idle` ohne Wirkung.
    pub fn leave(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {}
            Phase::Joining { generation } => {
                self.generation += 1;
                tracing::info!(generation, "Beitritt abgebrochen");
            }
            Phase::Connected(session) => {
                self.generation += 1;
                self.swap_seq += 1;

                self.manager.destroy_all();
                self.monitor.dispose_all();
                for (_, stream) in self.remote_streams.drain() {
                    stream.stop();
                }
                session.media.stop();

                let removed = self.directory.remove_session(&session.session_id);
                if removed == 0 {
                    tracing::debug!(session_id = %session.session_id, "Eigener Eintrag war bereits entfernt");
                }

                self.peers.clear();
                self.local_speaking = false;
                self.routing.retain_peers(|_| false);
                self.metrics.connected_peers.set(0);
                tracing::info!(session_id = %session.session_id, "Kanal verlassen");
                self.emit(SessionEvent::Left {
                    session_id: session.session_id,
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Mute / Deafen
    // -----------------------------------------------------------------------

    pub fn toggle_mute(&mut self) -> bool {
        self.set_muted(!self.muted);
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        if self.muted == muted {
            return;
        }
        self.muted = muted;
        self.apply_audio_state();
        self.emit(SessionEvent::MuteChanged {
            muted,
            published: self.wire_muted(),
        });
    }

    pub fn toggle_deafen(&mut self) -> bool {
        self.set_deafened(!self.deafened);
        self.deafened
    }

    pub fn set_deafened(&mut self, deafened: bool) {
        if self.deafened == deafened {
            return;
        }
        self.deafened = deafened;
        self.apply_audio_state();
        self.emit(SessionEvent::DeafenChanged { deafened });
    }

    /// Uebertraegt Mute/Deafen auf Tracks und Verzeichnis
    fn apply_audio_state(&mut self) {
        let wire = self.wire_muted();
        if let Phase::Connected(session) = &self.phase {
            session.media.outbound_track().set_enabled(!wire);
            if let Err(e) = self.directory.set_muted(session.entry_ref, wire) {
                tracing::warn!("Mute-Status nicht veroeffentlicht: {}", e);
            }
            if let Err(e) = self.directory.set_deafened(session.entry_ref, self.deafened) {
                tracing::warn!("Deafen-Status nicht veroeffentlicht: {}", e);
            }
        }
        for stream in self.remote_streams.values() {
            stream.set_enabled(!self.deafened);
        }
        self.refresh_local_speaking();
    }

    fn refresh_local_speaking(&mut self) -> bool {
        let speaking = self.monitor.is_speaking(&ActivityKey::Local) && !self.wire_muted();
        if speaking == self.local_speaking {
            return false;
        }
        self.local_speaking = speaking;
        self.emit(SessionEvent::SpeakingChanged {
            peer_id: None,
            speaking,
        });
        true
    }

    // -----------------------------------------------------------------------
    // Wiedergabe
    // -----------------------------------------------------------------------

    pub fn set_peer_volume(&mut self, peer: &PeerId, volume: f32) {
        self.routing.set_peer_volume(peer, volume);
    }

    pub fn set_peer_muted(&mut self, peer: &PeerId, muted: bool) {
        self.routing.set_peer_muted(peer, muted);
    }

    pub fn playback(&self, peer: &PeerId) -> PeerPlayback {
        self.routing.routing_for(peer)
    }

    // -----------------------------------------------------------------------
    // DSP / Geraete
    // -----------------------------------------------------------------------

    /// Uebernimmt eine neue DSP-Konfiguration.
    ///
    /// Ausgabe-Felder wirken sofort. Aendern sich Capture-relevante Felder
    /// waehrend einer Teilnahme, wird ein `SwapTicket` fuer den Hot-Swap
    /// zurueckgegeben. Schlaegt der Swap fehl, werden die Capture-Felder auf
    /// die der aktiven Session zurueckgesetzt.
    pub fn begin_dsp_update(&mut self, config: DspConfig) -> Option<SwapTicket> {
        let reacquire = self.dsp_config.requires_reacquire(&config);
        self.routing.apply_config(&config);
        if self.dsp_config.input_device_id != config.input_device_id {
            self.devices.select(config.input_device_id.clone());
        }
        self.dsp_config = config;

        if !reacquire || !self.is_connected() {
            return None;
        }
        Some(self.next_swap_ticket())
    }

    fn next_swap_ticket(&mut self) -> SwapTicket {
        self.swap_seq += 1;
        tracing::info!(seq = self.swap_seq, geraet = ?self.dsp_config.input_device_id, "Hot-Swap gestartet");
        SwapTicket {
            generation: self.generation,
            seq: self.swap_seq,
            config: self.dsp_config.clone(),
            acquirer: self.acquirer.clone(),
        }
    }

    /// Capture-Felder wieder auf den Stand des laufenden Streams bringen
    fn restore_capture_config(&mut self) {
        let Phase::Connected(session) = &self.phase else {
            return;
        };
        let aktiv = &session.dsp_config;
        let cfg = &mut self.dsp_config;
        cfg.input_device_id = aktiv.input_device_id.clone();
        cfg.echo_cancellation = aktiv.echo_cancellation;
        cfg.noise_suppression = aktiv.noise_suppression;
        cfg.auto_gain_control = aktiv.auto_gain_control;
        cfg.neural_denoise = aktiv.neural_denoise;
        self.devices.select(cfg.input_device_id.clone());
    }

    /// Schliesst einen Hot-Swap ab. Nur das Ergebnis des neuesten Tickets
    /// wird uebernommen.
    pub fn complete_dsp_swap(&mut self, ticket: SwapTicket, result: AudioResult<LocalMedia>) {
        let current = ticket.generation == self.generation && ticket.seq == self.swap_seq;
        if !current || !self.is_connected() {
            if let Ok(media) = result {
                media.stop();
            }
            tracing::debug!(seq = ticket.seq, "Veraltetes Swap-Ergebnis verworfen");
            return;
        }

        let media = match result {
            Ok(media) => media,
            Err(e) => {
                let error = MeshError::from(e);
                tracing::warn!(
                    wiederholbar = error.ist_wiederholbar(),
                    "Hot-Swap fehlgeschlagen, alter Stream bleibt aktiv: {}",
                    error
                );
                self.metrics
                    .stream_swaps_total
                    .with_label_values(&["fehler"])
                    .inc();
                self.restore_capture_config();
                self.emit(SessionEvent::SwapFailed {
                    message: error.user_message(),
                });
                return;
            }
        };

        let wire = self.wire_muted();
        let Phase::Connected(session) = &mut self.phase else {
            return;
        };
        let old_track = session.media.outbound_track().clone();
        let new_track = media.outbound_track().clone();
        new_track.set_enabled(!wire);

        let failed = self.manager.replace_stream(&old_track, &new_track);
        self.monitor.register(
            ActivityKey::Local,
            ActivityDetector::for_track(new_track),
        );

        let old = std::mem::replace(&mut session.media, media);
        session.dsp_config = ticket.config;
        old.stop();

        // Abgebaute Verbindungen entstehen beim naechsten Abgleich neu
        for (peer, _) in &failed {
            self.drop_remote(peer);
        }

        self.metrics.stream_swaps_total.with_label_values(&["ok"]).inc();
        tracing::info!(neu_aufzubauen = failed.len(), "Capture-Stream ausgetauscht");
        self.emit(SessionEvent::StreamSwapped);
    }

    /// Hot-Swap in einem Schritt
    pub async fn apply_dsp_config(&mut self, config: DspConfig) {
        if let Some(ticket) = self.begin_dsp_update(config) {
            let result = ticket.acquire().await;
            self.complete_dsp_swap(ticket, result);
        }
    }

    /// Verarbeitet eine neue Geraeteliste. Verschwindet das gewaehlte
    /// Eingabegeraet, wird auf das erste verfuegbare gewechselt.
    pub fn on_devices_changed(&mut self, devices: Vec<AudioDevice>) -> Option<SwapTicket> {
        let refresh = self.devices.refresh(devices);
        if !refresh.fell_back {
            return None;
        }
        let mut config = self.dsp_config.clone();
        config.input_device_id = refresh.selected;
        self.begin_dsp_update(config)
    }

    // -----------------------------------------------------------------------
    // Abgleich
    // -----------------------------------------------------------------------

    /// Ein Abgleich-Durchlauf: Snapshot, Verbindungen, Sicht, Selbstheilung
    pub fn tick(&mut self) {
        let Phase::Connected(session) = &self.phase else {
            return;
        };
        let started = Instant::now();
        let session_id = session.session_id.clone();
        let entry_ref = session.entry_ref;
        let track = session.media.outbound_track().clone();

        let snapshot = self.directory.entries();
        let present = snapshot.iter().any(|o| o.entry.session_id == session_id);

        let monitor = &self.monitor;
        let outcome = self.manager.reconcile(
            &snapshot,
            &session_id,
            &track,
            present.then_some(entry_ref),
            |peer| monitor.is_speaking(&ActivityKey::Remote(peer.clone())),
        );
        self.handle_outcome(outcome);

        if !present {
            self.self_heal();
        }

        self.metrics.reconcile_ticks.inc();
        self.metrics
            .reconcile_duration_seconds
            .observe(started.elapsed().as_secs_f64());
        self.metrics
            .connected_peers
            .set(self.manager.connected_count() as i64);
    }

    fn handle_outcome(&mut self, outcome: ReconcileOutcome) {
        for (peer_id, peer_name) in outcome.joined {
            self.emit(SessionEvent::PeerJoined { peer_id, peer_name });
        }

        for peer in outcome.departed {
            self.drop_remote(&peer);
            self.routing.remove_peer(&peer);
            self.emit(SessionEvent::PeerLeft { peer_id: peer });
        }
        for peer in &outcome.closed_links {
            self.drop_remote(peer);
        }

        for (peer, stream) in outcome.added_streams {
            if self.deafened {
                stream.set_enabled(false);
            }
            self.monitor.register(
                ActivityKey::Remote(peer.clone()),
                ActivityDetector::for_track(stream.audio_track().clone()),
            );
            if let Some(old) = self.remote_streams.insert(peer, stream) {
                old.stop();
            }
        }

        if outcome.signal_failures > 0 {
            self.metrics
                .signal_ingest_failures
                .inc_by(outcome.signal_failures);
        }
        if outcome.link_failures > 0 {
            self.metrics.link_failures.inc_by(outcome.link_failures);
        }
        self.peers = outcome.views;
    }

    fn drop_remote(&mut self, peer: &PeerId) {
        self.monitor.unregister(&ActivityKey::Remote(peer.clone()));
        if let Some(stream) = self.remote_streams.remove(peer) {
            stream.stop();
        }
    }

    /// Veroeffentlicht den eigenen Eintrag neu, wenn er im Snapshot fehlte
    fn self_heal(&mut self) {
        let payload = self.manager.outbound_payload();
        let wire = self.wire_muted();
        let deafened = self.deafened;
        let Phase::Connected(session) = &mut self.phase else {
            return;
        };

        let mut entry = DirectoryEntry::announcement(
            session.session_id.clone(),
            session.user_id.clone(),
            session.display_name.clone(),
        );
        entry.signal_payload = payload.clone();
        entry.is_muted = wire;
        entry.is_deafened = deafened;
        session.entry_ref = self.directory.publish(&entry);
        self.manager.mark_published(&payload);

        let session_id = session.session_id.clone();
        tracing::info!(session_id = %session_id, entry = %session.entry_ref, "Eigener Eintrag fehlte, neu veroeffentlicht");
        self.metrics.self_heals.inc();
        self.emit(SessionEvent::SelfHealed { session_id });
    }

    /// Zentrale Speaking-Abfrage. Gibt `true` zurueck wenn sich ein Flag
    /// geaendert hat.
    pub fn poll_activity(&mut self) -> bool {
        let mut changed = false;
        for (key, speaking) in self.monitor.poll() {
            if let ActivityKey::Remote(peer) = key {
                if let Some(view) = self.peers.iter_mut().find(|p| p.peer_id == peer) {
                    view.is_speaking = speaking;
                }
                changed = true;
                self.emit(SessionEvent::SpeakingChanged {
                    peer_id: Some(peer),
                    speaking,
                });
            }
        }
        self.refresh_local_speaking() || changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackNetwork;
    use voicemesh_audio::{SyntheticCapture, SyntheticFailure};
    use voicemesh_directory::InMemoryList;

    fn controller(capture: Arc<SyntheticCapture>) -> (SessionController, DirectoryClient) {
        let dir = DirectoryClient::new(Arc::new(InMemoryList::new()));
        let ctrl = SessionController::new(
            SessionIdentity {
                user_id: "alice".into(),
                display_name: "Alice".into(),
            },
            DspConfig::default(),
            dir.clone(),
            Arc::new(LoopbackNetwork::new().transport()),
            MediaAcquirer::new(capture, None),
            MeshMetrics::neu().unwrap(),
        );
        (ctrl, dir)
    }

    #[tokio::test]
    async fn join_veroeffentlicht_ankuendigung() {
        let capture = Arc::new(SyntheticCapture::new());
        let (mut ctrl, dir) = controller(capture);
        let mut events = ctrl.subscribe_events();
        ctrl.join().await;

        assert!(ctrl.is_connected());
        let sid = ctrl.session_id().cloned().unwrap();
        let eintrag = dir.find_session(&sid).unwrap().entry;
        assert!(eintrag.is_announcement());
        assert_eq!(eintrag.display_name, "Alice");
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Joined { session_id: sid });
    }

    #[tokio::test]
    async fn zweiter_join_ist_wirkungslos() {
        let capture = Arc::new(SyntheticCapture::new());
        let (mut ctrl, dir) = controller(capture.clone());
        ctrl.join().await;
        ctrl.join().await;
        assert_eq!(capture.acquisition_count(), 1);
        assert_eq!(dir.entries().len(), 1);

        let (mut ctrl2, _) = controller(capture);
        let ticket = ctrl2.begin_join();
        assert!(ticket.is_some());
        assert!(ctrl2.begin_join().is_none());
        assert_eq!(ctrl2.phase(), PhaseKind::Joining);
    }

    #[tokio::test]
    async fn capture_fehler_bleibt_idle() {
        let capture = Arc::new(SyntheticCapture::new());
        capture.fail_next(SyntheticFailure::PermissionDenied);
        let (mut ctrl, dir) = controller(capture);
        let mut events = ctrl.subscribe_events();
        ctrl.join().await;

        assert_eq!(ctrl.phase(), PhaseKind::Idle);
        assert!(dir.entries().is_empty());
        match events.try_recv().unwrap() {
            SessionEvent::JoinFailed { message } => assert!(message.contains("Berechtigung")),
            other => panic!("JoinFailed erwartet, war {other:?}"),
        }
    }

    #[tokio::test]
    async fn leave_waehrend_join_verwirft_ergebnis() {
        let capture = Arc::new(SyntheticCapture::new());
        let (mut ctrl, dir) = controller(capture);
        let ticket = ctrl.begin_join().unwrap();
        let result = ticket.acquire().await;
        let stream = result.as_ref().unwrap().raw().clone();

        ctrl.leave();
        assert!(ctrl.complete_join(ticket, result).is_none());
        assert_eq!(ctrl.phase(), PhaseKind::Idle);
        assert!(!stream.is_active());
        assert!(dir.entries().is_empty());
    }

    #[tokio::test]
    async fn mute_waehrend_deafen() {
        let capture = Arc::new(SyntheticCapture::new());
        let (mut ctrl, dir) = controller(capture);
        ctrl.join().await;
        let sid = ctrl.session_id().cloned().unwrap();
        let track = ctrl.local_session().unwrap().media.outbound_track().clone();

        ctrl.toggle_deafen();
        assert!(dir.find_session(&sid).unwrap().entry.is_muted);
        assert!(!track.is_enabled());

        // Private Praeferenz aendert sich, veroeffentlicht bleibt stumm
        ctrl.toggle_mute();
        assert!(ctrl.is_muted());
        assert!(dir.find_session(&sid).unwrap().entry.is_muted);
        ctrl.toggle_mute();
        assert!(!ctrl.is_muted());
        assert!(dir.find_session(&sid).unwrap().entry.is_muted);

        ctrl.toggle_deafen();
        let eintrag = dir.find_session(&sid).unwrap().entry;
        assert!(!eintrag.is_muted);
        assert!(!eintrag.is_deafened);
        assert!(track.is_enabled());
    }

    #[tokio::test]
    async fn hot_swap_tauscht_stream() {
        let capture = Arc::new(SyntheticCapture::with_devices(["mic-a", "mic-b"]));
        let (mut ctrl, _) = controller(capture.clone());
        ctrl.join().await;
        let alt = ctrl.local_session().unwrap().media.raw().clone();

        let mut cfg = ctrl.dsp_config().clone();
        cfg.input_device_id = Some("mic-b".into());
        ctrl.apply_dsp_config(cfg).await;

        assert!(!alt.is_active());
        assert_eq!(capture.acquisition_count(), 2);
        assert_eq!(
            ctrl.local_session().unwrap().dsp_config.input_device_id.as_deref(),
            Some("mic-b")
        );
    }

    #[tokio::test]
    async fn hot_swap_fehler_behaelt_alten_stream() {
        let capture = Arc::new(SyntheticCapture::new());
        let (mut ctrl, _) = controller(capture.clone());
        ctrl.join().await;
        let alt = ctrl.local_session().unwrap().media.raw().clone();
        let mut events = ctrl.subscribe_events();

        let mut cfg = ctrl.dsp_config().clone();
        cfg.input_device_id = Some("gibt-es-nicht".into());
        ctrl.apply_dsp_config(cfg).await;

        assert!(alt.is_active());
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::SwapFailed { .. }));
        // Konfiguration und Geraetewahl entsprechen wieder dem laufenden Stream
        assert_eq!(ctrl.dsp_config().input_device_id, None);
        assert_eq!(ctrl.devices().selected(), None);
    }

    #[tokio::test]
    async fn swap_fehler_behaelt_ausgabe_aenderung() {
        let capture = Arc::new(SyntheticCapture::new());
        let (mut ctrl, _) = controller(capture);
        ctrl.join().await;

        let mut cfg = ctrl.dsp_config().clone();
        cfg.input_device_id = Some("gibt-es-nicht".into());
        cfg.output_volume = 0.25;
        ctrl.apply_dsp_config(cfg).await;

        assert_eq!(ctrl.dsp_config().input_device_id, None);
        assert!((ctrl.dsp_config().output_volume - 0.25).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn denoiser_laedt_waehrend_beitritt() {
        let capture = Arc::new(SyntheticCapture::new());
        let (mut ctrl, _) = controller(capture);
        let mut cfg = ctrl.dsp_config().clone();
        cfg.neural_denoise = true;
        assert!(ctrl.begin_dsp_update(cfg).is_none());
        assert_eq!(ctrl.view().denoiser, None);

        let join = ctrl.begin_join().unwrap();
        assert_eq!(ctrl.view().denoiser, Some(DenoiserState::Loading));
        let result = join.acquire().await;
        ctrl.complete_join(join, result);
        assert_ne!(ctrl.view().denoiser, Some(DenoiserState::Loading));
    }

    #[tokio::test]
    async fn dsp_aenderung_waehrend_beitritt_wird_nachgeholt() {
        let capture = Arc::new(SyntheticCapture::with_devices(["mic-a", "mic-b"]));
        let (mut ctrl, _) = controller(capture.clone());

        let join = ctrl.begin_join().unwrap();
        let mut cfg = ctrl.dsp_config().clone();
        cfg.input_device_id = Some("mic-b".into());
        assert!(ctrl.begin_dsp_update(cfg).is_none());

        let result = join.acquire().await;
        let swap = ctrl.complete_join(join, result).expect("Swap fehlt");
        assert!(ctrl.is_connected());
        assert_eq!(ctrl.local_session().unwrap().dsp_config.input_device_id, None);

        let result = swap.acquire().await;
        ctrl.complete_dsp_swap(swap, result);
        assert_eq!(capture.acquisition_count(), 2);
        assert_eq!(
            ctrl.local_session().unwrap().dsp_config.input_device_id.as_deref(),
            Some("mic-b")
        );
    }

    #[tokio::test]
    async fn beitritt_ohne_dsp_aenderung_ohne_swap() {
        let capture = Arc::new(SyntheticCapture::new());
        let (mut ctrl, _) = controller(capture);
        let join = ctrl.begin_join().unwrap();
        let mut cfg = ctrl.dsp_config().clone();
        cfg.output_volume = 0.5;
        assert!(ctrl.begin_dsp_update(cfg).is_none());
        let result = join.acquire().await;
        assert!(ctrl.complete_join(join, result).is_none());
    }

    #[tokio::test]
    async fn nur_ausgabe_aenderung_ohne_swap() {
        let capture = Arc::new(SyntheticCapture::new());
        let (mut ctrl, _) = controller(capture.clone());
        ctrl.join().await;
        let mut cfg = ctrl.dsp_config().clone();
        cfg.output_volume = 0.5;
        cfg.output_device_id = Some("kopfhoerer".into());
        assert!(ctrl.begin_dsp_update(cfg).is_none());
        let p = ctrl.playback(&"b2".into());
        assert_eq!(p.output_device_id.as_deref(), Some("kopfhoerer"));
        assert!((p.gain - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn veralteter_swap_wird_verworfen() {
        let capture = Arc::new(SyntheticCapture::with_devices(["a", "b", "c"]));
        let (mut ctrl, _) = controller(capture);
        ctrl.join().await;

        let mut cfg = ctrl.dsp_config().clone();
        cfg.input_device_id = Some("b".into());
        let erster = ctrl.begin_dsp_update(cfg.clone()).unwrap();
        cfg.input_device_id = Some("c".into());
        let zweiter = ctrl.begin_dsp_update(cfg).unwrap();

        let r1 = erster.acquire().await;
        let s1 = r1.as_ref().unwrap().raw().clone();
        ctrl.complete_dsp_swap(erster, r1);
        assert!(!s1.is_active());

        let r2 = zweiter.acquire().await;
        ctrl.complete_dsp_swap(zweiter, r2);
        assert_eq!(
            ctrl.local_session().unwrap().dsp_config.input_device_id.as_deref(),
            Some("c")
        );
    }

    #[tokio::test]
    async fn geraete_fallback_startet_swap() {
        let capture = Arc::new(SyntheticCapture::with_devices(["a", "b"]));
        let (mut ctrl, _) = controller(capture);
        let mut cfg = ctrl.dsp_config().clone();
        cfg.input_device_id = Some("b".into());
        ctrl.apply_dsp_config(cfg).await;
        ctrl.join().await;

        let ticket = ctrl
            .on_devices_changed(vec![AudioDevice::new("a", None)])
            .expect("Fallback erwartet");
        let result = ticket.acquire().await;
        ctrl.complete_dsp_swap(ticket, result);
        assert_eq!(ctrl.devices().selected(), Some("a"));
        assert_eq!(ctrl.dsp_config().input_device_id.as_deref(), Some("a"));
    }
}
