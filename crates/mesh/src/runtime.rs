//! Laufzeit des Voice-Mesh
//!
//! Ein einzelner Actor-Task besitzt den `SessionController`; alle Zustands-
//! aenderungen laufen dort nacheinander. Die Oberflaeche spricht ueber den
//! klonbaren `VoiceMeshHandle` mit dem Actor und liest den Zustand aus einem
//! `watch`-Kanal.
//!
//! Asynchrone Schritte (Medien anfordern, Geraete auflisten) laufen als
//! eigene Tasks und melden ihr Ergebnis ueber einen internen Kanal zurueck.

use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use voicemesh_audio::{AudioDevice, AudioResult, DspConfig, LocalMedia};
use voicemesh_core::{MeshError, PeerId, Result, SessionEvent};

use crate::session::{JoinTicket, SessionController, SessionView, SwapTicket};

const KOMMANDO_KANAL_GROESSE: usize = 64;

/// Perioden der Laufzeit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshTimings {
    /// Abgleich mit dem Verzeichnis
    pub reconcile: Duration,
    /// Speaking-Abfrage
    pub activity: Duration,
    /// Geraeteliste neu einlesen
    pub device_poll: Duration,
    /// Mindestabstand eines vorgezogenen Abgleichs zum letzten Abgleich
    pub early_reconcile_gap: Duration,
}

impl Default for MeshTimings {
    fn default() -> Self {
        Self {
            reconcile: Duration::from_secs(1),
            activity: Duration::from_millis(100),
            device_poll: Duration::from_secs(2),
            early_reconcile_gap: Duration::from_millis(50),
        }
    }
}

enum Command {
    Join,
    Leave,
    ToggleMute,
    ToggleDeafen,
    UpdateDspConfig(DspConfig),
    SetPeerVolume(PeerId, f32),
    SetPeerMuted(PeerId, bool),
    Shutdown(oneshot::Sender<()>),
}

/// Ergebnisse der Hintergrund-Tasks
enum Completion {
    Join(JoinTicket, AudioResult<LocalMedia>),
    Swap(SwapTicket, AudioResult<LocalMedia>),
    Devices(AudioResult<Vec<AudioDevice>>),
}

/// Startpunkt der Laufzeit
pub struct VoiceMesh;

impl VoiceMesh {
    /// Startet den Actor auf der aktuellen tokio-Runtime
    pub fn spawn(controller: SessionController, timings: MeshTimings) -> VoiceMeshHandle {
        let (command_tx, command_rx) = mpsc::channel(KOMMANDO_KANAL_GROESSE);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(controller.view());
        let events = controller.event_sender();
        let cancel = CancellationToken::new();

        let actor = MeshActor {
            controller,
            timings,
            commands: command_rx,
            done_tx,
            done_rx,
            view_tx,
            cancel: cancel.clone(),
            join_task: None,
            swap_task: None,
            device_poll_pending: false,
            last_reconcile: None,
            early_reconcile: None,
        };
        let task = tokio::spawn(actor.run());

        VoiceMeshHandle {
            commands: command_tx,
            view: view_rx,
            events,
            cancel,
            task: std::sync::Arc::new(parking_lot::Mutex::new(Some(task))),
        }
    }
}

/// Handle fuer die Oberflaeche
#[derive(Clone)]
pub struct VoiceMeshHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SessionView>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    task: std::sync::Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl VoiceMeshHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| MeshError::Abgebrochen)
    }

    /// Tritt dem Kanal bei (Ergebnis ueber View und Ereignisse)
    pub async fn join(&self) -> Result<()> {
        self.send(Command::Join).await
    }

    pub async fn leave(&self) -> Result<()> {
        self.send(Command::Leave).await
    }

    pub async fn toggle_mute(&self) -> Result<()> {
        self.send(Command::ToggleMute).await
    }

    pub async fn toggle_deafen(&self) -> Result<()> {
        self.send(Command::ToggleDeafen).await
    }

    pub async fn update_dsp_config(&self, config: DspConfig) -> Result<()> {
        self.send(Command::UpdateDspConfig(config)).await
    }

    pub async fn set_peer_volume(&self, peer: PeerId, volume: f32) -> Result<()> {
        self.send(Command::SetPeerVolume(peer, volume)).await
    }

    pub async fn set_peer_muted(&self, peer: PeerId, muted: bool) -> Result<()> {
        self.send(Command::SetPeerMuted(peer, muted)).await
    }

    /// Aktueller Zustand als `watch`-Empfaenger
    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Verlaesst den Kanal (best-effort) und beendet den Actor
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Mesh-Actor endete mit Fehler: {}", e);
            }
        }
    }

    /// True solange der Actor laeuft
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.commands.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct MeshActor {
    controller: SessionController,
    timings: MeshTimings,
    commands: mpsc::Receiver<Command>,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
    view_tx: watch::Sender<SessionView>,
    cancel: CancellationToken,
    join_task: Option<JoinHandle<()>>,
    swap_task: Option<JoinHandle<()>>,
    device_poll_pending: bool,
    last_reconcile: Option<Instant>,
    /// Zeitpunkt eines vorgezogenen Abgleichs
    early_reconcile: Option<Instant>,
}

impl MeshActor {
    async fn run(mut self) {
        let mut reconcile = time::interval(self.timings.reconcile);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut activity = time::interval(self.timings.activity);
        activity.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut device_poll = time::interval(self.timings.device_poll);
        device_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut changes = self.controller.subscribe_directory();
        let mut notifications = true;

        tracing::debug!("Mesh-Actor gestartet");
        loop {
            let connected = self.controller.is_connected();
            let early = self.early_reconcile;

            tokio::select! {
                _ = self.cancel.cancelled() => break,

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.stop_session();
                        self.publish_view();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                Some(done) = self.done_rx.recv() => self.handle_completion(done),

                _ = reconcile.tick(), if connected => self.reconcile(),

                _ = activity.tick(), if connected => {
                    self.controller.poll_activity();
                }

                _ = device_poll.tick() => self.spawn_device_poll(),

                change = changes.recv(), if connected && notifications => match change {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => self.schedule_early_reconcile(),
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Verzeichnis liefert keine Benachrichtigungen mehr");
                        notifications = false;
                    }
                },

                _ = time::sleep_until(early.unwrap_or_else(Instant::now)), if connected && early.is_some() => {
                    self.reconcile();
                }
            }

            self.publish_view();
        }

        self.stop_session();
        self.publish_view();
        tracing::debug!("Mesh-Actor beendet");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join => {
                if let Some(ticket) = self.controller.begin_join() {
                    let done = self.done_tx.clone();
                    self.join_task = Some(tokio::spawn(async move {
                        let result = ticket.acquire().await;
                        let _ = done.send(Completion::Join(ticket, result));
                    }));
                }
            }
            Command::Leave => self.stop_session(),
            Command::ToggleMute => {
                self.controller.toggle_mute();
            }
            Command::ToggleDeafen => {
                self.controller.toggle_deafen();
            }
            Command::UpdateDspConfig(config) => {
                if let Some(ticket) = self.controller.begin_dsp_update(config) {
                    self.spawn_swap(ticket);
                }
            }
            Command::SetPeerVolume(peer, volume) => self.controller.set_peer_volume(&peer, volume),
            Command::SetPeerMuted(peer, muted) => self.controller.set_peer_muted(&peer, muted),
            Command::Shutdown(_) => {}
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Join(ticket, result) => {
                self.join_task = None;
                let nachziehen = self.controller.complete_join(ticket, result);
                if self.controller.is_connected() {
                    // Erster Abgleich sofort statt erst nach einer Periode
                    self.reconcile();
                }
                if let Some(swap) = nachziehen {
                    self.spawn_swap(swap);
                }
            }
            Completion::Swap(ticket, result) => {
                self.controller.complete_dsp_swap(ticket, result);
            }
            Completion::Devices(result) => {
                self.device_poll_pending = false;
                match result {
                    Ok(devices) => {
                        if let Some(ticket) = self.controller.on_devices_changed(devices) {
                            self.spawn_swap(ticket);
                        }
                    }
                    Err(e) => tracing::debug!("Geraeteliste nicht lesbar: {}", e),
                }
            }
        }
    }

    fn spawn_swap(&mut self, ticket: SwapTicket) {
        let done = self.done_tx.clone();
        self.swap_task = Some(tokio::spawn(async move {
            let result = ticket.acquire().await;
            let _ = done.send(Completion::Swap(ticket, result));
        }));
    }

    fn spawn_device_poll(&mut self) {
        if self.device_poll_pending {
            return;
        }
        self.device_poll_pending = true;
        let acquirer = self.controller.acquirer().clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = acquirer.enumerate_devices().await;
            let _ = done.send(Completion::Devices(result));
        });
    }

    fn reconcile(&mut self) {
        self.early_reconcile = None;
        self.controller.tick();
        self.last_reconcile = Some(Instant::now());
    }

    fn schedule_early_reconcile(&mut self) {
        if self.early_reconcile.is_some() {
            return;
        }
        let earliest = self
            .last_reconcile
            .map(|t| t + self.timings.early_reconcile_gap)
            .unwrap_or_else(Instant::now);
        self.early_reconcile = Some(earliest.max(Instant::now()));
    }

    /// Bricht laufende Anforderungen ab und verlaesst den Kanal
    fn stop_session(&mut self) {
        if let Some(task) = self.join_task.take() {
            task.abort();
        }
        if let Some(task) = self.swap_task.take() {
            task.abort();
        }
        self.early_reconcile = None;
        self.controller.leave();
    }

    fn publish_view(&self) {
        let view = self.controller.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}
