//! Mikrofon-Capture
//!
//! `CaptureBackend` ist die Schnittstelle zur Capture-Hardware. Eine
//! Anforderung kann beliebig lange dauern (Berechtigungsdialog) und mit
//! `ZugriffVerweigert` oder `KeinEingabegeraet` fehlschlagen.
//!
//! `SyntheticCapture` ist ein deterministisches In-Process-Backend: Tests
//! schreiben Samples direkt in die erzeugten Tracks, der Demo-Knoten laesst
//! einen Ton-Generator laufen. Das cpal-Backend liegt in `hardware`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CaptureConstraints;
use crate::device::AudioDevice;
use crate::error::{AudioError, AudioResult};
use crate::stream::{AudioTrack, MediaStream};

/// Schnittstelle zur Capture-Hardware
#[async_trait]
pub trait CaptureBackend: Send + Sync + 'static {
    /// Fordert einen Capture-Stream unter den gegebenen Constraints an
    async fn acquire(&self, constraints: &CaptureConstraints) -> AudioResult<MediaStream>;

    /// Listet die Eingabegeraete (Namen nur nach erteilter Berechtigung)
    async fn enumerate_devices(&self) -> AudioResult<Vec<AudioDevice>>;

    /// Ob bereits eine Berechtigung erteilt wurde
    fn permission_granted(&self) -> bool;
}

/// Fehler die `SyntheticCapture` auf Anforderung simuliert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticFailure {
    PermissionDenied,
    NoDevice,
}

/// Sinuston den `SyntheticCapture` in jeden Track schreibt
#[derive(Debug, Clone, Copy)]
pub struct ToneSpec {
    pub frequency_hz: f32,
    pub amplitude: f32,
}

/// Samples pro Generator-Schritt (10ms bei 48kHz)
const TONE_CHUNK: usize = 480;

/// Deterministisches Capture-Backend ohne Hardware
pub struct SyntheticCapture {
    devices: Mutex<Vec<String>>,
    permission: AtomicBool,
    deny_permission: AtomicBool,
    failures: Mutex<VecDeque<SyntheticFailure>>,
    delay: Mutex<Option<Duration>>,
    tone: Mutex<Option<ToneSpec>>,
    acquisitions: Mutex<Vec<(CaptureConstraints, MediaStream)>>,
}

impl SyntheticCapture {
    /// Backend mit einem Standard-Mikrofon
    pub fn new() -> Self {
        Self::with_devices(["default"])
    }

    pub fn with_devices<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            devices: Mutex::new(devices.into_iter().map(Into::into).collect()),
            permission: AtomicBool::new(false),
            deny_permission: AtomicBool::new(false),
            failures: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
            tone: Mutex::new(None),
            acquisitions: Mutex::new(Vec::new()),
        }
    }

    pub fn set_devices<I, S>(&self, devices: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.devices.lock() = devices.into_iter().map(Into::into).collect();
    }

    /// Laesst die naechste Anforderung mit `failure` scheitern
    pub fn fail_next(&self, failure: SyntheticFailure) {
        self.failures.lock().push_back(failure);
    }

    /// Verweigert alle Anforderungen bis zum Zuruecksetzen
    pub fn set_permission_denied(&self, denied: bool) {
        self.deny_permission.store(denied, Ordering::Relaxed);
    }

    /// Simuliert einen Berechtigungsdialog der `delay` dauert
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn set_tone(&self, tone: Option<ToneSpec>) {
        *self.tone.lock() = tone;
    }

    /// Zuletzt ausgelieferter Stream
    pub fn last_stream(&self) -> Option<MediaStream> {
        self.acquisitions.lock().last().map(|(_, s)| s.clone())
    }

    pub fn last_constraints(&self) -> Option<CaptureConstraints> {
        self.acquisitions.lock().last().map(|(c, _)| c.clone())
    }

    pub fn acquisition_count(&self) -> usize {
        self.acquisitions.lock().len()
    }

    fn check_failure(&self, constraints: &CaptureConstraints) -> AudioResult<String> {
        if self.deny_permission.load(Ordering::Relaxed) {
            return Err(AudioError::ZugriffVerweigert("Berechtigung abgelehnt".into()));
        }
        if let Some(f) = self.failures.lock().pop_front() {
            return Err(match f {
                SyntheticFailure::PermissionDenied => {
                    AudioError::ZugriffVerweigert("Berechtigung abgelehnt".into())
                }
                SyntheticFailure::NoDevice => AudioError::KeinEingabegeraet,
            });
        }

        let devices = self.devices.lock();
        match &constraints.device_id {
            Some(id) if devices.iter().any(|d| d == id) => Ok(id.clone()),
            Some(id) => Err(AudioError::GeraetNichtGefunden(id.clone())),
            None => devices.first().cloned().ok_or(AudioError::KeinEingabegeraet),
        }
    }
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureBackend for SyntheticCapture {
    async fn acquire(&self, constraints: &CaptureConstraints) -> AudioResult<MediaStream> {
        let delay = *self.delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let device = self.check_failure(constraints)?;
        self.permission.store(true, Ordering::Relaxed);

        let track = AudioTrack::new(format!("Mikrofon {device}"));
        let stream = MediaStream::new(track.clone());

        let tone = *self.tone.lock();
        if let Some(tone) = tone {
            tokio::spawn(run_tone(track, tone, constraints.sample_rate));
        }

        tracing::debug!(device = %device, stream = %stream.id(), "Synthetischer Capture gestartet");
        self.acquisitions
            .lock()
            .push((constraints.clone(), stream.clone()));
        Ok(stream)
    }

    async fn enumerate_devices(&self) -> AudioResult<Vec<AudioDevice>> {
        let granted = self.permission_granted();
        Ok(self
            .devices
            .lock()
            .iter()
            .map(|id| AudioDevice::new(id.clone(), granted.then(|| format!("Mikrofon {id}"))))
            .collect())
    }

    fn permission_granted(&self) -> bool {
        self.permission.load(Ordering::Relaxed)
    }
}

/// Schreibt einen Sinuston in Echtzeit-Bloecken bis der Track gestoppt wird
async fn run_tone(track: AudioTrack, tone: ToneSpec, sample_rate: u32) {
    let step = std::f32::consts::TAU * tone.frequency_hz / sample_rate as f32;
    let mut phase = 0.0f32;
    let mut interval = tokio::time::interval(Duration::from_millis(
        (TONE_CHUNK as u64 * 1000) / sample_rate.max(1) as u64,
    ));
    let mut chunk = vec![0.0f32; TONE_CHUNK];

    while !track.is_stopped() {
        interval.tick().await;
        for s in chunk.iter_mut() {
            *s = phase.sin() * tone.amplitude;
            phase = (phase + step) % std::f32::consts::TAU;
        }
        track.write(&chunk);
    }
    tracing::trace!(track = %track.id(), "Ton-Generator beendet");
}

/// Gemeinsam nutzbarer Handle
pub type SharedCapture = Arc<dyn CaptureBackend>;
