//! Audio-Streams und Tracks
//!
//! `AudioTrack` ist ein klonbarer Handle auf eine Sample-Quelle. Produzenten
//! (Capture-Thread, Denoiser, Remote-Transport) schreiben per `write()`,
//! Konsumenten haengen sich als `TrackSink` an oder lesen das Fenster der
//! zuletzt geschriebenen Samples (Analyser).
//!
//! Ein deaktivierter Track liefert Stille, behaelt aber seine Senken. Ein
//! gestoppter Track ist endgueltig tot und verwirft alle Schreibzugriffe.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Anzahl der Samples im Analyse-Fenster eines Tracks
pub const WINDOW_SAMPLES: usize = 2048;

/// Empfaenger von Samples eines Tracks
pub trait TrackSink: Send + Sync {
    fn accept(&self, samples: &[f32]);
}

/// Kennung einer angehaengten Senke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Klonbarer Handle auf einen Audio-Track
#[derive(Clone)]
pub struct AudioTrack {
    inner: Arc<TrackInner>,
}

struct TrackInner {
    id: Uuid,
    label: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
    window: Mutex<VecDeque<f32>>,
    sinks: Mutex<Vec<(SinkId, Arc<dyn TrackSink>)>>,
    next_sink: AtomicU64,
    samples_written: AtomicU64,
}

impl AudioTrack {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4(),
                label: label.into(),
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                window: Mutex::new(VecDeque::with_capacity(WINDOW_SAMPLES)),
                sinks: Mutex::new(Vec::new()),
                next_sink: AtomicU64::new(1),
                samples_written: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    /// Aktiviert/deaktiviert den Track ohne Neuverhandlung
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Relaxed)
    }

    /// Stoppt den Track endgueltig und loest alle Senken
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::Relaxed) {
            self.inner.sinks.lock().clear();
            tracing::trace!(track = %self.inner.id, label = %self.inner.label, "Track gestoppt");
        }
    }

    /// Anzahl aller seit Erstellung geschriebenen Samples
    pub fn samples_written(&self) -> u64 {
        self.inner.samples_written.load(Ordering::Relaxed)
    }

    /// Schreibt Samples in den Track und reicht sie an alle Senken weiter
    pub fn write(&self, samples: &[f32]) {
        if self.is_stopped() || samples.is_empty() {
            return;
        }

        let silence;
        let data: &[f32] = if self.is_enabled() {
            samples
        } else {
            silence = vec![0.0f32; samples.len()];
            &silence
        };

        {
            let mut window = self.inner.window.lock();
            for &s in data {
                if window.len() == WINDOW_SAMPLES {
                    window.pop_front();
                }
                window.push_back(s);
            }
        }
        self.inner
            .samples_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        // Senken ausserhalb des Locks aufrufen (Ketten von Tracks)
        let sinks: Vec<Arc<dyn TrackSink>> = self
            .inner
            .sinks
            .lock()
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for sink in sinks {
            sink.accept(data);
        }
    }

    /// Kopiert die juengsten `out.len()` Samples rechtsbuendig nach `out`.
    ///
    /// Fehlende Samples am Anfang werden mit Null aufgefuellt. Gibt die Anzahl
    /// der echten Samples zurueck.
    pub fn recent_samples(&self, out: &mut [f32]) -> usize {
        let window = self.inner.window.lock();
        let n = out.len().min(window.len());
        let pad = out.len() - n;
        out[..pad].fill(0.0);
        for (dst, src) in out[pad..].iter_mut().zip(window.iter().skip(window.len() - n)) {
            *dst = *src;
        }
        n
    }

    /// Haengt eine Senke an. Auf gestoppten Tracks wird die Senke nie aufgerufen.
    pub fn connect(&self, sink: Arc<dyn TrackSink>) -> SinkId {
        let id = SinkId(self.inner.next_sink.fetch_add(1, Ordering::Relaxed));
        if !self.is_stopped() {
            self.inner.sinks.lock().push((id, sink));
        }
        id
    }

    pub fn disconnect(&self, id: SinkId) -> bool {
        let mut sinks = self.inner.sinks.lock();
        let before = sinks.len();
        sinks.retain(|(sid, _)| *sid != id);
        sinks.len() != before
    }

    pub fn sink_count(&self) -> usize {
        self.inner.sinks.lock().len()
    }

    pub fn same_track(&self, other: &AudioTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl TrackSink for AudioTrack {
    fn accept(&self, samples: &[f32]) {
        self.write(samples);
    }
}

impl std::fmt::Debug for AudioTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioTrack")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Buendel von Audio-Tracks (ein Mikrofon = ein Track)
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: Uuid,
    tracks: Vec<AudioTrack>,
}

impl MediaStream {
    pub fn new(track: AudioTrack) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks: vec![track],
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Erster Audio-Track des Streams
    pub fn audio_track(&self) -> &AudioTrack {
        &self.tracks[0]
    }

    pub fn tracks(&self) -> &[AudioTrack] {
        &self.tracks
    }

    pub fn set_enabled(&self, enabled: bool) {
        for t in &self.tracks {
            t.set_enabled(enabled);
        }
    }

    /// Stoppt alle Tracks (gibt die Hardware frei)
    pub fn stop(&self) {
        for t in &self.tracks {
            t.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| !t.is_stopped())
    }
}

impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
