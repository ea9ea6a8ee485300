//! Neuronale Rauschunterdrueckung
//!
//! Das Modell arbeitet auf festen Frames (480 Samples = 10ms bei 48kHz) im
//! Integer-Wertebereich. Die Audio-Callbacks liefern dagegen beliebig grosse
//! Bloecke normalisierter Samples. `FrameProcessor` entkoppelt beides ueber
//! zwei Ring-Buffer:
//!
//! ```text
//! Callback -> Input-Ring -> [480 Samples] x32768 -> Modell -> /32768 -> Output-Ring -> Callback
//! ```
//!
//! Laeuft der Output-Ring leer, wird mit Stille aufgefuellt.

use async_trait::async_trait;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::error::AudioResult;
use crate::stream::{AudioTrack, SinkId, TrackSink};

/// Frame-Groesse des Modells in Samples
pub const FRAME_SIZE: usize = 480;
/// Skalierung zwischen normalisiertem und Integer-Wertebereich
pub const PCM_SCALE: f32 = 32768.0;
/// Kapazitaet der Ring-Buffer (1 Sekunde)
const RING_CAPACITY: usize = FRAME_SIZE * 100;

/// Ein Rauschunterdrueckungs-Modell
pub trait Denoiser: Send {
    /// Feste Frame-Groesse in Samples
    fn frame_size(&self) -> usize {
        FRAME_SIZE
    }

    /// Verarbeitet einen Frame im Integer-Wertebereich in-place
    fn process_frame(&mut self, frame: &mut [f32]);

    fn name(&self) -> &'static str;
}

/// Laedt ein Modell (einmalig, potentiell langsam)
#[async_trait]
pub trait DenoiserLoader: Send + Sync + 'static {
    async fn load(&self) -> AudioResult<Box<dyn Denoiser>>;
}

/// Zustand des Denoisers einer lokalen Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenoiserState {
    /// Neural-Denoise ist abgeschaltet
    Disabled,
    /// Modell wird geladen
    Loading,
    /// Modell geladen und im Signalweg
    Ready { model: &'static str },
    /// Laden fehlgeschlagen, Rohsignal wird verwendet
    Failed(String),
}

impl DenoiserState {
    /// True wenn der Denoiser im Signalweg liegt
    pub fn is_active(&self) -> bool {
        matches!(self, DenoiserState::Ready { .. })
    }
}

/// Zerlegt beliebige Callback-Bloecke in Modell-Frames
pub struct FrameProcessor {
    denoiser: Box<dyn Denoiser>,
    input_prod: HeapProd<f32>,
    input_cons: HeapCons<f32>,
    output_prod: HeapProd<f32>,
    output_cons: HeapCons<f32>,
    frame: Vec<f32>,
    frames_processed: u64,
}

impl FrameProcessor {
    pub fn new(denoiser: Box<dyn Denoiser>) -> Self {
        let frame_size = denoiser.frame_size().max(1);
        let (input_prod, input_cons) = HeapRb::<f32>::new(RING_CAPACITY.max(frame_size * 2)).split();
        let (output_prod, output_cons) = HeapRb::<f32>::new(RING_CAPACITY.max(frame_size * 2)).split();
        Self {
            denoiser,
            input_prod,
            input_cons,
            output_prod,
            output_cons,
            frame: vec![0.0; frame_size],
            frames_processed: 0,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame.len()
    }

    /// Nimmt Callback-Samples an und verarbeitet alle vollstaendigen Frames.
    ///
    /// Gibt die Anzahl der in diesem Aufruf verarbeiteten Frames zurueck.
    pub fn push_input(&mut self, samples: &[f32]) -> usize {
        let mut frames = 0;
        for chunk in samples.chunks(self.frame.len()) {
            let pushed = self.input_prod.push_slice(chunk);
            if pushed < chunk.len() {
                tracing::warn!(verworfen = chunk.len() - pushed, "Denoise Input-Ring voll");
            }
            frames += self.drain_frames();
        }
        frames
    }

    fn drain_frames(&mut self) -> usize {
        let mut frames = 0;
        while self.input_cons.occupied_len() >= self.frame.len() {
            self.input_cons.pop_slice(&mut self.frame);

            self.frame.iter_mut().for_each(|s| *s *= PCM_SCALE);
            self.denoiser.process_frame(&mut self.frame);
            self.frame
                .iter_mut()
                .for_each(|s| *s = (*s / PCM_SCALE).clamp(-1.0, 1.0));

            let pushed = self.output_prod.push_slice(&self.frame);
            if pushed < self.frame.len() {
                tracing::warn!(verworfen = self.frame.len() - pushed, "Denoise Output-Ring voll");
            }
            self.frames_processed += 1;
            frames += 1;
        }
        frames
    }

    /// Fuellt `out` aus dem Output-Ring, Rest mit Stille.
    ///
    /// Gibt die Anzahl der echten (nicht aufgefuellten) Samples zurueck.
    pub fn pull_output(&mut self, out: &mut [f32]) -> usize {
        let n = self.output_cons.pop_slice(out);
        out[n..].fill(0.0);
        n
    }

    pub fn output_available(&self) -> usize {
        self.output_cons.occupied_len()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn model_name(&self) -> &'static str {
        self.denoiser.name()
    }
}

/// Haengt einen `FrameProcessor` zwischen Roh-Track und verarbeiteten Track
pub struct DenoiseNode {
    processor: Mutex<FrameProcessor>,
    output: AudioTrack,
}

impl DenoiseNode {
    /// Verbindet den Denoiser mit `raw` und liefert den verarbeiteten Track
    pub fn attach(raw: &AudioTrack, denoiser: Box<dyn Denoiser>) -> DenoiseAttachment {
        let output = AudioTrack::new(format!("{} (denoised)", raw.label()));
        let node = Arc::new(DenoiseNode {
            processor: Mutex::new(FrameProcessor::new(denoiser)),
            output: output.clone(),
        });
        let sink_id = raw.connect(node.clone());
        DenoiseAttachment {
            node,
            raw: raw.clone(),
            sink_id,
            output,
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.processor.lock().frames_processed()
    }
}

impl TrackSink for DenoiseNode {
    fn accept(&self, samples: &[f32]) {
        let mut out = vec![0.0f32; samples.len()];
        {
            let mut processor = self.processor.lock();
            processor.push_input(samples);
            processor.pull_output(&mut out);
        }
        self.output.write(&out);
    }
}

/// Verbindung eines `DenoiseNode` mit seinem Roh-Track
pub struct DenoiseAttachment {
    node: Arc<DenoiseNode>,
    raw: AudioTrack,
    sink_id: SinkId,
    output: AudioTrack,
}

impl DenoiseAttachment {
    /// Der verarbeitete Track
    pub fn output(&self) -> &AudioTrack {
        &self.output
    }

    pub fn frames_processed(&self) -> u64 {
        self.node.frames_processed()
    }

    /// Trennt den Denoiser und stoppt den verarbeiteten Track
    pub fn detach(&self) {
        self.raw.disconnect(self.sink_id);
        self.output.stop();
    }
}

/// Eingebautes Modell: spektrale Subtraktion pro Frame
pub struct SpectralDenoiser {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    noise: Vec<f32>,
    frames_seen: u64,
}

/// Frames fuer die initiale Rauschschaetzung
const LEARNING_FRAMES: u64 = 10;
/// Ueberschaetzungs-Faktor der Subtraktion
const OVER_SUBTRACTION: f32 = 1.5;
/// Minimaler Gain pro Bin
const SPECTRAL_FLOOR: f32 = 0.1;
/// Bins oberhalb dieses Vielfachen der Schaetzung gelten als Sprache
const SPEECH_RATIO: f32 = 2.0;

impl SpectralDenoiser {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            forward: planner.plan_fft_forward(FRAME_SIZE),
            inverse: planner.plan_fft_inverse(FRAME_SIZE),
            buffer: vec![Complex::new(0.0, 0.0); FRAME_SIZE],
            noise: vec![0.0; FRAME_SIZE],
            frames_seen: 0,
        }
    }
}

impl Default for SpectralDenoiser {
    fn default() -> Self {
        Self::new()
    }
}

impl Denoiser for SpectralDenoiser {
    fn process_frame(&mut self, frame: &mut [f32]) {
        if frame.len() != FRAME_SIZE {
            return;
        }
        for (c, s) in self.buffer.iter_mut().zip(frame.iter()) {
            *c = Complex::new(*s, 0.0);
        }
        self.forward.process(&mut self.buffer);

        let learning = self.frames_seen < LEARNING_FRAMES;
        let weight = 1.0 / (self.frames_seen + 1) as f32;
        for (bin, noise) in self.buffer.iter_mut().zip(self.noise.iter_mut()) {
            let mag = bin.norm();
            if learning {
                *noise += (mag - *noise) * weight;
            } else if mag < SPEECH_RATIO * *noise {
                *noise = 0.95 * *noise + 0.05 * mag;
            }
            let gain = if mag > 1e-6 {
                ((mag - OVER_SUBTRACTION * *noise) / mag).max(SPECTRAL_FLOOR)
            } else {
                SPECTRAL_FLOOR
            };
            *bin *= gain;
        }
        self.frames_seen += 1;

        self.inverse.process(&mut self.buffer);
        let norm = FRAME_SIZE as f32;
        for (s, c) in frame.iter_mut().zip(self.buffer.iter()) {
            *s = c.re / norm;
        }
    }

    fn name(&self) -> &'static str {
        "spectral"
    }
}

/// Loader fuer den eingebauten `SpectralDenoiser`
#[derive(Debug, Default, Clone, Copy)]
pub struct SpectralDenoiserLoader;

#[async_trait]
impl DenoiserLoader for SpectralDenoiserLoader {
    async fn load(&self) -> AudioResult<Box<dyn Denoiser>> {
        Ok(Box::new(SpectralDenoiser::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Gibt Frames unveraendert zurueck und merkt sich den Wertebereich
    struct Passthrough {
        max_seen: Arc<Mutex<f32>>,
    }

    impl Denoiser for Passthrough {
        fn process_frame(&mut self, frame: &mut [f32]) {
            let mut max = self.max_seen.lock();
            for s in frame.iter() {
                *max = max.max(s.abs());
            }
        }

        fn name(&self) -> &'static str {
            "passthrough"
        }
    }

    fn passthrough() -> (Box<dyn Denoiser>, Arc<Mutex<f32>>) {
        let max = Arc::new(Mutex::new(0.0));
        (Box::new(Passthrough { max_seen: max.clone() }), max)
    }

    #[test]
    fn zwei_frames_aus_960_samples() {
        let mut fp = FrameProcessor::new(Box::new(SpectralDenoiser::new()));
        let input: Vec<f32> = (0..960).map(|i| (i as f32 * 0.05).sin() * 0.8).collect();

        let frames = fp.push_input(&input);
        assert_eq!(frames, 2);
        assert_eq!(fp.frames_processed(), 2);
        assert_eq!(fp.output_available(), 960);

        let mut out = vec![9.0f32; 960];
        assert_eq!(fp.pull_output(&mut out), 960);
        assert!(out.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn modell_sieht_integer_wertebereich() {
        let (model, max) = passthrough();
        let mut fp = FrameProcessor::new(model);
        fp.push_input(&vec![0.5f32; FRAME_SIZE]);
        assert!((*max.lock() - 16384.0).abs() < 1e-3);

        let mut out = vec![0.0f32; FRAME_SIZE];
        fp.pull_output(&mut out);
        assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn unvollstaendiger_frame_wartet() {
        let (model, _) = passthrough();
        let mut fp = FrameProcessor::new(model);
        assert_eq!(fp.push_input(&[0.1f32; 300]), 0);
        assert_eq!(fp.push_input(&[0.1f32; 300]), 1);
        assert_eq!(fp.output_available(), FRAME_SIZE);
    }

    #[test]
    fn unterlauf_wird_mit_stille_gefuellt() {
        let (model, _) = passthrough();
        let mut fp = FrameProcessor::new(model);
        fp.push_input(&[0.25f32; FRAME_SIZE]);
        let mut out = vec![1.0f32; FRAME_SIZE + 20];
        assert_eq!(fp.pull_output(&mut out), FRAME_SIZE);
        assert!(out[FRAME_SIZE..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn grosse_bloecke_laufen_nicht_ueber() {
        let (model, _) = passthrough();
        let mut fp = FrameProcessor::new(model);
        let frames = fp.push_input(&vec![0.1f32; RING_CAPACITY * 3 / 2]);
        assert_eq!(frames, RING_CAPACITY * 3 / 2 / FRAME_SIZE);
    }

    #[test]
    fn spektraler_denoiser_daempft_stationaeres_rauschen() {
        let mut model = SpectralDenoiser::new();
        // Deterministisches Pseudo-Rauschen
        let mut seed = 12345u32;
        let mut rauschen = || {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            ((seed >> 16) as f32 / 32768.0 - 1.0) * 300.0
        };
        let mut energie_rein = 0.0;
        let mut energie_raus = 0.0;
        for i in 0..40 {
            let mut frame: Vec<f32> = (0..FRAME_SIZE).map(|_| rauschen()).collect();
            let rein: f32 = frame.iter().map(|s| s * s).sum();
            model.process_frame(&mut frame);
            if i >= 20 {
                energie_rein += rein;
                energie_raus += frame.iter().map(|s| s * s).sum::<f32>();
            }
        }
        assert!(energie_raus < energie_rein * 0.5, "{} vs {}", energie_raus, energie_rein);
    }

    #[test]
    fn denoise_node_erzeugt_verarbeiteten_track() {
        let raw = AudioTrack::new("mic");
        let (model, _) = passthrough();
        let attachment = DenoiseNode::attach(&raw, model);
        raw.write(&[0.3f32; 960]);

        assert_eq!(attachment.frames_processed(), 2);
        assert_eq!(attachment.output().samples_written(), 960);
        let mut out = [0.0f32; 4];
        attachment.output().recent_samples(&mut out);
        assert!(out.iter().all(|s| (s - 0.3).abs() < 1e-6));

        attachment.detach();
        assert_eq!(raw.sink_count(), 0);
        assert!(attachment.output().is_stopped());
    }

    #[tokio::test]
    async fn spectral_loader_laedt_modell() {
        let model = SpectralDenoiserLoader.load().await.unwrap();
        assert_eq!(model.name(), "spectral");
        assert_eq!(model.frame_size(), FRAME_SIZE);
    }
}
