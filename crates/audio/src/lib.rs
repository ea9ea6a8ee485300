//! voicemesh-audio – Lokale Audio-Pipeline
//!
//! - Streams und Tracks (klonbare Handles mit Senken)
//! - Capture-Backends (synthetisch, cpal mit Feature `hardware`)
//! - Native DSP-Kette: Echo Cancellation, Noise Suppression, AGC
//! - Neural-Denoise ueber einen Frame-Prozessor
//! - FFT-Analyser und Speaking-Erkennung
//! - Geraeteauswahl und Playback-Routing

pub mod activity;
pub mod analyser;
pub mod capture;
pub mod config;
pub mod denoise;
pub mod device;
pub mod dsp;
pub mod error;
#[cfg(feature = "hardware")]
pub mod hardware;
pub mod media;
pub mod pipeline;
pub mod stream;
pub mod volume;

// Bequeme Re-Exporte der wichtigsten Typen
pub use activity::{ActivityDetector, ActivityMonitor, SPEAKING_THRESHOLD};
pub use analyser::{FftAnalyser, FrequencySource};
pub use capture::{CaptureBackend, SharedCapture, SyntheticCapture, SyntheticFailure, ToneSpec};
pub use config::{CaptureConstraints, DspConfig};
pub use denoise::{
    Denoiser, DenoiserLoader, DenoiserState, DenoiseNode, FrameProcessor, SpectralDenoiser,
    SpectralDenoiserLoader, FRAME_SIZE,
};
pub use device::{AudioDevice, DeviceRefresh, DeviceRegistry};
pub use dsp::echo_cancel::EchoReference;
pub use dsp::AudioProcessor;
pub use error::{AudioError, AudioResult};
#[cfg(feature = "hardware")]
pub use hardware::CpalCapture;
pub use media::{acquire_local_media, LocalMedia};
pub use pipeline::ProcessingChain;
pub use stream::{AudioTrack, MediaStream, SinkId, TrackSink};
pub use volume::{PeerPlayback, PlaybackRouting};
