//! Frequenz-Analyser fuer die Sprach-Erkennung
//!
//! Liest das juengste Fenster eines Tracks, gewichtet es mit einem
//! Blackman-Fenster, transformiert per FFT und glaettet die Betraege
//! zeitlich. Die Ausgabe ist pro Bin ein Byte: der dB-Bereich
//! `[min_db, max_db]` wird linear auf `0..=255` abgebildet.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::stream::AudioTrack;

/// Standard FFT-Groesse (128 Bins)
pub const FFT_SIZE: usize = 256;
/// Zeitliche Glaettung zwischen zwei Abfragen
pub const SMOOTHING: f32 = 0.5;
pub const MIN_DECIBELS: f32 = -100.0;
pub const MAX_DECIBELS: f32 = -30.0;

/// Quelle fuer Frequenz-Betraege im Byte-Format
pub trait FrequencySource: Send {
    /// Schreibt `min(out.len(), bin_count())` Bins nach `out`
    fn byte_frequency_data(&mut self, out: &mut [u8]);

    fn bin_count(&self) -> usize;
}

/// FFT-Analyser auf einem `AudioTrack`
pub struct FftAnalyser {
    track: AudioTrack,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    samples: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    smoothing: f32,
}

impl FftAnalyser {
    pub fn new(track: AudioTrack) -> Self {
        Self::with_params(track, FFT_SIZE, SMOOTHING)
    }

    pub fn with_params(track: AudioTrack, fft_size: usize, smoothing: f32) -> Self {
        let fft_size = fft_size.max(2);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        Self {
            track,
            fft,
            window: blackman(fft_size),
            samples: vec![0.0; fft_size],
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; fft_size / 2],
            smoothing: smoothing.clamp(0.0, 1.0),
        }
    }

    pub fn track(&self) -> &AudioTrack {
        &self.track
    }

    fn update(&mut self) {
        self.track.recent_samples(&mut self.samples);
        for ((c, s), w) in self
            .buffer
            .iter_mut()
            .zip(self.samples.iter())
            .zip(self.window.iter())
        {
            *c = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.buffer);

        let n = self.samples.len() as f32;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(self.buffer.iter()) {
            let magnitude = bin.norm() / n;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
        }
    }
}

impl FrequencySource for FftAnalyser {
    fn byte_frequency_data(&mut self, out: &mut [u8]) {
        self.update();
        let range = MAX_DECIBELS - MIN_DECIBELS;
        for (dst, mag) in out.iter_mut().zip(self.smoothed.iter()) {
            let db = if *mag > 0.0 {
                20.0 * mag.log10()
            } else {
                f32::NEG_INFINITY
            };
            let scaled = 255.0 * (db - MIN_DECIBELS) / range;
            *dst = scaled.clamp(0.0, 255.0) as u8;
        }
    }

    fn bin_count(&self) -> usize {
        self.smoothed.len()
    }
}

fn blackman(n: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42f32, 0.5f32, 0.08f32);
    (0..n)
        .map(|i| {
            let x = std::f32::consts::TAU * i as f32 / n as f32;
            a0 - a1 * x.cos() + a2 * (2.0 * x).cos()
        })
        .collect()
}
