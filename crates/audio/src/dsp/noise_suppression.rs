//! Native Rauschunterdrueckung via Pegel-Subtraktion
//!
//! Schaetzt den Rauschpegel waehrend leiser Bloecke und daempft jeden Block
//! um das Verhaeltnis Rauschen/Signal. Zeitbereichs-Naeherung der
//! spektralen Subtraktion; wird abgeschaltet sobald der neuronale Denoiser
//! aktiv ist.

use super::{rms, AudioProcessor};

/// Rauschunterdruecker fuer den Capture
pub struct NoiseSuppressor {
    /// Subtraktions-Faktor
    alpha: f32,
    /// Minimaler Gain (verhindert musical noise)
    floor: f32,
    noise_estimate: f32,
    noise_smoothing: f32,
    /// Bloecke unterhalb dieses RMS gelten als Rauschen
    silence_threshold: f32,
}

impl NoiseSuppressor {
    pub fn new() -> Self {
        Self {
            alpha: 2.5,
            floor: 0.1,
            noise_estimate: 0.0,
            noise_smoothing: 0.95,
            silence_threshold: 0.02,
        }
    }

    pub fn noise_estimate(&self) -> f32 {
        self.noise_estimate
    }

    /// Gain fuer einen Block mit gegebenem Pegel (aktualisiert die Schaetzung)
    pub(crate) fn block_gain(&mut self, level: f32) -> f32 {
        if level < self.silence_threshold {
            self.noise_estimate =
                self.noise_smoothing * self.noise_estimate + (1.0 - self.noise_smoothing) * level;
        }
        if self.noise_estimate < 1e-7 {
            return 1.0;
        }
        if level <= 1e-7 {
            return self.floor;
        }
        (1.0 - self.alpha * self.noise_estimate / level).max(self.floor)
    }
}

impl Default for NoiseSuppressor {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioProcessor for NoiseSuppressor {
    fn process(&mut self, samples: &mut [f32]) {
        let gain = self.block_gain(rms(samples));
        if (gain - 1.0).abs() > f32::EPSILON {
            samples.iter_mut().for_each(|s| *s *= gain);
        }
    }

    fn reset(&mut self) {
        self.noise_estimate = 0.0;
    }

    fn name(&self) -> &'static str {
        "noise_suppression"
    }
}
