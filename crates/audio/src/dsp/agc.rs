//! Automatic Gain Control (AGC)
//!
//! Regelt den Blockpegel (RMS) auf einen Zielwert. Der Gain folgt mit
//! getrennten Attack/Release-Zeiten und wird innerhalb eines Blocks linear
//! interpoliert, damit keine Spruenge hoerbar sind. Stille unterhalb des
//! Gates wird nicht aufgeblasen.

use super::{rms, AudioProcessor};

/// Konfiguration fuer den AGC
#[derive(Debug, Clone)]
pub struct AgcConfig {
    /// Ziel-RMS-Pegel (normalisiert, 0.1 entspricht ca. -20 dBFS)
    pub target_level: f32,
    pub max_gain: f32,
    pub min_gain: f32,
    /// Bloecke unterhalb dieses RMS halten den aktuellen Gain
    pub gate_level: f32,
    /// Glaettung pro Block wenn der Gain sinkt (0.0 = sofort)
    pub attack: f32,
    /// Glaettung pro Block wenn der Gain steigt
    pub release: f32,
    /// Hard-Limit nach Verstaerkung
    pub limiter_threshold: f32,
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            target_level: 0.1,
            max_gain: 10.0,
            min_gain: 0.1,
            gate_level: 0.002,
            attack: 0.5,
            release: 0.95,
            limiter_threshold: 0.95,
        }
    }
}

/// Automatic Gain Control Prozessor
pub struct Agc {
    config: AgcConfig,
    current_gain: f32,
}

impl Agc {
    pub fn new(config: AgcConfig) -> Self {
        Self {
            config,
            current_gain: 1.0,
        }
    }

    pub fn current_gain(&self) -> f32 {
        self.current_gain
    }
}

impl AudioProcessor for Agc {
    fn process(&mut self, samples: &mut [f32]) {
        if samples.is_empty() {
            return;
        }

        let level = rms(samples);
        let start_gain = self.current_gain;

        if level > self.config.gate_level {
            let desired = (self.config.target_level / level)
                .clamp(self.config.min_gain, self.config.max_gain);
            let coeff = if desired < self.current_gain {
                self.config.attack
            } else {
                self.config.release
            };
            self.current_gain = coeff * self.current_gain + (1.0 - coeff) * desired;
        }

        let n = samples.len() as f32;
        let limit = self.config.limiter_threshold;
        for (i, sample) in samples.iter_mut().enumerate() {
            let t = (i + 1) as f32 / n;
            let gain = start_gain + (self.current_gain - start_gain) * t;
            *sample = (*sample * gain).clamp(-limit, limit);
        }
    }

    fn reset(&mut self) {
        self.current_gain = 1.0;
    }

    fn name(&self) -> &'static str {
        "agc"
    }
}
