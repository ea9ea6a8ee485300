//! Echo Cancellation (AEC) via NLMS
//!
//! Ein adaptiver FIR-Filter schaetzt aus dem Referenzsignal (was die
//! Lautsprecher gerade abspielen) den Echo-Anteil im Mikrofonsignal und
//! subtrahiert ihn. Das Referenzsignal kommt ueber einen `EchoReference`
//! Handle, den die Playback-Seite fuettert. Ohne Referenz laeuft das Signal
//! unveraendert durch.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::AudioProcessor;

/// Anzahl Filter-Taps (ca. 2.7ms bei 48kHz)
const FILTER_TAPS: usize = 128;
/// Maximal gepufferte Referenz-Samples
const MAX_REFERENCE: usize = 48000;

/// Gemeinsamer Puffer fuer das Lautsprecher-Referenzsignal
#[derive(Clone, Default)]
pub struct EchoReference {
    pending: Arc<Mutex<VecDeque<f32>>>,
}

impl EchoReference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Von der Playback-Seite aufgerufen
    pub fn feed(&self, samples: &[f32]) {
        let mut pending = self.pending.lock();
        pending.extend(samples.iter().copied());
        let excess = pending.len().saturating_sub(MAX_REFERENCE);
        pending.drain(..excess);
    }

    fn take(&self, n: usize) -> Vec<f32> {
        let mut pending = self.pending.lock();
        let n = n.min(pending.len());
        pending.drain(..n).collect()
    }
}

/// NLMS Echo Canceller
pub struct EchoCanceller {
    reference: EchoReference,
    weights: Vec<f32>,
    history: VecDeque<f32>,
    step_size: f32,
}

impl EchoCanceller {
    pub fn new(reference: EchoReference) -> Self {
        Self {
            reference,
            weights: vec![0.0; FILTER_TAPS],
            history: VecDeque::from(vec![0.0; FILTER_TAPS]),
            step_size: 0.1,
        }
    }
}

impl AudioProcessor for EchoCanceller {
    fn process(&mut self, samples: &mut [f32]) {
        let reference = self.reference.take(samples.len());
        if reference.is_empty() && self.weights.iter().all(|w| *w == 0.0) {
            return;
        }

        for (i, sample) in samples.iter_mut().enumerate() {
            let x = reference.get(i).copied().unwrap_or(0.0);
            self.history.pop_back();
            self.history.push_front(x);

            let estimate: f32 = self
                .weights
                .iter()
                .zip(self.history.iter())
                .map(|(w, h)| w * h)
                .sum();
            let error = *sample - estimate;

            let energy: f32 = self.history.iter().map(|h| h * h).sum();
            let mu = self.step_size / (energy + 1e-6);
            for (w, h) in self.weights.iter_mut().zip(self.history.iter()) {
                *w += mu * error * h;
            }
            *sample = error;
        }
    }

    fn reset(&mut self) {
        self.weights.fill(0.0);
        self.history.iter_mut().for_each(|h| *h = 0.0);
    }

    fn name(&self) -> &'static str {
        "echo_cancellation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::rms;

    #[test]
    fn ohne_referenz_unveraendert() {
        let mut aec = EchoCanceller::new(EchoReference::new());
        let mut samples = vec![0.2f32; 480];
        aec.process(&mut samples);
        assert_eq!(samples, vec![0.2f32; 480]);
    }

    #[test]
    fn reines_echo_wird_reduziert() {
        let reference = EchoReference::new();
        let mut aec = EchoCanceller::new(reference.clone());
        let signal: Vec<f32> = (0..480).map(|i| (i as f32 * 0.07).sin() * 0.5).collect();

        let mut letzter_rest = 1.0;
        for _ in 0..40 {
            reference.feed(&signal);
            // Mikrofon nimmt genau das Lautsprechersignal mit halber Staerke auf
            let mut mic: Vec<f32> = signal.iter().map(|s| s * 0.5).collect();
            aec.process(&mut mic);
            letzter_rest = rms(&mic);
        }
        assert!(letzter_rest < 0.05, "Echo sollte weitgehend entfernt sein: {}", letzter_rest);
    }

    #[test]
    fn referenz_puffer_ist_begrenzt() {
        let reference = EchoReference::new();
        reference.feed(&vec![0.1; MAX_REFERENCE + 100]);
        assert_eq!(reference.take(usize::MAX).len(), MAX_REFERENCE);
    }
}
