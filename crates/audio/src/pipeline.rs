//! Native Capture-Verarbeitungskette
//!
//! Baut aus den Capture-Constraints die Kette der nativen Prozessoren.
//! Reihenfolge: EchoCancellation -> NoiseSuppression -> AGC. Echo wird
//! zuerst entfernt, damit die Rauschschaetzung und der AGC nicht auf das
//! Lautsprechersignal reagieren.

use crate::config::CaptureConstraints;
use crate::dsp::agc::{Agc, AgcConfig};
use crate::dsp::echo_cancel::{EchoCanceller, EchoReference};
use crate::dsp::noise_suppression::NoiseSuppressor;
use crate::dsp::AudioProcessor;

/// Kette von Prozessoren, sequenziell pro Block angewendet
pub struct ProcessingChain {
    processors: Vec<Box<dyn AudioProcessor>>,
}

impl ProcessingChain {
    pub fn new(processors: Vec<Box<dyn AudioProcessor>>) -> Self {
        Self { processors }
    }

    /// Leere Kette (Rohsignal)
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Baut die Kette passend zu den Constraints
    pub fn from_constraints(constraints: &CaptureConstraints, reference: EchoReference) -> Self {
        let mut processors: Vec<Box<dyn AudioProcessor>> = Vec::new();
        if constraints.echo_cancellation {
            processors.push(Box::new(EchoCanceller::new(reference)));
        }
        if constraints.noise_suppression {
            processors.push(Box::new(NoiseSuppressor::new()));
        }
        if constraints.auto_gain_control {
            processors.push(Box::new(Agc::new(AgcConfig::default())));
        }
        tracing::debug!(
            stufen = ?processors.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Native Capture-Kette gebaut"
        );
        Self { processors }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for p in self.processors.iter_mut() {
            p.process(samples);
        }
    }

    pub fn reset_all(&mut self) {
        for p in self.processors.iter_mut() {
            p.reset();
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leere_kette_passiert_unveraendert() {
        let mut chain = ProcessingChain::empty();
        let mut samples = vec![0.5f32; 480];
        chain.process(&mut samples);
        assert_eq!(samples, vec![0.5f32; 480]);
        assert!(chain.is_empty());
    }

    #[test]
    fn kette_folgt_den_constraints() {
        let alle = CaptureConstraints::default();
        let chain = ProcessingChain::from_constraints(&alle, EchoReference::new());
        assert_eq!(
            chain.stage_names(),
            vec!["echo_cancellation", "noise_suppression", "agc"]
        );

        let ohne_ns = CaptureConstraints {
            noise_suppression: false,
            ..CaptureConstraints::default()
        };
        let chain = ProcessingChain::from_constraints(&ohne_ns, EchoReference::new());
        assert_eq!(chain.stage_names(), vec!["echo_cancellation", "agc"]);
    }

    #[test]
    fn kette_erhaelt_frame_laenge() {
        let mut chain =
            ProcessingChain::from_constraints(&CaptureConstraints::default(), EchoReference::new());
        let mut samples = vec![0.1f32; 960];
        chain.process(&mut samples);
        assert_eq!(samples.len(), 960);
        chain.reset_all();
    }
}
