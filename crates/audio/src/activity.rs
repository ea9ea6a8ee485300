//! Sprach-Erkennung (Speaking-Indikator)
//!
//! `ActivityDetector` mittelt die Byte-Betraege aller Bins einer
//! `FrequencySource` und vergleicht mit einer festen Schwelle.
//! `ActivityMonitor` haelt alle Detektoren einer Session und meldet bei
//! jeder Abfrage nur die Eintraege, deren Zustand sich geaendert hat.

use std::collections::HashMap;
use std::hash::Hash;

use crate::analyser::{FftAnalyser, FrequencySource};
use crate::stream::AudioTrack;

/// Schwelle auf der 0..=255 Skala
pub const SPEAKING_THRESHOLD: f32 = 25.0;

/// Speaking-Erkennung fuer einen Stream
pub struct ActivityDetector {
    source: Box<dyn FrequencySource>,
    bins: Vec<u8>,
    threshold: f32,
}

impl ActivityDetector {
    pub fn new(source: Box<dyn FrequencySource>) -> Self {
        let bins = vec![0u8; source.bin_count()];
        Self {
            source,
            bins,
            threshold: SPEAKING_THRESHOLD,
        }
    }

    /// Detektor mit FFT-Analyser auf einem Track
    pub fn for_track(track: AudioTrack) -> Self {
        Self::new(Box::new(FftAnalyser::new(track)))
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Mittlerer Betrag ueber alle Bins
    pub fn mean_level(&mut self) -> f32 {
        if self.bins.is_empty() {
            return 0.0;
        }
        self.source.byte_frequency_data(&mut self.bins);
        let sum: u32 = self.bins.iter().map(|&b| b as u32).sum();
        sum as f32 / self.bins.len() as f32
    }

    pub fn is_speaking(&mut self) -> bool {
        self.mean_level() > self.threshold
    }
}

/// Alle Detektoren einer Session, adressiert ueber `K`
pub struct ActivityMonitor<K> {
    detectors: HashMap<K, (ActivityDetector, bool)>,
}

impl<K> ActivityMonitor<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            detectors: HashMap::new(),
        }
    }

    /// Registriert einen Detektor. Ein vorhandener Detektor wird ersetzt.
    pub fn register(&mut self, key: K, detector: ActivityDetector) {
        if self.detectors.insert(key.clone(), (detector, false)).is_some() {
            tracing::trace!(?key, "Analyser ersetzt");
        }
    }

    /// Entfernt und verwirft den Detektor
    pub fn unregister(&mut self, key: &K) -> bool {
        self.detectors.remove(key).is_some()
    }

    /// Verwirft alle Detektoren
    pub fn dispose_all(&mut self) {
        let n = self.detectors.len();
        self.detectors.clear();
        if n > 0 {
            tracing::debug!(anzahl = n, "Analyser freigegeben");
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.detectors.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Letzter bekannter Zustand (ohne neue Messung)
    pub fn is_speaking(&self, key: &K) -> bool {
        self.detectors.get(key).map(|(_, s)| *s).unwrap_or(false)
    }

    /// Misst alle Detektoren neu und liefert nur die geaenderten Flags
    pub fn poll(&mut self) -> Vec<(K, bool)> {
        let mut changes = Vec::new();
        for (key, (detector, last)) in self.detectors.iter_mut() {
            let now = detector.is_speaking();
            if now != *last {
                *last = now;
                changes.push((key.clone(), now));
            }
        }
        changes
    }
}

impl<K> Default for ActivityMonitor<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Liefert in jedem Bin denselben, von aussen steuerbaren Wert
    struct FesterPegel(Arc<Mutex<u8>>);

    impl FrequencySource for FesterPegel {
        fn byte_frequency_data(&mut self, out: &mut [u8]) {
            out.fill(*self.0.lock());
        }

        fn bin_count(&self) -> usize {
            128
        }
    }

    fn detektor(pegel: u8) -> (ActivityDetector, Arc<Mutex<u8>>) {
        let wert = Arc::new(Mutex::new(pegel));
        (ActivityDetector::new(Box::new(FesterPegel(wert.clone()))), wert)
    }

    #[test]
    fn unter_schwelle_spricht_nicht() {
        let (mut d, _) = detektor(10);
        assert!((d.mean_level() - 10.0).abs() < f32::EPSILON);
        assert!(!d.is_speaking());
    }

    #[test]
    fn ueber_schwelle_spricht() {
        let (mut d, _) = detektor(40);
        assert!(d.is_speaking());
    }

    #[test]
    fn genau_an_der_schwelle_spricht_nicht() {
        let (mut d, _) = detektor(25);
        assert!(!d.is_speaking());
    }

    #[test]
    fn monitor_meldet_nur_aenderungen() {
        let mut monitor = ActivityMonitor::new();
        let (a, pegel_a) = detektor(10);
        let (b, _) = detektor(10);
        monitor.register("a", a);
        monitor.register("b", b);

        assert!(monitor.poll().is_empty());

        *pegel_a.lock() = 40;
        assert_eq!(monitor.poll(), vec![("a", true)]);
        // Unveraendert: keine erneute Meldung
        assert!(monitor.poll().is_empty());
        assert!(monitor.is_speaking(&"a"));

        *pegel_a.lock() = 5;
        assert_eq!(monitor.poll(), vec![("a", false)]);
    }

    #[test]
    fn monitor_abmelden_und_freigeben() {
        let mut monitor = ActivityMonitor::new();
        let (a, _) = detektor(40);
        monitor.register(1u8, a);
        assert!(monitor.contains(&1));
        assert!(monitor.unregister(&1));
        assert!(!monitor.unregister(&1));

        let (b, _) = detektor(40);
        monitor.register(2u8, b);
        monitor.dispose_all();
        assert!(monitor.is_empty());
        assert!(!monitor.is_speaking(&2));
    }

    #[test]
    fn detektor_auf_echtem_track() {
        let track = AudioTrack::new("mic");
        let mut d = ActivityDetector::for_track(track.clone());
        track.write(&[0.0; 512]);
        assert!(!d.is_speaking());
    }
}
