//! DSP-Konfiguration und Capture-Constraints
//!
//! `DspConfig` ist die Einstellungs-Oberflaeche (Geraet, Verarbeitungs-Flags,
//! Ausgabe). Daraus werden die Constraints fuer den Capture abgeleitet.

use serde::{Deserialize, Serialize};

/// Audio-Einstellungen wie sie die Oberflaeche reaktiv liefert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DspConfig {
    /// Gewaehltes Eingabegeraet (None = Standard)
    pub input_device_id: Option<String>,
    pub echo_cancellation: bool,
    /// Native Rauschunterdrueckung (wird bei aktivem Neural-Denoise abgeschaltet)
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Neuronale Rauschunterdrueckung
    pub neural_denoise: bool,
    /// Ausgabe-Lautstaerke (0.0..=1.0), nur fuer Remote-Playback
    pub output_volume: f32,
    /// Ausgabegeraet, nur Routing-Hinweis fuer Remote-Playback
    pub output_device_id: Option<String>,
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            input_device_id: None,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            neural_denoise: false,
            output_volume: 1.0,
            output_device_id: None,
        }
    }
}

impl DspConfig {
    /// Leitet die Capture-Constraints ab.
    ///
    /// Mit aktivem Neural-Denoise wird die native Rauschunterdrueckung
    /// abgeschaltet, damit das Signal nicht doppelt verarbeitet wird.
    pub fn capture_constraints(&self, denoise_active: bool) -> CaptureConstraints {
        CaptureConstraints {
            device_id: self.input_device_id.clone(),
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression && !denoise_active,
            auto_gain_control: self.auto_gain_control,
            sample_rate: 48000,
            channels: 1,
        }
    }

    /// True wenn sich ein Capture-relevantes Feld unterscheidet
    pub fn requires_reacquire(&self, other: &DspConfig) -> bool {
        self.input_device_id != other.input_device_id
            || self.echo_cancellation != other.echo_cancellation
            || self.noise_suppression != other.noise_suppression
            || self.auto_gain_control != other.auto_gain_control
            || self.neural_denoise != other.neural_denoise
    }

    /// Ausgabe-Lautstaerke, auf den gueltigen Bereich begrenzt
    pub fn clamped_output_volume(&self) -> f32 {
        self.output_volume.clamp(0.0, 1.0)
    }
}

/// Constraints fuer die Capture-Anforderung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub device_id: Option<String>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl (1 = Mono)
    pub channels: u16,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        DspConfig::default().capture_constraints(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neural_denoise_schaltet_native_unterdrueckung_ab() {
        let cfg = DspConfig {
            neural_denoise: true,
            ..Default::default()
        };
        assert!(cfg.capture_constraints(false).noise_suppression);
        assert!(!cfg.capture_constraints(true).noise_suppression);
        assert!(cfg.capture_constraints(true).echo_cancellation);
    }

    #[test]
    fn nur_ausgabe_aenderung_braucht_keinen_neuen_capture() {
        let a = DspConfig::default();
        let b = DspConfig {
            output_volume: 0.3,
            output_device_id: Some("kopfhoerer".into()),
            ..Default::default()
        };
        assert!(!a.requires_reacquire(&b));

        let c = DspConfig {
            input_device_id: Some("usb".into()),
            ..Default::default()
        };
        assert!(a.requires_reacquire(&c));
    }

    #[test]
    fn config_aus_json_mit_standardwerten() {
        let cfg: DspConfig = serde_json::from_str(r#"{ "neural_denoise": true }"#).unwrap();
        assert!(cfg.neural_denoise);
        assert!(cfg.echo_cancellation);
        assert!((cfg.output_volume - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn lautstaerke_wird_begrenzt() {
        let cfg = DspConfig {
            output_volume: 3.0,
            ..Default::default()
        };
        assert!((cfg.clamped_output_volume() - 1.0).abs() < f32::EPSILON);
    }
}
