//! Audio-Geraete und Geraeteauswahl
//!
//! Lesbare Namen gibt es erst nach erteilter Mikrofon-Berechtigung; vorher
//! liefern die Backends Geraete ohne `label`. Aendert sich die Geraeteliste
//! und das gewaehlte Geraet ist verschwunden, faellt die Auswahl auf das
//! erste verfuegbare Geraet zurueck.

use serde::{Deserialize, Serialize};

/// Ein Eingabegeraet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Stabiler Bezeichner des Backends
    pub id: String,
    /// Anzeigename (None solange keine Berechtigung erteilt wurde)
    pub label: Option<String>,
}

impl AudioDevice {
    pub fn new(id: impl Into<String>, label: Option<String>) -> Self {
        Self {
            id: id.into(),
            label,
        }
    }

    /// Anzeigename mit Fallback auf die ID
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Ergebnis einer Aktualisierung der Geraeteliste
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRefresh {
    /// Liste hat sich gegenueber dem letzten Stand geaendert
    pub devices_changed: bool,
    /// Aktuelle Auswahl nach der Aktualisierung
    pub selected: Option<String>,
    /// Auswahl musste ersetzt werden (Geraet verschwunden)
    pub fell_back: bool,
}

/// Haelt die bekannte Geraeteliste und die Auswahl
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<AudioDevice>,
    selected: Option<String>,
}

impl DeviceRegistry {
    pub fn new(selected: Option<String>) -> Self {
        Self {
            devices: Vec::new(),
            selected,
        }
    }

    pub fn devices(&self) -> &[AudioDevice] {
        &self.devices
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn select(&mut self, id: Option<String>) {
        self.selected = id;
    }

    /// True wenn alle Geraete lesbare Namen haben
    pub fn labels_available(&self) -> bool {
        !self.devices.is_empty() && self.devices.iter().all(|d| d.label.is_some())
    }

    /// Uebernimmt eine neue Geraeteliste (nach einem Device-Change-Ereignis)
    pub fn refresh(&mut self, devices: Vec<AudioDevice>) -> DeviceRefresh {
        let devices_changed = devices != self.devices;
        self.devices = devices;

        let mut fell_back = false;
        if let Some(current) = &self.selected {
            if !self.devices.iter().any(|d| &d.id == current) {
                let ersatz = self.devices.first().map(|d| d.id.clone());
                tracing::info!(
                    alt = %current,
                    neu = ?ersatz,
                    "Gewaehltes Eingabegeraet verschwunden, Fallback auf erstes Geraet"
                );
                self.selected = ersatz;
                fell_back = true;
            }
        }

        DeviceRefresh {
            devices_changed,
            selected: self.selected.clone(),
            fell_back,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(id: &str) -> AudioDevice {
        AudioDevice::new(id, Some(format!("Mikrofon {id}")))
    }

    #[test]
    fn auswahl_bleibt_wenn_geraet_vorhanden() {
        let mut reg = DeviceRegistry::new(Some("b".into()));
        let r = reg.refresh(vec![dev("a"), dev("b")]);
        assert!(r.devices_changed);
        assert!(!r.fell_back);
        assert_eq!(reg.selected(), Some("b"));
    }

    #[test]
    fn fallback_auf_erstes_geraet() {
        let mut reg = DeviceRegistry::new(Some("usb".into()));
        let r = reg.refresh(vec![dev("intern"), dev("headset")]);
        assert!(r.fell_back);
        assert_eq!(r.selected.as_deref(), Some("intern"));
    }

    #[test]
    fn fallback_ohne_geraete() {
        let mut reg = DeviceRegistry::new(Some("usb".into()));
        let r = reg.refresh(vec![]);
        assert!(r.fell_back);
        assert_eq!(r.selected, None);
    }

    #[test]
    fn standardauswahl_faellt_nie_zurueck() {
        let mut reg = DeviceRegistry::new(None);
        let r = reg.refresh(vec![dev("a")]);
        assert!(!r.fell_back);
        assert_eq!(reg.selected(), None);
        let r = reg.refresh(vec![dev("a")]);
        assert!(!r.devices_changed);
    }

    #[test]
    fn namen_erst_nach_berechtigung() {
        let mut reg = DeviceRegistry::new(None);
        reg.refresh(vec![AudioDevice::new("a", None)]);
        assert!(!reg.labels_available());
        assert_eq!(reg.devices()[0].display_name(), "a");
        reg.refresh(vec![dev("a")]);
        assert!(reg.labels_available());
    }
}
