//! Playback-Routing fuer Remote-Streams
//!
//! Verwaltet Master-Lautstaerke (aus `DspConfig::output_volume`),
//! per-Peer Lautstaerke und Mute sowie den Ausgabegeraete-Hinweis. Die
//! eigentliche Wiedergabe uebernimmt die Oberflaeche anhand von
//! `routing_for`.

use std::collections::HashMap;
use voicemesh_core::PeerId;

use crate::config::DspConfig;

/// Wiedergabe-Parameter eines Remote-Streams
#[derive(Debug, Clone, PartialEq)]
pub struct PeerPlayback {
    /// Per-Peer Lautstaerke (0.0..=2.0)
    pub volume: f32,
    pub muted: bool,
    /// Effektiver Gain inklusive Master
    pub gain: f32,
    /// Ausgabegeraet (nur Hinweis, Routing macht die Wiedergabe-Schicht)
    pub output_device_id: Option<String>,
}

/// Lautstaerke-Kontroller fuer Remote-Playback
#[derive(Debug, Clone)]
pub struct PlaybackRouting {
    /// Master-Lautstaerke (0.0..=1.0)
    master_volume: f32,
    output_device_id: Option<String>,
    peer_volumes: HashMap<PeerId, f32>,
    peer_muted: HashMap<PeerId, bool>,
}

impl PlaybackRouting {
    pub fn new() -> Self {
        Self {
            master_volume: 1.0,
            output_device_id: None,
            peer_volumes: HashMap::new(),
            peer_muted: HashMap::new(),
        }
    }

    pub fn from_config(config: &DspConfig) -> Self {
        let mut routing = Self::new();
        routing.apply_config(config);
        routing
    }

    /// Uebernimmt die Ausgabe-Felder einer DSP-Konfiguration
    pub fn apply_config(&mut self, config: &DspConfig) {
        self.set_master_volume(config.clamped_output_volume());
        if self.output_device_id != config.output_device_id {
            tracing::debug!(geraet = ?config.output_device_id, "Ausgabegeraet geaendert");
            self.output_device_id = config.output_device_id.clone();
        }
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn output_device_id(&self) -> Option<&str> {
        self.output_device_id.as_deref()
    }

    /// Setzt die Lautstaerke eines Peers (0.0..=2.0)
    pub fn set_peer_volume(&mut self, peer: &PeerId, volume: f32) {
        self.peer_volumes.insert(peer.clone(), volume.clamp(0.0, 2.0));
    }

    /// Lautstaerke eines Peers (1.0 wenn unbekannt)
    pub fn peer_volume(&self, peer: &PeerId) -> f32 {
        *self.peer_volumes.get(peer).unwrap_or(&1.0)
    }

    pub fn set_peer_muted(&mut self, peer: &PeerId, muted: bool) {
        self.peer_muted.insert(peer.clone(), muted);
    }

    pub fn is_peer_muted(&self, peer: &PeerId) -> bool {
        *self.peer_muted.get(peer).unwrap_or(&false)
    }

    /// Entfernt einen Peer (Verbindung abgebaut)
    pub fn remove_peer(&mut self, peer: &PeerId) {
        self.peer_volumes.remove(peer);
        self.peer_muted.remove(peer);
    }

    /// Behaelt nur die Peers fuer die `keep` true liefert
    pub fn retain_peers(&mut self, mut keep: impl FnMut(&PeerId) -> bool) {
        self.peer_volumes.retain(|p, _| keep(p));
        self.peer_muted.retain(|p, _| keep(p));
    }

    /// Wiedergabe-Parameter fuer die UI-Schicht
    pub fn routing_for(&self, peer: &PeerId) -> PeerPlayback {
        let volume = self.peer_volume(peer);
        let muted = self.is_peer_muted(peer);
        PeerPlayback {
            volume,
            muted,
            gain: if muted { 0.0 } else { volume * self.master_volume },
            output_device_id: self.output_device_id.clone(),
        }
    }
}

impl Default for PlaybackRouting {
    fn default() -> Self {
        Self::new()
    }
}
