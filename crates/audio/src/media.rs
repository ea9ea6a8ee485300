//! Lokale Medien einer Session
//!
//! Fordert den Capture an und legt bei aktivem Neural-Denoise den
//! `DenoiseNode` dazwischen. Veroeffentlicht (an Peers und den lokalen
//! Analyser) wird immer der verarbeitete Stream.

use crate::capture::CaptureBackend;
use crate::config::{CaptureConstraints, DspConfig};
use crate::denoise::{DenoiseAttachment, DenoiseNode, DenoiserLoader, DenoiserState};
use crate::error::AudioResult;
use crate::stream::{AudioTrack, MediaStream};

/// Roh- und verarbeiteter Stream eines lokalen Teilnehmers
pub struct LocalMedia {
    raw: MediaStream,
    processed: MediaStream,
    denoise: Option<DenoiseAttachment>,
    denoiser_state: DenoiserState,
    constraints: CaptureConstraints,
}

impl LocalMedia {
    pub fn raw(&self) -> &MediaStream {
        &self.raw
    }

    /// Stream der an Peers und den lokalen Analyser geht
    pub fn processed(&self) -> &MediaStream {
        &self.processed
    }

    pub fn outbound_track(&self) -> &AudioTrack {
        self.processed.audio_track()
    }

    pub fn denoiser_state(&self) -> &DenoiserState {
        &self.denoiser_state
    }

    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }

    /// Verarbeitete Frames des Denoisers (0 ohne Denoiser)
    pub fn denoised_frames(&self) -> u64 {
        self.denoise.as_ref().map(|d| d.frames_processed()).unwrap_or(0)
    }

    /// Stoppt alle Tracks und gibt die Hardware frei
    pub fn stop(&self) {
        if let Some(d) = &self.denoise {
            d.detach();
        }
        self.processed.stop();
        self.raw.stop();
        tracing::debug!(stream = %self.raw.id(), "Lokale Medien gestoppt");
    }
}

impl std::fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMedia")
            .field("raw", &self.raw.id())
            .field("processed", &self.processed.id())
            .field("denoiser_state", &self.denoiser_state)
            .finish()
    }
}

/// Fordert die lokalen Medien gemaess `config` an.
///
/// Schlaegt das Laden des Modells fehl, wird das Rohsignal mit nativer
/// Rauschunterdrueckung verwendet. Capture-Fehler werden durchgereicht.
pub async fn acquire_local_media(
    capture: &dyn CaptureBackend,
    loader: Option<&dyn DenoiserLoader>,
    config: &DspConfig,
) -> AudioResult<LocalMedia> {
    let (denoiser_state, model) = if !config.neural_denoise {
        (DenoiserState::Disabled, None)
    } else {
        match loader {
            Some(loader) => match loader.load().await {
                Ok(m) => (DenoiserState::Ready { model: m.name() }, Some(m)),
                Err(e) => {
                    tracing::warn!("Denoise-Modell konnte nicht geladen werden: {}", e);
                    (DenoiserState::Failed(e.to_string()), None)
                }
            },
            None => (
                DenoiserState::Failed("kein Modell-Loader konfiguriert".into()),
                None,
            ),
        }
    };

    let constraints = config.capture_constraints(model.is_some());
    let raw = capture.acquire(&constraints).await?;

    let (processed, denoise) = match model {
        Some(model) => {
            let attachment = DenoiseNode::attach(raw.audio_track(), model);
            (MediaStream::new(attachment.output().clone()), Some(attachment))
        }
        None => (raw.clone(), None),
    };

    tracing::info!(
        geraet = ?constraints.device_id,
        denoise = ?denoiser_state,
        "Lokale Medien bereit"
    );

    Ok(LocalMedia {
        raw,
        processed,
        denoise,
        denoiser_state,
        constraints,
    })
}
