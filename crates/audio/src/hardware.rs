//! Capture-Backend auf echter Audio-Hardware via cpal
//!
//! cpal-Streams sind nicht `Send`, daher lebt jeder Capture in einem eigenen
//! Thread. Der cpal-Callback schreibt in einen lock-free Ring-Buffer, der
//! Pump-Thread liest 10ms-Bloecke, laesst die native Verarbeitungskette
//! laufen und schreibt in den Track. Wird der Track gestoppt, beendet sich
//! der Thread und gibt das Geraet frei.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::capture::CaptureBackend;
use crate::config::CaptureConstraints;
use crate::device::AudioDevice;
use crate::dsp::echo_cancel::EchoReference;
use crate::error::{AudioError, AudioResult};
use crate::pipeline::ProcessingChain;
use crate::stream::{AudioTrack, MediaStream};

/// Samples pro Verarbeitungsblock (10ms bei 48kHz)
const BLOCK: usize = 480;
/// Ring-Buffer Kapazitaet (2 Sekunden)
const RING_CAPACITY: usize = 48000 * 2;

/// cpal-Backend fuer den Standard-Host
pub struct CpalCapture {
    echo_reference: EchoReference,
    permission: AtomicBool,
}

impl CpalCapture {
    pub fn new(echo_reference: EchoReference) -> Self {
        Self {
            echo_reference,
            permission: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CaptureBackend for CpalCapture {
    async fn acquire(&self, constraints: &CaptureConstraints) -> AudioResult<MediaStream> {
        let (tx, rx) = oneshot::channel();
        let constraints = constraints.clone();
        let reference = self.echo_reference.clone();

        std::thread::Builder::new()
            .name("voicemesh-capture".into())
            .spawn(move || capture_thread(constraints, reference, tx))
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        let stream = rx
            .await
            .map_err(|_| AudioError::StreamFehler("Capture-Thread beendet".into()))??;
        self.permission.store(true, Ordering::Relaxed);
        Ok(stream)
    }

    async fn enumerate_devices(&self) -> AudioResult<Vec<AudioDevice>> {
        let granted = self.permission_granted();
        tokio::task::spawn_blocking(move || list_input_devices(granted))
            .await
            .map_err(|e| AudioError::Anyhow(e.into()))?
    }

    fn permission_granted(&self) -> bool {
        self.permission.load(Ordering::Relaxed)
    }
}

fn list_input_devices(with_labels: bool) -> AudioResult<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    let mut result = Vec::new();
    for device in devices {
        match device.name() {
            Ok(name) => {
                let label = with_labels.then(|| name.clone());
                result.push(AudioDevice::new(name, label));
            }
            Err(e) => tracing::warn!("Eingabegeraet konnte nicht gelesen werden: {}", e),
        }
    }
    tracing::debug!("Gefundene Eingabegeraete: {}", result.len());
    Ok(result)
}

fn load_input_device(id: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match id {
        None => host
            .default_input_device()
            .ok_or(AudioError::KeinEingabegeraet),
        Some(id) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
            for device in devices {
                if device.name().map(|n| n == id).unwrap_or(false) {
                    return Ok(device);
                }
            }
            Err(AudioError::GeraetNichtGefunden(id.to_string()))
        }
    }
}

/// Ordnet cpal-Fehlertexte den Capture-Fehlerklassen zu
fn classify(message: String) -> AudioError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        AudioError::ZugriffVerweigert(message)
    } else {
        AudioError::StreamFehler(message)
    }
}

fn open_stream(device: &Device, constraints: &CaptureConstraints) -> AudioResult<(Stream, HeapCons<f32>)> {
    let stream_config = StreamConfig {
        channels: constraints.channels,
        sample_rate: cpal::SampleRate(constraints.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let rb = HeapRb::<f32>::new(RING_CAPACITY);
    let (mut producer, consumer) = rb.split();
    let err_fn = |err| tracing::error!("Capture-Fehler: {}", err);

    let sample_format = device
        .supported_input_configs()
        .map_err(|e| classify(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= constraints.sample_rate
                && c.max_sample_rate().0 >= constraints.sample_rate
                && c.channels() >= constraints.channels
        })
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| {
                let written = producer.push_slice(data);
                if written < data.len() {
                    tracing::warn!("Capture Ring-Buffer voll, {} Samples verworfen", data.len() - written);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _| {
                let floats: Vec<f32> = data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                if producer.push_slice(&floats) < floats.len() {
                    tracing::warn!("Capture Ring-Buffer voll");
                }
            },
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                other
            )))
        }
    }
    .map_err(|e| classify(e.to_string()))?;

    stream.play().map_err(|e| classify(e.to_string()))?;
    Ok((stream, consumer))
}

fn capture_thread(
    constraints: CaptureConstraints,
    reference: EchoReference,
    reply: oneshot::Sender<AudioResult<MediaStream>>,
) {
    let opened = load_input_device(constraints.device_id.as_deref())
        .and_then(|device| open_stream(&device, &constraints).map(|s| (device, s)));
    let (device, (_stream, mut consumer)) = match opened {
        Ok(v) => v,
        Err(e) => {
            let _ = reply.send(Err(e));
            return;
        }
    };

    let label = device.name().unwrap_or_else(|_| "Mikrofon".into());
    let track = AudioTrack::new(label.clone());
    let stream = MediaStream::new(track.clone());
    if reply.send(Ok(stream)).is_err() {
        // Anforderung wurde abgebrochen bevor der Stream ankam
        return;
    }

    let ticker = crossbeam_channel::tick(Duration::from_millis(5));
    let mut chain = ProcessingChain::from_constraints(&constraints, reference);
    let mut block = vec![0.0f32; BLOCK];

    tracing::info!(geraet = %label, "Capture-Thread gestartet");
    while !track.is_stopped() {
        if ticker.recv().is_err() {
            break;
        }
        while consumer.occupied_len() >= BLOCK {
            consumer.pop_slice(&mut block);
            chain.process(&mut block);
            track.write(&block);
        }
    }
    tracing::info!(geraet = %label, "Capture-Thread beendet");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehlertexte_werden_klassifiziert() {
        assert!(matches!(
            classify("Permission denied by user".into()),
            AudioError::ZugriffVerweigert(_)
        ));
        assert!(matches!(classify("device busy".into()), AudioError::StreamFehler(_)));
    }

    #[tokio::test]
    #[ignore = "Benoetigt Audio-Hardware"]
    async fn capture_stream_oeffnen() {
        let capture = CpalCapture::new(EchoReference::new());
        let stream = capture.acquire(&CaptureConstraints::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(stream.audio_track().samples_written() > 0);
        stream.stop();
    }
}
