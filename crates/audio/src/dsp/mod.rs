//! Native DSP-Module fuer den Capture
//!
//! Entsprechen den Capture-Constraints `echo_cancellation`,
//! `noise_suppression` und `auto_gain_control`. Alle Module implementieren
//! das `AudioProcessor` Trait fuer eine einheitliche Ketten-Integration.

pub mod agc;
pub mod echo_cancel;
pub mod noise_suppression;

/// Gemeinsames Trait fuer alle Audio-Prozessoren
///
/// Prozessoren arbeiten in-place auf normalisierten Samples (-1.0..1.0)
/// und sind Send fuer den Capture-Thread.
pub trait AudioProcessor: Send {
    /// Verarbeitet einen Puffer von Samples in-place
    fn process(&mut self, samples: &mut [f32]);

    /// Setzt den internen Zustand zurueck (z.B. Filter-Historie)
    fn reset(&mut self);

    /// Kurzer Name fuer Logs
    fn name(&self) -> &'static str;
}

/// RMS eines Blocks
pub(crate) fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
