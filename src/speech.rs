use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tts::Tts;

use crate::detection::{Detection, DetectionSet};
use crate::labels::display_name;
use crate::position::classify;
use crate::session::SessionState;

pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(2000);

/// Audible output device. Calls are one-way: failures stay inside the backend.
pub trait SpeechOutput {
    fn speak(&mut self, text: &str, volume: f32);
}

/// Text-to-speech through the platform engine.
pub struct TtsSpeech {
    tts: Tts,
    volume_supported: bool,
    last_volume: Option<f32>,
}

impl TtsSpeech {
    pub fn new() -> anyhow::Result<Self> {
        let tts = Tts::default()?;
        let volume_supported = tts.supported_features().volume;
        info!("Text-to-speech engine initialized (volume control: {})", volume_supported);

        Ok(Self {
            tts,
            volume_supported,
            last_volume: None,
        })
    }

    fn apply_volume(&mut self, volume: f32) {
        if !self.volume_supported || self.last_volume == Some(volume) {
            return;
        }
        let range: Result<(f32, f32), tts::Error> =
            Ok((self.tts.min_volume(), self.tts.max_volume()));
        match range {
            Ok((min, max)) => {
                let level = min + (max - min) * volume;
                match self.tts.set_volume(level) {
                    Ok(_) => self.last_volume = Some(volume),
                    Err(e) => warn!("Failed to set TTS volume: {}", e),
                }
            }
            Err(e) => warn!("TTS volume range unavailable: {}", e),
        }
    }
}

impl SpeechOutput for TtsSpeech {
    fn speak(&mut self, text: &str, volume: f32) {
        self.apply_volume(volume);
        if let Err(e) = self.tts.speak(text, false) {
            warn!("TTS error: {}", e);
        }
    }
}

/// Logs alerts instead of speaking them, for headless runs.
#[derive(Debug, Default)]
pub struct LogSpeech;

impl SpeechOutput for LogSpeech {
    fn speak(&mut self, text: &str, volume: f32) {
        info!("🔊 [{:.0}%] {}", volume * 100.0, text);
    }
}

/// Highest score wins; on ties the earliest detection is kept.
pub fn select_most_salient(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .fold(None, |best: Option<&Detection>, d| match best {
            Some(b) if b.score >= d.score => Some(b),
            _ => Some(d),
        })
}

/// Spoken phrase for a detection, e.g. `Person detected to your left`.
pub fn compose_message(detection: &Detection, frame_width: u32) -> String {
    let zone = classify(&detection.bbox, frame_width);
    format!("{} detected {}", display_name(&detection.class), zone.phrase())
}

/// Picks at most one alert per cycle and keeps a global quiet interval
/// between alerts, independent of class.
#[derive(Debug, Clone)]
pub struct AlertSelector {
    throttle: Duration,
}

impl Default for AlertSelector {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE)
    }
}

impl AlertSelector {
    pub fn new(throttle: Duration) -> Self {
        Self { throttle }
    }

    pub fn throttle(&self) -> Duration {
        self.throttle
    }

    /// Speak the most confident detection unless muted or throttled.
    ///
    /// Returns the message that was dispatched. `last_speech_at` is updated
    /// before the speech device is called.
    pub fn maybe_speak(
        &self,
        detections: &DetectionSet,
        frame_width: u32,
        session: &mut SessionState,
        speech: &mut dyn SpeechOutput,
        now: Instant,
    ) -> Option<String> {
        if !session.speech_enabled() || detections.is_empty() {
            return None;
        }

        if let Some(last) = session.last_speech_at() {
            if now.saturating_duration_since(last) < self.throttle {
                debug!("Alert throttled ({}ms since last)", now.saturating_duration_since(last).as_millis());
                return None;
            }
        }

        let winner = select_most_salient(detections)?;
        let message = compose_message(winner, frame_width);

        session.mark_spoken(now);
        info!("Speaking alert: {}", message);
        speech.speak(&message, session.volume());

        Some(message)
    }
}
