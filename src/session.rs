use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::AppConfig;

pub const MIN_SENSITIVITY: f32 = 0.1;
pub const MAX_SENSITIVITY: f32 = 0.9;

/// User-tunable and self-tracked state for one running session.
///
/// Owned by the detection loop; settings changes arrive as commands so every
/// mutation happens on the loop's task.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    sensitivity: f32,
    volume: f32,
    speech_enabled: bool,
    #[serde(skip)]
    last_speech_at: Option<Instant>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            sensitivity: 0.5,
            volume: 1.0,
            speech_enabled: true,
            last_speech_at: None,
        }
    }
}

impl SessionState {
    pub fn new(sensitivity: f32, volume: f32, speech_enabled: bool) -> Self {
        let mut state = Self {
            speech_enabled,
            ..Self::default()
        };
        state.set_sensitivity(sensitivity);
        state.set_volume(volume);
        state
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.detection.sensitivity,
            config.speech.volume,
            config.speech.enabled,
        )
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn speech_enabled(&self) -> bool {
        self.speech_enabled
    }

    pub fn last_speech_at(&self) -> Option<Instant> {
        self.last_speech_at
    }

    /// Clamped into [0.1, 0.9]; non-finite values are ignored.
    pub fn set_sensitivity(&mut self, value: f32) {
        if !value.is_finite() {
            warn!("Ignoring non-finite sensitivity {}", value);
            return;
        }
        self.sensitivity = value.clamp(MIN_SENSITIVITY, MAX_SENSITIVITY);
        debug!("Sensitivity set to {:.2}", self.sensitivity);
    }

    /// Clamped into [0, 1]; non-finite values are ignored.
    pub fn set_volume(&mut self, value: f32) {
        if !value.is_finite() {
            warn!("Ignoring non-finite volume {}", value);
            return;
        }
        self.volume = value.clamp(0.0, 1.0);
        debug!("Volume set to {:.2}", self.volume);
    }

    pub fn set_speech_enabled(&mut self, enabled: bool) {
        self.speech_enabled = enabled;
        debug!("Speech {}", if enabled { "enabled" } else { "disabled" });
    }

    pub(crate) fn mark_spoken(&mut self, at: Instant) {
        self.last_speech_at = Some(at);
    }

    pub fn apply(&mut self, update: SettingsUpdate) {
        match update {
            SettingsUpdate::Sensitivity(v) => self.set_sensitivity(v),
            SettingsUpdate::Volume(v) => self.set_volume(v),
            SettingsUpdate::SpeechEnabled(on) => self.set_speech_enabled(on),
        }
    }
}

/// A single change coming from the settings surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingsUpdate {
    Sensitivity(f32),
    Volume(f32),
    SpeechEnabled(bool),
}
