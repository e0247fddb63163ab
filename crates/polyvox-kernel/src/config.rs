//! Sound manager configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default distance rolloff factor pushed to every voice.
pub const DEFAULT_ROLLOFF_FACTOR: f32 = 0.2;

/// Default height of the listener above the sound plane.
pub const DEFAULT_LISTENER_HEIGHT: f32 = 2.0;

/// Sound manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Upper bound on the number of voices; `None` uses the device capacity.
    pub max_voices: Option<usize>,
    /// Distance rolloff factor for every voice.
    pub rolloff_factor: f32,
    /// Height of the listener above the sound plane.
    pub listener_height: f32,
    /// Directory sound asset names are resolved against.
    pub sound_root: PathBuf,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            max_voices: None,
            rolloff_factor: DEFAULT_ROLLOFF_FACTOR,
            listener_height: DEFAULT_LISTENER_HEIGHT,
            sound_root: PathBuf::from("res/sound"),
        }
    }
}

impl AudioConfig {
    /// Cap the number of voices.
    #[must_use]
    pub const fn with_max_voices(mut self, max: usize) -> Self {
        self.max_voices = Some(max);
        self
    }

    /// Set the rolloff factor.
    #[must_use]
    pub const fn with_rolloff(mut self, rolloff: f32) -> Self {
        self.rolloff_factor = rolloff;
        self
    }

    /// Set the listener height.
    #[must_use]
    pub const fn with_listener_height(mut self, height: f32) -> Self {
        self.listener_height = height;
        self
    }

    /// Set the sound asset root.
    #[must_use]
    pub fn with_sound_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sound_root = root.into();
        self
    }

    /// Number of voices to create given what the device supports.
    #[must_use]
    pub fn voice_count(&self, device_capacity: usize) -> usize {
        self.max_voices
            .map_or(device_capacity, |max| max.min(device_capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AudioConfig::default();
        assert_eq!(config.max_voices, None);
        assert!((config.rolloff_factor - 0.2).abs() < f32::EPSILON);
        assert!((config.listener_height - 2.0).abs() < f32::EPSILON);
        assert_eq!(config.sound_root, PathBuf::from("res/sound"));
    }

    #[test]
    fn test_voice_count_capped() {
        assert_eq!(AudioConfig::default().voice_count(32), 32);
        assert_eq!(AudioConfig::default().with_max_voices(8).voice_count(32), 8);
        assert_eq!(AudioConfig::default().with_max_voices(64).voice_count(32), 32);
    }

    #[test]
    fn test_partial_toml() {
        let config: AudioConfig = toml::from_str("max_voices = 4").expect("parse");
        assert_eq!(config.max_voices, Some(4));
        assert!((config.listener_height - DEFAULT_LISTENER_HEIGHT).abs() < f32::EPSILON);
    }
}
