//! Engine configuration.
//!
//! Everything the host needs to run a session: tick timing, which device to
//! open, bus gains, what to preload and which cues to play. Loaded from and
//! saved to a TOML file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use polyvox_kernel::{AudioConfig, Priority};

/// Configuration file name.
const CONFIG_FILE: &str = "polyvox.toml";

/// A sound to play during the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CueConfig {
    /// Buffer variants, relative to the sound root.
    pub sounds: Vec<String>,
    /// Gain bus name; unknown names are registered on the fly.
    pub category: String,
    /// Allocation priority.
    pub priority: Priority,
    /// Seconds after start at which the cue plays.
    pub start_after: f32,
    /// Position in world space.
    pub position: [f32; 2],
    /// Gain before the bus multiplier.
    pub gain: f32,
    /// Pitch multiplier.
    pub pitch: f32,
    /// Random pitch spread; 0 keeps `pitch`.
    pub pitch_spread: f32,
    /// Restart when it ends.
    pub looping: bool,
    /// Pick a random variant on play.
    pub random_variant: bool,
}

impl Default for CueConfig {
    fn default() -> Self {
        Self {
            sounds: Vec::new(),
            category: "effects".to_string(),
            priority: Priority::Moderate,
            start_after: 0.0,
            position: [0.0, 0.0],
            gain: 1.0,
            pitch: 1.0,
            pitch_spread: 0.0,
            looping: false,
            random_variant: false,
        }
    }
}

/// Engine configuration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // === Session ===
    /// Ticks per second.
    pub tick_rate: u32,
    /// Session length in seconds.
    pub run_seconds: f32,
    /// Sleep between ticks; off runs the session as fast as possible.
    pub realtime: bool,

    // === Device ===
    /// Try the hardware output before falling back to silent mode.
    pub hardware: bool,
    /// Channel count for the output device or the silent device.
    pub voices: usize,

    // === Volume ===
    /// Master volume (0.0 - 1.0)
    pub master_volume: f32,
    /// Music volume (0.0 - 1.0)
    pub music_volume: f32,
    /// Sound effects volume (0.0 - 1.0)
    pub sfx_volume: f32,

    // === Listener ===
    /// Radius of the circle the listener walks.
    pub listener_radius: f32,
    /// Angular speed of the listener in radians per second.
    pub listener_speed: f32,

    // === Sounds ===
    /// Sound manager settings.
    pub audio: AudioConfig,
    /// Assets to load before the session starts.
    pub preload: Vec<String>,
    /// Cues to play.
    pub cues: Vec<CueConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            run_seconds: 5.0,
            realtime: true,
            hardware: true,
            voices: 32,
            master_volume: 1.0,
            music_volume: 1.0,
            sfx_volume: 1.0,
            listener_radius: 4.0,
            listener_speed: 0.5,
            audio: AudioConfig::default(),
            preload: Vec::new(),
            cues: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default file location.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        Self::load_from(Self::config_path())
    }

    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        match fs::File::open(path) {
            Ok(mut file) => {
                let mut contents = String::new();
                if let Err(e) = file.read_to_string(&mut contents) {
                    warn!("Failed to read config file: {e}");
                    return Self::default();
                }

                match toml::from_str(&contents) {
                    Ok(config) => {
                        info!("Loaded config from {}", path.display());
                        config
                    },
                    Err(e) => {
                        warn!("Failed to parse config file: {e}");
                        Self::default()
                    },
                }
            },
            Err(e) => {
                warn!("Failed to open config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Default configuration file path, in the working directory.
    pub fn config_path() -> PathBuf {
        PathBuf::from(CONFIG_FILE)
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.tick_rate = self.tick_rate.clamp(1, 1000);
        self.run_seconds = self.run_seconds.clamp(0.0, 3600.0);
        self.voices = self.voices.clamp(1, 256);

        self.master_volume = self.master_volume.clamp(0.0, 1.0);
        self.music_volume = self.music_volume.clamp(0.0, 1.0);
        self.sfx_volume = self.sfx_volume.clamp(0.0, 1.0);

        self.audio.rolloff_factor = self.audio.rolloff_factor.max(0.0);

        for cue in &mut self.cues {
            cue.start_after = cue.start_after.max(0.0);
            cue.gain = cue.gain.max(0.0);
            cue.pitch = cue.pitch.clamp(0.1, 4.0);
            cue.pitch_spread = cue.pitch_spread.clamp(0.0, 1.0);
        }
    }

    /// Number of ticks in the session.
    #[must_use]
    pub fn total_ticks(&self) -> u64 {
        (f64::from(self.run_seconds) * f64::from(self.tick_rate)).ceil() as u64
    }
}
