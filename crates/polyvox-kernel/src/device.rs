//! Audio device boundary.
//!
//! The voice manager never talks to a driver directly. Everything it needs
//! from the hardware goes through [`AudioDevice`]: creating voices and
//! buffers, pushing per-voice parameters, issuing play/pause/stop, and
//! polling playback state and byte offset.
//!
//! Implementations:
//!
//! - [`SimulatedDevice`](crate::sim_device::SimulatedDevice): in-memory
//!   device used for tests and silent mode
//! - `RodioDevice` (feature `rodio`): real playback through rodio sinks

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::buffer_cache::PcmData;
use crate::error::DeviceResult;

/// Identifier of a voice (playback channel) on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceVoiceId(u32);

impl DeviceVoiceId {
    /// Create a voice id from a raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Identifier of an uploaded sample buffer on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceBufferId(u32);

impl DeviceBufferId {
    /// Create a buffer id from a raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Playback state reported by a device voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VoiceState {
    /// Never played since its buffer was bound.
    #[default]
    Initial,
    /// Currently playing.
    Playing,
    /// Paused mid-playback.
    Paused,
    /// Playback finished or was stopped.
    Stopped,
}

impl VoiceState {
    /// Check if the voice is producing sound.
    #[must_use]
    pub const fn is_playing(self) -> bool {
        matches!(self, Self::Playing)
    }

    /// Check if the voice has stopped.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Listener parameters pushed to the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenerFrame {
    /// Listener position.
    pub position: Vec3,
    /// Listener velocity (for Doppler).
    pub velocity: Vec3,
    /// Direction the listener is facing.
    pub at: Vec3,
    /// Direction of the listener's "up".
    pub up: Vec3,
}

impl Default for ListenerFrame {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            at: Vec3::Z,
            up: Vec3::NEG_Y,
        }
    }
}

/// Primitive operations the voice manager consumes from a device.
///
/// All calls are synchronous. A failing call reports a
/// [`DeviceError`](crate::error::DeviceError); the manager never retries.
pub trait AudioDevice {
    /// Maximum number of voices the device can play at once.
    fn channel_capacity(&self) -> DeviceResult<usize>;

    /// Create a new voice.
    fn create_voice(&mut self) -> DeviceResult<DeviceVoiceId>;

    /// Destroy a voice.
    fn destroy_voice(&mut self, voice: DeviceVoiceId) -> DeviceResult<()>;

    /// Upload decoded PCM data into a new device buffer.
    fn create_buffer(&mut self, pcm: &PcmData) -> DeviceResult<DeviceBufferId>;

    /// Free a device buffer.
    fn destroy_buffer(&mut self, buffer: DeviceBufferId) -> DeviceResult<()>;

    /// Bind a buffer to a voice.
    fn set_voice_buffer(&mut self, voice: DeviceVoiceId, buffer: DeviceBufferId) -> DeviceResult<()>;

    /// Set the voice gain.
    fn set_voice_gain(&mut self, voice: DeviceVoiceId, gain: f32) -> DeviceResult<()>;

    /// Set the voice pitch multiplier.
    fn set_voice_pitch(&mut self, voice: DeviceVoiceId, pitch: f32) -> DeviceResult<()>;

    /// Set the device-side loop flag.
    fn set_voice_looping(&mut self, voice: DeviceVoiceId, looping: bool) -> DeviceResult<()>;

    /// Set the playback position in bytes into the bound buffer.
    fn set_voice_byte_offset(&mut self, voice: DeviceVoiceId, offset: u32) -> DeviceResult<()>;

    /// Set the voice position in world space.
    fn set_voice_position(&mut self, voice: DeviceVoiceId, position: Vec3) -> DeviceResult<()>;

    /// Set the voice velocity in world space.
    fn set_voice_velocity(&mut self, voice: DeviceVoiceId, velocity: Vec3) -> DeviceResult<()>;

    /// Set how fast the voice gets quieter with distance (0 = never).
    fn set_voice_rolloff(&mut self, voice: DeviceVoiceId, rolloff: f32) -> DeviceResult<()>;

    /// Start or resume playback.
    fn play(&mut self, voice: DeviceVoiceId) -> DeviceResult<()>;

    /// Pause playback.
    fn pause(&mut self, voice: DeviceVoiceId) -> DeviceResult<()>;

    /// Stop playback and rewind.
    fn stop(&mut self, voice: DeviceVoiceId) -> DeviceResult<()>;

    /// Query the voice playback state.
    fn voice_state(&self, voice: DeviceVoiceId) -> DeviceResult<VoiceState>;

    /// Query the playback position in bytes into the bound buffer.
    fn voice_byte_offset(&self, voice: DeviceVoiceId) -> DeviceResult<u32>;

    /// Push listener parameters.
    fn set_listener(&mut self, listener: &ListenerFrame) -> DeviceResult<()>;
}
