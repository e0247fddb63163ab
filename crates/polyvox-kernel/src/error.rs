//! Error types for the voice manager and its collaborators.

use std::path::PathBuf;

use thiserror::Error;

use crate::category::CategoryId;
use crate::device::{DeviceBufferId, DeviceVoiceId};
use crate::sound::{Priority, SoundId};
use crate::voice_pool::VoiceIndex;

/// A single device call failed.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device has been closed or was never opened.
    #[error("Audio device unavailable")]
    Unavailable,

    /// The voice id is not known to the device.
    #[error("Unknown device voice {0:?}")]
    UnknownVoice(DeviceVoiceId),

    /// The buffer id is not known to the device.
    #[error("Unknown device buffer {0:?}")]
    UnknownBuffer(DeviceBufferId),

    /// The device refused to create another voice.
    #[error("Device cannot create more voices (limit: {limit})")]
    VoiceLimit {
        /// Number of voices the device supports.
        limit: usize,
    },

    /// Backend-specific failure.
    #[error("Audio backend error: {0}")]
    Backend(String),
}

/// Result type for individual device calls.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Failure to turn a sound asset into PCM data.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("Failed to read '{path}': {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The data could not be decoded.
    #[error("Failed to decode '{name}': {message}")]
    Decode {
        /// Asset name.
        name: String,
        /// Decoder message.
        message: String,
    },

    /// No decoder is available for the file extension.
    #[error("Unsupported sound format for '{name}' (allowed: {allowed})")]
    UnsupportedFormat {
        /// Asset name.
        name: String,
        /// Extensions this loader accepts.
        allowed: &'static str,
    },

    /// The asset is not known to the loader.
    #[error("Sound asset not found: {0}")]
    NotFound(String),
}

/// Voice manager error taxonomy.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The device or its context could not be created.
    #[error("Failed to initialize audio device: {0}")]
    DeviceInit(String),

    /// No voice could be acquired for the requested priority.
    #[error("All {voices} voices are occupied; none available for priority {priority:?}")]
    AllocationExhausted {
        /// Priority of the rejected request.
        priority: Priority,
        /// Pool size.
        voices: usize,
    },

    /// A buffer could not be resolved while creating a sound.
    #[error("Failed to resolve sound asset '{name}': {source}")]
    AssetResolution {
        /// Asset name.
        name: String,
        /// Underlying load failure.
        #[source]
        source: LoadError,
    },

    /// A device query or command failed.
    #[error("Device call failed on voice {voice:?}: {source}")]
    Device {
        /// Voice slot involved, when known.
        voice: Option<VoiceIndex>,
        /// Underlying device failure.
        #[source]
        source: DeviceError,
    },

    /// The sound id is stale or was never issued.
    #[error("Invalid sound handle {0:?}")]
    InvalidHandle(SoundId),

    /// A sound was created without any buffer names.
    #[error("A sound needs at least one buffer")]
    NoBuffers,

    /// The category id was never registered.
    #[error("Unknown sound category {0:?}")]
    UnknownCategory(CategoryId),

    /// A buffer index past the end of a sound's buffer list.
    #[error("Buffer index {index} out of range (sound has {len} buffers)")]
    BufferIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of buffers.
        len: usize,
    },

    /// The manager has already been shut down.
    #[error("Sound manager has been shut down")]
    ShutDown,
}

impl From<DeviceError> for AudioError {
    fn from(source: DeviceError) -> Self {
        Self::Device {
            voice: None,
            source,
        }
    }
}

impl AudioError {
    /// Attach the voice slot to a device failure.
    #[must_use]
    pub(crate) fn on_voice(source: DeviceError, voice: VoiceIndex) -> Self {
        Self::Device {
            voice: Some(voice),
            source,
        }
    }

    /// Whether the caller can reasonably retry on a later tick.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::AllocationExhausted { .. })
    }
}

/// Result type for voice manager operations.
pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AudioError::AllocationExhausted {
            priority: Priority::Low,
            voices: 32,
        };
        assert!(err.to_string().contains("32"));
        assert!(err.to_string().contains("Low"));

        let err = AudioError::from(DeviceError::UnknownVoice(DeviceVoiceId::new(7)));
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn test_transient_errors() {
        let exhausted = AudioError::AllocationExhausted {
            priority: Priority::High,
            voices: 2,
        };
        assert!(exhausted.is_transient());
        assert!(!AudioError::NoBuffers.is_transient());
        assert!(!AudioError::from(DeviceError::Unavailable).is_transient());
    }

    #[test]
    fn test_device_error_keeps_voice() {
        let err = AudioError::on_voice(DeviceError::Backend("boom".into()), VoiceIndex::new(3));
        match err {
            AudioError::Device { voice, .. } => assert_eq!(voice, Some(VoiceIndex::new(3))),
            other => panic!("unexpected error: {other}"),
        }
    }
}
