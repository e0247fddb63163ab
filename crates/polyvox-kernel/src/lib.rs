//! # Polyvox Kernel
//!
//! Priority-based voice allocation over a fixed pool of hardware audio
//! channels.
//!
//! Games want to play far more sounds at once than the audio device has
//! channels for. This crate keeps an arbitrary number of logical sounds and
//! maps them onto the few real voices the device offers:
//!
//! - A sound acquires a voice lazily, the first time it is played
//! - When every voice is busy, a finished voice is reclaimed, or the sound
//!   with the lowest priority loses its voice
//! - Each tick polls the device, tracks playback offsets and restarts
//!   looping sounds
//! - Category gain buses (music, effects, ...) scale every sound in them
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       SoundManager                        │
//! │  ┌────────────┐  ┌────────────┐  ┌─────────────────────┐  │
//! │  │ SoundArena │◀▶│ VoicePool  │  │ BufferCache         │  │
//! │  │ (SoundId)  │  │(VoiceIndex)│  │ (name -> BufferRef) │  │
//! │  └────────────┘  └─────┬──────┘  └──────────┬──────────┘  │
//! │                        │                    │             │
//! │                        ▼                    ▼             │
//! │                   AudioDevice          SoundLoader        │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Sounds and voices refer to each other by index only. The manager is the
//! single owner of both sides and every mutation goes through `&mut self`.
//!
//! ## Devices
//!
//! - [`SimulatedDevice`](sim_device::SimulatedDevice): deterministic
//!   in-memory device for tests and silent mode
//! - `RodioDevice` (feature `rodio`): plays through the default output

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod buffer_cache;
pub mod category;
pub mod config;
pub mod device;
pub mod error;
pub mod listener;
pub mod loader;
pub mod manager;
#[cfg(feature = "rodio")]
pub mod rodio_device;
pub mod sim_device;
pub mod sound;
pub mod voice_pool;


/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer_cache::{BufferCache, BufferRef, PcmData};
    pub use crate::category::{CategoryId, CategoryTable};
    pub use crate::config::AudioConfig;
    pub use crate::device::{AudioDevice, DeviceBufferId, DeviceVoiceId, ListenerFrame, VoiceState};
    pub use crate::error::{AudioError, AudioResult, DeviceError, DeviceResult, LoadError};
    pub use crate::listener::ListenerTracker;
    pub use crate::loader::{FileLoader, MemoryLoader, SoundLoader};
    pub use crate::manager::{SoundManager, TickReport};
    #[cfg(feature = "rodio")]
    pub use crate::rodio_device::RodioDevice;
    pub use crate::sim_device::SimulatedDevice;
    pub use crate::sound::{Priority, Sound, SoundDesc, SoundId};
    pub use crate::voice_pool::{Allocation, Voice, VoiceIndex, VoicePool};
}

pub use prelude::*;
