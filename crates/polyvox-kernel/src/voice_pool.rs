//! Voice pool and priority-based allocation.
//!
//! The pool is created once from the device's channel capacity and owns
//! every voice until shutdown. Voices are addressed by [`VoiceIndex`], and a
//! voice remembers which sound owns it by [`SoundId`], so neither side holds
//! a reference to the other.
//!
//! Allocation scans the pool once in index order:
//!
//! 1. the first uncoupled voice wins outright
//! 2. otherwise the first voice whose cached state is `Stopped`
//! 3. otherwise the voice with the lowest owner priority not above the
//!    request, first one on ties
//!
//! Equal priorities preempt each other, so a steady stream of new requests can
//! keep evicting older sounds. That is accepted for game audio.

use tracing::{debug, warn};

use crate::buffer_cache::BufferRef;
use crate::device::{AudioDevice, DeviceVoiceId, VoiceState};
use crate::error::{AudioError, AudioResult, DeviceResult};
use crate::sound::{Priority, SoundId};

/// Position of a voice in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceIndex(usize);

impl VoiceIndex {
    /// Create an index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw index.
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }
}

/// One hardware channel and its cached state.
#[derive(Debug, Clone)]
pub struct Voice {
    pub(crate) device_id: DeviceVoiceId,
    pub(crate) buffer: Option<BufferRef>,
    pub(crate) state: VoiceState,
    pub(crate) byte_offset: u32,
    pub(crate) owner: Option<SoundId>,
    pub(crate) priority: Option<Priority>,
}

impl Voice {
    fn new(device_id: DeviceVoiceId) -> Self {
        Self {
            device_id,
            buffer: None,
            state: VoiceState::Initial,
            byte_offset: 0,
            owner: None,
            priority: None,
        }
    }

    /// Device-side id.
    #[must_use]
    pub const fn device_id(&self) -> DeviceVoiceId {
        self.device_id
    }

    /// Bound buffer.
    #[must_use]
    pub const fn buffer(&self) -> Option<BufferRef> {
        self.buffer
    }

    /// Last polled or commanded state.
    #[must_use]
    pub const fn state(&self) -> VoiceState {
        self.state
    }

    /// Last polled byte offset.
    #[must_use]
    pub const fn byte_offset(&self) -> u32 {
        self.byte_offset
    }

    /// Sound that owns the voice.
    #[must_use]
    pub const fn owner(&self) -> Option<SoundId> {
        self.owner
    }

    /// Priority of the owning sound.
    #[must_use]
    pub const fn priority(&self) -> Option<Priority> {
        self.priority
    }

    /// Check if a sound owns the voice.
    #[must_use]
    pub const fn is_coupled(&self) -> bool {
        self.owner.is_some()
    }
}

/// Result of an allocation scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Chosen voice.
    pub index: VoiceIndex,
    /// Sound that must give the voice up, if it was coupled.
    pub evicted: Option<SoundId>,
}

/// Fixed set of voices.
#[derive(Debug)]
pub struct VoicePool {
    voices: Vec<Voice>,
}

impl VoicePool {
    /// Create `count` voices on the device and set their rolloff factor.
    ///
    /// If the device refuses part way through, the pool keeps what it got.
    /// Failing on the very first voice is an error. A rolloff that cannot
    /// be set destroys every voice created so far.
    pub fn new<D>(device: &mut D, count: usize, rolloff: f32) -> AudioResult<Self>
    where
        D: AudioDevice + ?Sized,
    {
        let mut voices = Vec::with_capacity(count);

        for i in 0..count {
            let id = match device.create_voice() {
                Ok(id) => id,
                Err(e) => {
                    if i == 0 {
                        return Err(AudioError::DeviceInit(format!(
                            "could not create any voice: {e}"
                        )));
                    }
                    warn!("Could only create {} of {} voices: {}", i, count, e);
                    break;
                },
            };
            voices.push(Voice::new(id));
            if let Err(e) = device.set_voice_rolloff(id, rolloff) {
                let mut partial = Self { voices };
                if let Err(cleanup) = partial.destroy(device) {
                    warn!("Failed to release voices after setup error: {}", cleanup);
                }
                return Err(AudioError::on_voice(e, VoiceIndex::new(i)));
            }
        }

        debug!("Created voice pool with {} voices", voices.len());
        Ok(Self { voices })
    }

    /// Number of voices.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    /// Number of voices owned by a sound.
    #[must_use]
    pub fn coupled_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_coupled()).count()
    }

    /// Inspect a voice.
    #[must_use]
    pub fn get(&self, index: VoiceIndex) -> Option<&Voice> {
        self.voices.get(index.0)
    }

    pub(crate) fn get_mut(&mut self, index: VoiceIndex) -> Option<&mut Voice> {
        self.voices.get_mut(index.0)
    }

    /// Iterate voices with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (VoiceIndex, &Voice)> {
        self.voices
            .iter()
            .enumerate()
            .map(|(i, v)| (VoiceIndex(i), v))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (VoiceIndex, &mut Voice)> {
        self.voices
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (VoiceIndex(i), v))
    }

    /// Pick a voice for a sound of the given priority.
    ///
    /// This only decides; the caller uncouples `evicted` and couples the new
    /// owner.
    pub fn select(&self, requested: Priority) -> AudioResult<Allocation> {
        let mut stopped: Option<(VoiceIndex, SoundId)> = None;
        let mut lowest: Option<(VoiceIndex, SoundId, Priority)> = None;

        for (index, voice) in self.iter() {
            let Some(owner) = voice.owner else {
                return Ok(Allocation {
                    index,
                    evicted: None,
                });
            };

            if voice.state.is_stopped() {
                stopped.get_or_insert((index, owner));
            }

            let priority = voice.priority.unwrap_or_default();
            if priority <= requested && lowest.map_or(true, |(_, _, p)| priority < p) {
                lowest = Some((index, owner, priority));
            }
        }

        if let Some((index, owner)) = stopped {
            debug!("Reclaiming stopped voice {}", index.0);
            return Ok(Allocation {
                index,
                evicted: Some(owner),
            });
        }

        if let Some((index, owner, priority)) = lowest {
            debug!(
                "Preempting voice {} ({:?}) for {:?}",
                index.0, priority, requested
            );
            return Ok(Allocation {
                index,
                evicted: Some(owner),
            });
        }

        Err(AudioError::AllocationExhausted {
            priority: requested,
            voices: self.voices.len(),
        })
    }

    /// Record `owner` on a voice and reset its cached state.
    pub(crate) fn couple(&mut self, index: VoiceIndex, owner: SoundId, priority: Priority) {
        if let Some(voice) = self.voices.get_mut(index.0) {
            voice.owner = Some(owner);
            voice.priority = Some(priority);
            voice.buffer = None;
            voice.state = VoiceState::Initial;
            voice.byte_offset = 0;
        }
    }

    /// Clear a voice's owner and return the previous one.
    pub(crate) fn release(&mut self, index: VoiceIndex) -> Option<SoundId> {
        let voice = self.voices.get_mut(index.0)?;
        voice.priority = None;
        voice.state = VoiceState::Stopped;
        voice.byte_offset = 0;
        voice.owner.take()
    }

    /// Destroy every voice on the device.
    ///
    /// Every voice is attempted; the first failure is returned.
    pub fn destroy<D>(&mut self, device: &mut D) -> DeviceResult<()>
    where
        D: AudioDevice + ?Sized,
    {
        let mut first_err = None;
        for voice in self.voices.drain(..) {
            if let Err(e) = device.destroy_voice(voice.device_id) {
                warn!("Failed to destroy voice {:?}: {}", voice.device_id, e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
