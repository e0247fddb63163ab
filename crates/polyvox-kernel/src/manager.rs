//! The sound manager.
//!
//! [`SoundManager`] owns the device, the voice pool, the buffer cache and
//! every logical sound. It is constructed once and torn down explicitly with
//! [`SoundManager::shutdown`].
//!
//! # Coupling
//!
//! A sound gets a voice the first time it is played. Coupling records the
//! voice index on the sound and the sound id on the voice, then pushes the
//! sound's complete state to the device: buffer, gain, looping, pitch,
//! position, velocity, playback state and finally offset. A reused voice
//! carries whatever its previous owner left behind, so nothing is skipped.
//!
//! Uncoupling clears both sides before stopping the device voice, so the
//! association stays consistent even when the stop call fails.
//!
//! # Threading
//!
//! Every operation takes `&mut self`. Sharing a manager across threads needs
//! external locking by the caller.

use std::fmt;
use std::time::Instant;

use glam::Vec2;
use tracing::{debug, info, warn};

use crate::buffer_cache::BufferCache;
use crate::category::{CategoryId, CategoryTable};
use crate::config::AudioConfig;
use crate::device::{AudioDevice, DeviceVoiceId, ListenerFrame, VoiceState};
use crate::error::{AudioError, AudioResult, DeviceResult};
use crate::listener::{to_device_space, ListenerTracker};
use crate::loader::SoundLoader;
use crate::sound::{Priority, Sound, SoundArena, SoundDesc, SoundId};
use crate::voice_pool::{Voice, VoiceIndex, VoicePool};

/// Height of sound sources in device space.
const SOURCE_HEIGHT: f32 = 0.0;

/// What one [`SoundManager::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Coupled voices that were polled.
    pub polled: usize,
    /// Looping sounds that were restarted.
    pub restarted: usize,
    /// Sounds that finished playing since the last tick.
    pub finished: usize,
}

/// Priority-based voice manager over an [`AudioDevice`].
pub struct SoundManager<D: AudioDevice> {
    device: D,
    loader: Box<dyn SoundLoader>,
    cache: BufferCache,
    pool: VoicePool,
    sounds: SoundArena,
    categories: CategoryTable,
    listener: ListenerTracker,
    config: AudioConfig,
    shut_down: bool,
}

impl<D: AudioDevice + fmt::Debug> fmt::Debug for SoundManager<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundManager")
            .field("device", &self.device)
            .field("voices", &self.pool.capacity())
            .field("sounds", &self.sounds.len())
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

impl<D: AudioDevice> SoundManager<D> {
    /// Create the manager and one voice per device channel.
    ///
    /// Fails with [`AudioError::DeviceInit`] if the device reports no
    /// channels or refuses to create any voice.
    pub fn new(
        mut device: D,
        loader: Box<dyn SoundLoader>,
        config: AudioConfig,
    ) -> AudioResult<Self> {
        let capacity = device
            .channel_capacity()
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;
        let count = config.voice_count(capacity);
        if count == 0 {
            return Err(AudioError::DeviceInit(
                "device reports no playback channels".to_string(),
            ));
        }

        let mut pool = VoicePool::new(&mut device, count, config.rolloff_factor)?;
        let listener = ListenerTracker::new(config.listener_height);
        if let Err(e) = device.set_listener(&listener.frame(Vec2::ZERO, Vec2::ZERO)) {
            if let Err(cleanup) = pool.destroy(&mut device) {
                warn!("Failed to release voices after setup error: {}", cleanup);
            }
            return Err(AudioError::DeviceInit(e.to_string()));
        }

        info!(
            "Sound manager initialized with {} voices (device reports {})",
            pool.capacity(),
            capacity
        );

        Ok(Self {
            device,
            loader,
            cache: BufferCache::new(),
            pool,
            sounds: SoundArena::new(),
            categories: CategoryTable::new(),
            listener,
            config,
            shut_down: false,
        })
    }

    // ------------------------------------------------------------------
    // Sounds
    // ------------------------------------------------------------------

    /// Create a sound, resolving every buffer it names.
    ///
    /// The sound starts uncoupled. Nothing is created if any buffer fails
    /// to resolve.
    pub fn create_sound(&mut self, desc: SoundDesc) -> AudioResult<SoundId> {
        self.ensure_live()?;
        if desc.buffers.is_empty() {
            return Err(AudioError::NoBuffers);
        }
        if !self.categories.contains(desc.category) {
            return Err(AudioError::UnknownCategory(desc.category));
        }

        let buffers =
            self.cache
                .resolve_all(&desc.buffers, &mut self.device, self.loader.as_ref())?;
        let id = self.sounds.insert(Sound::new(&desc, buffers));
        debug!("Created sound {:?} from {:?}", id, desc.buffers);
        Ok(id)
    }

    /// Uncouple a sound and forget it. The id becomes invalid.
    pub fn destroy_sound(&mut self, id: SoundId) -> AudioResult<()> {
        let result = self.uncouple(id);
        if self.sounds.remove(id).is_none() {
            return Err(AudioError::InvalidHandle(id));
        }
        debug!("Destroyed sound {:?}", id);
        result
    }

    /// Inspect a sound.
    pub fn sound(&self, id: SoundId) -> AudioResult<&Sound> {
        self.sounds.get(id).ok_or(AudioError::InvalidHandle(id))
    }

    fn sound_mut(&mut self, id: SoundId) -> AudioResult<&mut Sound> {
        self.sounds.get_mut(id).ok_or(AudioError::InvalidHandle(id))
    }

    /// Number of live sounds.
    #[must_use]
    pub fn sound_count(&self) -> usize {
        self.sounds.len()
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    /// Start or resume a sound, acquiring a voice if it has none.
    ///
    /// Fails with [`AudioError::AllocationExhausted`] when every voice is
    /// held by a higher-priority sound; the sound then stays silent.
    pub fn play(&mut self, id: SoundId) -> AudioResult<()> {
        self.ensure_live()?;
        let index = self.get_voice(id)?;
        let voice = self.device_voice(index)?;
        self.device
            .play(voice)
            .map_err(|e| AudioError::on_voice(e, index))?;
        self.set_state(id, index, VoiceState::Playing)
    }

    /// Pause a playing sound. Uncoupled sounds are left alone.
    pub fn pause(&mut self, id: SoundId) -> AudioResult<()> {
        self.ensure_live()?;
        let sound = self.sound(id)?;
        let Some(index) = sound.voice else {
            return Ok(());
        };
        let was_playing = sound.state.is_playing();

        let voice = self.device_voice(index)?;
        self.device
            .pause(voice)
            .map_err(|e| AudioError::on_voice(e, index))?;
        if was_playing {
            self.set_state(id, index, VoiceState::Paused)?;
        }
        Ok(())
    }

    /// Stop a sound and rewind it.
    ///
    /// The voice stays coupled but becomes available for reclaiming.
    pub fn stop(&mut self, id: SoundId) -> AudioResult<()> {
        self.ensure_live()?;
        let sound = self.sound_mut(id)?;
        sound.offset = 0.0;
        let Some(index) = sound.voice else {
            sound.state = VoiceState::Stopped;
            return Ok(());
        };

        let voice = self.device_voice(index)?;
        self.device
            .stop(voice)
            .map_err(|e| AudioError::on_voice(e, index))?;
        self.set_state(id, index, VoiceState::Stopped)
    }

    /// Whether the sound was playing as of the last command or tick.
    pub fn is_playing(&self, id: SoundId) -> AudioResult<bool> {
        Ok(self.sound(id)?.state == VoiceState::Playing)
    }

    /// Whether the sound was paused as of the last command or tick.
    pub fn is_paused(&self, id: SoundId) -> AudioResult<bool> {
        Ok(self.sound(id)?.state == VoiceState::Paused)
    }

    /// Whether the sound was stopped as of the last command or tick.
    ///
    /// A sound that lost its voice to another sound reports stopped.
    pub fn is_stopped(&self, id: SoundId) -> AudioResult<bool> {
        Ok(self.sound(id)?.state == VoiceState::Stopped)
    }

    /// Stop every coupled sound.
    pub fn stop_all(&mut self) -> AudioResult<()> {
        for id in self.coupled_sounds() {
            self.stop(id)?;
        }
        Ok(())
    }

    /// Pause every playing sound.
    pub fn pause_all(&mut self) -> AudioResult<()> {
        for id in self.coupled_sounds() {
            self.pause(id)?;
        }
        Ok(())
    }

    /// Resume every paused sound.
    pub fn resume_all(&mut self) -> AudioResult<()> {
        for id in self.coupled_sounds() {
            if self.is_paused(id)? {
                self.play(id)?;
            }
        }
        Ok(())
    }

    fn coupled_sounds(&self) -> Vec<SoundId> {
        self.pool.iter().filter_map(|(_, v)| v.owner()).collect()
    }

    fn set_state(&mut self, id: SoundId, index: VoiceIndex, state: VoiceState) -> AudioResult<()> {
        self.sound_mut(id)?.state = state;
        if let Some(voice) = self.pool.get_mut(index) {
            voice.state = state;
            if state.is_stopped() {
                voice.byte_offset = 0;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    /// Set the position.
    pub fn set_position(&mut self, id: SoundId, position: Vec2) -> AudioResult<()> {
        self.ensure_live()?;
        self.sound_mut(id)?.position = position;
        let position = to_device_space(position, SOURCE_HEIGHT);
        self.with_voice(id, |device, voice| device.set_voice_position(voice, position))
    }

    /// Set the velocity.
    pub fn set_velocity(&mut self, id: SoundId, velocity: Vec2) -> AudioResult<()> {
        self.ensure_live()?;
        self.sound_mut(id)?.velocity = velocity;
        let velocity = to_device_space(velocity, SOURCE_HEIGHT);
        self.with_voice(id, |device, voice| device.set_voice_velocity(voice, velocity))
    }

    /// Set the gain. The category multiplier is applied on top.
    pub fn set_gain(&mut self, id: SoundId, gain: f32) -> AudioResult<()> {
        self.ensure_live()?;
        let sound = self.sound_mut(id)?;
        sound.gain = gain.max(0.0);
        let effective = self.effective_gain(id)?;
        self.with_voice(id, |device, voice| device.set_voice_gain(voice, effective))
    }

    /// Set the pitch multiplier.
    pub fn set_pitch(&mut self, id: SoundId, pitch: f32) -> AudioResult<()> {
        self.ensure_live()?;
        self.sound_mut(id)?.pitch = pitch;
        self.with_voice(id, |device, voice| device.set_voice_pitch(voice, pitch))
    }

    /// Set the pitch to a random value in `[1 - spread/2, 1 + spread/2)`.
    pub fn randomize_pitch(&mut self, id: SoundId, spread: f32) -> AudioResult<()> {
        let pitch = 1.0 - 0.5 * spread + fastrand::f32() * spread;
        self.set_pitch(id, pitch)
    }

    /// Set the playback position as a fraction of the selected buffer.
    pub fn set_offset(&mut self, id: SoundId, offset: f32) -> AudioResult<()> {
        self.ensure_live()?;
        let sound = self.sound_mut(id)?;
        sound.offset = offset.clamp(0.0, 1.0);
        let bytes = sound.selected_buffer().byte_offset(sound.offset);
        self.with_voice(id, |device, voice| device.set_voice_byte_offset(voice, bytes))
    }

    /// Set whether the sound restarts when it ends.
    pub fn set_looping(&mut self, id: SoundId, looping: bool) -> AudioResult<()> {
        self.ensure_live()?;
        self.sound_mut(id)?.looping = looping;
        self.with_voice(id, |device, voice| device.set_voice_looping(voice, looping))
    }

    /// Set the allocation priority. Takes effect for the voice it holds too.
    pub fn set_priority(&mut self, id: SoundId, priority: Priority) -> AudioResult<()> {
        let sound = self.sound_mut(id)?;
        sound.priority = priority;
        let index = sound.voice;
        if let Some(voice) = index.and_then(|index| self.pool.get_mut(index)) {
            voice.priority = Some(priority);
        }
        Ok(())
    }

    /// Switch to the next buffer variant, wrapping around.
    pub fn select_next_buffer(&mut self, id: SoundId) -> AudioResult<()> {
        let next = self.sound(id)?.next_index();
        self.select_buffer(id, next)
    }

    /// Switch to a random buffer variant.
    pub fn select_random_buffer(&mut self, id: SoundId) -> AudioResult<()> {
        let index = fastrand::usize(..self.sound(id)?.buffers.len());
        self.select_buffer(id, index)
    }

    /// Switch to a specific buffer variant.
    ///
    /// A coupled sound gets the new buffer bound immediately and is put back
    /// into its playback state from the start of the new buffer.
    pub fn select_buffer(&mut self, id: SoundId, index: usize) -> AudioResult<()> {
        self.ensure_live()?;
        let sound = self.sound_mut(id)?;
        let len = sound.buffers.len();
        if index >= len {
            return Err(AudioError::BufferIndexOutOfRange { index, len });
        }
        sound.selected = index;
        sound.offset = 0.0;
        let buffer = sound.buffers[index];
        let logical = sound.state;
        let Some(slot) = sound.voice else {
            return Ok(());
        };

        let voice = self.device_voice(slot)?;
        let on_voice = |e| AudioError::on_voice(e, slot);
        let device = &mut self.device;
        device.set_voice_buffer(voice, buffer.id).map_err(on_voice)?;
        let state = match logical {
            VoiceState::Playing => {
                device.play(voice).map_err(on_voice)?;
                VoiceState::Playing
            },
            VoiceState::Paused => {
                device.play(voice).map_err(on_voice)?;
                device.pause(voice).map_err(on_voice)?;
                VoiceState::Paused
            },
            VoiceState::Initial | VoiceState::Stopped => {
                device.stop(voice).map_err(on_voice)?;
                VoiceState::Stopped
            },
        };

        self.sound_mut(id)?.state = state;
        if let Some(v) = self.pool.get_mut(slot) {
            v.buffer = Some(buffer);
            v.state = state;
            v.byte_offset = 0;
        }
        Ok(())
    }

    fn effective_gain(&self, id: SoundId) -> AudioResult<f32> {
        let sound = self.sound(id)?;
        Ok(sound.gain * self.categories.multiplier(sound.category))
    }

    fn with_voice<F>(&mut self, id: SoundId, f: F) -> AudioResult<()>
    where
        F: FnOnce(&mut D, DeviceVoiceId) -> DeviceResult<()>,
    {
        let Some(index) = self.sound(id)?.voice else {
            return Ok(());
        };
        let voice = self.device_voice(index)?;
        f(&mut self.device, voice).map_err(|e| AudioError::on_voice(e, index))
    }

    fn device_voice(&self, index: VoiceIndex) -> AudioResult<DeviceVoiceId> {
        self.pool
            .get(index)
            .map(Voice::device_id)
            .ok_or(AudioError::ShutDown)
    }

    // ------------------------------------------------------------------
    // Coupling
    // ------------------------------------------------------------------

    /// Return the sound's voice, acquiring and syncing one if needed.
    fn get_voice(&mut self, id: SoundId) -> AudioResult<VoiceIndex> {
        let sound = self.sound(id)?;
        if let Some(index) = sound.voice {
            return Ok(index);
        }
        let priority = sound.priority;

        let allocation = match self.pool.select(priority) {
            Ok(allocation) => allocation,
            Err(e) => {
                warn!("No voice for sound {:?}: {}", id, e);
                return Err(e);
            },
        };
        if allocation.evicted.is_some() {
            self.detach(allocation.index)?;
        }

        self.pool.couple(allocation.index, id, priority);
        self.sound_mut(id)?.voice = Some(allocation.index);
        debug!(
            "Coupled sound {:?} to voice {} ({:?})",
            id,
            allocation.index.raw(),
            priority
        );

        // A half-synced voice must not stay coupled.
        if let Err(e) = self.resync(id, allocation.index) {
            if let Err(stop) = self.detach(allocation.index) {
                debug!("Stop after failed sync also failed: {}", stop);
            }
            return Err(e);
        }
        Ok(allocation.index)
    }

    /// Push the sound's whole state onto a freshly coupled voice.
    fn resync(&mut self, id: SoundId, index: VoiceIndex) -> AudioResult<()> {
        let sound = self.sound(id)?;
        let buffer = sound.selected_buffer();
        let gain = sound.gain * self.categories.multiplier(sound.category);
        let looping = sound.looping;
        let pitch = sound.pitch;
        let position = to_device_space(sound.position, SOURCE_HEIGHT);
        let velocity = to_device_space(sound.velocity, SOURCE_HEIGHT);
        let logical = sound.state;
        let offset = buffer.byte_offset(sound.offset);

        let voice = self.device_voice(index)?;
        let on_voice = |e| AudioError::on_voice(e, index);
        let device = &mut self.device;

        device.set_voice_buffer(voice, buffer.id).map_err(on_voice)?;
        device.set_voice_gain(voice, gain).map_err(on_voice)?;
        device.set_voice_looping(voice, looping).map_err(on_voice)?;
        device.set_voice_pitch(voice, pitch).map_err(on_voice)?;
        device.set_voice_position(voice, position).map_err(on_voice)?;
        device.set_voice_velocity(voice, velocity).map_err(on_voice)?;

        let applied = match logical {
            VoiceState::Playing => {
                device.play(voice).map_err(on_voice)?;
                VoiceState::Playing
            },
            VoiceState::Paused => {
                device.play(voice).map_err(on_voice)?;
                device.pause(voice).map_err(on_voice)?;
                VoiceState::Paused
            },
            VoiceState::Initial | VoiceState::Stopped => {
                device.stop(voice).map_err(on_voice)?;
                VoiceState::Stopped
            },
        };
        device.set_voice_byte_offset(voice, offset).map_err(on_voice)?;

        if let Some(v) = self.pool.get_mut(index) {
            v.buffer = Some(buffer);
            v.state = applied;
            v.byte_offset = offset;
        }
        Ok(())
    }

    /// Take a sound's voice away from it and stop the voice.
    ///
    /// Does nothing for a sound that holds no voice.
    pub fn uncouple(&mut self, id: SoundId) -> AudioResult<()> {
        match self.sound(id)?.voice {
            Some(index) => self.detach(index),
            None => Ok(()),
        }
    }

    fn detach(&mut self, index: VoiceIndex) -> AudioResult<()> {
        let voice = self.device_voice(index)?;
        if let Some(owner) = self.pool.release(index) {
            if let Some(sound) = self.sounds.get_mut(owner) {
                sound.voice = None;
                sound.state = VoiceState::Stopped;
                sound.offset = 0.0;
            }
            debug!("Uncoupled sound {:?} from voice {}", owner, index.raw());
        }
        self.device
            .stop(voice)
            .map_err(|e| AudioError::on_voice(e, index))
    }

    // ------------------------------------------------------------------
    // Update loop
    // ------------------------------------------------------------------

    /// Reconcile cached state with the device. Call once per frame.
    ///
    /// Polls every coupled voice, updates offsets and states, and restarts
    /// looping sounds that ran out. A failing voice does not stop the rest
    /// from being processed; the first failure is returned afterwards.
    pub fn tick(&mut self) -> AudioResult<TickReport> {
        self.ensure_live()?;
        let mut report = TickReport::default();
        let mut first_err = None;

        for i in 0..self.pool.capacity() {
            let index = VoiceIndex::new(i);
            if let Err(e) = self.update_voice(index, &mut report) {
                warn!("Failed to update voice {}: {}", i, e);
                first_err.get_or_insert(e);
            }
        }

        first_err.map_or(Ok(report), Err)
    }

    fn update_voice(&mut self, index: VoiceIndex, report: &mut TickReport) -> AudioResult<()> {
        let Some(voice) = self.pool.get(index) else {
            return Ok(());
        };
        let Some(owner) = voice.owner() else {
            return Ok(());
        };
        let device_voice = voice.device_id();
        let on_voice = |e| AudioError::on_voice(e, index);

        let byte_offset = self
            .device
            .voice_byte_offset(device_voice)
            .map_err(on_voice)?;
        let polled = self.device.voice_state(device_voice).map_err(on_voice)?;
        report.polled += 1;

        let sound = self.sound(owner)?;
        let offset = sound.selected_buffer().normalized_offset(byte_offset);
        let was_playing = sound.state.is_playing();
        let restart = polled.is_stopped() && was_playing && sound.looping;

        let state = if restart {
            self.device.play(device_voice).map_err(on_voice)?;
            report.restarted += 1;
            debug!("Restarted looping sound {:?} on voice {}", owner, index.raw());
            VoiceState::Playing
        } else {
            if polled.is_stopped() && was_playing {
                report.finished += 1;
            }
            polled
        };

        let sound = self.sound_mut(owner)?;
        sound.offset = offset;
        sound.state = state;
        if let Some(v) = self.pool.get_mut(index) {
            v.byte_offset = byte_offset;
            v.state = state;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Categories
    // ------------------------------------------------------------------

    /// Register a gain bus, or get the existing one with that name.
    pub fn register_category(&mut self, name: &str, gain: f32) -> CategoryId {
        self.categories.register(name, gain)
    }

    /// Look up a gain bus by name.
    #[must_use]
    pub fn category(&self, name: &str) -> Option<CategoryId> {
        self.categories.by_name(name)
    }

    /// Gain of a bus, without the master.
    pub fn category_gain(&self, category: CategoryId) -> AudioResult<f32> {
        self.categories
            .gain(category)
            .ok_or(AudioError::UnknownCategory(category))
    }

    /// Set a bus gain and push the new effective gain to every coupled
    /// sound in it.
    pub fn set_category_gain(&mut self, category: CategoryId, gain: f32) -> AudioResult<()> {
        self.ensure_live()?;
        if !self.categories.set_gain(category, gain) {
            return Err(AudioError::UnknownCategory(category));
        }
        debug!("Category {:?} gain set to {}", category, gain);
        self.push_gains(Some(category))
    }

    /// Master gain.
    #[must_use]
    pub const fn master_gain(&self) -> f32 {
        self.categories.master()
    }

    /// Set the master gain and push it to every coupled sound.
    pub fn set_master_gain(&mut self, gain: f32) -> AudioResult<()> {
        self.ensure_live()?;
        self.categories.set_master(gain);
        self.push_gains(None)
    }

    /// Re-push effective gain to coupled voices, optionally in one bus only.
    fn push_gains(&mut self, only: Option<CategoryId>) -> AudioResult<()> {
        let mut first_err = None;
        for (index, voice) in self.pool.iter() {
            let Some(sound) = voice.owner().and_then(|owner| self.sounds.get(owner)) else {
                continue;
            };
            if only.is_some_and(|category| category != sound.category) {
                continue;
            }
            let gain = sound.gain * self.categories.multiplier(sound.category);
            if let Err(e) = self.device.set_voice_gain(voice.device_id(), gain) {
                warn!("Failed to update gain on voice {}: {}", index.raw(), e);
                first_err.get_or_insert(AudioError::on_voice(e, index));
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    // ------------------------------------------------------------------
    // Listener
    // ------------------------------------------------------------------

    /// Move the listener, deriving its velocity from the last call.
    pub fn recalculate_listener(&mut self, position: Vec2) -> AudioResult<()> {
        self.recalculate_listener_at(position, Instant::now())
    }

    /// Move the listener as of `now`.
    ///
    /// Skipped when `now` is not after the previous sample.
    pub fn recalculate_listener_at(&mut self, position: Vec2, now: Instant) -> AudioResult<()> {
        self.ensure_live()?;
        if let Some(frame) = self.listener.update(position, now) {
            self.device.set_listener(&frame)?;
        }
        Ok(())
    }

    /// Push a listener frame computed by the caller.
    pub fn set_listener(&mut self, frame: &ListenerFrame) -> AudioResult<()> {
        self.ensure_live()?;
        self.device.set_listener(frame)?;
        Ok(())
    }

    /// Listener tracking state.
    #[must_use]
    pub const fn listener(&self) -> &ListenerTracker {
        &self.listener
    }

    // ------------------------------------------------------------------
    // Preloading
    // ------------------------------------------------------------------

    /// Queue sound assets for [`preload_sounds`](Self::preload_sounds).
    pub fn add_preload<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache.add_preload(names);
    }

    /// Forget the preload queue.
    pub fn clear_preload(&mut self) {
        self.cache.clear_preload();
    }

    /// Load every queued asset now. Returns how many loaded.
    pub fn preload_sounds(&mut self) -> AudioResult<usize> {
        self.ensure_live()?;
        Ok(self.cache.preload(&mut self.device, self.loader.as_ref()))
    }

    // ------------------------------------------------------------------
    // Accessors and teardown
    // ------------------------------------------------------------------

    /// The voice pool.
    #[must_use]
    pub const fn pool(&self) -> &VoicePool {
        &self.pool
    }

    /// The buffer cache.
    #[must_use]
    pub const fn cache(&self) -> &BufferCache {
        &self.cache
    }

    /// The category table.
    #[must_use]
    pub const fn categories(&self) -> &CategoryTable {
        &self.categories
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// The device.
    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// The device, mutably.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Check if [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub const fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Uncouple every sound, destroy all voices and free every buffer.
    ///
    /// Later calls are no-ops. Most operations fail with
    /// [`AudioError::ShutDown`] afterwards.
    pub fn shutdown(&mut self) -> AudioResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        for id in self.sounds.ids() {
            if let Some(sound) = self.sounds.get_mut(id) {
                sound.voice = None;
                sound.state = VoiceState::Stopped;
                sound.offset = 0.0;
            }
        }

        let voices = self.pool.destroy(&mut self.device);
        let buffers = self.cache.clear(&mut self.device);
        info!("Sound manager shut down");

        voices?;
        buffers?;
        Ok(())
    }

    fn ensure_live(&self) -> AudioResult<()> {
        if self.shut_down {
            return Err(AudioError::ShutDown);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_cache::PcmData;
    use crate::loader::MemoryLoader;
    use crate::sim_device::{DeviceCommand, SimulatedDevice};

    fn loader() -> Box<MemoryLoader> {
        Box::new(
            MemoryLoader::new()
                .with("a.wav", PcmData::new(vec![0; 500], 1000, 1))
                .with("b.wav", PcmData::new(vec![0; 250], 1000, 1))
                .with("c.wav", PcmData::new(vec![0; 100], 1000, 2)),
        )
    }

    fn manager(voices: usize) -> SoundManager<SimulatedDevice> {
        SoundManager::new(SimulatedDevice::new(voices), loader(), AudioConfig::default())
            .expect("manager")
    }

    fn effect(m: &mut SoundManager<SimulatedDevice>) -> SoundId {
        m.create_sound(SoundDesc::new(CategoryId::EFFECTS, ["a.wav"]))
            .expect("sound")
    }

    fn device_voice(m: &SoundManager<SimulatedDevice>, id: SoundId) -> DeviceVoiceId {
        let index = m.sound(id).expect("sound").voice().expect("coupled");
        m.pool().get(index).expect("voice").device_id()
    }

    #[test]
    fn test_new_creates_voices() {
        let m = manager(4);
        assert_eq!(m.pool().capacity(), 4);
        assert_eq!(m.device().voice_count(), 4);
        assert!((m.device().listener().position.z - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_new_respects_max_voices() {
        let config = AudioConfig::default().with_max_voices(2);
        let m = SoundManager::new(SimulatedDevice::new(8), loader(), config).expect("manager");
        assert_eq!(m.pool().capacity(), 2);
    }

    #[test]
    fn test_new_without_channels() {
        let err = SoundManager::new(SimulatedDevice::new(0), loader(), AudioConfig::default())
            .expect_err("no channels");
        assert!(matches!(err, AudioError::DeviceInit(_)));
    }

    #[test]
    fn test_new_fails_when_listener_rejected() {
        let mut device = SimulatedDevice::new(2);
        device.set_listener_failing(true);
        let err = SoundManager::new(device, loader(), AudioConfig::default())
            .expect_err("listener rejected");
        assert!(matches!(err, AudioError::DeviceInit(_)));
    }

    #[test]
    fn test_create_sound_errors() {
        let mut m = manager(1);
        let none: [&str; 0] = [];
        assert!(matches!(
            m.create_sound(SoundDesc::new(CategoryId::EFFECTS, none)),
            Err(AudioError::NoBuffers)
        ));
        assert!(matches!(
            m.create_sound(SoundDesc::new(CategoryId::EFFECTS, ["a.wav", "nope.wav"])),
            Err(AudioError::AssetResolution { .. })
        ));
        assert_eq!(m.sound_count(), 0);

        let mut other = CategoryTable::new();
        other.register("ui", 1.0);
        let ghost = other.register("ambient", 1.0);
        assert!(matches!(
            m.create_sound(SoundDesc::new(ghost, ["a.wav"])),
            Err(AudioError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_setters_cache_while_uncoupled() {
        let mut m = manager(1);
        let id = effect(&mut m);
        m.device_mut().take_commands();

        m.set_gain(id, 0.5).expect("gain");
        m.set_pitch(id, 1.5).expect("pitch");
        m.set_position(id, Vec2::new(1.0, 2.0)).expect("position");
        m.set_offset(id, 0.25).expect("offset");
        m.pause(id).expect("pause");

        assert!(m.device().commands().is_empty());
        assert!(!m.sound(id).expect("sound").is_coupled());
        assert!((m.sound(id).expect("sound").pitch() - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_play_pushes_full_state() {
        let mut m = manager(1);
        let id = m
            .create_sound(
                SoundDesc::new(CategoryId::EFFECTS, ["a.wav"])
                    .with_gain(0.5)
                    .with_pitch(1.25)
                    .with_position(Vec2::new(3.0, 4.0)),
            )
            .expect("sound");
        m.set_offset(id, 0.5).expect("offset");
        m.play(id).expect("play");

        let voice = device_voice(&m, id);
        let sim = m.device().voice(voice).expect("sim voice");
        assert_eq!(sim.state, VoiceState::Playing);
        assert!((sim.gain - 0.5).abs() < f32::EPSILON);
        assert!((sim.pitch - 1.25).abs() < f32::EPSILON);
        assert_eq!(sim.position, glam::Vec3::new(3.0, 4.0, 0.0));
        assert_eq!(sim.offset, 500);

        let commands = m.device().commands_for(voice);
        assert!(matches!(commands.last(), Some(DeviceCommand::Play(_))));
        assert!(matches!(
            commands.iter().rev().nth(1),
            Some(DeviceCommand::SetOffset(_, 500))
        ));
        assert!(m.is_playing(id).expect("state"));
    }

    #[test]
    fn test_pause_and_resume() {
        let mut m = manager(1);
        let id = effect(&mut m);
        m.play(id).expect("play");
        m.device_mut().advance_bytes(300);

        m.pause(id).expect("pause");
        assert!(m.is_paused(id).expect("state"));
        m.device_mut().advance_bytes(300);

        m.play(id).expect("resume");
        let voice = device_voice(&m, id);
        assert_eq!(m.device().voice(voice).expect("sim voice").offset, 300);
        assert!(m.is_playing(id).expect("state"));
    }

    #[test]
    fn test_stop_keeps_voice_reclaimable() {
        let mut m = manager(1);
        let a = effect(&mut m);
        m.play(a).expect("play");
        m.stop(a).expect("stop");

        assert!(m.is_stopped(a).expect("state"));
        assert!(m.sound(a).expect("sound").is_coupled());

        let b = m
            .create_sound(
                SoundDesc::new(CategoryId::EFFECTS, ["b.wav"]).with_priority(Priority::Delete),
            )
            .expect("sound");
        m.play(b).expect("stopped voice is reclaimed");
        assert!(!m.sound(a).expect("sound").is_coupled());
    }

    #[test]
    fn test_select_buffer() {
        let mut m = manager(1);
        let id = m
            .create_sound(SoundDesc::new(CategoryId::EFFECTS, ["a.wav", "b.wav", "c.wav"]))
            .expect("sound");

        m.select_next_buffer(id).expect("next");
        assert_eq!(m.sound(id).expect("sound").selected_index(), 1);
        m.select_buffer(id, 2).expect("select");
        m.select_next_buffer(id).expect("next");
        assert_eq!(m.sound(id).expect("sound").selected_index(), 0);

        assert!(matches!(
            m.select_buffer(id, 3),
            Err(AudioError::BufferIndexOutOfRange { index: 3, len: 3 })
        ));

        for _ in 0..10 {
            m.select_random_buffer(id).expect("random");
            assert!(m.sound(id).expect("sound").selected_index() < 3);
        }
    }

    #[test]
    fn test_select_buffer_while_playing() {
        let mut m = manager(1);
        let id = m
            .create_sound(SoundDesc::new(CategoryId::EFFECTS, ["a.wav", "b.wav"]))
            .expect("sound");
        m.play(id).expect("play");
        m.select_next_buffer(id).expect("next");

        let voice = device_voice(&m, id);
        let sim = m.device().voice(voice).expect("sim voice");
        let b = m.cache().get("b.wav").expect("cached");
        assert_eq!(sim.buffer, Some(b.id));
        assert_eq!(sim.state, VoiceState::Playing);
    }

    #[test]
    fn test_select_buffer_keeps_stopped_voice_reclaimable() {
        let mut m = manager(1);
        let a = m
            .create_sound(
                SoundDesc::new(CategoryId::EFFECTS, ["a.wav", "b.wav"])
                    .with_priority(Priority::High),
            )
            .expect("sound");
        m.play(a).expect("play");
        m.stop(a).expect("stop");
        m.select_next_buffer(a).expect("next");
        m.tick().expect("tick");

        assert!(m.is_stopped(a).expect("state"));
        let voice = device_voice(&m, a);
        assert_eq!(m.device().voice(voice).expect("sim voice").state, VoiceState::Stopped);
        assert_eq!(
            m.pool().get(VoiceIndex::new(0)).expect("voice").state(),
            VoiceState::Stopped
        );

        let b = m
            .create_sound(
                SoundDesc::new(CategoryId::EFFECTS, ["c.wav"]).with_priority(Priority::Low),
            )
            .expect("sound");
        m.play(b).expect("finished voice is reclaimed");
        assert!(!m.sound(a).expect("sound").is_coupled());
    }

    #[test]
    fn test_select_buffer_while_paused() {
        let mut m = manager(1);
        let id = m
            .create_sound(SoundDesc::new(CategoryId::EFFECTS, ["a.wav", "b.wav"]))
            .expect("sound");
        m.play(id).expect("play");
        m.pause(id).expect("pause");
        m.select_next_buffer(id).expect("next");
        m.tick().expect("tick");

        assert!(m.is_paused(id).expect("state"));
        let voice = device_voice(&m, id);
        let sim = m.device().voice(voice).expect("sim voice");
        assert_eq!(sim.state, VoiceState::Paused);
        assert_eq!(sim.offset, 0);
    }

    #[test]
    fn test_failed_sync_leaves_sound_uncoupled() {
        let mut m = manager(1);
        let a = effect(&mut m);
        let voice = m.pool().get(VoiceIndex::new(0)).expect("voice").device_id();

        m.device_mut().set_failing(voice, true);
        let err = m.play(a).expect_err("sync fails");
        assert!(matches!(
            err,
            AudioError::Device {
                voice: Some(_),
                ..
            }
        ));
        assert!(!m.sound(a).expect("sound").is_coupled());
        assert_eq!(m.pool().coupled_count(), 0);

        m.device_mut().set_failing(voice, false);
        m.play(a).expect("play after recovery");
        assert!(m.is_playing(a).expect("state"));

        let sim = m.device().voice(voice).expect("sim voice");
        let buffer = m.cache().get("a.wav").expect("cached");
        assert_eq!(sim.buffer, Some(buffer.id));
        assert_eq!(sim.state, VoiceState::Playing);
    }

    #[test]
    fn test_randomize_pitch_range() {
        let mut m = manager(1);
        let id = effect(&mut m);
        for _ in 0..50 {
            m.randomize_pitch(id, 0.4).expect("pitch");
            let pitch = m.sound(id).expect("sound").pitch();
            assert!((0.8..1.2).contains(&pitch), "pitch {pitch} out of range");
        }
    }

    #[test]
    fn test_set_priority_updates_voice() {
        let mut m = manager(1);
        let id = effect(&mut m);
        m.play(id).expect("play");
        m.set_priority(id, Priority::High).expect("priority");

        let index = m.sound(id).expect("sound").voice().expect("coupled");
        assert_eq!(
            m.pool().get(index).expect("voice").priority(),
            Some(Priority::High)
        );
    }

    #[test]
    fn test_destroy_sound() {
        let mut m = manager(1);
        let id = effect(&mut m);
        m.play(id).expect("play");

        m.destroy_sound(id).expect("destroy");
        assert_eq!(m.pool().coupled_count(), 0);
        assert!(matches!(m.play(id), Err(AudioError::InvalidHandle(_))));
        assert!(matches!(m.destroy_sound(id), Err(AudioError::InvalidHandle(_))));
    }

    #[test]
    fn test_tick_updates_offset_and_finish() {
        let mut m = manager(1);
        let id = effect(&mut m);
        m.play(id).expect("play");
        m.device_mut().advance_bytes(500);

        let report = m.tick().expect("tick");
        assert_eq!(report.polled, 1);
        assert!((m.sound(id).expect("sound").offset() - 0.5).abs() < f32::EPSILON);

        m.device_mut().advance_bytes(500);
        let report = m.tick().expect("tick");
        assert_eq!(report.finished, 1);
        assert!(m.is_stopped(id).expect("state"));
        assert!(m.sound(id).expect("sound").is_coupled());
    }

    #[test]
    fn test_tick_does_not_restart_stopped_loop() {
        let mut m = manager(1);
        let id = m
            .create_sound(SoundDesc::new(CategoryId::EFFECTS, ["a.wav"]).with_looping(true))
            .expect("sound");
        m.play(id).expect("play");
        m.stop(id).expect("stop");

        let report = m.tick().expect("tick");
        assert_eq!(report.restarted, 0);
        assert!(m.is_stopped(id).expect("state"));
    }

    #[test]
    fn test_tick_surfaces_device_failure() {
        let mut m = manager(2);
        let a = effect(&mut m);
        let b = effect(&mut m);
        m.play(a).expect("play");
        m.play(b).expect("play");
        let failing = device_voice(&m, a);
        m.device_mut().set_failing(failing, true);
        m.device_mut().advance_bytes(250);

        let err = m.tick().expect_err("device failure");
        assert!(matches!(
            err,
            AudioError::Device {
                voice: Some(_),
                ..
            }
        ));
        assert!((m.sound(b).expect("sound").offset() - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_master_gain() {
        let mut m = manager(1);
        let id = effect(&mut m);
        m.play(id).expect("play");
        m.set_category_gain(CategoryId::EFFECTS, 0.5).expect("category");
        m.set_master_gain(0.5).expect("master");

        let voice = device_voice(&m, id);
        assert!((m.device().voice(voice).expect("sim voice").gain - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_register_category() {
        let mut m = manager(1);
        let ui = m.register_category("ui", 1.0);
        assert_eq!(m.category("ui"), Some(ui));
        assert!(m.set_category_gain(ui, 0.3).is_ok());
        assert!((m.category_gain(ui).expect("gain") - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_preload() {
        let mut m = manager(1);
        m.add_preload(["a.wav", "missing.wav", "c.wav"]);
        assert_eq!(m.preload_sounds().expect("preload"), 2);
        assert_eq!(m.cache().count(), 2);
        m.clear_preload();
        assert_eq!(m.preload_sounds().expect("preload"), 0);
    }

    #[test]
    fn test_pause_all_resume_all() {
        let mut m = manager(2);
        let a = effect(&mut m);
        let b = effect(&mut m);
        m.play(a).expect("play");
        m.play(b).expect("play");

        m.pause_all().expect("pause all");
        assert!(m.is_paused(a).expect("state") && m.is_paused(b).expect("state"));
        m.resume_all().expect("resume all");
        assert!(m.is_playing(a).expect("state") && m.is_playing(b).expect("state"));
        m.stop_all().expect("stop all");
        assert!(m.is_stopped(a).expect("state") && m.is_stopped(b).expect("state"));
    }

    #[test]
    fn test_shutdown() {
        let mut m = manager(2);
        let id = effect(&mut m);
        m.play(id).expect("play");

        m.shutdown().expect("shutdown");
        assert!(m.is_shut_down());
        assert_eq!(m.device().voice_count(), 0);
        assert_eq!(m.device().buffer_count(), 0);
        assert!(!m.sound(id).expect("sound").is_coupled());
        assert!(matches!(m.play(id), Err(AudioError::ShutDown)));
        assert!(matches!(m.tick(), Err(AudioError::ShutDown)));
        assert!(m.shutdown().is_ok());
    }
}
