//! In-memory audio device.
//!
//! `SimulatedDevice` models the state machine of a hardware voice without
//! producing sound: buffers are bound, offsets advance when the caller moves
//! time forward, and finished voices report `Stopped`. Every mutating call is
//! recorded in a command log so tests can assert on exactly what was pushed.
//!
//! It is also the backend for silent mode when no output device can be
//! opened.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use glam::Vec3;
use tracing::debug;

use crate::buffer_cache::{PcmData, BYTES_PER_SAMPLE};
use crate::device::{AudioDevice, DeviceBufferId, DeviceVoiceId, ListenerFrame, VoiceState};
use crate::error::{DeviceError, DeviceResult};

/// A recorded device command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceCommand {
    /// `set_voice_buffer`
    SetBuffer(DeviceVoiceId, DeviceBufferId),
    /// `set_voice_gain`
    SetGain(DeviceVoiceId, f32),
    /// `set_voice_pitch`
    SetPitch(DeviceVoiceId, f32),
    /// `set_voice_looping`
    SetLooping(DeviceVoiceId, bool),
    /// `set_voice_byte_offset`
    SetOffset(DeviceVoiceId, u32),
    /// `set_voice_position`
    SetPosition(DeviceVoiceId, Vec3),
    /// `set_voice_velocity`
    SetVelocity(DeviceVoiceId, Vec3),
    /// `set_voice_rolloff`
    SetRolloff(DeviceVoiceId, f32),
    /// `play`
    Play(DeviceVoiceId),
    /// `pause`
    Pause(DeviceVoiceId),
    /// `stop`
    Stop(DeviceVoiceId),
    /// `set_listener`
    SetListener(ListenerFrame),
}

impl DeviceCommand {
    /// Voice the command targets, if any.
    #[must_use]
    pub const fn voice(&self) -> Option<DeviceVoiceId> {
        match *self {
            Self::SetBuffer(v, _)
            | Self::SetGain(v, _)
            | Self::SetPitch(v, _)
            | Self::SetLooping(v, _)
            | Self::SetOffset(v, _)
            | Self::SetPosition(v, _)
            | Self::SetVelocity(v, _)
            | Self::SetRolloff(v, _)
            | Self::Play(v)
            | Self::Pause(v)
            | Self::Stop(v) => Some(v),
            Self::SetListener(_) => None,
        }
    }
}

/// State of one simulated voice.
#[derive(Debug, Clone, PartialEq)]
pub struct SimVoice {
    /// Bound buffer.
    pub buffer: Option<DeviceBufferId>,
    /// Gain.
    pub gain: f32,
    /// Pitch multiplier.
    pub pitch: f32,
    /// Device loop flag.
    pub looping: bool,
    /// Distance rolloff factor.
    pub rolloff: f32,
    /// Position.
    pub position: Vec3,
    /// Velocity.
    pub velocity: Vec3,
    /// Playback state.
    pub state: VoiceState,
    /// Byte offset into the bound buffer.
    pub offset: u32,
}

impl Default for SimVoice {
    fn default() -> Self {
        Self {
            buffer: None,
            gain: 1.0,
            pitch: 1.0,
            looping: false,
            rolloff: 1.0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            state: VoiceState::Initial,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SimBuffer {
    size_bytes: u32,
    sample_rate: u32,
    channels: u16,
}

impl SimBuffer {
    fn bytes_per_second(self) -> f64 {
        f64::from(self.sample_rate) * f64::from(self.channels) * BYTES_PER_SAMPLE as f64
    }
}

/// In-memory [`AudioDevice`].
#[derive(Debug)]
pub struct SimulatedDevice {
    capacity: usize,
    next_voice: u32,
    next_buffer: u32,
    voices: BTreeMap<DeviceVoiceId, SimVoice>,
    buffers: HashMap<DeviceBufferId, SimBuffer>,
    listener: ListenerFrame,
    commands: Vec<DeviceCommand>,
    failing: HashSet<DeviceVoiceId>,
    listener_failing: bool,
}

impl SimulatedDevice {
    /// Create a device that reports `capacity` channels.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        debug!("Created simulated audio device with {} channels", capacity);
        Self {
            capacity,
            next_voice: 1,
            next_buffer: 1,
            voices: BTreeMap::new(),
            buffers: HashMap::new(),
            listener: ListenerFrame::default(),
            commands: Vec::new(),
            failing: HashSet::new(),
            listener_failing: false,
        }
    }

    /// Inspect a voice.
    #[must_use]
    pub fn voice(&self, voice: DeviceVoiceId) -> Option<&SimVoice> {
        self.voices.get(&voice)
    }

    /// Number of live voices.
    #[must_use]
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Number of live buffers.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Last listener frame pushed.
    #[must_use]
    pub const fn listener(&self) -> &ListenerFrame {
        &self.listener
    }

    /// Every command recorded since the last drain.
    #[must_use]
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    /// Take and clear the command log.
    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Commands recorded for one voice.
    #[must_use]
    pub fn commands_for(&self, voice: DeviceVoiceId) -> Vec<DeviceCommand> {
        self.commands
            .iter()
            .filter(|c| c.voice() == Some(voice))
            .copied()
            .collect()
    }

    /// Number of `play` calls recorded for a voice.
    #[must_use]
    pub fn play_count(&self, voice: DeviceVoiceId) -> usize {
        self.commands
            .iter()
            .filter(|c| **c == DeviceCommand::Play(voice))
            .count()
    }

    /// Make every call on `voice` fail until cleared.
    pub fn set_failing(&mut self, voice: DeviceVoiceId, failing: bool) {
        if failing {
            self.failing.insert(voice);
        } else {
            self.failing.remove(&voice);
        }
    }

    /// Make listener updates fail until cleared.
    pub fn set_listener_failing(&mut self, failing: bool) {
        self.listener_failing = failing;
    }

    /// Force a voice to finish as if its data ran out, ignoring the loop flag.
    pub fn finish(&mut self, voice: DeviceVoiceId) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.state = VoiceState::Stopped;
            v.offset = 0;
        }
    }

    /// Move every playing voice forward by `bytes` (scaled by pitch).
    pub fn advance_bytes(&mut self, bytes: u32) {
        let buffers = &self.buffers;
        for voice in self.voices.values_mut() {
            let Some(buffer) = voice.buffer.and_then(|id| buffers.get(&id)) else {
                continue;
            };
            let step = (f64::from(bytes) * f64::from(voice.pitch)) as u64;
            Self::step_voice(voice, *buffer, step);
        }
    }

    /// Move every playing voice forward by wall-clock time.
    pub fn advance(&mut self, elapsed: Duration) {
        let buffers = &self.buffers;
        for voice in self.voices.values_mut() {
            let Some(buffer) = voice.buffer.and_then(|id| buffers.get(&id)) else {
                continue;
            };
            let step = elapsed.as_secs_f64() * buffer.bytes_per_second() * f64::from(voice.pitch);
            Self::step_voice(voice, *buffer, step as u64);
        }
    }

    fn step_voice(voice: &mut SimVoice, buffer: SimBuffer, step: u64) {
        if voice.state != VoiceState::Playing {
            return;
        }
        let size = u64::from(buffer.size_bytes);
        let next = u64::from(voice.offset) + step;
        if next < size {
            voice.offset = next as u32;
        } else if voice.looping && size > 0 {
            voice.offset = (next % size) as u32;
        } else {
            voice.state = VoiceState::Stopped;
            voice.offset = 0;
        }
    }

    fn check(&self, voice: DeviceVoiceId) -> DeviceResult<()> {
        if self.failing.contains(&voice) {
            return Err(DeviceError::Backend(format!(
                "injected failure on voice {}",
                voice.raw()
            )));
        }
        if !self.voices.contains_key(&voice) {
            return Err(DeviceError::UnknownVoice(voice));
        }
        Ok(())
    }

    fn voice_mut(&mut self, voice: DeviceVoiceId) -> DeviceResult<&mut SimVoice> {
        self.check(voice)?;
        self.voices
            .get_mut(&voice)
            .ok_or(DeviceError::UnknownVoice(voice))
    }

    fn record(&mut self, command: DeviceCommand) {
        self.commands.push(command);
    }
}

impl AudioDevice for SimulatedDevice {
    fn channel_capacity(&self) -> DeviceResult<usize> {
        Ok(self.capacity)
    }

    fn create_voice(&mut self) -> DeviceResult<DeviceVoiceId> {
        if self.voices.len() >= self.capacity {
            return Err(DeviceError::VoiceLimit {
                limit: self.capacity,
            });
        }
        let id = DeviceVoiceId::new(self.next_voice);
        self.next_voice += 1;
        self.voices.insert(id, SimVoice::default());
        Ok(id)
    }

    fn destroy_voice(&mut self, voice: DeviceVoiceId) -> DeviceResult<()> {
        self.check(voice)?;
        self.voices.remove(&voice);
        Ok(())
    }

    fn create_buffer(&mut self, pcm: &PcmData) -> DeviceResult<DeviceBufferId> {
        let id = DeviceBufferId::new(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(
            id,
            SimBuffer {
                size_bytes: pcm.size_bytes() as u32,
                sample_rate: pcm.sample_rate,
                channels: pcm.channels,
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: DeviceBufferId) -> DeviceResult<()> {
        self.buffers
            .remove(&buffer)
            .map(|_| ())
            .ok_or(DeviceError::UnknownBuffer(buffer))
    }

    fn set_voice_buffer(&mut self, voice: DeviceVoiceId, buffer: DeviceBufferId) -> DeviceResult<()> {
        if !self.buffers.contains_key(&buffer) {
            return Err(DeviceError::UnknownBuffer(buffer));
        }
        let v = self.voice_mut(voice)?;
        v.buffer = Some(buffer);
        v.state = VoiceState::Initial;
        v.offset = 0;
        self.record(DeviceCommand::SetBuffer(voice, buffer));
        Ok(())
    }

    fn set_voice_gain(&mut self, voice: DeviceVoiceId, gain: f32) -> DeviceResult<()> {
        self.voice_mut(voice)?.gain = gain;
        self.record(DeviceCommand::SetGain(voice, gain));
        Ok(())
    }

    fn set_voice_pitch(&mut self, voice: DeviceVoiceId, pitch: f32) -> DeviceResult<()> {
        self.voice_mut(voice)?.pitch = pitch;
        self.record(DeviceCommand::SetPitch(voice, pitch));
        Ok(())
    }

    fn set_voice_looping(&mut self, voice: DeviceVoiceId, looping: bool) -> DeviceResult<()> {
        self.voice_mut(voice)?.looping = looping;
        self.record(DeviceCommand::SetLooping(voice, looping));
        Ok(())
    }

    fn set_voice_byte_offset(&mut self, voice: DeviceVoiceId, offset: u32) -> DeviceResult<()> {
        let buffer = self.voice_mut(voice)?.buffer;
        let size = buffer
            .and_then(|id| self.buffers.get(&id))
            .map_or(0, |b| b.size_bytes);
        self.voice_mut(voice)?.offset = offset.min(size);
        self.record(DeviceCommand::SetOffset(voice, offset));
        Ok(())
    }

    fn set_voice_position(&mut self, voice: DeviceVoiceId, position: Vec3) -> DeviceResult<()> {
        self.voice_mut(voice)?.position = position;
        self.record(DeviceCommand::SetPosition(voice, position));
        Ok(())
    }

    fn set_voice_velocity(&mut self, voice: DeviceVoiceId, velocity: Vec3) -> DeviceResult<()> {
        self.voice_mut(voice)?.velocity = velocity;
        self.record(DeviceCommand::SetVelocity(voice, velocity));
        Ok(())
    }

    fn set_voice_rolloff(&mut self, voice: DeviceVoiceId, rolloff: f32) -> DeviceResult<()> {
        self.voice_mut(voice)?.rolloff = rolloff;
        self.record(DeviceCommand::SetRolloff(voice, rolloff));
        Ok(())
    }

    fn play(&mut self, voice: DeviceVoiceId) -> DeviceResult<()> {
        let v = self.voice_mut(voice)?;
        match (v.buffer, v.state) {
            (None, _) => v.state = VoiceState::Stopped,
            (Some(_), VoiceState::Playing) => v.offset = 0,
            (Some(_), _) => v.state = VoiceState::Playing,
        }
        self.record(DeviceCommand::Play(voice));
        Ok(())
    }

    fn pause(&mut self, voice: DeviceVoiceId) -> DeviceResult<()> {
        let v = self.voice_mut(voice)?;
        if v.state == VoiceState::Playing {
            v.state = VoiceState::Paused;
        }
        self.record(DeviceCommand::Pause(voice));
        Ok(())
    }

    fn stop(&mut self, voice: DeviceVoiceId) -> DeviceResult<()> {
        let v = self.voice_mut(voice)?;
        v.state = VoiceState::Stopped;
        v.offset = 0;
        self.record(DeviceCommand::Stop(voice));
        Ok(())
    }

    fn voice_state(&self, voice: DeviceVoiceId) -> DeviceResult<VoiceState> {
        self.check(voice)?;
        self.voices
            .get(&voice)
            .map(|v| v.state)
            .ok_or(DeviceError::UnknownVoice(voice))
    }

    fn voice_byte_offset(&self, voice: DeviceVoiceId) -> DeviceResult<u32> {
        self.check(voice)?;
        self.voices
            .get(&voice)
            .map(|v| v.offset)
            .ok_or(DeviceError::UnknownVoice(voice))
    }

    fn set_listener(&mut self, listener: &ListenerFrame) -> DeviceResult<()> {
        if self.listener_failing {
            return Err(DeviceError::Backend("injected listener failure".to_string()));
        }
        self.listener = *listener;
        self.record(DeviceCommand::SetListener(*listener));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_with_voice(size_samples: usize) -> (SimulatedDevice, DeviceVoiceId, DeviceBufferId) {
        let mut device = SimulatedDevice::new(2);
        let voice = device.create_voice().expect("voice");
        let buffer = device
            .create_buffer(&PcmData::new(vec![0; size_samples], 1000, 1))
            .expect("buffer");
        device.set_voice_buffer(voice, buffer).expect("bind");
        (device, voice, buffer)
    }

    #[test]
    fn test_voice_limit() {
        let mut device = SimulatedDevice::new(1);
        assert!(device.create_voice().is_ok());
        assert!(matches!(
            device.create_voice(),
            Err(DeviceError::VoiceLimit { limit: 1 })
        ));
    }

    #[test]
    fn test_play_pause_stop() {
        let (mut device, voice, _) = device_with_voice(500);

        assert_eq!(device.voice_state(voice).expect("state"), VoiceState::Initial);
        device.play(voice).expect("play");
        assert_eq!(device.voice_state(voice).expect("state"), VoiceState::Playing);

        device.advance_bytes(200);
        device.pause(voice).expect("pause");
        device.advance_bytes(200);
        assert_eq!(device.voice_state(voice).expect("state"), VoiceState::Paused);
        assert_eq!(device.voice_byte_offset(voice).expect("offset"), 200);

        device.stop(voice).expect("stop");
        assert_eq!(device.voice_state(voice).expect("state"), VoiceState::Stopped);
        assert_eq!(device.voice_byte_offset(voice).expect("offset"), 0);
    }

    #[test]
    fn test_playback_runs_out() {
        let (mut device, voice, _) = device_with_voice(500);
        device.play(voice).expect("play");
        device.advance_bytes(999);
        assert_eq!(device.voice_state(voice).expect("state"), VoiceState::Playing);
        device.advance_bytes(1);
        assert_eq!(device.voice_state(voice).expect("state"), VoiceState::Stopped);
    }

    #[test]
    fn test_device_loop_flag_wraps() {
        let (mut device, voice, _) = device_with_voice(500);
        device.set_voice_looping(voice, true).expect("loop");
        device.play(voice).expect("play");
        device.advance_bytes(1100);
        assert_eq!(device.voice_state(voice).expect("state"), VoiceState::Playing);
        assert_eq!(device.voice_byte_offset(voice).expect("offset"), 100);

        device.finish(voice);
        assert_eq!(device.voice_state(voice).expect("state"), VoiceState::Stopped);
    }

    #[test]
    fn test_advance_by_time() {
        let (mut device, voice, _) = device_with_voice(4000);
        device.set_voice_pitch(voice, 2.0).expect("pitch");
        device.play(voice).expect("play");
        // 1000 Hz mono 16-bit = 2000 bytes/s, doubled by pitch
        device.advance(Duration::from_millis(500));
        assert_eq!(device.voice_byte_offset(voice).expect("offset"), 2000);
    }

    #[test]
    fn test_offset_clamped_to_buffer() {
        let (mut device, voice, _) = device_with_voice(10);
        device.set_voice_byte_offset(voice, 5000).expect("offset");
        assert_eq!(device.voice_byte_offset(voice).expect("offset"), 20);
    }

    #[test]
    fn test_injected_failure() {
        let (mut device, voice, _) = device_with_voice(10);
        device.set_failing(voice, true);
        assert!(matches!(device.voice_state(voice), Err(DeviceError::Backend(_))));
        assert!(device.play(voice).is_err());

        device.set_failing(voice, false);
        assert!(device.play(voice).is_ok());
    }

    #[test]
    fn test_command_log() {
        let (mut device, voice, buffer) = device_with_voice(10);
        device.set_voice_gain(voice, 0.5).expect("gain");
        device.play(voice).expect("play");
        device.play(voice).expect("play");

        assert_eq!(device.play_count(voice), 2);
        assert_eq!(
            device.commands_for(voice)[..2],
            [
                DeviceCommand::SetBuffer(voice, buffer),
                DeviceCommand::SetGain(voice, 0.5)
            ]
        );

        let taken = device.take_commands();
        assert_eq!(taken.len(), 4);
        assert!(device.commands().is_empty());
    }

    #[test]
    fn test_unknown_ids() {
        let mut device = SimulatedDevice::new(1);
        let ghost = DeviceVoiceId::new(99);
        assert!(matches!(device.play(ghost), Err(DeviceError::UnknownVoice(_))));
        assert!(matches!(
            device.destroy_buffer(DeviceBufferId::new(5)),
            Err(DeviceError::UnknownBuffer(_))
        ));
    }
}
