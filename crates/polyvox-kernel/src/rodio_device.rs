//! Audio device backed by rodio.
//!
//! Each voice is a rodio [`Sink`]. Buffers stay in memory as PCM and are
//! queued on the sink when a voice starts. Rodio has no positional audio, so
//! distance attenuation is folded into the sink volume using the inverse
//! distance model clamped at one unit.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use glam::Vec3;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use tracing::{debug, info};

use crate::buffer_cache::{PcmData, BYTES_PER_SAMPLE};
use crate::device::{AudioDevice, DeviceBufferId, DeviceVoiceId, ListenerFrame, VoiceState};
use crate::error::{AudioError, AudioResult, DeviceError, DeviceResult};

/// Number of voices offered when the caller does not choose.
pub const DEFAULT_VOICES: usize = 32;

/// Distance under which sounds play at full volume.
const REFERENCE_DISTANCE: f32 = 1.0;

/// Inverse distance attenuation with a rolloff factor.
#[must_use]
pub fn attenuation(distance: f32, rolloff: f32) -> f32 {
    let d = distance.max(REFERENCE_DISTANCE);
    REFERENCE_DISTANCE / (REFERENCE_DISTANCE + rolloff * (d - REFERENCE_DISTANCE))
}

struct RodioVoice {
    sink: Sink,
    buffer: Option<DeviceBufferId>,
    gain: f32,
    rolloff: f32,
    position: Vec3,
    looping: bool,
    /// Played at least once since the buffer was bound.
    started: bool,
    /// Byte offset the queued source started from.
    base_offset: u32,
}

impl RodioVoice {
    fn new(sink: Sink) -> Self {
        Self {
            sink,
            buffer: None,
            gain: 1.0,
            rolloff: 1.0,
            position: Vec3::ZERO,
            looping: false,
            started: false,
            base_offset: 0,
        }
    }

    fn apply_volume(&self, listener: &ListenerFrame) {
        let distance = self.position.distance(listener.position);
        self.sink
            .set_volume(self.gain * attenuation(distance, self.rolloff));
    }
}

/// [`AudioDevice`] that plays through the default output device.
pub struct RodioDevice {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    capacity: usize,
    next_voice: u32,
    next_buffer: u32,
    voices: HashMap<DeviceVoiceId, RodioVoice>,
    buffers: HashMap<DeviceBufferId, PcmData>,
    listener: ListenerFrame,
}

impl fmt::Debug for RodioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RodioDevice")
            .field("capacity", &self.capacity)
            .field("voices", &self.voices.len())
            .field("buffers", &self.buffers.len())
            .finish_non_exhaustive()
    }
}

impl RodioDevice {
    /// Open the default output with up to `capacity` voices.
    pub fn new(capacity: usize) -> AudioResult<Self> {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| AudioError::DeviceInit(e.to_string()))?;

        info!("Opened default audio output ({} voices)", capacity);

        Ok(Self {
            _stream: stream,
            handle,
            capacity,
            next_voice: 1,
            next_buffer: 1,
            voices: HashMap::new(),
            buffers: HashMap::new(),
            listener: ListenerFrame::default(),
        })
    }

    fn voice(&self, voice: DeviceVoiceId) -> DeviceResult<&RodioVoice> {
        self.voices
            .get(&voice)
            .ok_or(DeviceError::UnknownVoice(voice))
    }

    fn voice_mut(&mut self, voice: DeviceVoiceId) -> DeviceResult<&mut RodioVoice> {
        self.voices
            .get_mut(&voice)
            .ok_or(DeviceError::UnknownVoice(voice))
    }

    /// Queue the bound buffer from the voice's base offset.
    fn queue(&self, voice: DeviceVoiceId) -> DeviceResult<()> {
        let v = self.voices.get(&voice).ok_or(DeviceError::UnknownVoice(voice))?;
        let Some(buffer) = v.buffer else {
            return Ok(());
        };
        let pcm = self
            .buffers
            .get(&buffer)
            .ok_or(DeviceError::UnknownBuffer(buffer))?;

        let source = SamplesBuffer::new(pcm.channels, pcm.sample_rate, (*pcm.samples).clone());
        let skip = Duration::from_secs_f64(
            f64::from(v.base_offset) / bytes_per_second(pcm).max(1.0),
        );
        v.sink.clear();
        if v.looping {
            v.sink.append(source.repeat_infinite().skip_duration(skip));
        } else {
            v.sink.append(source.skip_duration(skip));
        }
        Ok(())
    }
}

fn bytes_per_second(pcm: &PcmData) -> f64 {
    f64::from(pcm.sample_rate) * f64::from(pcm.channels) * BYTES_PER_SAMPLE as f64
}

impl AudioDevice for RodioDevice {
    fn channel_capacity(&self) -> DeviceResult<usize> {
        Ok(self.capacity)
    }

    fn create_voice(&mut self) -> DeviceResult<DeviceVoiceId> {
        if self.voices.len() >= self.capacity {
            return Err(DeviceError::VoiceLimit {
                limit: self.capacity,
            });
        }
        let sink = Sink::try_new(&self.handle).map_err(|e| DeviceError::Backend(e.to_string()))?;
        sink.pause();

        let id = DeviceVoiceId::new(self.next_voice);
        self.next_voice += 1;
        self.voices.insert(id, RodioVoice::new(sink));
        Ok(id)
    }

    fn destroy_voice(&mut self, voice: DeviceVoiceId) -> DeviceResult<()> {
        let v = self
            .voices
            .remove(&voice)
            .ok_or(DeviceError::UnknownVoice(voice))?;
        v.sink.stop();
        Ok(())
    }

    fn create_buffer(&mut self, pcm: &PcmData) -> DeviceResult<DeviceBufferId> {
        let id = DeviceBufferId::new(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id, pcm.clone());
        debug!("Uploaded buffer {:?} ({} bytes)", id, pcm.size_bytes());
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
        v.sink.clear();
        v.buffer = Some(buffer);
        v.started = false;
        v.base_offset = 0;
        Ok(())
    }

    fn set_voice_gain(&mut self, voice: DeviceVoiceId, gain: f32) -> DeviceResult<()> {
        let listener = self.listener;
        let v = self.voice_mut(voice)?;
        v.gain = gain;
        v.apply_volume(&listener);
        Ok(())
    }

    fn set_voice_pitch(&mut self, voice: DeviceVoiceId, pitch: f32) -> DeviceResult<()> {
        self.voice(voice)?.sink.set_speed(pitch);
        Ok(())
    }

    fn set_voice_looping(&mut self, voice: DeviceVoiceId, looping: bool) -> DeviceResult<()> {
        self.voice_mut(voice)?.looping = looping;
        Ok(())
    }

    fn set_voice_byte_offset(&mut self, voice: DeviceVoiceId, offset: u32) -> DeviceResult<()> {
        let buffer = self.voice(voice)?.buffer;
        let size = buffer
            .and_then(|id| self.buffers.get(&id))
            .map_or(0, |pcm| pcm.size_bytes() as u32);

        let v = self.voice_mut(voice)?;
        v.base_offset = offset.min(size);
        if !v.sink.empty() {
            let paused = v.sink.is_paused();
            self.queue(voice)?;
            let v = self.voice(voice)?;
            if paused {
                v.sink.pause();
            } else {
                v.sink.play();
            }
        }
        Ok(())
    }

    fn set_voice_position(&mut self, voice: DeviceVoiceId, position: Vec3) -> DeviceResult<()> {
        let listener = self.listener;
        let v = self.voice_mut(voice)?;
        v.position = position;
        v.apply_volume(&listener);
        Ok(())
    }

    fn set_voice_velocity(&mut self, voice: DeviceVoiceId, _velocity: Vec3) -> DeviceResult<()> {
        // No Doppler in rodio.
        self.voice(voice).map(|_| ())
    }

    fn set_voice_rolloff(&mut self, voice: DeviceVoiceId, rolloff: f32) -> DeviceResult<()> {
        let listener = self.listener;
        let v = self.voice_mut(voice)?;
        v.rolloff = rolloff;
        v.apply_volume(&listener);
        Ok(())
    }

    fn play(&mut self, voice: DeviceVoiceId) -> DeviceResult<()> {
        let v = self.voice(voice)?;
        if v.sink.is_paused() && !v.sink.empty() {
            v.sink.play();
            return Ok(());
        }
        if !v.sink.empty() {
            // Playing already: restart from the top.
            self.voice_mut(voice)?.base_offset = 0;
        }

        self.queue(voice)?;
        let v = self.voice_mut(voice)?;
        v.started = true;
        v.sink.play();
        Ok(())
    }

    fn pause(&mut self, voice: DeviceVoiceId) -> DeviceResult<()> {
        self.voice(voice)?.sink.pause();
        Ok(())
    }

    fn stop(&mut self, voice: DeviceVoiceId) -> DeviceResult<()> {
        let v = self.voice_mut(voice)?;
        v.sink.clear();
        v.started = true;
        v.base_offset = 0;
        Ok(())
    }

    fn voice_state(&self, voice: DeviceVoiceId) -> DeviceResult<VoiceState> {
        let v = self.voice(voice)?;
        Ok(if v.sink.empty() {
            if v.started {
                VoiceState::Stopped
            } else {
                VoiceState::Initial
            }
        } else if v.sink.is_paused() {
            VoiceState::Paused
        } else {
            VoiceState::Playing
        })
    }

    fn voice_byte_offset(&self, voice: DeviceVoiceId) -> DeviceResult<u32> {
        let v = self.voice(voice)?;
        let Some(pcm) = v.buffer.and_then(|id| self.buffers.get(&id)) else {
            return Ok(0);
        };
        if v.sink.empty() {
            return Ok(v.base_offset);
        }

        let size = pcm.size_bytes() as u64;
        let played = (v.sink.get_pos().as_secs_f64() * bytes_per_second(pcm)) as u64;
        let offset = u64::from(v.base_offset) + played;
        let offset = if v.looping && size > 0 {
            offset % size
        } else {
            offset.min(size)
        };
        Ok(offset as u32)
    }

    fn set_listener(&mut self, listener: &ListenerFrame) -> DeviceResult<()> {
        self.listener = *listener;
        for v in self.voices.values() {
            v.apply_volume(listener);
        }
        Ok(())
    }
}
