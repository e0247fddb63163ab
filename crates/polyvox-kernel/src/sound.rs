//! Logical sounds.
//!
//! A sound is what the application plays: a list of buffer variants plus
//! spatial and playback parameters. It exists independently of any voice.
//! The manager couples it to a voice on play and may take that voice away
//! again when a more important sound needs it.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::buffer_cache::BufferRef;
use crate::category::CategoryId;
use crate::device::VoiceState;
use crate::voice_pool::VoiceIndex;

/// Allocation priority. Higher priorities may take voices from lower ones.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Expendable; first to lose its voice.
    Delete = 0,
    /// Background detail.
    Low = 1,
    /// Most sounds.
    #[default]
    Moderate = 2,
    /// Must be heard.
    High = 3,
}

/// Identifier of a sound in the manager.
///
/// The generation detects ids that outlived a destroyed sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundId {
    index: u32,
    generation: u32,
}

impl SoundId {
    /// Create an id from its parts.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation.
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

/// Parameters for creating a sound.
#[derive(Debug, Clone)]
pub struct SoundDesc {
    /// Gain bus.
    pub category: CategoryId,
    /// Asset names of the buffer variants.
    pub buffers: Vec<String>,
    /// Position in world space.
    pub position: Vec2,
    /// Velocity in world space.
    pub velocity: Vec2,
    /// Restart when playback ends.
    pub looping: bool,
    /// Gain before the category multiplier.
    pub gain: f32,
    /// Pitch multiplier.
    pub pitch: f32,
    /// Allocation priority.
    pub priority: Priority,
}

impl SoundDesc {
    /// Describe a sound with default parameters.
    #[must_use]
    pub fn new<I, S>(category: CategoryId, buffers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            category,
            buffers: buffers.into_iter().map(Into::into).collect(),
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            looping: false,
            gain: 1.0,
            pitch: 1.0,
            priority: Priority::default(),
        }
    }

    /// Set the position.
    #[must_use]
    pub fn with_position(mut self, position: Vec2) -> Self {
        self.position = position;
        self
    }

    /// Set the velocity.
    #[must_use]
    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }

    /// Set looping.
    #[must_use]
    pub const fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Set gain.
    #[must_use]
    pub const fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    /// Set pitch.
    #[must_use]
    pub const fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    /// Set priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// A logical sound and its cached parameters.
#[derive(Debug, Clone)]
pub struct Sound {
    pub(crate) buffers: Vec<BufferRef>,
    pub(crate) selected: usize,
    pub(crate) position: Vec2,
    pub(crate) velocity: Vec2,
    pub(crate) gain: f32,
    pub(crate) pitch: f32,
    pub(crate) looping: bool,
    pub(crate) offset: f32,
    pub(crate) priority: Priority,
    pub(crate) category: CategoryId,
    /// Last known logical state, kept while uncoupled.
    pub(crate) state: VoiceState,
    pub(crate) voice: Option<VoiceIndex>,
}

impl Sound {
    pub(crate) fn new(desc: &SoundDesc, buffers: Vec<BufferRef>) -> Self {
        Self {
            buffers,
            selected: 0,
            position: desc.position,
            velocity: desc.velocity,
            gain: desc.gain.max(0.0),
            pitch: desc.pitch,
            looping: desc.looping,
            offset: 0.0,
            priority: desc.priority,
            category: desc.category,
            state: VoiceState::Initial,
            voice: None,
        }
    }

    /// Buffer variants.
    #[must_use]
    pub fn buffers(&self) -> &[BufferRef] {
        &self.buffers
    }

    /// Index of the selected variant.
    #[must_use]
    pub const fn selected_index(&self) -> usize {
        self.selected
    }

    /// The selected variant.
    #[must_use]
    pub fn selected_buffer(&self) -> BufferRef {
        self.buffers[self.selected]
    }

    /// Position.
    #[must_use]
    pub const fn position(&self) -> Vec2 {
        self.position
    }

    /// Velocity.
    #[must_use]
    pub const fn velocity(&self) -> Vec2 {
        self.velocity
    }

    /// Gain before the category multiplier.
    #[must_use]
    pub const fn gain(&self) -> f32 {
        self.gain
    }

    /// Pitch multiplier.
    #[must_use]
    pub const fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Whether the sound restarts when it ends.
    #[must_use]
    pub const fn is_looping(&self) -> bool {
        self.looping
    }

    /// Playback position in `[0, 1]` of the selected buffer.
    #[must_use]
    pub const fn offset(&self) -> f32 {
        self.offset
    }

    /// Allocation priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Gain bus.
    #[must_use]
    pub const fn category(&self) -> CategoryId {
        self.category
    }

    /// Last known playback state.
    #[must_use]
    pub const fn state(&self) -> VoiceState {
        self.state
    }

    /// Voice slot the sound is coupled to.
    #[must_use]
    pub const fn voice(&self) -> Option<VoiceIndex> {
        self.voice
    }

    /// Check if the sound holds a voice.
    #[must_use]
    pub const fn is_coupled(&self) -> bool {
        self.voice.is_some()
    }

    /// Index of the variant after the selected one, wrapping around.
    pub(crate) fn next_index(&self) -> usize {
        (self.selected + 1) % self.buffers.len()
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    sound: Option<Sound>,
}

/// Generational storage for sounds.
#[derive(Debug, Default)]
pub(crate) struct SoundArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl SoundArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, sound: Sound) -> SoundId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.sound = Some(sound);
            return SoundId::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            sound: Some(sound),
        });
        SoundId::new(index, 0)
    }

    pub(crate) fn remove(&mut self, id: SoundId) -> Option<Sound> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let sound = slot.sound.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(sound)
    }

    pub(crate) fn get(&self, id: SoundId) -> Option<&Sound> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.sound.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: SoundId) -> Option<&mut Sound> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.sound.as_mut())
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn ids(&self) -> Vec<SoundId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.sound.is_some())
            .map(|(i, slot)| SoundId::new(i as u32, slot.generation))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceBufferId;

    fn buffer(id: u32) -> BufferRef {
        BufferRef {
            id: DeviceBufferId::new(id),
            size_bytes: 100,
            channels: 1,
        }
    }

    fn sound(variants: u32) -> Sound {
        let desc = SoundDesc::new(CategoryId::EFFECTS, ["a.wav"]);
        Sound::new(&desc, (0..variants).map(buffer).collect())
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Delete < Priority::Low);
        assert!(Priority::Low < Priority::Moderate);
        assert!(Priority::Moderate < Priority::High);
        assert_eq!(Priority::default(), Priority::Moderate);
    }

    #[test]
    fn test_sound_desc_builder() {
        let desc = SoundDesc::new(CategoryId::MUSIC, ["theme.wav", "theme_alt.wav"])
            .with_position(Vec2::new(3.0, 4.0))
            .with_looping(true)
            .with_gain(0.5)
            .with_pitch(1.2)
            .with_priority(Priority::High);

        assert_eq!(desc.buffers.len(), 2);
        assert_eq!(desc.position, Vec2::new(3.0, 4.0));
        assert!(desc.looping);
        assert_eq!(desc.priority, Priority::High);
        assert_eq!(desc.velocity, Vec2::ZERO);
    }

    #[test]
    fn test_new_sound_is_uncoupled() {
        let s = sound(1);
        assert!(!s.is_coupled());
        assert_eq!(s.state(), VoiceState::Initial);
        assert_eq!(s.selected_index(), 0);
        assert!((s.offset() - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_negative_gain_clamped() {
        let desc = SoundDesc::new(CategoryId::EFFECTS, ["a.wav"]).with_gain(-0.5);
        let s = Sound::new(&desc, vec![buffer(1)]);
        assert!(s.gain().abs() < f32::EPSILON);
    }

    #[test]
    fn test_next_index_wraps() {
        let mut s = sound(3);
        assert_eq!(s.next_index(), 1);
        s.selected = 2;
        assert_eq!(s.next_index(), 0);
    }

    #[test]
    fn test_arena_generations() {
        let mut arena = SoundArena::new();
        let a = arena.insert(sound(1));
        let b = arena.insert(sound(1));
        assert_eq!(arena.len(), 2);

        assert!(arena.remove(a).is_some());
        assert!(arena.get(a).is_none());
        assert!(arena.remove(a).is_none());

        let c = arena.insert(sound(2));
        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(c).map(|s| s.buffers().len()), Some(2));
        assert_eq!(arena.ids(), vec![c, b]);
    }
}
