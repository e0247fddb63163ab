//! Device-resident buffer cache.
//!
//! Maps sound asset names to buffers that have been decoded by a
//! [`SoundLoader`] and uploaded to the [`AudioDevice`]. Lookups are
//! get-or-load: the first reference to a name decodes and uploads it, every
//! later reference reuses the same device buffer.
//!
//! ```text
//! ┌─────────────┐  decode  ┌─────────┐  upload  ┌─────────────┐
//! │ SoundLoader │─────────▶│ PcmData │─────────▶│ AudioDevice │
//! └─────────────┘          └─────────┘          └──────┬──────┘
//!                                                      │ BufferRef
//!                                               ┌──────▼──────┐
//!                                               │ BufferCache │
//!                                               └─────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::device::{AudioDevice, DeviceBufferId};
use crate::error::{AudioError, AudioResult, DeviceResult};
use crate::loader::SoundLoader;

/// Bytes per sample of decoded PCM (signed 16-bit).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Decoded, interleaved 16-bit PCM audio.
#[derive(Debug, Clone)]
pub struct PcmData {
    /// Interleaved samples.
    pub samples: Arc<Vec<i16>>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels (1 = mono, 2 = stereo).
    pub channels: u16,
}

impl PcmData {
    /// Create PCM data from interleaved samples.
    #[must_use]
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
            channels: channels.max(1),
        }
    }

    /// Size of the raw data in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.samples.len() * BYTES_PER_SAMPLE
    }

    /// Number of sample frames (samples per channel).
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Playback duration at normal pitch.
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / f64::from(self.sample_rate))
    }
}

/// A decoded buffer resident on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRef {
    /// Device buffer id.
    pub id: DeviceBufferId,
    /// Size of the raw data in bytes.
    pub size_bytes: u32,
    /// Number of channels.
    pub channels: u16,
}

impl BufferRef {
    /// Convert a byte offset into a normalized position in `[0, 1]`.
    ///
    /// Zero-sized buffers report 0.
    #[must_use]
    pub fn normalized_offset(&self, byte_offset: u32) -> f32 {
        if self.size_bytes == 0 {
            return 0.0;
        }
        (byte_offset as f32 / self.size_bytes as f32).clamp(0.0, 1.0)
    }

    /// Convert a normalized position into a byte offset.
    #[must_use]
    pub fn byte_offset(&self, normalized: f32) -> u32 {
        (normalized.clamp(0.0, 1.0) * self.size_bytes as f32) as u32
    }
}

/// Name-keyed cache of device buffers.
#[derive(Debug, Default)]
pub struct BufferCache {
    /// Resident buffers by asset name.
    buffers: HashMap<String, BufferRef>,
    /// Names to load eagerly on `preload`.
    preload: Vec<String>,
    /// Total resident size in bytes.
    total_size: usize,
}

impl BufferCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a resident buffer without loading.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<BufferRef> {
        self.buffers.get(name).copied()
    }

    /// Check whether a name is already resident.
    #[must_use]
    pub fn is_cached(&self, name: &str) -> bool {
        self.buffers.contains_key(name)
    }

    /// Get the buffer for `name`, decoding and uploading it on first use.
    pub fn resolve<D>(
        &mut self,
        name: &str,
        device: &mut D,
        loader: &dyn SoundLoader,
    ) -> AudioResult<BufferRef>
    where
        D: AudioDevice + ?Sized,
    {
        if let Some(buffer) = self.get(name) {
            return Ok(buffer);
        }

        let pcm = loader
            .load(name)
            .map_err(|source| AudioError::AssetResolution {
                name: name.to_string(),
                source,
            })?;

        let id = device.create_buffer(&pcm)?;
        let buffer = BufferRef {
            id,
            size_bytes: pcm.size_bytes() as u32,
            channels: pcm.channels,
        };

        self.total_size += pcm.size_bytes();
        self.buffers.insert(name.to_string(), buffer);

        debug!(
            "Loaded sound '{}' -> {:?} ({} bytes, {} ch)",
            name, id, buffer.size_bytes, buffer.channels
        );
        Ok(buffer)
    }

    /// Resolve every name in order.
    pub fn resolve_all<D, S>(
        &mut self,
        names: &[S],
        device: &mut D,
        loader: &dyn SoundLoader,
    ) -> AudioResult<Vec<BufferRef>>
    where
        D: AudioDevice + ?Sized,
        S: AsRef<str>,
    {
        names
            .iter()
            .map(|name| self.resolve(name.as_ref(), device, loader))
            .collect()
    }

    /// Queue names for eager loading.
    pub fn add_preload<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preload.extend(names.into_iter().map(Into::into));
    }

    /// Forget the preload queue.
    pub fn clear_preload(&mut self) {
        self.preload.clear();
    }

    /// Names queued for preloading.
    #[must_use]
    pub fn preload_list(&self) -> &[String] {
        &self.preload
    }

    /// Load every queued name.
    ///
    /// Failures are logged and skipped. Returns how many names are resident
    /// afterwards.
    pub fn preload<D>(&mut self, device: &mut D, loader: &dyn SoundLoader) -> usize
    where
        D: AudioDevice + ?Sized,
    {
        let names = self.preload.clone();
        let mut loaded = 0;
        for name in &names {
            match self.resolve(name, device, loader) {
                Ok(_) => loaded += 1,
                Err(e) => warn!("Failed to preload sound '{}': {}", name, e),
            }
        }
        info!("Preloaded {}/{} sounds", loaded, names.len());
        loaded
    }

    /// Destroy every resident buffer on the device.
    ///
    /// Every buffer is attempted; the first failure is returned.
    pub fn clear<D>(&mut self, device: &mut D) -> DeviceResult<()>
    where
        D: AudioDevice + ?Sized,
    {
        let mut first_err = None;
        for (name, buffer) in self.buffers.drain() {
            if let Err(e) = device.destroy_buffer(buffer.id) {
                warn!("Failed to destroy buffer for '{}': {}", name, e);
                first_err.get_or_insert(e);
            }
        }
        self.total_size = 0;
        debug!("Cleared buffer cache");
        first_err.map_or(Ok(()), Err)
    }

    /// Number of resident buffers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    /// Total resident size in bytes.
    #[must_use]
    pub const fn total_size(&self) -> usize {
        self.total_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use crate::sim_device::SimulatedDevice;

    fn loader() -> MemoryLoader {
        let mut loader = MemoryLoader::new();
        loader.insert("step.wav", PcmData::new(vec![0; 500], 44100, 1));
        loader.insert("hit.wav", PcmData::new(vec![0; 2000], 44100, 2));
        loader
    }

    #[test]
    fn test_pcm_data_size() {
        let pcm = PcmData::new(vec![0; 44100 * 2], 44100, 2);
        assert_eq!(pcm.size_bytes(), 44100 * 2 * 2);
        assert_eq!(pcm.frame_count(), 44100);
        assert!(pcm.duration() >= Duration::from_millis(999));
        assert!(pcm.duration() <= Duration::from_millis(1001));
    }

    #[test]
    fn test_normalized_offset() {
        let buffer = BufferRef {
            id: DeviceBufferId::new(1),
            size_bytes: 1000,
            channels: 1,
        };
        assert!((buffer.normalized_offset(0) - 0.0).abs() < f32::EPSILON);
        assert!((buffer.normalized_offset(500) - 0.5).abs() < f32::EPSILON);
        assert!((buffer.normalized_offset(1000) - 1.0).abs() < f32::EPSILON);
        assert!((buffer.normalized_offset(4000) - 1.0).abs() < f32::EPSILON);
        assert_eq!(buffer.byte_offset(0.25), 250);

        let empty = BufferRef {
            size_bytes: 0,
            ..buffer
        };
        assert!((empty.normalized_offset(123) - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_resolve_loads_once() {
        let mut device = SimulatedDevice::new(4);
        let loader = loader();
        let mut cache = BufferCache::new();

        let first = cache.resolve("step.wav", &mut device, &loader).expect("should load");
        let second = cache.resolve("step.wav", &mut device, &loader).expect("should load");

        assert_eq!(first, second);
        assert_eq!(first.size_bytes, 1000);
        assert_eq!(cache.count(), 1);
        assert_eq!(device.buffer_count(), 1);
    }

    #[test]
    fn test_resolve_missing_asset() {
        let mut device = SimulatedDevice::new(4);
        let mut cache = BufferCache::new();

        let err = cache
            .resolve("missing.wav", &mut device, &loader())
            .expect_err("should fail");
        assert!(matches!(err, AudioError::AssetResolution { ref name, .. } if name == "missing.wav"));
        assert_eq!(cache.count(), 0);
        assert_eq!(device.buffer_count(), 0);
    }

    #[test]
    fn test_preload_skips_failures() {
        let mut device = SimulatedDevice::new(4);
        let mut cache = BufferCache::new();
        cache.add_preload(["step.wav", "missing.wav", "hit.wav"]);

        let loaded = cache.preload(&mut device, &loader());
        assert_eq!(loaded, 2);
        assert!(cache.is_cached("hit.wav"));
        assert_eq!(cache.total_size(), 1000 + 4000);

        cache.clear_preload();
        assert!(cache.preload_list().is_empty());
    }

    #[test]
    fn test_clear_destroys_device_buffers() {
        let mut device = SimulatedDevice::new(4);
        let mut cache = BufferCache::new();
        cache
            .resolve_all(&["step.wav", "hit.wav"], &mut device, &loader())
            .expect("should load");
        assert_eq!(device.buffer_count(), 2);

        cache.clear(&mut device).expect("should clear");
        assert_eq!(device.buffer_count(), 0);
        assert_eq!(cache.count(), 0);
        assert_eq!(cache.total_size(), 0);
    }
}
