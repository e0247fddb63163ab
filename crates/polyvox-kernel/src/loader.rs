//! Sound asset decoding.
//!
//! A [`SoundLoader`] turns an asset name into interleaved 16-bit PCM. The
//! buffer cache calls it once per name; everything after that works with
//! device buffers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader};
use tracing::debug;

use crate::buffer_cache::PcmData;
use crate::error::LoadError;

/// Decodes sound assets by name.
pub trait SoundLoader {
    /// Decode the named asset.
    fn load(&self, name: &str) -> Result<PcmData, LoadError>;
}

/// Extensions the file loader can decode.
#[cfg(feature = "rodio")]
const ALLOWED_EXTENSIONS: &str = ".wav .ogg .mp3 .flac";
#[cfg(not(feature = "rodio"))]
const ALLOWED_EXTENSIONS: &str = ".wav";

/// Loads sound files relative to an asset root directory.
///
/// `.wav` files are decoded with `hound`. With the `rodio` feature enabled,
/// `.ogg`, `.mp3` and `.flac` go through rodio's decoder.
#[derive(Debug, Clone)]
pub struct FileLoader {
    root: PathBuf,
}

impl FileLoader {
    /// Create a loader rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Asset root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn decode_wav(name: &str, path: &Path) -> Result<PcmData, LoadError> {
        let reader = WavReader::open(path).map_err(|e| wav_error(name, path, e))?;
        let spec = reader.spec();

        let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) => reader
                .into_samples::<i16>()
                .collect::<Result<_, _>>()
                .map_err(|e| wav_error(name, path, e))?,
            (SampleFormat::Int, bits) => {
                let shift = i32::from(bits) - 16;
                reader
                    .into_samples::<i32>()
                    .map(|s| {
                        s.map(|v| {
                            if shift >= 0 {
                                (v >> shift) as i16
                            } else {
                                (v << -shift) as i16
                            }
                        })
                    })
                    .collect::<Result<_, _>>()
                    .map_err(|e| wav_error(name, path, e))?
            },
            (SampleFormat::Float, _) => reader
                .into_samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16))
                .collect::<Result<_, _>>()
                .map_err(|e| wav_error(name, path, e))?,
        };

        Ok(PcmData::new(samples, spec.sample_rate, spec.channels))
    }

    #[cfg(feature = "rodio")]
    fn decode_compressed(name: &str, path: &Path) -> Result<PcmData, LoadError> {
        use std::fs::File;
        use std::io::BufReader;

        use rodio::{Decoder, Source};

        let file = File::open(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let decoder = Decoder::new(BufReader::new(file)).map_err(|e| LoadError::Decode {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        let sample_rate = decoder.sample_rate();
        let channels = decoder.channels();
        let samples: Vec<i16> = decoder.collect();
        Ok(PcmData::new(samples, sample_rate, channels))
    }
}

impl SoundLoader for FileLoader {
    fn load(&self, name: &str) -> Result<PcmData, LoadError> {
        let path = self.root.join(name);
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let pcm = match extension.as_deref() {
            Some("wav") => Self::decode_wav(name, &path)?,
            #[cfg(feature = "rodio")]
            Some("ogg" | "mp3" | "flac") => Self::decode_compressed(name, &path)?,
            _ => {
                return Err(LoadError::UnsupportedFormat {
                    name: name.to_string(),
                    allowed: ALLOWED_EXTENSIONS,
                })
            },
        };

        debug!("Decoded {:?}: {} samples", path, pcm.samples.len());
        Ok(pcm)
    }
}

fn wav_error(name: &str, path: &Path, err: hound::Error) -> LoadError {
    match err {
        hound::Error::IoError(source) => LoadError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => LoadError::Decode {
            name: name.to_string(),
            message: other.to_string(),
        },
    }
}

/// Serves PCM data registered in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    sounds: HashMap<String, PcmData>,
}

impl MemoryLoader {
    /// Create an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register PCM data under a name.
    pub fn insert(&mut self, name: impl Into<String>, pcm: PcmData) {
        self.sounds.insert(name.into(), pcm);
    }

    /// Register PCM data, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, pcm: PcmData) -> Self {
        self.insert(name, pcm);
        self
    }

    /// Number of registered sounds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sounds.len()
    }

    /// Check if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sounds.is_empty()
    }
}

impl SoundLoader for MemoryLoader {
    fn load(&self, name: &str) -> Result<PcmData, LoadError> {
        self.sounds
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(name.to_string()))
    }
}
