//! Session lifecycle.
//!
//! Opens a device, builds the sound manager from the engine config and runs
//! the fixed-rate tick loop: due cues start, the listener walks its circle,
//! the manager polls its voices.

use anyhow::{Context, Result};
use glam::Vec2;
use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use polyvox_kernel::{
    AudioDevice, CategoryId, FileLoader, SimulatedDevice, SoundDesc, SoundId, SoundManager,
};

use crate::config::{CueConfig, EngineConfig};

/// Counters collected over a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Ticks executed.
    pub ticks: u64,
    /// Cues that acquired a voice.
    pub played: usize,
    /// Cues turned away because every voice was busy with higher priority.
    pub rejected: usize,
    /// Looping sounds restarted by the tick loop.
    pub restarted: usize,
    /// Sounds that reached their end.
    pub finished: usize,
}

/// Devices whose playback position has to be moved by the host.
trait DeviceClock {
    fn advance(&mut self, elapsed: Duration);
}

impl DeviceClock for SimulatedDevice {
    fn advance(&mut self, elapsed: Duration) {
        SimulatedDevice::advance(self, elapsed);
    }
}

#[cfg(feature = "rodio")]
impl DeviceClock for polyvox_kernel::RodioDevice {
    // The output stream keeps its own clock.
    fn advance(&mut self, _elapsed: Duration) {}
}

struct PendingCue {
    id: SoundId,
    start_tick: u64,
    pitch_spread: f32,
    random_variant: bool,
}

/// A running session over one device.
struct Session<D: AudioDevice + DeviceClock> {
    manager: SoundManager<D>,
    pending: VecDeque<PendingCue>,
    tick_rate: u32,
    total_ticks: u64,
    realtime: bool,
    listener_radius: f32,
    listener_speed: f32,
    summary: RunSummary,
}

impl<D: AudioDevice + DeviceClock> Session<D> {
    fn new(device: D, config: &EngineConfig) -> Result<Self> {
        let loader = FileLoader::new(&config.audio.sound_root);
        let mut manager = SoundManager::new(device, Box::new(loader), config.audio.clone())
            .context("Failed to initialize sound manager")?;

        manager.set_master_gain(config.master_volume)?;
        manager.set_category_gain(CategoryId::MUSIC, config.music_volume)?;
        manager.set_category_gain(CategoryId::EFFECTS, config.sfx_volume)?;

        manager.add_preload(config.preload.iter().cloned());
        match manager.preload_sounds() {
            Ok(count) => info!("Preloaded {} sounds", count),
            Err(e) => warn!("Preload incomplete: {e}"),
        }

        let mut pending = Vec::with_capacity(config.cues.len());
        for cue in &config.cues {
            match Self::create_cue(&mut manager, cue) {
                Ok(id) => pending.push(PendingCue {
                    id,
                    start_tick: (f64::from(cue.start_after) * f64::from(config.tick_rate)).round()
                        as u64,
                    pitch_spread: cue.pitch_spread,
                    random_variant: cue.random_variant,
                }),
                Err(e) => warn!("Skipping cue {:?}: {e}", cue.sounds),
            }
        }
        pending.sort_by_key(|cue| cue.start_tick);

        Ok(Self {
            manager,
            pending: pending.into(),
            tick_rate: config.tick_rate,
            total_ticks: config.total_ticks(),
            realtime: config.realtime,
            listener_radius: config.listener_radius,
            listener_speed: config.listener_speed,
            summary: RunSummary::default(),
        })
    }

    fn create_cue(manager: &mut SoundManager<D>, cue: &CueConfig) -> Result<SoundId> {
        let category = match manager.category(&cue.category) {
            Some(id) => id,
            None => manager.register_category(&cue.category, 1.0),
        };
        let desc = SoundDesc::new(category, cue.sounds.iter().cloned())
            .with_position(Vec2::from(cue.position))
            .with_gain(cue.gain)
            .with_pitch(cue.pitch)
            .with_looping(cue.looping)
            .with_priority(cue.priority);
        Ok(manager.create_sound(desc)?)
    }

    /// Run every tick, then shut the manager down, also when a tick fails.
    fn run(&mut self) -> Result<RunSummary> {
        let result = self.run_ticks();
        let shutdown = self.manager.shutdown();
        result?;
        shutdown?;
        Ok(self.summary)
    }

    fn run_ticks(&mut self) -> Result<()> {
        let dt = Duration::from_secs_f64(1.0 / f64::from(self.tick_rate));
        let epoch = Instant::now();

        info!(
            "Running {} ticks at {} Hz ({} cues queued)",
            self.total_ticks,
            self.tick_rate,
            self.pending.len()
        );

        for tick in 0..self.total_ticks {
            let elapsed = dt.mul_f64(tick as f64);

            self.start_due(tick)?;

            let position = self.listener_position(elapsed.as_secs_f32());
            self.manager
                .recalculate_listener_at(position, epoch + elapsed)?;

            self.manager.device_mut().advance(dt);
            match self.manager.tick() {
                Ok(report) => {
                    self.summary.restarted += report.restarted;
                    self.summary.finished += report.finished;
                },
                Err(e) => warn!("Tick {} failed: {e}", tick),
            }
            self.summary.ticks += 1;

            if self.realtime {
                let deadline = epoch + dt.mul_f64((tick + 1) as f64);
                thread::sleep(deadline.saturating_duration_since(Instant::now()));
            }
        }
        Ok(())
    }

    fn start_due(&mut self, tick: u64) -> Result<()> {
        while self.pending.front().is_some_and(|cue| cue.start_tick <= tick) {
            let Some(cue) = self.pending.pop_front() else {
                break;
            };

            if cue.random_variant {
                self.manager.select_random_buffer(cue.id)?;
            }
            if cue.pitch_spread > 0.0 {
                self.manager.randomize_pitch(cue.id, cue.pitch_spread)?;
            }

            match self.manager.play(cue.id) {
                Ok(()) => {
                    debug!("Cue {:?} started on tick {}", cue.id, tick);
                    self.summary.played += 1;
                },
                Err(e) if e.is_transient() => {
                    debug!("Cue {:?} rejected: {e}", cue.id);
                    self.summary.rejected += 1;
                },
                Err(e) => return Err(e).context("Failed to start cue"),
            }
        }
        Ok(())
    }

    fn listener_position(&self, seconds: f32) -> Vec2 {
        let angle = seconds * self.listener_speed;
        Vec2::new(angle.cos(), angle.sin()) * self.listener_radius
    }
}

#[cfg(feature = "rodio")]
fn run_hardware(config: &EngineConfig) -> Option<Result<RunSummary>> {
    match polyvox_kernel::RodioDevice::new(config.voices) {
        Ok(device) => Some(Session::new(device, config).and_then(|mut session| session.run())),
        Err(e) => {
            warn!("Audio output unavailable ({e}), running in silent mode");
            None
        },
    }
}

#[cfg(not(feature = "rodio"))]
fn run_hardware(_config: &EngineConfig) -> Option<Result<RunSummary>> {
    warn!("Built without hardware output, running in silent mode");
    None
}

fn run_silent(config: &EngineConfig) -> Result<RunSummary> {
    let mut session = Session::new(SimulatedDevice::new(config.voices), config)?;
    session.run()
}

/// Run one session with the given configuration.
pub fn run(config: &EngineConfig) -> Result<RunSummary> {
    info!("Configuration loaded:");
    info!("  Tick rate: {} Hz", config.tick_rate);
    info!("  Session: {} s", config.run_seconds);
    info!("  Voices: {}", config.voices);
    info!("  Sound root: {}", config.audio.sound_root.display());

    if config.hardware {
        if let Some(result) = run_hardware(config) {
            return result;
        }
    }
    run_silent(config)
}
