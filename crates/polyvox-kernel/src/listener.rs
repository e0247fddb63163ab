//! Listener tracking.
//!
//! The game only reports where the listener is. Velocity for Doppler is
//! derived from consecutive samples.

use std::time::Instant;

use glam::{Vec2, Vec3};

use crate::device::ListenerFrame;

/// Derives listener velocity from position samples.
#[derive(Debug, Clone)]
pub struct ListenerTracker {
    height: f32,
    last: Option<(Vec2, Instant)>,
    velocity: Vec2,
}

impl ListenerTracker {
    /// Create a tracker that places the listener at `height` above the plane.
    #[must_use]
    pub const fn new(height: f32) -> Self {
        Self {
            height,
            last: None,
            velocity: Vec2::ZERO,
        }
    }

    /// Record a position sample taken at `now`.
    ///
    /// Returns the frame to push, or `None` if no time has passed since the
    /// previous sample.
    pub fn update(&mut self, position: Vec2, now: Instant) -> Option<ListenerFrame> {
        let velocity = match self.last {
            None => Vec2::ZERO,
            Some((previous, at)) => {
                let elapsed = now.checked_duration_since(at)?.as_secs_f32();
                if elapsed <= 0.0 {
                    return None;
                }
                (position - previous) / elapsed
            },
        };

        self.last = Some((position, now));
        self.velocity = velocity;
        Some(self.frame(position, velocity))
    }

    /// Build a frame for an explicit position and velocity.
    #[must_use]
    pub fn frame(&self, position: Vec2, velocity: Vec2) -> ListenerFrame {
        ListenerFrame {
            position: position.extend(self.height),
            velocity: velocity.extend(0.0),
            ..ListenerFrame::default()
        }
    }

    /// Last recorded position.
    #[must_use]
    pub fn position(&self) -> Option<Vec2> {
        self.last.map(|(p, _)| p)
    }

    /// Last derived velocity.
    #[must_use]
    pub const fn velocity(&self) -> Vec2 {
        self.velocity
    }

    /// Listener height.
    #[must_use]
    pub const fn height(&self) -> f32 {
        self.height
    }
}

/// Lift a planar vector into device space at the given height.
#[must_use]
pub fn to_device_space(v: Vec2, z: f32) -> Vec3 {
    v.extend(z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_sample_has_zero_velocity() {
        let mut tracker = ListenerTracker::new(2.0);
        let frame = tracker
            .update(Vec2::new(5.0, 5.0), Instant::now())
            .expect("frame");
        assert_eq!(frame.velocity, Vec3::ZERO);
        assert_eq!(frame.position, Vec3::new(5.0, 5.0, 2.0));
    }

    #[test]
    fn test_velocity_from_samples() {
        let mut tracker = ListenerTracker::new(2.0);
        let start = Instant::now();
        tracker.update(Vec2::ZERO, start).expect("frame");

        let frame = tracker
            .update(Vec2::new(1.0, 0.0), start + Duration::from_millis(500))
            .expect("frame");
        assert!((frame.velocity - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-5);
        assert_eq!(tracker.position(), Some(Vec2::new(1.0, 0.0)));
    }

    #[test]
    fn test_no_elapsed_time_is_skipped() {
        let mut tracker = ListenerTracker::new(2.0);
        let start = Instant::now();
        tracker.update(Vec2::ZERO, start + Duration::from_secs(1)).expect("frame");

        assert!(tracker.update(Vec2::ONE, start + Duration::from_secs(1)).is_none());
        assert!(tracker.update(Vec2::ONE, start).is_none());
        assert_eq!(tracker.position(), Some(Vec2::ZERO));
    }

    #[test]
    fn test_frame_orientation() {
        let tracker = ListenerTracker::new(3.0);
        let frame = tracker.frame(Vec2::new(1.0, 2.0), Vec2::new(0.5, 0.0));
        assert_eq!(frame.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(frame.velocity, Vec3::new(0.5, 0.0, 0.0));
        assert_eq!(frame.at, Vec3::Z);
        assert_eq!(frame.up, Vec3::NEG_Y);
    }
}
