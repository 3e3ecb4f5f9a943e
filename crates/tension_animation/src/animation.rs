//! One-shot spring animations
//!
//! [`SpringAnimation`] wraps a [`SpringValue`] with fixed endpoints and a
//! play-control surface. `start()` jumps to the start point and springs to the
//! end point; `reverse()` swaps the endpoints, redirecting a run in flight
//! without losing its velocity.

use crate::config::SpringConfig;
use crate::error::{ensure_finite, Result};
use crate::scheduler::{global_loop, FrameLoop};
use crate::value::SpringValue;
use std::sync::{Arc, Mutex};
use tension_core::listeners::{lock, Listener};
use tension_core::{Completion, Finished, Subscription, ValueSource};

#[derive(Clone, Copy, Debug)]
struct Endpoints {
    from: f32,
    to: f32,
    started: bool,
}

/// A spring run between two fixed values
#[derive(Clone, Debug)]
pub struct SpringAnimation {
    value: SpringValue,
    endpoints: Arc<Mutex<Endpoints>>,
}

impl SpringAnimation {
    pub fn new(from: f32, to: f32, config: SpringConfig) -> Result<Self> {
        Self::with_loop(from, to, config, &global_loop())
    }

    /// Create a stopped animation resting at `from`
    pub fn with_loop(from: f32, to: f32, config: SpringConfig, frame_loop: &FrameLoop) -> Result<Self> {
        ensure_finite("animation end", to)?;
        Ok(Self {
            value: SpringValue::with_loop(from, config, frame_loop)?,
            endpoints: Arc::new(Mutex::new(Endpoints {
                from,
                to,
                started: false,
            })),
        })
    }

    pub fn from(&self) -> f32 {
        lock(&self.endpoints).from
    }

    pub fn to(&self) -> f32 {
        lock(&self.endpoints).to
    }

    /// Jump to the start point and spring toward the end point
    pub fn start(&self) -> Result<()> {
        let Endpoints { from, to, .. } = {
            let mut endpoints = lock(&self.endpoints);
            endpoints.started = true;
            *endpoints
        };
        self.value.jump(from)?;
        self.value.set(to)
    }

    pub fn stop(&self) {
        self.value.stop();
    }

    pub fn pause(&self) {
        self.value.pause();
    }

    pub fn resume(&self) {
        self.value.resume();
    }

    /// Swap the endpoints
    ///
    /// A run in flight (or paused) turns around with its current velocity;
    /// otherwise the swap applies to the next `start()`.
    pub fn reverse(&self) -> Result<()> {
        let to = {
            let mut guard = lock(&self.endpoints);
            let endpoints = &mut *guard;
            std::mem::swap(&mut endpoints.from, &mut endpoints.to);
            endpoints.to
        };
        if self.value.is_animating() || self.value.is_paused() {
            self.value.set(to)?;
        }
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.value.is_paused()
    }

    /// The last run came to rest at the end point
    pub fn is_complete(&self) -> bool {
        let endpoints = *lock(&self.endpoints);
        endpoints.started
            && !self.value.is_animating()
            && !self.value.is_paused()
            && self.value.last_completion() == Some(Completion::Rested)
            && self.value.get() == endpoints.to
    }

    pub fn is_animating(&self) -> bool {
        self.value.is_animating()
    }

    pub fn get(&self) -> f32 {
        self.value.get()
    }

    pub fn get_velocity(&self) -> f32 {
        self.value.get_velocity()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.value.subscribe(listener)
    }

    pub fn finished(&self) -> Finished {
        self.value.finished()
    }

    pub fn destroy(&self) {
        self.value.destroy();
    }
}

impl ValueSource for SpringAnimation {
    fn get(&self) -> f32 {
        self.value.get()
    }

    fn subscribe_listener(&self, listener: Listener<f32>) -> Subscription {
        self.value.subscribe_listener(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::time::Duration;

    const FRAME: Duration = Duration::from_micros(16_667);

    fn run_until_idle(frame_loop: &FrameLoop) {
        for _ in 0..2000 {
            if !frame_loop.advance(FRAME) {
                break;
            }
        }
    }

    #[test]
    fn test_start_runs_from_start_to_end() {
        let frame_loop = FrameLoop::manual();
        let animation = SpringAnimation::with_loop(10.0, 20.0, SpringConfig::stiff(), &frame_loop).unwrap();
        assert!(!animation.is_complete());
        assert!(!animation.is_animating());

        animation.start().unwrap();
        let finished = animation.finished();
        run_until_idle(&frame_loop);

        assert_eq!(block_on(finished), Completion::Rested);
        assert_eq!(animation.get(), 20.0);
        assert!(animation.is_complete());
    }

    #[test]
    fn test_reverse_mid_flight_keeps_velocity() {
        let frame_loop = FrameLoop::manual();
        let animation = SpringAnimation::with_loop(0.0, 100.0, SpringConfig::gentle(), &frame_loop).unwrap();
        animation.start().unwrap();
        for _ in 0..10 {
            frame_loop.advance(FRAME);
        }

        let velocity = animation.get_velocity();
        animation.reverse().unwrap();
        assert_eq!(animation.get_velocity(), velocity);
        assert_eq!((animation.from(), animation.to()), (100.0, 0.0));

        run_until_idle(&frame_loop);
        assert_eq!(animation.get(), 0.0);
        assert!(animation.is_complete());
    }

    #[test]
    fn test_pause_resume_and_stop() {
        let frame_loop = FrameLoop::manual();
        let animation = SpringAnimation::with_loop(0.0, 1.0, SpringConfig::default(), &frame_loop).unwrap();
        animation.start().unwrap();
        frame_loop.advance(FRAME);

        animation.pause();
        assert!(animation.is_paused());
        assert!(!animation.is_complete());
        animation.resume();
        assert!(animation.is_animating());

        animation.stop();
        assert!(!animation.is_animating());
        assert!(!animation.is_complete());
        assert_eq!(block_on(animation.finished()), Completion::Stopped);
    }

    #[test]
    fn test_restart_after_complete() {
        let frame_loop = FrameLoop::manual();
        let animation = SpringAnimation::with_loop(0.0, 5.0, SpringConfig::snappy(), &frame_loop).unwrap();
        animation.start().unwrap();
        run_until_idle(&frame_loop);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = animation.subscribe(move |v| seen_clone.lock().unwrap().push(v));

        animation.start().unwrap();
        run_until_idle(&frame_loop);
        let seen = seen.lock().unwrap();
        // jump back to the start point, then the run itself
        assert_eq!(seen[0], 0.0);
        assert_eq!(*seen.last().unwrap(), 5.0);
    }
}
