//! Motion values
//!
//! A [`MotionValue`] is a value cell that is normally written directly, with
//! an opt-in spring. Without a spring, `set` behaves like `jump`: the new value
//! is stored and subscribers are notified immediately, and the velocity stays
//! zero.

use crate::config::SpringConfig;
use crate::error::Result;
use crate::scheduler::{global_loop, FrameLoop};
use crate::value::SpringValue;
use tension_core::listeners::Listener;
use tension_core::{Finished, Subscription, ValueSource};

/// How a motion value responds to `set`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionOptions {
    /// Animate writes through this spring; `None` writes directly
    pub spring: Option<SpringConfig>,
}

impl MotionOptions {
    /// Direct writes
    pub fn direct() -> Self {
        Self::default()
    }

    /// Spring-animated writes
    pub fn spring(config: SpringConfig) -> Self {
        Self {
            spring: Some(config),
        }
    }
}

/// A directly writable value cell with an optional spring
#[derive(Clone, Debug)]
pub struct MotionValue {
    value: SpringValue,
    options: MotionOptions,
}

impl MotionValue {
    pub fn new(initial: f32, options: MotionOptions) -> Result<Self> {
        Self::with_loop(initial, options, &global_loop())
    }

    pub fn with_loop(initial: f32, options: MotionOptions, frame_loop: &FrameLoop) -> Result<Self> {
        let config = options.spring.unwrap_or_default();
        Ok(Self {
            value: SpringValue::with_loop(initial, config, frame_loop)?,
            options,
        })
    }

    pub fn get(&self) -> f32 {
        self.value.get()
    }

    pub fn get_velocity(&self) -> f32 {
        self.value.get_velocity()
    }

    pub fn options(&self) -> MotionOptions {
        self.options
    }

    /// Write a new value, through the spring if one is configured
    pub fn set(&self, value: f32) -> Result<()> {
        if self.options.spring.is_some() {
            self.value.set(value)
        } else {
            self.value.jump(value)
        }
    }

    /// Write a new value immediately, bypassing any spring
    pub fn jump(&self, value: f32) -> Result<()> {
        self.value.jump(value)
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.value.subscribe(listener)
    }

    pub fn is_animating(&self) -> bool {
        self.value.is_animating()
    }

    pub fn finished(&self) -> Finished {
        self.value.finished()
    }

    pub fn stop(&self) {
        self.value.stop();
    }

    pub fn destroy(&self) {
        self.value.destroy();
    }
}

impl ValueSource for MotionValue {
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
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tension_core::transform_value;

    #[test]
    fn test_direct_writes_notify_immediately() {
        let frame_loop = FrameLoop::manual();
        let motion = MotionValue::with_loop(0.0, MotionOptions::direct(), &frame_loop).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = motion.subscribe(move |v| seen_clone.lock().unwrap().push(v));

        motion.set(4.0).unwrap();
        motion.set(4.0).unwrap();
        motion.set(-1.0).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![4.0, -1.0]);
        assert_eq!(motion.get_velocity(), 0.0);
        assert!(!motion.is_animating());
        assert_eq!(frame_loop.len(), 0);
    }

    #[test]
    fn test_spring_writes_animate() {
        let frame_loop = FrameLoop::manual();
        let motion =
            MotionValue::with_loop(0.0, MotionOptions::spring(SpringConfig::stiff()), &frame_loop)
                .unwrap();

        motion.set(20.0).unwrap();
        assert!(motion.is_animating());
        frame_loop.advance(Duration::from_millis(16));
        let midway = motion.get();
        assert!(midway > 0.0 && midway < 20.0);

        motion.jump(3.0).unwrap();
        assert_eq!(motion.get(), 3.0);
        assert!(!motion.is_animating());
    }

    #[test]
    fn test_motion_value_feeds_derived_value() {
        let frame_loop = FrameLoop::manual();
        let motion = MotionValue::with_loop(10.0, MotionOptions::direct(), &frame_loop).unwrap();
        let half = transform_value(&motion, |v| v / 2.0);
        assert_eq!(half.get(), 5.0);

        motion.set(30.0).unwrap();
        assert_eq!(half.get(), 15.0);
    }
}
