//! Trails
//!
//! A [`Trail`] is a chain of spring values where follower `i` chases the
//! position follower `i - 1` had `follow_delay` frames earlier. Only the
//! leader is driven directly. One extra tick entry samples each leader per
//! frame into a ring buffer and feeds the delayed sample to its follower; the
//! entry drops out once the whole chain has settled.

use crate::config::SpringConfig;
use crate::error::{ensure_finite, AnimationError, Result};
use crate::scheduler::{global_loop, FrameLoop, FrameTick, TickControl, TickId};
use crate::value::SpringValue;
use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tension_core::listeners::lock;

/// Options for [`Trail`]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrailOptions {
    /// Frames each follower lags behind the one ahead of it
    pub follow_delay: usize,
    /// Where every element starts
    pub initial: f32,
}

impl TrailOptions {
    pub fn new(follow_delay: usize) -> Self {
        Self {
            follow_delay,
            initial: 0.0,
        }
    }

    pub fn with_initial(mut self, initial: f32) -> Self {
        self.initial = initial;
        self
    }
}

struct TrailState {
    /// `buffers[i]` holds recent samples of `springs[i]` for `springs[i + 1]`
    buffers: Vec<VecDeque<f32>>,
    tick_id: Option<TickId>,
    destroyed: bool,
}

struct TrailShared {
    springs: Vec<SpringValue>,
    state: Mutex<TrailState>,
    follow_delay: usize,
}

impl TrailShared {
    fn tick(&self, _tick: &FrameTick) -> TickControl {
        let follows: Vec<(usize, f32)> = {
            let mut state = lock(&self.state);
            if state.destroyed {
                state.tick_id = None;
                return TickControl::Remove;
            }

            let mut follows = Vec::with_capacity(self.springs.len());
            for (i, pair) in self.springs.windows(2).enumerate() {
                let buffer = &mut state.buffers[i];
                buffer.push_back(pair[0].get());
                if buffer.len() > self.follow_delay {
                    if let Some(sample) = buffer.pop_front() {
                        follows.push((i + 1, sample));
                    }
                }
            }
            follows
        };

        // Followers may fire callbacks, so the trail lock is released first
        for (index, sample) in follows {
            self.springs[index].follow(sample);
        }

        let mut state = lock(&self.state);
        let settled = self.springs.iter().all(|s| !s.is_animating())
            && self.springs.windows(2).all(|pair| pair[0].get() == pair[1].get());
        if settled {
            state.buffers.iter_mut().for_each(VecDeque::clear);
            state.tick_id = None;
            tracing::trace!(len = self.springs.len(), "trail settled");
            TickControl::Remove
        } else {
            TickControl::Continue
        }
    }
}

/// A chain of springs following a leader
#[derive(Clone)]
pub struct Trail {
    shared: Arc<TrailShared>,
    frame_loop: FrameLoop,
}

impl Trail {
    pub fn new(count: usize, config: SpringConfig, options: TrailOptions) -> Result<Self> {
        Self::with_loop(count, config, options, &global_loop())
    }

    pub fn with_loop(
        count: usize,
        config: SpringConfig,
        options: TrailOptions,
        frame_loop: &FrameLoop,
    ) -> Result<Self> {
        if count == 0 {
            return Err(AnimationError::InvalidTrail(
                "a trail needs at least one element".into(),
            ));
        }
        ensure_finite("trail initial value", options.initial)?;

        let springs = (0..count)
            .map(|_| SpringValue::with_loop(options.initial, config, frame_loop))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            shared: Arc::new(TrailShared {
                state: Mutex::new(TrailState {
                    buffers: vec![VecDeque::with_capacity(options.follow_delay + 1); count - 1],
                    tick_id: None,
                    destroyed: false,
                }),
                springs,
                follow_delay: options.follow_delay,
            }),
            frame_loop: frame_loop.clone(),
        })
    }

    /// Send the leader to `target`; the followers trail behind
    pub fn set(&self, target: f32) -> Result<()> {
        if lock(&self.shared.state).destroyed {
            return Ok(());
        }
        self.shared.springs[0].set(target)?;
        self.ensure_registered();
        Ok(())
    }

    /// Move every element to `value` at once
    pub fn jump(&self, value: f32) -> Result<()> {
        ensure_finite("jump value", value)?;
        {
            let mut state = lock(&self.shared.state);
            if state.destroyed {
                return Ok(());
            }
            state.buffers.iter_mut().for_each(VecDeque::clear);
        }
        for spring in &self.shared.springs {
            spring.jump(value)?;
        }
        Ok(())
    }

    fn ensure_registered(&self) {
        let mut state = lock(&self.shared.state);
        if state.destroyed || state.tick_id.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        state.tick_id = Some(self.frame_loop.register(move |tick| match weak.upgrade() {
            Some(shared) => shared.tick(tick),
            None => TickControl::Remove,
        }));
    }

    /// Element `index`, the leader being 0
    pub fn get(&self, index: usize) -> Option<f32> {
        self.shared.springs.get(index).map(SpringValue::get)
    }

    /// Every element's current value, leader first
    pub fn values(&self) -> Vec<f32> {
        self.shared.springs.iter().map(SpringValue::get).collect()
    }

    /// The underlying springs, leader first
    pub fn springs(&self) -> &[SpringValue] {
        &self.shared.springs
    }

    pub fn len(&self) -> usize {
        self.shared.springs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.springs.is_empty()
    }

    /// Any element is moving or a delayed sample is still pending
    pub fn is_animating(&self) -> bool {
        lock(&self.shared.state).tick_id.is_some()
            || self.shared.springs.iter().any(SpringValue::is_animating)
    }

    /// Resolves once the whole chain has settled
    pub fn finished(&self) -> BoxFuture<'static, ()> {
        let trail = self.clone();
        async move {
            loop {
                let pending: Vec<_> = trail
                    .shared
                    .springs
                    .iter()
                    .filter(|s| s.is_animating())
                    .map(SpringValue::finished)
                    .collect();
                if pending.is_empty() {
                    if trail.is_animating() {
                        // Followers are idle but still owed delayed samples
                        trail.frame_loop_tick().await;
                        continue;
                    }
                    return;
                }
                join_all(pending).await;
            }
        }
        .boxed()
    }

    /// Wait for the trail's own entry to run once more
    fn frame_loop_tick(&self) -> BoxFuture<'static, ()> {
        let (sender, receiver) = futures::channel::oneshot::channel::<()>();
        let sender = Mutex::new(Some(sender));
        let hook = self.frame_loop.on_frame(move |_| {
            if let Some(sender) = lock(&sender).take() {
                let _ = sender.send(());
            }
        });
        async move {
            let _ = receiver.await;
            hook.unsubscribe();
        }
        .boxed()
    }

    /// Unregister and destroy every element
    pub fn destroy(&self) {
        {
            let mut state = lock(&self.shared.state);
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            if let Some(id) = state.tick_id.take() {
                self.frame_loop.unregister(id);
            }
        }
        for spring in &self.shared.springs {
            spring.destroy();
        }
    }
}

impl std::fmt::Debug for Trail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trail")
            .field("values", &self.values())
            .field("follow_delay", &self.shared.follow_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const FRAME: Duration = Duration::from_micros(16_667);

    fn run_until_idle(frame_loop: &FrameLoop) -> usize {
        let mut frames = 0;
        while frame_loop.is_running() && frames < 5000 {
            frame_loop.advance(FRAME);
            frames += 1;
        }
        frames
    }

    #[test]
    fn test_rejects_empty_trail() {
        let frame_loop = FrameLoop::manual();
        let err = Trail::with_loop(0, SpringConfig::default(), TrailOptions::default(), &frame_loop)
            .unwrap_err();
        assert!(matches!(err, AnimationError::InvalidTrail(_)));
    }

    #[test]
    fn test_followers_lag_and_converge() {
        let frame_loop = FrameLoop::manual();
        let trail =
            Trail::with_loop(3, SpringConfig::stiff(), TrailOptions::new(2), &frame_loop).unwrap();

        trail.set(100.0).unwrap();
        for _ in 0..10 {
            frame_loop.advance(FRAME);
        }
        let values = trail.values();
        assert!(values[0] > values[1]);
        assert!(values[1] > values[2]);

        run_until_idle(&frame_loop);
        assert_eq!(trail.values(), vec![100.0, 100.0, 100.0]);
        assert!(!trail.is_animating());
        assert_eq!(frame_loop.len(), 0);
    }

    #[test]
    fn test_follow_delay_holds_follower_back() {
        let frame_loop = FrameLoop::manual();
        let trail =
            Trail::with_loop(2, SpringConfig::default(), TrailOptions::new(3), &frame_loop).unwrap();

        trail.set(50.0).unwrap();
        // The leader's first moving sample reaches the follower after the delay
        for _ in 0..3 {
            frame_loop.advance(FRAME);
            assert_eq!(trail.get(1), Some(0.0));
        }
        frame_loop.advance(FRAME);
        frame_loop.advance(FRAME);
        assert!(trail.get(1).unwrap() > 0.0);
    }

    #[test]
    fn test_single_element_trail_is_plain_spring() {
        let frame_loop = FrameLoop::manual();
        let trail =
            Trail::with_loop(1, SpringConfig::snappy(), TrailOptions::default(), &frame_loop).unwrap();
        trail.set(5.0).unwrap();
        run_until_idle(&frame_loop);
        assert_eq!(trail.get(0), Some(5.0));
    }

    #[test]
    fn test_finished_resolves_after_chain_settles() {
        let frame_loop = FrameLoop::manual();
        let trail =
            Trail::with_loop(3, SpringConfig::stiff(), TrailOptions::new(1), &frame_loop).unwrap();
        trail.set(10.0).unwrap();
        let mut done = trail.finished();

        assert!((&mut done).now_or_never().is_none());
        let mut resolved = false;
        for _ in 0..5000 {
            frame_loop.advance(FRAME);
            if (&mut done).now_or_never().is_some() {
                resolved = true;
                break;
            }
        }
        assert!(resolved);
        assert_eq!(trail.values(), vec![10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_jump_and_destroy() {
        let frame_loop = FrameLoop::manual();
        let trail =
            Trail::with_loop(3, SpringConfig::default(), TrailOptions::new(2), &frame_loop).unwrap();
        trail.set(10.0).unwrap();
        frame_loop.advance(FRAME);

        trail.jump(-4.0).unwrap();
        assert_eq!(trail.values(), vec![-4.0, -4.0, -4.0]);

        trail.destroy();
        trail.destroy();
        assert_eq!(frame_loop.len(), 0);
        assert!(trail.set(1.0).is_ok());
        assert!(trail.springs().iter().all(SpringValue::is_destroyed));
    }
}
