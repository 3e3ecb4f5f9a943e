//! Decay (inertia) animation
//!
//! A free body released with some velocity and slowed by friction, the way a
//! flung list keeps scrolling after the finger lifts. Each frame the velocity
//! is scaled by `deceleration` per 60Hz frame, adjusted for the actual `dt`:
//!
//! ```text
//! velocity *= deceleration ^ (dt * 60)
//! position += velocity * dt
//! ```
//!
//! The run ends when `|velocity|` drops below `rest_speed`, or when the value
//! reaches a clamp boundary, where it is pinned exactly and stops dead.

use crate::error::{AnimationError, Result};
use crate::scheduler::{global_loop, FrameLoop, FrameTick, TickControl, TickId};
use std::sync::{Arc, Mutex};
use tension_core::listeners::{lock, Listener};
use tension_core::{Completion, Finished, Listeners, RunToken, Subscription, ValueSource};

/// Parameters of a decay run
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DecayOptions {
    pub from: f32,
    /// Initial velocity (units/s)
    pub velocity: f32,
    /// Fraction of velocity kept per 60Hz frame, in (0, 1)
    pub deceleration: f32,
    /// Optional `(min, max)` bounds
    pub clamp: Option<(f32, f32)>,
    /// Speed below which the body stops (units/s)
    pub rest_speed: f32,
}

impl DecayOptions {
    pub fn new(from: f32, velocity: f32) -> Self {
        Self {
            from,
            velocity,
            ..Self::default()
        }
    }

    pub fn with_deceleration(mut self, deceleration: f32) -> Self {
        self.deceleration = deceleration;
        self
    }

    pub fn with_clamp(mut self, min: f32, max: f32) -> Self {
        self.clamp = Some((min, max));
        self
    }

    pub fn with_rest_speed(mut self, rest_speed: f32) -> Self {
        self.rest_speed = rest_speed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [
            ("from", self.from),
            ("velocity", self.velocity),
            ("rest_speed", self.rest_speed),
        ];
        for (field, value) in finite {
            if !value.is_finite() {
                return Err(invalid(format!("{field} must be finite, got {value}")));
            }
        }
        if !(self.deceleration > 0.0 && self.deceleration < 1.0) {
            return Err(invalid(format!(
                "deceleration must be in (0, 1), got {}",
                self.deceleration
            )));
        }
        if self.rest_speed < 0.0 {
            return Err(invalid(format!(
                "rest_speed must not be negative, got {}",
                self.rest_speed
            )));
        }
        if let Some((min, max)) = self.clamp {
            if !min.is_finite() || !max.is_finite() || min > max {
                return Err(invalid(format!(
                    "clamp must be finite with min <= max, got ({min}, {max})"
                )));
            }
        }
        Ok(())
    }

    /// Where an unclamped run at 60fps would come to rest
    pub fn projected_rest(&self) -> f32 {
        let k = self.deceleration;
        self.from + self.velocity / 60.0 * k / (1.0 - k)
    }
}

impl Default for DecayOptions {
    fn default() -> Self {
        Self {
            from: 0.0,
            velocity: 0.0,
            deceleration: 0.998,
            clamp: None,
            rest_speed: 0.5,
        }
    }
}

fn invalid(message: String) -> AnimationError {
    tracing::warn!(%message, "rejected decay options");
    AnimationError::InvalidDecay(message)
}

struct DecayState {
    position: f32,
    velocity: f32,
    running: bool,
    destroyed: bool,
    tick_id: Option<TickId>,
    run: Option<RunToken>,
    last_completion: Option<Completion>,
}

struct DecayShared {
    state: Mutex<DecayState>,
    listeners: Listeners<f32>,
    options: DecayOptions,
}

impl DecayShared {
    fn tick(&self, tick: &FrameTick) -> TickControl {
        let (position, token) = {
            let mut state = lock(&self.state);
            if !state.running {
                return TickControl::Remove;
            }

            state.velocity *= self.options.deceleration.powf(tick.dt * 60.0);
            state.position += state.velocity * tick.dt;

            let mut done = state.velocity.abs() < self.options.rest_speed;
            if let Some((min, max)) = self.options.clamp {
                if state.position <= min || state.position >= max {
                    state.position = state.position.clamp(min, max);
                    state.velocity = 0.0;
                    done = true;
                }
            }

            let token = if done {
                state.running = false;
                state.tick_id = None;
                state.last_completion = Some(Completion::Rested);
                state.run.take()
            } else {
                None
            };
            (state.position, done.then_some(token))
        };

        self.listeners.notify(&position);
        match token {
            Some(token) => {
                if let Some(mut token) = token {
                    token.resolve(Completion::Rested);
                }
                tracing::trace!(position, "decay came to rest");
                TickControl::Remove
            }
            None => TickControl::Continue,
        }
    }
}

/// A running (or finished) decay
#[derive(Clone)]
pub struct DecayAnimation {
    shared: Arc<DecayShared>,
    frame_loop: FrameLoop,
}

impl DecayAnimation {
    /// Start a decay on the global loop
    pub fn new(options: DecayOptions) -> Result<Self> {
        Self::with_loop(options, &global_loop())
    }

    /// Start a decay on `frame_loop`
    ///
    /// A body that starts outside its clamp range is pinned to the nearest
    /// bound and does not move; one already slower than `rest_speed` does not
    /// move either.
    pub fn with_loop(options: DecayOptions, frame_loop: &FrameLoop) -> Result<Self> {
        options.validate()?;

        let mut position = options.from;
        let mut at_bound = false;
        if let Some((min, max)) = options.clamp {
            at_bound = position < min || position > max;
            position = position.clamp(min, max);
        }
        let moving = !at_bound && options.velocity.abs() >= options.rest_speed;

        let shared = Arc::new(DecayShared {
            state: Mutex::new(DecayState {
                position,
                velocity: if moving { options.velocity } else { 0.0 },
                running: moving,
                destroyed: false,
                tick_id: None,
                run: moving.then(RunToken::new),
                last_completion: (!moving).then_some(Completion::Rested),
            }),
            listeners: Listeners::new(),
            options,
        });

        if moving {
            let weak = Arc::downgrade(&shared);
            let id = frame_loop.register(move |tick| match weak.upgrade() {
                Some(shared) => shared.tick(tick),
                None => TickControl::Remove,
            });
            lock(&shared.state).tick_id = Some(id);
        }

        Ok(Self {
            shared,
            frame_loop: frame_loop.clone(),
        })
    }

    pub fn options(&self) -> DecayOptions {
        self.shared.options
    }

    pub fn get(&self) -> f32 {
        lock(&self.shared.state).position
    }

    pub fn get_velocity(&self) -> f32 {
        lock(&self.shared.state).velocity
    }

    pub fn is_animating(&self) -> bool {
        lock(&self.shared.state).running
    }

    pub fn last_completion(&self) -> Option<Completion> {
        lock(&self.shared.state).last_completion
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        if lock(&self.shared.state).destroyed {
            return Subscription::detached();
        }
        self.shared.listeners.subscribe(move |v: &f32| listener(*v))
    }

    /// Future resolving when the body stops
    pub fn finished(&self) -> Finished {
        let state = lock(&self.shared.state);
        match &state.run {
            Some(token) => token.finished(),
            None => Finished::resolved(state.last_completion.unwrap_or(Completion::Rested)),
        }
    }

    /// Stop where the body currently is
    pub fn stop(&self) {
        self.end(Completion::Stopped);
    }

    /// Stop, resolve `finished` and drop all listeners; terminal
    pub fn destroy(&self) {
        if lock(&self.shared.state).destroyed {
            return;
        }
        self.end(Completion::Destroyed);
        lock(&self.shared.state).destroyed = true;
        self.shared.listeners.clear();
    }

    fn end(&self, completion: Completion) {
        let token = {
            let mut state = lock(&self.shared.state);
            if let Some(id) = state.tick_id.take() {
                self.frame_loop.unregister(id);
            }
            let token = state.run.take();
            if state.running || completion == Completion::Destroyed {
                state.last_completion = Some(completion);
            }
            state.running = false;
            state.velocity = 0.0;
            token
        };
        if let Some(mut token) = token {
            token.resolve(completion);
        }
    }
}

impl ValueSource for DecayAnimation {
    fn get(&self) -> f32 {
        DecayAnimation::get(self)
    }

    fn subscribe_listener(&self, listener: Listener<f32>) -> Subscription {
        if lock(&self.shared.state).destroyed {
            return Subscription::detached();
        }
        self.shared.listeners.subscribe_shared(listener)
    }
}

impl std::fmt::Debug for DecayAnimation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("DecayAnimation")
            .field("position", &state.position)
            .field("velocity", &state.velocity)
            .field("running", &state.running)
            .finish()
    }
}
