//! Spring values
//!
//! A [`SpringValue`] owns one [`Spring`] integrator, an ordered subscriber
//! list and the completion token of its current run. While it is moving it
//! keeps one tick entry registered with its [`FrameLoop`]; the entry holds only
//! a weak reference, so dropping every handle ends the run (its `finished`
//! futures resolve with [`Completion::Destroyed`]) and the entry removes
//! itself on the next frame.
//!
//! Lock order is value state first, then the loop. The loop never holds its
//! own lock while ticking, and subscribers and callbacks always run after the
//! value state is released.

use crate::config::{SpringCallbacks, SpringConfig, SpringPatch};
use crate::error::{ensure_finite, Result};
use crate::scheduler::{global_loop, FrameLoop, FrameTick, TickControl, TickId};
use crate::spring::Spring;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock};
use tension_core::listeners::{lock, Listener};
use tension_core::{Completion, Finished, Listeners, RunToken, Subscription, ValueSource};

/// Lifecycle state of a spring value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpringPhase {
    /// At rest; nothing registered
    Idle,
    /// Registered and moving toward the target
    Animating,
    /// Mid-run but unregistered until `resume()`
    Paused,
    /// Terminal; every further call is a no-op
    Destroyed,
}

struct SpringState {
    spring: Spring,
    phase: SpringPhase,
    tick_id: Option<TickId>,
    run: Option<RunToken>,
    callbacks: SpringCallbacks,
    last_completion: Option<Completion>,
}

impl SpringState {
    fn is_moving(&self) -> bool {
        matches!(self.phase, SpringPhase::Animating | SpringPhase::Paused)
    }

    /// Leave the current run, returning its token for resolution outside the lock
    fn end_run(&mut self, frame_loop: &FrameLoop, completion: Completion) -> Option<RunToken> {
        if let Some(id) = self.tick_id.take() {
            frame_loop.unregister(id);
        }
        let token = self.run.take();
        if token.is_some() || completion == Completion::Destroyed {
            self.last_completion = Some(completion);
        }
        token
    }
}

struct SpringShared {
    state: Mutex<SpringState>,
    listeners: Listeners<f32>,
}

impl SpringShared {
    /// Step once on behalf of the entry registered as `own`
    ///
    /// `own` is filled in while the state lock is held by the registering
    /// call, so it is always set by the time this can lock the state.
    fn tick(&self, tick: &FrameTick, own: &OnceLock<TickId>) -> TickControl {
        let (value, rested, callbacks) = {
            let mut state = lock(&self.state);
            if state.phase != SpringPhase::Animating || state.tick_id != own.get().copied() {
                return TickControl::Remove;
            }

            let step = state.spring.step(tick.dt);
            let rested = if step.at_rest {
                state.spring.settle();
                state.phase = SpringPhase::Idle;
                state.tick_id = None;
                state.last_completion = Some(Completion::Rested);
                Some(state.run.take())
            } else {
                None
            };
            (state.spring.position(), rested, state.callbacks.clone())
        };

        // The run is over before any user code sees the final value
        let rested = match rested {
            Some(token) => {
                if let Some(mut token) = token {
                    token.resolve(Completion::Rested);
                }
                true
            }
            None => false,
        };

        self.listeners.notify(&value);
        if let Some(on_update) = &callbacks.on_update {
            guarded("on_update", || on_update(value));
        }

        if !rested {
            return TickControl::Continue;
        }
        tracing::trace!(value, frame = tick.frame, "spring value rested");
        if let Some(on_rest) = &callbacks.on_rest {
            guarded("on_rest", || on_rest(value));
        }
        if let Some(on_complete) = &callbacks.on_complete {
            guarded("on_complete", || on_complete(value, Completion::Rested));
        }
        TickControl::Remove
    }
}

/// Run a lifecycle callback, logging instead of unwinding if it panics
fn guarded(name: &'static str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::error!(callback = name, "spring value callback panicked");
    }
}

/// An animated scalar driven by a spring
///
/// Cloning yields another handle to the same value.
#[derive(Clone)]
pub struct SpringValue {
    shared: Arc<SpringShared>,
    frame_loop: FrameLoop,
}

impl SpringValue {
    /// Create a value resting at `initial`, ticked by the global loop
    pub fn new(initial: f32, config: SpringConfig) -> Result<Self> {
        Self::with_loop(initial, config, &global_loop())
    }

    /// Create a value resting at `initial`, ticked by `frame_loop`
    pub fn with_loop(initial: f32, config: SpringConfig, frame_loop: &FrameLoop) -> Result<Self> {
        ensure_finite("initial value", initial)?;
        config.validate()?;

        Ok(Self {
            shared: Arc::new(SpringShared {
                state: Mutex::new(SpringState {
                    spring: Spring::new(config, initial),
                    phase: SpringPhase::Idle,
                    tick_id: None,
                    run: None,
                    callbacks: SpringCallbacks::default(),
                    last_completion: None,
                }),
                listeners: Listeners::new(),
            }),
            frame_loop: frame_loop.clone(),
        })
    }

    pub fn get(&self) -> f32 {
        lock(&self.shared.state).spring.position()
    }

    pub fn get_velocity(&self) -> f32 {
        lock(&self.shared.state).spring.velocity()
    }

    pub fn target(&self) -> f32 {
        lock(&self.shared.state).spring.target()
    }

    pub fn phase(&self) -> SpringPhase {
        lock(&self.shared.state).phase
    }

    pub fn config(&self) -> SpringConfig {
        *lock(&self.shared.state).spring.config()
    }

    /// The loop this value registers with
    pub fn frame_loop(&self) -> &FrameLoop {
        &self.frame_loop
    }

    /// Registered and not yet at rest
    pub fn is_animating(&self) -> bool {
        lock(&self.shared.state).phase == SpringPhase::Animating
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.shared.state).phase == SpringPhase::Paused
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.shared.state).phase == SpringPhase::Destroyed
    }

    /// How the most recent run ended, if any run has ended
    pub fn last_completion(&self) -> Option<Completion> {
        lock(&self.shared.state).last_completion
    }

    /// Animate toward `target` with the current config
    pub fn set(&self, target: f32) -> Result<()> {
        self.set_with(target, SpringPatch::default())
    }

    /// Animate toward `target`, merging `patch` over the current config first
    ///
    /// Starts a new run: the previous run's `finished` resolves with
    /// [`Completion::Superseded`]. Position and velocity carry over, unless the
    /// patch supplies an explicit velocity. Calling this on a paused value
    /// resumes it.
    pub fn set_with(&self, target: f32, patch: SpringPatch) -> Result<()> {
        ensure_finite("target", target)?;

        let (superseded, on_start, value) = {
            let mut state = lock(&self.shared.state);
            if state.phase == SpringPhase::Destroyed {
                tracing::trace!(target, "set() on destroyed spring value ignored");
                return Ok(());
            }

            let config = patch.apply(state.spring.config());
            config.validate()?;

            let was_moving = state.is_moving();
            state.spring.set_config(config);
            if let Some(callbacks) = patch.callbacks {
                state.callbacks = callbacks;
            }
            if let Some(velocity) = patch.velocity {
                state.spring.set_velocity(velocity);
            } else if !was_moving {
                state.spring.set_velocity(config.velocity);
            }

            state.spring.set_target(target);
            let superseded = state.run.replace(RunToken::new());
            state.phase = SpringPhase::Animating;
            if state.tick_id.is_none() {
                state.tick_id = Some(self.register_tick());
            }

            let on_start = if was_moving {
                None
            } else {
                state.callbacks.on_start.clone()
            };
            (superseded, on_start, state.spring.position())
        };

        if let Some(mut token) = superseded {
            token.resolve(Completion::Superseded);
        }
        if let Some(on_start) = on_start {
            on_start(value);
        }
        Ok(())
    }

    /// Move the target of the current run without starting a new one
    ///
    /// Used by followers that chase another value every frame.
    pub(crate) fn follow(&self, target: f32) {
        if !target.is_finite() {
            return;
        }
        {
            let mut state = lock(&self.shared.state);
            let phase = state.phase;
            match phase {
                SpringPhase::Animating => {
                    state.spring.set_target(target);
                    return;
                }
                SpringPhase::Idle if state.spring.position() == target => return,
                SpringPhase::Idle => {}
                SpringPhase::Paused | SpringPhase::Destroyed => return,
            }
        }
        let _ = self.set(target);
    }

    /// Move instantly to `value` and stop
    ///
    /// Resolves a pending run with [`Completion::Jumped`]. Subscribers are
    /// notified only if the value actually changed.
    pub fn jump(&self, value: f32) -> Result<()> {
        ensure_finite("jump value", value)?;

        let (changed, token, on_complete) = {
            let mut state = lock(&self.shared.state);
            if state.phase == SpringPhase::Destroyed {
                tracing::trace!(value, "jump() on destroyed spring value ignored");
                return Ok(());
            }

            let changed = state.spring.position() != value;
            let was_moving = state.is_moving();
            state.spring.snap(value);
            let token = state.end_run(&self.frame_loop, Completion::Jumped);
            state.phase = SpringPhase::Idle;

            let on_complete = if was_moving {
                state.callbacks.on_complete.clone()
            } else {
                None
            };
            (changed, token, on_complete)
        };

        if let Some(mut token) = token {
            token.resolve(Completion::Jumped);
        }
        if changed {
            self.shared.listeners.notify(&value);
        }
        if let Some(on_complete) = on_complete {
            on_complete(value, Completion::Jumped);
        }
        Ok(())
    }

    /// Halt integration where the value currently is
    ///
    /// Velocity is zeroed and a pending run resolves with
    /// [`Completion::Stopped`].
    pub fn stop(&self) {
        let (value, token, on_complete) = {
            let mut state = lock(&self.shared.state);
            if !state.is_moving() {
                return;
            }
            state.spring.halt();
            let token = state.end_run(&self.frame_loop, Completion::Stopped);
            state.phase = SpringPhase::Idle;
            (
                state.spring.position(),
                token,
                state.callbacks.on_complete.clone(),
            )
        };

        if let Some(mut token) = token {
            token.resolve(Completion::Stopped);
        }
        tracing::trace!(value, "spring value stopped");
        if let Some(on_complete) = on_complete {
            on_complete(value, Completion::Stopped);
        }
    }

    /// Freeze mid-run; `finished` stays pending until the run ends
    pub fn pause(&self) {
        let mut state = lock(&self.shared.state);
        if state.phase != SpringPhase::Animating {
            return;
        }
        if let Some(id) = state.tick_id.take() {
            self.frame_loop.unregister(id);
        }
        state.phase = SpringPhase::Paused;
    }

    /// Continue a paused run
    pub fn resume(&self) {
        let mut state = lock(&self.shared.state);
        if state.phase != SpringPhase::Paused {
            return;
        }
        state.phase = SpringPhase::Animating;
        if state.tick_id.is_none() {
            state.tick_id = Some(self.register_tick());
        }
    }

    /// Merge `patch` into the config; takes effect from the next tick
    pub fn set_config(&self, patch: impl Into<SpringPatch>) -> Result<()> {
        let patch = patch.into();
        let mut state = lock(&self.shared.state);
        if state.phase == SpringPhase::Destroyed {
            return Ok(());
        }
        let config = patch.apply(state.spring.config());
        config.validate()?;
        state.spring.set_config(config);
        if let Some(callbacks) = patch.callbacks {
            state.callbacks = callbacks;
        }
        Ok(())
    }

    /// Listen for every new value
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        if self.is_destroyed() {
            return Subscription::detached();
        }
        self.shared.listeners.subscribe(move |v: &f32| listener(*v))
    }

    /// Future resolving when the current run ends
    ///
    /// Already resolved (with the last completion) when nothing is running.
    pub fn finished(&self) -> Finished {
        let state = lock(&self.shared.state);
        match &state.run {
            Some(token) => token.finished(),
            None => Finished::resolved(state.last_completion.unwrap_or(Completion::Rested)),
        }
    }

    /// Unregister, resolve any pending run and drop all listeners
    ///
    /// Terminal. Calling it again is a no-op.
    pub fn destroy(&self) {
        let (value, token, on_complete) = {
            let mut state = lock(&self.shared.state);
            if state.phase == SpringPhase::Destroyed {
                return;
            }
            let was_moving = state.is_moving();
            let token = state.end_run(&self.frame_loop, Completion::Destroyed);
            state.phase = SpringPhase::Destroyed;
            let callbacks = std::mem::take(&mut state.callbacks);
            let on_complete = if was_moving {
                callbacks.on_complete
            } else {
                None
            };
            (state.spring.position(), token, on_complete)
        };

        if let Some(mut token) = token {
            token.resolve(Completion::Destroyed);
        }
        self.shared.listeners.clear();
        tracing::trace!(value, "spring value destroyed");
        if let Some(on_complete) = on_complete {
            on_complete(value, Completion::Destroyed);
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.shared.listeners.len()
    }

    /// Register a tick entry; callers hold the state lock
    fn register_tick(&self) -> TickId {
        let weak = Arc::downgrade(&self.shared);
        let own = Arc::new(OnceLock::new());
        let entry_own = Arc::clone(&own);
        let id = self.frame_loop.register(move |tick| match weak.upgrade() {
            Some(shared) => shared.tick(tick, &entry_own),
            None => TickControl::Remove,
        });
        let _ = own.set(id);
        id
    }
}

impl ValueSource for SpringValue {
    fn get(&self) -> f32 {
        SpringValue::get(self)
    }

    fn subscribe_listener(&self, listener: Listener<f32>) -> Subscription {
        if self.is_destroyed() {
            return Subscription::detached();
        }
        self.shared.listeners.subscribe_shared(listener)
    }
}

impl std::fmt::Debug for SpringValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("SpringValue")
            .field("value", &state.spring.position())
            .field("target", &state.spring.target())
            .field("phase", &state.phase)
            .finish()
    }
}
