//! Frame loop
//!
//! The [`FrameLoop`] ticks every registered entry once per frame, in
//! registration order. Spring values, trails and decays register a tick
//! callback while they are moving and drop out once they come to rest.
//!
//! The loop starts itself on the first registration and stops when the
//! registered set becomes empty. How frames are produced depends on the
//! [`LoopDriver`]:
//! - `Manual` - the host calls [`FrameLoop::frame`] from its display-refresh
//!   callback, or [`FrameLoop::advance`] with an explicit delta
//! - `Background` - a fixed-rate thread is spawned lazily on first
//!   registration and exits once nothing is registered
//!
//! No lock is held while entry callbacks or frame hooks run, so callbacks may
//! register, unregister, or call back into any value on the same loop.

use crate::error::{AnimationError, Result};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tension_core::listeners::lock;
use tension_core::Subscription;

// ============================================================================
// Global Frame Loop
// ============================================================================

static GLOBAL_LOOP: OnceLock<FrameLoop> = OnceLock::new();

/// Get the process-wide frame loop
///
/// Created on first use with [`LoopConfig::default`] (a 60fps background
/// driver) unless [`set_global_loop`] installed one earlier.
pub fn global_loop() -> FrameLoop {
    GLOBAL_LOOP
        .get_or_init(|| FrameLoop::new(LoopConfig::default()))
        .clone()
}

/// Install the process-wide frame loop
///
/// Must be called before anything touches [`global_loop`]. Hosts with their
/// own display-refresh callback install a `Manual` loop here and call
/// [`FrameLoop::frame`] from that callback.
pub fn set_global_loop(frame_loop: FrameLoop) -> Result<()> {
    GLOBAL_LOOP
        .set(frame_loop)
        .map_err(|_| AnimationError::LoopAlreadyInstalled)
}

/// Get the process-wide frame loop if it already exists
pub fn try_global_loop() -> Option<FrameLoop> {
    GLOBAL_LOOP.get().cloned()
}

new_key_type! {
    /// Handle to a registered tick callback
    pub struct TickId;
    /// Handle to a registered frame hook
    pub struct HookId;
}

// ============================================================================
// Frame Data
// ============================================================================

/// What an entry sees each frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameTick {
    /// Clamped seconds since the previous frame
    pub dt: f32,
    /// Frame number, starting at 1
    pub frame: u64,
    /// Sum of clamped deltas since the loop was created
    pub elapsed: f32,
}

/// Returned by a tick callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickControl {
    /// Tick again next frame
    Continue,
    /// Unregister once the current pass completes
    Remove,
}

// ============================================================================
// Clocks
// ============================================================================

/// Source of frame timestamps
pub trait FrameClock: Send + Sync {
    /// Monotonic time since an arbitrary origin
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`]
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to
///
/// Clones share the same time, so a test can keep one and hand the other to
/// the loop.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }

    pub fn set(&self, now: Duration) {
        *lock(&self.now) = now;
    }
}

impl FrameClock for ManualClock {
    fn now(&self) -> Duration {
        *lock(&self.now)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// How frames are produced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LoopDriver {
    /// The host calls `frame()` or `advance()`
    Manual,
    /// A background thread ticks at a fixed rate while anything is registered
    Background { fps: u32 },
}

/// Frame loop settings
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LoopConfig {
    pub driver: LoopDriver,
    /// Upper bound on the delta handed to entries (seconds)
    pub max_dt: f32,
    /// Number of recent frame deltas averaged by `fps()`
    pub fps_window: usize,
}

impl LoopConfig {
    /// A loop driven by the host
    pub fn manual() -> Self {
        Self {
            driver: LoopDriver::Manual,
            ..Self::default()
        }
    }

    /// A loop driven by a background thread at `fps`
    pub fn background(fps: u32) -> Self {
        Self {
            driver: LoopDriver::Background { fps },
            ..Self::default()
        }
    }

    pub fn with_max_dt(mut self, max_dt: f32) -> Self {
        self.max_dt = max_dt;
        self
    }

    /// Check that `max_dt` is positive and finite and a background rate is nonzero
    pub fn validate(&self) -> Result<()> {
        if !(self.max_dt.is_finite() && self.max_dt > 0.0) {
            return Err(invalid_loop("max_dt", self.max_dt, "must be positive and finite"));
        }
        if let LoopDriver::Background { fps: 0 } = self.driver {
            return Err(invalid_loop("fps", 0.0, "must be at least 1"));
        }
        Ok(())
    }

    /// Replace out-of-range fields with their defaults
    fn sanitized(mut self) -> Self {
        if let Err(err) = self.validate() {
            tracing::warn!(%err, "frame loop config out of range; using defaults for bad fields");
            let defaults = Self::default();
            if !(self.max_dt.is_finite() && self.max_dt > 0.0) {
                self.max_dt = defaults.max_dt;
            }
            if let LoopDriver::Background { fps: 0 } = self.driver {
                self.driver = defaults.driver;
            }
        }
        self
    }
}

fn invalid_loop(field: &'static str, value: f32, reason: &'static str) -> AnimationError {
    AnimationError::InvalidConfig {
        field,
        value,
        reason,
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            driver: LoopDriver::Background { fps: 60 },
            max_dt: 1.0 / 30.0,
            fps_window: 60,
        }
    }
}

// ============================================================================
// Frame Loop
// ============================================================================

type TickFn = Box<dyn FnMut(&FrameTick) -> TickControl + Send>;
type HookFn = Arc<dyn Fn(&FrameTick) + Send + Sync>;

struct Entry {
    callback: Arc<Mutex<TickFn>>,
    /// Set on unregister and on `Remove`; checked before each call
    cancelled: Arc<AtomicBool>,
}

struct LoopState {
    entries: SlotMap<TickId, Entry>,
    /// Registration order; may contain ids that were already removed
    order: Vec<TickId>,
    hooks: SlotMap<HookId, HookFn>,
    hook_order: Vec<HookId>,
    running: bool,
    in_pass: bool,
    thread_alive: bool,
    last_frame: Duration,
    frame: u64,
    elapsed: f32,
    deltas: VecDeque<f32>,
}

struct LoopShared {
    state: Mutex<LoopState>,
    config: LoopConfig,
    clock: Arc<dyn FrameClock>,
}

/// A registry of per-frame callbacks
///
/// Cheap to clone; all clones drive the same loop.
#[derive(Clone)]
pub struct FrameLoop {
    shared: Arc<LoopShared>,
}

impl FrameLoop {
    /// Create a loop timed by the system clock
    pub fn new(config: LoopConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a host-driven loop timed by the system clock
    pub fn manual() -> Self {
        Self::new(LoopConfig::manual())
    }

    /// Create a loop with an injected clock
    ///
    /// Fields rejected by [`LoopConfig::validate`] fall back to their defaults.
    pub fn with_clock(config: LoopConfig, clock: Arc<dyn FrameClock>) -> Self {
        let config = config.sanitized();
        let last_frame = clock.now();
        Self {
            shared: Arc::new(LoopShared {
                state: Mutex::new(LoopState {
                    entries: SlotMap::with_key(),
                    order: Vec::new(),
                    hooks: SlotMap::with_key(),
                    hook_order: Vec::new(),
                    running: false,
                    in_pass: false,
                    thread_alive: false,
                    last_frame,
                    frame: 0,
                    elapsed: 0.0,
                    deltas: VecDeque::with_capacity(config.fps_window),
                }),
                config,
                clock,
            }),
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.shared.config
    }

    /// Register a tick callback
    ///
    /// Starts the loop if it was idle. An entry registered during a pass first
    /// ticks on the next frame.
    pub fn register<F>(&self, callback: F) -> TickId
    where
        F: FnMut(&FrameTick) -> TickControl + Send + 'static,
    {
        let mut state = lock(&self.shared.state);
        let id = state.entries.insert(Entry {
            callback: Arc::new(Mutex::new(Box::new(callback))),
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        state.order.push(id);

        if !state.running {
            state.running = true;
            // Reset to now so the first frame does not see the idle gap as dt
            state.last_frame = self.shared.clock.now();
            tracing::debug!(frame = state.frame, "frame loop started");
            self.ensure_driver(&mut state);
        }
        id
    }

    /// Unregister a tick callback
    ///
    /// Takes effect immediately: if a pass is in progress the entry is skipped
    /// for the rest of it. Returns false if the id was not registered.
    pub fn unregister(&self, id: TickId) -> bool {
        let mut state = lock(&self.shared.state);
        let Some(entry) = state.entries.remove(id) else {
            return false;
        };
        entry.cancelled.store(true, Ordering::Release);
        if !state.in_pass && state.order.len() > 2 * state.entries.len() {
            let LoopState { entries, order, .. } = &mut *state;
            order.retain(|id| entries.contains_key(*id));
        }
        if state.entries.is_empty() && !state.in_pass {
            Self::go_idle(&mut state);
        }
        true
    }

    pub fn contains(&self, id: TickId) -> bool {
        lock(&self.shared.state).entries.contains_key(id)
    }

    /// Run `hook` after every pass, once all entries have ticked
    pub fn on_frame<F>(&self, hook: F) -> Subscription
    where
        F: Fn(&FrameTick) + Send + Sync + 'static,
    {
        let id = {
            let mut state = lock(&self.shared.state);
            let id = state.hooks.insert(Arc::new(hook));
            state.hook_order.push(id);
            id
        };

        let weak: Weak<LoopShared> = Arc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                let mut state = lock(&shared.state);
                state.hooks.remove(id);
                if state.hook_order.len() > 2 * state.hooks.len() {
                    let LoopState {
                        hooks, hook_order, ..
                    } = &mut *state;
                    hook_order.retain(|id| hooks.contains_key(*id));
                }
            }
        })
    }

    /// Run one pass timed by the loop's clock
    ///
    /// Returns whether the loop is still running afterwards.
    pub fn frame(&self) -> bool {
        let dt = {
            let mut state = lock(&self.shared.state);
            let now = self.shared.clock.now();
            let dt = now.saturating_sub(state.last_frame);
            state.last_frame = now;
            dt
        };
        self.run_pass(dt.as_secs_f32())
    }

    /// Run one pass with an explicit delta, ignoring the clock
    pub fn advance(&self, dt: Duration) -> bool {
        self.run_pass(dt.as_secs_f32())
    }

    fn run_pass(&self, raw_dt: f32) -> bool {
        let (tick, snapshot) = {
            let mut state = lock(&self.shared.state);
            if state.in_pass {
                tracing::trace!("frame() called from inside a pass; ignored");
                return state.running;
            }
            if !state.running {
                return false;
            }

            let dt = if raw_dt.is_finite() {
                raw_dt.min(self.shared.config.max_dt).max(0.0)
            } else {
                0.0
            };
            state.frame += 1;
            state.elapsed += dt;
            if raw_dt > 0.0 && raw_dt.is_finite() && self.shared.config.fps_window > 0 {
                if state.deltas.len() == self.shared.config.fps_window {
                    state.deltas.pop_front();
                }
                state.deltas.push_back(raw_dt);
            }
            state.in_pass = true;

            let LoopState { entries, order, .. } = &mut *state;
            order.retain(|id| entries.contains_key(*id));
            let snapshot: Vec<(TickId, Arc<Mutex<TickFn>>, Arc<AtomicBool>)> = order
                .iter()
                .filter_map(|id| {
                    entries
                        .get(*id)
                        .map(|e| (*id, Arc::clone(&e.callback), Arc::clone(&e.cancelled)))
                })
                .collect();

            let tick = FrameTick {
                dt,
                frame: state.frame,
                elapsed: state.elapsed,
            };
            (tick, snapshot)
        };

        let mut finished: SmallVec<[TickId; 8]> = SmallVec::new();
        for (id, callback, cancelled) in snapshot {
            if cancelled.load(Ordering::Acquire) {
                continue;
            }
            let result = catch_unwind(AssertUnwindSafe(|| {
                let mut callback = lock(&callback);
                (*callback)(&tick)
            }));
            match result {
                Ok(TickControl::Continue) => {}
                Ok(TickControl::Remove) => {
                    cancelled.store(true, Ordering::Release);
                    finished.push(id);
                }
                Err(_) => {
                    tracing::error!(frame = tick.frame, "tick callback panicked; entry kept");
                }
            }
        }

        let (hooks, running) = {
            let mut state = lock(&self.shared.state);
            for id in finished {
                state.entries.remove(id);
            }
            state.in_pass = false;
            if state.entries.is_empty() {
                Self::go_idle(&mut state);
            }

            let LoopState {
                hooks, hook_order, ..
            } = &mut *state;
            hook_order.retain(|id| hooks.contains_key(*id));
            let hooks: SmallVec<[HookFn; 4]> = hook_order
                .iter()
                .filter_map(|id| hooks.get(*id).cloned())
                .collect();
            (hooks, state.running)
        };

        for hook in hooks {
            if catch_unwind(AssertUnwindSafe(|| hook(&tick))).is_err() {
                tracing::error!(frame = tick.frame, "frame hook panicked");
            }
        }
        running
    }

    fn go_idle(state: &mut LoopState) {
        if state.running {
            state.running = false;
            tracing::debug!(frame = state.frame, "frame loop idle");
        }
    }

    fn ensure_driver(&self, state: &mut LoopState) {
        let LoopDriver::Background { fps } = self.shared.config.driver else {
            return;
        };
        if state.thread_alive {
            return;
        }

        let frame_duration = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        let weak = Arc::downgrade(&self.shared);
        let spawned = thread::Builder::new()
            .name("tension-frame-loop".into())
            .spawn(move || background_loop(weak, frame_duration));

        match spawned {
            Ok(_) => {
                state.thread_alive = true;
                tracing::debug!(fps, "frame loop thread spawned");
            }
            Err(err) => {
                tracing::error!(%err, "failed to spawn frame loop thread");
            }
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Average frames per second over the recent window (0 before any frame)
    pub fn fps(&self) -> f32 {
        let state = lock(&self.shared.state);
        if state.deltas.is_empty() {
            return 0.0;
        }
        let mean = state.deltas.iter().sum::<f32>() / state.deltas.len() as f32;
        if mean > 0.0 {
            1.0 / mean
        } else {
            0.0
        }
    }

    /// Registered entries that have not asked to be removed
    pub fn alive_count(&self) -> usize {
        lock(&self.shared.state)
            .entries
            .values()
            .filter(|e| !e.cancelled.load(Ordering::Acquire))
            .count()
    }

    /// Registered entries, including ones removed at the end of this pass
    pub fn len(&self) -> usize {
        lock(&self.shared.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of passes run so far
    pub fn frame_count(&self) -> u64 {
        lock(&self.shared.state).frame
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new(LoopConfig::default())
    }
}

impl std::fmt::Debug for FrameLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("FrameLoop")
            .field("driver", &self.shared.config.driver)
            .field("entries", &state.entries.len())
            .field("running", &state.running)
            .field("frame", &state.frame)
            .finish()
    }
}

/// Body of the background driver thread
///
/// Holds only a weak reference, so dropping every `FrameLoop` handle ends it.
fn background_loop(weak: Weak<LoopShared>, frame_duration: Duration) {
    loop {
        let start = Instant::now();
        {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let frame_loop = FrameLoop { shared };
            frame_loop.frame();

            // Decide under the lock so a concurrent register either sees the
            // thread still alive or finds it gone and spawns a new one
            let mut state = lock(&frame_loop.shared.state);
            if !state.running {
                state.thread_alive = false;
                tracing::debug!("frame loop thread exiting");
                return;
            }
        }

        let elapsed = start.elapsed();
        if elapsed < frame_duration {
            thread::sleep(frame_duration - elapsed);
        }
    }
}
