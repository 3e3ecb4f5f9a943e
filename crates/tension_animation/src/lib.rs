//! Tension Animation
//!
//! Physically-based spring animation driven by a shared frame loop.
//!
//! # Features
//!
//! - **Spring Physics**: semi-implicit Euler springs with stiffness, damping, mass
//! - **Frame Loop**: one registry of tick entries, manual or background driven
//! - **Spring Values**: interruptible cells that keep their velocity when retargeted
//! - **Groups**: keyed bundles of springs with a single per-frame snapshot
//! - **Motion Values**: cells that either spring or write through
//! - **Orchestration**: sequence, parallel, stagger, trail and decay
//!
//! # Example
//!
//! ```rust
//! use tension_animation::{FrameLoop, SpringConfig, SpringValue};
//! use std::time::Duration;
//!
//! let frame_loop = FrameLoop::manual();
//! let x = SpringValue::with_loop(0.0, SpringConfig::stiff(), &frame_loop).unwrap();
//! x.set(100.0).unwrap();
//! while frame_loop.advance(Duration::from_millis(16)) {}
//! assert_eq!(x.get(), 100.0);
//! ```

pub mod animation;
pub mod config;
pub mod decay;
pub mod error;
pub mod group;
pub mod motion;
pub mod orchestration;
pub mod scheduler;
pub mod spring;
pub mod trail;
pub mod value;

pub use animation::SpringAnimation;
pub use config::{CompleteCallback, SpringCallbacks, SpringConfig, SpringPatch, ValueCallback};
pub use decay::{DecayAnimation, DecayOptions};
pub use error::{AnimationError, Result};
pub use group::{GroupKey, GroupValues, SpringGroup};
pub use motion::{MotionOptions, MotionValue};
pub use orchestration::{
    animate, parallel, sequence, stagger, stagger_delays, DelayFn, StaggerDelay, StaggerFrom,
    StaggerOptions, Step,
};
pub use scheduler::{
    global_loop, set_global_loop, try_global_loop, FrameClock, FrameLoop, FrameTick, HookId,
    LoopConfig, LoopDriver, ManualClock, SystemClock, TickControl, TickId,
};
pub use spring::{Spring, StepResult};
pub use trail::{Trail, TrailOptions};
pub use value::{SpringPhase, SpringValue};

pub use tension_core::{
    combine_values, transform_value, Completion, DerivedValue, Finished, Subscription,
    ValueSource,
};

// ============================================================================
// Global-loop constructors
// ============================================================================

/// A spring value on the global loop
pub fn create_spring_value(initial: f32, config: SpringConfig) -> Result<SpringValue> {
    SpringValue::new(initial, config)
}

/// A keyed spring group on the global loop
pub fn create_spring_group<K, I>(initial: I, config: SpringConfig) -> Result<SpringGroup<K>>
where
    K: GroupKey,
    I: IntoIterator<Item = (K, f32)>,
{
    SpringGroup::new(initial, config)
}

/// A motion value on the global loop
pub fn create_motion_value(initial: f32, options: MotionOptions) -> Result<MotionValue> {
    MotionValue::new(initial, options)
}

/// A stopped one-shot animation from `from` to `to` on the global loop
pub fn spring(from: f32, to: f32, config: SpringConfig) -> Result<SpringAnimation> {
    SpringAnimation::new(from, to, config)
}

/// Start a decay on the global loop
pub fn decay(options: DecayOptions) -> Result<DecayAnimation> {
    DecayAnimation::new(options)
}

/// A trail of `count` springs on the global loop
pub fn create_trail(count: usize, config: SpringConfig, options: TrailOptions) -> Result<Trail> {
    Trail::new(count, config, options)
}
