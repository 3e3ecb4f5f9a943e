//! Spring configuration
//!
//! [`SpringConfig`] holds the physical parameters and rest thresholds of one
//! spring. Every field has a documented default, and [`SpringConfig::validate`]
//! rejects parameters that would make the integration undefined.
//! [`SpringPatch`] is the partial form used when retargeting a running value.

use crate::error::{AnimationError, Result};
use std::sync::Arc;
use tension_core::Completion;

/// Configuration for a spring animation
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SpringConfig {
    /// Restoring force per unit of displacement
    pub stiffness: f32,
    /// Resisting force per unit of velocity
    pub damping: f32,
    pub mass: f32,
    /// Initial velocity applied when a run starts from rest (units/s)
    pub velocity: f32,
    /// Speed below which the spring may be considered at rest (units/s)
    pub rest_speed: f32,
    /// Distance from target below which the spring may be considered at rest
    pub rest_delta: f32,
    /// Stop dead at the target instead of overshooting it
    pub clamp: bool,
}

impl SpringConfig {
    /// Create a new spring configuration with default rest thresholds
    pub fn new(stiffness: f32, damping: f32, mass: f32) -> Self {
        Self {
            stiffness,
            damping,
            mass,
            ..Self::default()
        }
    }

    /// A gentle, slow spring (good for page transitions)
    pub fn gentle() -> Self {
        Self::new(120.0, 14.0, 1.0)
    }

    /// A wobbly spring with overshoot (good for playful UI)
    pub fn wobbly() -> Self {
        Self::new(180.0, 12.0, 1.0)
    }

    /// A stiff, snappy spring (good for buttons)
    pub fn stiff() -> Self {
        Self::new(400.0, 30.0, 1.0)
    }

    /// A very stiff spring with minimal oscillation (good for quick responses)
    pub fn snappy() -> Self {
        Self::new(600.0, 40.0, 1.0)
    }

    /// A slow spring with no overshoot (critically damped)
    pub fn molasses() -> Self {
        Self::new(100.0, 20.0, 1.0)
    }

    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_rest_speed(mut self, rest_speed: f32) -> Self {
        self.rest_speed = rest_speed;
        self
    }

    pub fn with_rest_delta(mut self, rest_delta: f32) -> Self {
        self.rest_delta = rest_delta;
        self
    }

    pub fn with_clamp(mut self, clamp: bool) -> Self {
        self.clamp = clamp;
        self
    }

    /// Calculate critical damping for this spring's stiffness and mass
    pub fn critical_damping(&self) -> f32 {
        2.0 * (self.stiffness * self.mass).sqrt()
    }

    /// `damping / critical_damping`; 1.0 is critically damped
    ///
    /// Infinite for a spring with no stiffness.
    pub fn damping_ratio(&self) -> f32 {
        self.damping / self.critical_damping()
    }

    /// Check if the spring is underdamped (will oscillate)
    pub fn is_underdamped(&self) -> bool {
        self.damping < self.critical_damping()
    }

    /// Check if the spring is critically damped (no oscillation, fastest settling)
    pub fn is_critically_damped(&self) -> bool {
        (self.damping - self.critical_damping()).abs() < 0.01
    }

    /// Check if the spring is overdamped (slow settling, no oscillation)
    pub fn is_overdamped(&self) -> bool {
        self.damping > self.critical_damping()
    }

    /// Check that the integration is well defined for these parameters
    ///
    /// `stiffness == 0` is accepted: the value then coasts under damping alone
    /// and only settles once `rest_delta` tolerates the remaining distance.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("stiffness", self.stiffness),
            ("damping", self.damping),
            ("mass", self.mass),
            ("velocity", self.velocity),
            ("rest_speed", self.rest_speed),
            ("rest_delta", self.rest_delta),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(invalid(field, value, "must be finite"));
            }
        }

        if self.mass <= 0.0 {
            return Err(invalid("mass", self.mass, "must be positive"));
        }
        if self.stiffness < 0.0 {
            return Err(invalid("stiffness", self.stiffness, "must not be negative"));
        }
        if self.damping < 0.0 {
            return Err(invalid("damping", self.damping, "must not be negative"));
        }
        if self.rest_speed < 0.0 {
            return Err(invalid("rest_speed", self.rest_speed, "must not be negative"));
        }
        if self.rest_delta < 0.0 {
            return Err(invalid("rest_delta", self.rest_delta, "must not be negative"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, value: f32, reason: &'static str) -> AnimationError {
    tracing::warn!(field, value, reason, "rejected spring config");
    AnimationError::InvalidConfig {
        field,
        value,
        reason,
    }
}

impl Default for SpringConfig {
    fn default() -> Self {
        Self {
            stiffness: 100.0,
            damping: 10.0,
            mass: 1.0,
            velocity: 0.0,
            rest_speed: 0.01,
            rest_delta: 0.01,
            clamp: false,
        }
    }
}

/// Callback receiving the current value
pub type ValueCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Callback receiving the final value and how the run ended
pub type CompleteCallback = Arc<dyn Fn(f32, Completion) + Send + Sync>;

/// Lifecycle callbacks attached to a spring value
#[derive(Clone, Default)]
pub struct SpringCallbacks {
    /// Every tick, after subscribers
    pub on_update: Option<ValueCallback>,
    /// When a run begins from a non-animating state
    pub on_start: Option<ValueCallback>,
    /// When the value stops animating: rest, stop, jump or destroy
    pub on_complete: Option<CompleteCallback>,
    /// When the spring comes to rest at its target
    pub on_rest: Option<ValueCallback>,
}

impl SpringCallbacks {
    pub fn is_empty(&self) -> bool {
        self.on_update.is_none()
            && self.on_start.is_none()
            && self.on_complete.is_none()
            && self.on_rest.is_none()
    }
}

impl std::fmt::Debug for SpringCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpringCallbacks")
            .field("on_update", &self.on_update.is_some())
            .field("on_start", &self.on_start.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_rest", &self.on_rest.is_some())
            .finish()
    }
}

/// A partial spring configuration merged over an existing one
///
/// Numeric fields left as `None` keep their current value. If any callback is
/// supplied, the whole callback set replaces the previous one.
///
/// ```ignore
/// value.set_with(
///     0.0,
///     SpringPatch::new().stiffness(300.0).on_rest(|v| println!("rested at {v}")),
/// )?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct SpringPatch {
    pub stiffness: Option<f32>,
    pub damping: Option<f32>,
    pub mass: Option<f32>,
    pub velocity: Option<f32>,
    pub rest_speed: Option<f32>,
    pub rest_delta: Option<f32>,
    pub clamp: Option<bool>,
    pub callbacks: Option<SpringCallbacks>,
}

impl SpringPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stiffness(mut self, stiffness: f32) -> Self {
        self.stiffness = Some(stiffness);
        self
    }

    pub fn damping(mut self, damping: f32) -> Self {
        self.damping = Some(damping);
        self
    }

    pub fn mass(mut self, mass: f32) -> Self {
        self.mass = Some(mass);
        self
    }

    /// Override the current velocity when the patch is applied by `set_with`
    pub fn velocity(mut self, velocity: f32) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn rest_speed(mut self, rest_speed: f32) -> Self {
        self.rest_speed = Some(rest_speed);
        self
    }

    pub fn rest_delta(mut self, rest_delta: f32) -> Self {
        self.rest_delta = Some(rest_delta);
        self
    }

    pub fn clamp(mut self, clamp: bool) -> Self {
        self.clamp = Some(clamp);
        self
    }

    pub fn on_update<F>(mut self, f: F) -> Self
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.callbacks.get_or_insert_with(Default::default).on_update = Some(Arc::new(f));
        self
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.callbacks.get_or_insert_with(Default::default).on_start = Some(Arc::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(f32, Completion) + Send + Sync + 'static,
    {
        self.callbacks.get_or_insert_with(Default::default).on_complete = Some(Arc::new(f));
        self
    }

    pub fn on_rest<F>(mut self, f: F) -> Self
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.callbacks.get_or_insert_with(Default::default).on_rest = Some(Arc::new(f));
        self
    }

    /// Merge the numeric fields over `base`
    pub fn apply(&self, base: &SpringConfig) -> SpringConfig {
        SpringConfig {
            stiffness: self.stiffness.unwrap_or(base.stiffness),
            damping: self.damping.unwrap_or(base.damping),
            mass: self.mass.unwrap_or(base.mass),
            velocity: self.velocity.unwrap_or(base.velocity),
            rest_speed: self.rest_speed.unwrap_or(base.rest_speed),
            rest_delta: self.rest_delta.unwrap_or(base.rest_delta),
            clamp: self.clamp.unwrap_or(base.clamp),
        }
    }
}

impl From<SpringConfig> for SpringPatch {
    fn from(config: SpringConfig) -> Self {
        Self {
            stiffness: Some(config.stiffness),
            damping: Some(config.damping),
            mass: Some(config.mass),
            velocity: Some(config.velocity),
            rest_speed: Some(config.rest_speed),
            rest_delta: Some(config.rest_delta),
            clamp: Some(config.clamp),
            callbacks: None,
        }
    }
}
