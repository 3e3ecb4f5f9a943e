//! Spring physics animation
//!
//! Semi-implicit (symplectic) Euler integration of a damped harmonic
//! oscillator. Velocity is updated first and the new velocity moves the
//! position, which keeps the integrator stable at frame-sized steps while
//! costing one multiply-add per term, so thousands of springs can tick per
//! frame.
//!
//! Steps longer than [`MAX_SUBSTEP`] are split into equal substeps. The
//! explicit damping term diverges once `damping * dt / mass` exceeds 2, so a
//! frame hitch must not turn into one giant step.

use crate::config::SpringConfig;

/// Longest single integration substep (seconds)
pub const MAX_SUBSTEP: f32 = 1.0 / 60.0;

/// Result of one integration step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepResult {
    pub position: f32,
    pub velocity: f32,
    pub at_rest: bool,
}

/// A spring-based integrator for one scalar
#[derive(Clone, Copy, Debug)]
pub struct Spring {
    config: SpringConfig,
    position: f32,
    velocity: f32,
    target: f32,
    at_rest: bool,
}

impl Spring {
    /// A spring resting at `initial`
    pub fn new(config: SpringConfig, initial: f32) -> Self {
        Self {
            config,
            position: initial,
            velocity: 0.0,
            target: initial,
            at_rest: true,
        }
    }

    pub fn position(&self) -> f32 {
        self.position
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn config(&self) -> &SpringConfig {
        &self.config
    }

    /// Result of the most recent step (true for a freshly created spring)
    pub fn is_at_rest(&self) -> bool {
        self.at_rest
    }

    /// Retarget, keeping the current position and velocity
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
        self.at_rest = false;
    }

    /// Replace the parameters; the current motion carries over
    pub fn set_config(&mut self, config: SpringConfig) {
        self.config = config;
    }

    pub fn set_velocity(&mut self, velocity: f32) {
        self.velocity = velocity;
    }

    /// Move instantly to `value` and rest there
    pub fn snap(&mut self, value: f32) {
        self.position = value;
        self.target = value;
        self.velocity = 0.0;
        self.at_rest = true;
    }

    /// Snap onto the current target
    pub fn settle(&mut self) {
        self.snap(self.target);
    }

    /// Zero the velocity, leaving the position where it is
    pub fn halt(&mut self) {
        self.velocity = 0.0;
    }

    /// Whether both rest thresholds are currently met
    pub fn within_rest_thresholds(&self) -> bool {
        self.velocity.abs() < self.config.rest_speed
            && (self.position - self.target).abs() < self.config.rest_delta
    }

    /// Advance the simulation by `dt` seconds
    ///
    /// A zero, negative or non-finite `dt` leaves the state as it is.
    pub fn step(&mut self, dt: f32) -> StepResult {
        if dt > 0.0 && dt.is_finite() {
            let substeps = (dt / MAX_SUBSTEP).ceil().max(1.0);
            let h = dt / substeps;
            for _ in 0..substeps as u32 {
                if self.integrate(h) {
                    break;
                }
            }
        }

        self.at_rest = self.within_rest_thresholds();

        StepResult {
            position: self.position,
            velocity: self.velocity,
            at_rest: self.at_rest,
        }
    }

    /// One semi-implicit Euler substep; returns true if the clamp pinned the value
    fn integrate(&mut self, h: f32) -> bool {
        let before = self.target - self.position;

        let acceleration = self.acceleration(self.position, self.velocity);
        self.velocity += acceleration * h;
        self.position += self.velocity * h;

        if self.config.clamp && crossed(before, self.target - self.position) {
            self.position = self.target;
            self.velocity = 0.0;
            return true;
        }
        false
    }

    fn acceleration(&self, x: f32, v: f32) -> f32 {
        let spring_force = self.config.stiffness * (self.target - x);
        let damping_force = self.config.damping * v;
        (spring_force - damping_force) / self.config.mass
    }
}

/// The signed distance to the target changed sign (or hit zero) during a step
fn crossed(before: f32, after: f32) -> bool {
    before != 0.0 && (after == 0.0 || before.is_sign_positive() != after.is_sign_positive())
}
