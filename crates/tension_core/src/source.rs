//! The read/subscribe seam shared by every value cell
//!
//! Spring values, motion values, and derived values all implement
//! [`ValueSource`], so a derived value can observe any of them without
//! knowing how the source produces its numbers.

use crate::listeners::{Listener, Subscription};

/// A readable, observable numeric cell
pub trait ValueSource {
    /// Current value, without side effects
    fn get(&self) -> f32;

    /// Register a listener invoked with every new value
    fn subscribe_listener(&self, listener: Listener<f32>) -> Subscription;
}

impl<S: ValueSource + ?Sized> ValueSource for &S {
    fn get(&self) -> f32 {
        (**self).get()
    }

    fn subscribe_listener(&self, listener: Listener<f32>) -> Subscription {
        (**self).subscribe_listener(listener)
    }
}

impl<S: ValueSource + ?Sized> ValueSource for Box<S> {
    fn get(&self) -> f32 {
        (**self).get()
    }

    fn subscribe_listener(&self, listener: Listener<f32>) -> Subscription {
        (**self).subscribe_listener(listener)
    }
}
