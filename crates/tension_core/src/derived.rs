//! Derived values
//!
//! A derived value recomputes a pure function whenever one of its sources
//! notifies, and notifies its own listeners only when the output actually
//! changed. It keeps the latest value of every source locally and holds no
//! strong reference to any source: the sources' listener lists only hold a
//! weak pointer back to the derived value, and the derived value unsubscribes
//! from all of its sources when destroyed or dropped.
//!
//! # Example
//!
//! ```ignore
//! let x = create_spring_value(0.0, SpringConfig::default())?;
//! let opacity = transform_value(&x, |x| (1.0 - x / 100.0).clamp(0.0, 1.0));
//! opacity.subscribe(|o| println!("opacity {o}"));
//! ```

use crate::listeners::{lock, Listeners, Subscription};
use crate::source::ValueSource;
use smallvec::SmallVec;
use std::sync::{Arc, Mutex, Weak};

type Compute = Box<dyn Fn(&[f32]) -> f32 + Send + Sync>;

struct DerivedState {
    inputs: SmallVec<[f32; 4]>,
    output: f32,
    destroyed: bool,
}

struct DerivedInner {
    state: Mutex<DerivedState>,
    compute: Compute,
    listeners: Listeners<f32>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl DerivedInner {
    fn on_source(&self, index: usize, value: f32) {
        let inputs = {
            let mut state = lock(&self.state);
            if state.destroyed {
                return;
            }
            if let Some(slot) = state.inputs.get_mut(index) {
                *slot = value;
            }
            state.inputs.clone()
        };

        let output = (self.compute)(&inputs);

        let changed = {
            let mut state = lock(&self.state);
            if state.destroyed || same_output(state.output, output) {
                false
            } else {
                state.output = output;
                true
            }
        };

        if changed {
            self.listeners.notify(&output);
        }
    }

    fn release_sources(&self) {
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }
}

impl Drop for DerivedInner {
    fn drop(&mut self) {
        self.release_sources();
    }
}

fn same_output(a: f32, b: f32) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// A value computed from one or more source cells
#[derive(Clone)]
pub struct DerivedValue {
    inner: Arc<DerivedInner>,
}

impl DerivedValue {
    /// Derive from a single source: `get() == f(source.get())`
    pub fn transform<S, F>(source: &S, f: F) -> Self
    where
        S: ValueSource,
        F: Fn(f32) -> f32 + Send + Sync + 'static,
    {
        Self::from_sources(&[source as &dyn ValueSource], move |inputs: &[f32]| {
            f(inputs[0])
        })
    }

    /// Derive from several sources: `get() == f(&[a.get(), b.get(), ...])`
    pub fn combine<F>(sources: &[&dyn ValueSource], f: F) -> Self
    where
        F: Fn(&[f32]) -> f32 + Send + Sync + 'static,
    {
        Self::from_sources(sources, f)
    }

    fn from_sources<F>(sources: &[&dyn ValueSource], f: F) -> Self
    where
        F: Fn(&[f32]) -> f32 + Send + Sync + 'static,
    {
        let inputs: SmallVec<[f32; 4]> = sources.iter().map(|s| s.get()).collect();
        let output = f(&inputs);

        let inner = Arc::new(DerivedInner {
            state: Mutex::new(DerivedState {
                inputs,
                output,
                destroyed: false,
            }),
            compute: Box::new(f),
            listeners: Listeners::new(),
            subscriptions: Mutex::new(Vec::with_capacity(sources.len())),
        });

        for (index, source) in sources.iter().enumerate() {
            let weak: Weak<DerivedInner> = Arc::downgrade(&inner);
            let subscription = source.subscribe_listener(Arc::new(move |value: &f32| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_source(index, *value);
                }
            }));
            lock(&inner.subscriptions).push(subscription);
        }

        tracing::trace!(sources = sources.len(), "derived value created");
        Self { inner }
    }

    pub fn get(&self) -> f32 {
        lock(&self.inner.state).output
    }

    /// Listen for output changes
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        if self.is_destroyed() {
            return Subscription::detached();
        }
        self.inner.listeners.subscribe(move |v: &f32| listener(*v))
    }

    /// Detach from every source and drop all listeners
    pub fn destroy(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            state.destroyed = true;
        }
        self.inner.release_sources();
        self.inner.listeners.clear();
        tracing::trace!("derived value destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.inner.state).destroyed
    }

    /// Number of sources still subscribed to
    pub fn source_count(&self) -> usize {
        lock(&self.inner.subscriptions).len()
    }
}

impl ValueSource for DerivedValue {
    fn get(&self) -> f32 {
        DerivedValue::get(self)
    }

    fn subscribe_listener(&self, listener: crate::listeners::Listener<f32>) -> Subscription {
        if self.is_destroyed() {
            return Subscription::detached();
        }
        self.inner.listeners.subscribe_shared(listener)
    }
}

/// Derive a value from one source
pub fn transform_value<S, F>(source: &S, f: F) -> DerivedValue
where
    S: ValueSource,
    F: Fn(f32) -> f32 + Send + Sync + 'static,
{
    DerivedValue::transform(source, f)
}

/// Derive a value from several sources
pub fn combine_values<F>(sources: &[&dyn ValueSource], f: F) -> DerivedValue
where
    F: Fn(&[f32]) -> f32 + Send + Sync + 'static,
{
    DerivedValue::combine(sources, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::Listener;

    /// Minimal writable source for exercising derived values
    struct TestCell {
        value: Mutex<f32>,
        listeners: Listeners<f32>,
    }

    impl TestCell {
        fn new(value: f32) -> Self {
            Self {
                value: Mutex::new(value),
                listeners: Listeners::new(),
            }
        }

        fn write(&self, value: f32) {
            *self.value.lock().unwrap() = value;
            self.listeners.notify(&value);
        }
    }

    impl ValueSource for TestCell {
        fn get(&self) -> f32 {
            *self.value.lock().unwrap()
        }

        fn subscribe_listener(&self, listener: Listener<f32>) -> Subscription {
            self.listeners.subscribe_shared(listener)
        }
    }

    #[test]
    fn test_transform_tracks_source() {
        let source = TestCell::new(2.0);
        let doubled = transform_value(&source, |v| v * 2.0);
        assert_eq!(doubled.get(), 4.0);

        source.write(5.0);
        assert_eq!(doubled.get(), 10.0);
    }

    #[test]
    fn test_fan_out_only_on_change() {
        let source = TestCell::new(0.3);
        let rounded = transform_value(&source, |v| v.round());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = rounded.subscribe(move |v| seen_clone.lock().unwrap().push(v));

        source.write(0.4);
        source.write(0.6);
        source.write(0.9);
        source.write(1.2);
        source.write(1.7);

        assert_eq!(*seen.lock().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_combine_multiple_sources() {
        let a = TestCell::new(1.0);
        let b = TestCell::new(2.0);
        let sum = combine_values(&[&a, &b], |inputs| inputs.iter().sum());
        assert_eq!(sum.get(), 3.0);

        b.write(10.0);
        assert_eq!(sum.get(), 11.0);
        a.write(-1.0);
        assert_eq!(sum.get(), 9.0);
    }

    #[test]
    fn test_destroy_unsubscribes_from_source() {
        let source = TestCell::new(1.0);
        let derived = transform_value(&source, |v| v + 1.0);
        assert_eq!(source.listeners.len(), 1);

        derived.destroy();
        derived.destroy();
        assert_eq!(source.listeners.len(), 0);
        assert_eq!(derived.source_count(), 0);

        source.write(100.0);
        assert_eq!(derived.get(), 2.0);
    }

    #[test]
    fn test_drop_releases_source() {
        let source = TestCell::new(1.0);
        {
            let _derived = transform_value(&source, |v| v * 3.0);
            assert_eq!(source.listeners.len(), 1);
        }
        assert_eq!(source.listeners.len(), 0);
    }

    #[test]
    fn test_chained_derivations() {
        let source = TestCell::new(1.0);
        let plus_one = transform_value(&source, |v| v + 1.0);
        let squared = transform_value(&plus_one, |v| v * v);
        assert_eq!(squared.get(), 4.0);

        source.write(2.0);
        assert_eq!(squared.get(), 9.0);
    }
}
