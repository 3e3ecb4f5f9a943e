//! Spring groups
//!
//! A [`SpringGroup`] animates several named channels (x, y, scale, ...) that
//! share one base config. Each channel is an ordinary [`SpringValue`]; the
//! group adds keyed updates, a batched subscription that delivers the whole
//! map at most once per frame, and a completion future that waits until every
//! channel is at rest at the same time.

use crate::config::{SpringConfig, SpringPatch};
use crate::error::{ensure_finite, AnimationError, Result};
use crate::scheduler::{global_loop, FrameLoop};
use crate::value::SpringValue;
use futures::future::{join_all, BoxFuture, FutureExt};
use indexmap::IndexMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tension_core::listeners::lock;
use tension_core::{Listeners, Subscription};

/// Bounds every group key satisfies
pub trait GroupKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<K> GroupKey for K where K: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Snapshot of every channel in a group, in creation order
pub type GroupValues<K> = IndexMap<K, f32>;

struct GroupShared<K: GroupKey> {
    members: IndexMap<K, SpringValue>,
    listeners: Listeners<GroupValues<K>>,
    /// Some member changed since the last delivery
    dirty: Arc<AtomicBool>,
    destroyed: AtomicBool,
    frame_hook: Subscription,
    member_subscriptions: Mutex<Vec<Subscription>>,
}

impl<K: GroupKey> GroupShared<K> {
    fn snapshot(&self) -> GroupValues<K> {
        self.members
            .iter()
            .map(|(key, value)| (key.clone(), value.get()))
            .collect()
    }

    fn flush(&self) {
        if self.dirty.swap(false, Ordering::AcqRel) && !self.listeners.is_empty() {
            self.listeners.notify(&self.snapshot());
        }
    }

    fn release(&self) {
        self.frame_hook.unsubscribe();
        for subscription in lock(&self.member_subscriptions).drain(..) {
            subscription.unsubscribe();
        }
    }
}

impl<K: GroupKey> Drop for GroupShared<K> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Several spring values animated as one unit
pub struct SpringGroup<K: GroupKey> {
    shared: Arc<GroupShared<K>>,
}

impl<K: GroupKey> Clone for SpringGroup<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K: GroupKey> SpringGroup<K> {
    /// Create a group on the global loop
    pub fn new<I>(initial: I, config: SpringConfig) -> Result<Self>
    where
        I: IntoIterator<Item = (K, f32)>,
    {
        Self::with_loop(initial, config, &global_loop())
    }

    /// Create a group with one channel per `(key, initial value)` pair
    pub fn with_loop<I>(initial: I, config: SpringConfig, frame_loop: &FrameLoop) -> Result<Self>
    where
        I: IntoIterator<Item = (K, f32)>,
    {
        let mut members = IndexMap::new();
        for (key, value) in initial {
            members.insert(key, SpringValue::with_loop(value, config, frame_loop)?);
        }

        let dirty = Arc::new(AtomicBool::new(false));
        let member_subscriptions: Vec<Subscription> = members
            .values()
            .map(|member: &SpringValue| {
                let dirty = Arc::clone(&dirty);
                member.subscribe(move |_| dirty.store(true, Ordering::Release))
            })
            .collect();

        let shared = Arc::new_cyclic(|weak: &Weak<GroupShared<K>>| {
            let weak = weak.clone();
            GroupShared {
                members,
                listeners: Listeners::new(),
                dirty,
                destroyed: AtomicBool::new(false),
                frame_hook: frame_loop.on_frame(move |_| {
                    if let Some(shared) = weak.upgrade() {
                        shared.flush();
                    }
                }),
                member_subscriptions: Mutex::new(member_subscriptions),
            }
        });

        tracing::trace!(members = shared.members.len(), "spring group created");
        Ok(Self { shared })
    }

    /// Current value of one channel
    pub fn get(&self, key: &K) -> Option<f32> {
        self.shared.members.get(key).map(SpringValue::get)
    }

    /// Current value of every channel
    pub fn values(&self) -> GroupValues<K> {
        self.shared.snapshot()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.shared.members.keys()
    }

    /// The spring value behind one channel
    pub fn member(&self, key: &K) -> Option<&SpringValue> {
        self.shared.members.get(key)
    }

    pub fn len(&self) -> usize {
        self.shared.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.members.is_empty()
    }

    /// Animate the supplied channels; others are left alone
    pub fn set<I>(&self, targets: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, f32)>,
    {
        self.set_with(targets, SpringPatch::default())
    }

    /// Animate the supplied channels with `patch` merged over their config
    ///
    /// Every key, target and merged config is checked before any channel is
    /// touched, so a rejected call leaves the whole group unchanged.
    pub fn set_with<I>(&self, targets: I, patch: SpringPatch) -> Result<()>
    where
        I: IntoIterator<Item = (K, f32)>,
    {
        if self.is_destroyed() {
            return Ok(());
        }
        let targets = self.resolve(targets, "target")?;
        for (member, _) in &targets {
            patch.apply(&member.config()).validate()?;
        }
        for (member, target) in targets {
            member.set_with(target, patch.clone())?;
        }
        Ok(())
    }

    /// Move the supplied channels instantly
    ///
    /// Subscribers receive the new snapshot synchronously.
    pub fn jump<I>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, f32)>,
    {
        if self.is_destroyed() {
            return Ok(());
        }
        for (member, value) in self.resolve(values, "jump value")? {
            member.jump(value)?;
        }
        self.shared.dirty.store(true, Ordering::Release);
        self.shared.flush();
        Ok(())
    }

    fn resolve<I>(&self, pairs: I, what: &'static str) -> Result<Vec<(&SpringValue, f32)>>
    where
        I: IntoIterator<Item = (K, f32)>,
    {
        let mut resolved = Vec::new();
        for (key, value) in pairs {
            let Some(member) = self.shared.members.get(&key) else {
                return Err(AnimationError::UnknownKey(format!("{key:?}")));
            };
            resolved.push((member, ensure_finite(what, value)?));
        }
        Ok(resolved)
    }

    /// Deliver the whole map once per frame in which any channel changed
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&GroupValues<K>) + Send + Sync + 'static,
    {
        if self.is_destroyed() {
            return Subscription::detached();
        }
        self.shared.listeners.subscribe(listener)
    }

    /// At least one channel is animating
    pub fn is_animating(&self) -> bool {
        self.shared.members.values().any(SpringValue::is_animating)
    }

    /// Resolves once every channel is at rest at the same moment
    ///
    /// A channel retargeted while others are settling extends the wait.
    pub fn finished(&self) -> BoxFuture<'static, ()> {
        let members: Vec<SpringValue> = self.shared.members.values().cloned().collect();
        async move {
            loop {
                let pending: Vec<_> = members
                    .iter()
                    .filter(|m| m.is_animating() || m.is_paused())
                    .map(SpringValue::finished)
                    .collect();
                if pending.is_empty() {
                    return;
                }
                join_all(pending).await;
            }
        }
        .boxed()
    }

    /// Stop every channel where it is
    pub fn stop(&self) {
        for member in self.shared.members.values() {
            member.stop();
        }
    }

    /// Destroy every channel and drop all group subscribers
    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.release();
        for member in self.shared.members.values() {
            member.destroy();
        }
        self.shared.listeners.clear();
        tracing::trace!("spring group destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::Acquire)
    }
}

impl<K: GroupKey> Debug for SpringGroup<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.values()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tension_core::Completion;

    const FRAME: Duration = Duration::from_micros(16_667);

    fn xy(frame_loop: &FrameLoop) -> SpringGroup<&'static str> {
        SpringGroup::with_loop([("x", 0.0), ("y", 0.0)], SpringConfig::default(), frame_loop)
            .unwrap()
    }

    fn run_until_idle(frame_loop: &FrameLoop) {
        for _ in 0..2000 {
            if !frame_loop.advance(FRAME) {
                break;
            }
        }
    }

    #[test]
    fn test_set_touches_only_supplied_keys() {
        let frame_loop = FrameLoop::manual();
        let group = xy(&frame_loop);

        group.set([("x", 50.0)]).unwrap();
        assert!(group.member(&"x").unwrap().is_animating());
        assert!(!group.member(&"y").unwrap().is_animating());

        run_until_idle(&frame_loop);
        assert_eq!(group.get(&"x"), Some(50.0));
        assert_eq!(group.get(&"y"), Some(0.0));
    }

    #[test]
    fn test_unknown_key_rejects_whole_update() {
        let frame_loop = FrameLoop::manual();
        let group = xy(&frame_loop);

        let err = group.set([("x", 10.0), ("z", 10.0)]).unwrap_err();
        assert!(matches!(err, AnimationError::UnknownKey(ref key) if key.contains('z')));
        assert!(!group.is_animating());
        assert_eq!(frame_loop.len(), 0);
    }

    #[test]
    fn test_subscribe_batches_per_frame() {
        let frame_loop = FrameLoop::manual();
        let group = xy(&frame_loop);
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let snapshots_clone = snapshots.clone();
        let _sub = group.subscribe(move |values| snapshots_clone.lock().unwrap().push(values.clone()));

        group.set([("x", 10.0), ("y", -10.0)]).unwrap();
        frame_loop.advance(FRAME);
        frame_loop.advance(FRAME);

        let snapshots = snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 2);
        let keys: Vec<_> = snapshots[0].keys().copied().collect();
        assert_eq!(keys, vec!["x", "y"]);
        assert!(snapshots[1]["x"] > 0.0 && snapshots[1]["y"] < 0.0);
    }

    #[test]
    fn test_jump_notifies_synchronously() {
        let frame_loop = FrameLoop::manual();
        let group = xy(&frame_loop);
        let last = Arc::new(Mutex::new(None));
        let last_clone = last.clone();
        let _sub = group.subscribe(move |values| *last_clone.lock().unwrap() = Some(values.clone()));

        group.jump([("y", 7.0)]).unwrap();
        let last = last.lock().unwrap().clone().unwrap();
        assert_eq!(last["x"], 0.0);
        assert_eq!(last["y"], 7.0);
    }

    #[test]
    fn test_finished_waits_for_late_retarget() {
        let frame_loop = FrameLoop::manual();
        let group = xy(&frame_loop);
        group.set([("x", 100.0), ("y", 100.0)]).unwrap();
        let y_first_run = group.member(&"y").unwrap().finished();
        let mut done = group.finished();

        for _ in 0..20 {
            frame_loop.advance(FRAME);
        }
        group.set([("y", -100.0)]).unwrap();
        assert_eq!(y_first_run.peek(), Some(Completion::Superseded));
        assert!((&mut done).now_or_never().is_none());

        run_until_idle(&frame_loop);
        assert!((&mut done).now_or_never().is_some());
        assert_eq!(group.get(&"x"), Some(100.0));
        assert_eq!(group.get(&"y"), Some(-100.0));
    }

    #[test]
    fn test_finished_waits_for_settled_key_retargeted() {
        let frame_loop = FrameLoop::manual();
        let group = SpringGroup::with_loop(
            [("a", 0.0), ("b", 0.0), ("c", 0.0)],
            SpringConfig::stiff(),
            &frame_loop,
        )
        .unwrap();
        let (a, c) = (group.member(&"a").unwrap().clone(), group.member(&"c").unwrap().clone());

        group.set([("a", 10.0), ("b", 10.0)]).unwrap();
        group
            .set_with([("c", 1000.0)], SpringPatch::new().stiffness(10.0).damping(8.0))
            .unwrap();
        let mut done = group.finished();

        let mut frames = 0;
        while (a.is_animating() || group.member(&"b").unwrap().is_animating()) && frames < 2000 {
            frame_loop.advance(FRAME);
            frames += 1;
        }
        assert!(c.is_animating(), "the slow key should still be moving");
        assert!((&mut done).now_or_never().is_none());

        group.set([("a", -10.0)]).unwrap();
        let mut resolved = false;
        for _ in 0..5000 {
            frame_loop.advance(FRAME);
            let moving = a.is_animating() || c.is_animating();
            if (&mut done).now_or_never().is_some() {
                assert!(!moving);
                resolved = true;
                break;
            }
            assert!(moving);
        }
        assert!(resolved);
        assert_eq!(group.get(&"a"), Some(-10.0));
        assert_eq!(group.get(&"c"), Some(1000.0));
    }

    #[test]
    fn test_destroy_resolves_members() {
        let frame_loop = FrameLoop::manual();
        let group = xy(&frame_loop);
        group.set([("x", 100.0)]).unwrap();
        let x_run = group.member(&"x").unwrap().finished();

        group.destroy();
        group.destroy();
        assert_eq!(x_run.peek(), Some(Completion::Destroyed));
        assert!(group.set([("x", 1.0)]).is_ok());
        assert!(!group.is_animating());
        assert!(group.finished().now_or_never().is_some());
    }
}
