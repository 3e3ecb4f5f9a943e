//! Orchestration
//!
//! Combinators that compose many independent runs into choreography:
//! - [`sequence`] runs steps strictly one after another
//! - [`parallel`] runs steps at once and waits for all of them
//! - [`stagger`] starts one run per item, offset by a per-index delay
//!
//! Steps are futures. Rust futures do nothing until polled, so a step built
//! with [`animate`] (or any `async` block) only starts its animation when the
//! combinator reaches it.
//!
//! # Example
//!
//! ```ignore
//! sequence([
//!     animate(&x, 100.0),
//!     Box::pin(parallel([animate(&y, 50.0), animate(&opacity, 1.0)])),
//! ])
//! .await?;
//! ```

use crate::error::Result;
use crate::value::SpringValue;
use futures::future::{join_all, BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// One unit of choreography
pub type Step = BoxFuture<'static, Result<()>>;

/// A step that springs `value` to `target` and waits until the run ends
///
/// A run that ends early (stopped, superseded, destroyed) still completes the
/// step; it is not an error.
pub fn animate(value: &SpringValue, target: f32) -> Step {
    let value = value.clone();
    async move {
        value.set(target)?;
        value.finished().await;
        Ok(())
    }
    .boxed()
}

/// Run `steps` one after another, stopping at the first error
pub async fn sequence<I>(steps: I) -> Result<()>
where
    I: IntoIterator<Item = Step>,
{
    for step in steps {
        step.await?;
    }
    Ok(())
}

/// Run `steps` concurrently and wait for every one of them
///
/// No step is cancelled when another fails; the first error in step order is
/// returned once all have finished.
pub async fn parallel<I>(steps: I) -> Result<()>
where
    I: IntoIterator<Item = Step>,
{
    first_error(join_all(steps).await)
}

fn first_error(results: Vec<Result<()>>) -> Result<()> {
    results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
}

// ============================================================================
// Stagger
// ============================================================================

/// Which index starts first
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StaggerFrom {
    #[default]
    First,
    Last,
    /// Outward from the middle
    Center,
    /// Inward from both ends
    Edges,
    /// Outward from one index
    Index(usize),
}

/// Custom delay for `(index, count)`
pub type DelayFn = Arc<dyn Fn(usize, usize) -> Duration + Send + Sync>;

/// How far apart stagger starts are
#[derive(Clone)]
pub enum StaggerDelay {
    /// This much per step of distance from the origin
    Fixed(Duration),
    /// Computed per `(index, count)`; [`StaggerFrom`] is not consulted
    Custom(DelayFn),
}

impl std::fmt::Debug for StaggerDelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaggerDelay::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            StaggerDelay::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Options for [`stagger`]
#[derive(Clone, Debug)]
pub struct StaggerOptions {
    pub delay: StaggerDelay,
    pub from: StaggerFrom,
    /// Added to every delay
    pub start: Duration,
}

impl StaggerOptions {
    /// `delay` per step of distance, starting from the first item
    pub fn new(delay: Duration) -> Self {
        Self {
            delay: StaggerDelay::Fixed(delay),
            from: StaggerFrom::First,
            start: Duration::ZERO,
        }
    }

    /// Delays computed by `f(index, count)`
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(usize, usize) -> Duration + Send + Sync + 'static,
    {
        Self {
            delay: StaggerDelay::Custom(Arc::new(f)),
            from: StaggerFrom::First,
            start: Duration::ZERO,
        }
    }

    pub fn from(mut self, from: StaggerFrom) -> Self {
        self.from = from;
        self
    }

    pub fn start(mut self, start: Duration) -> Self {
        self.start = start;
        self
    }
}

/// Distance of `index` from the stagger origin, in steps
fn distance(index: usize, count: usize, from: StaggerFrom) -> f64 {
    let last = count.saturating_sub(1);
    match from {
        StaggerFrom::First => index as f64,
        StaggerFrom::Last => (last - index) as f64,
        StaggerFrom::Center => (index as f64 - last as f64 / 2.0).abs(),
        StaggerFrom::Edges => index.min(last - index) as f64,
        StaggerFrom::Index(origin) => (index as f64 - origin.min(last) as f64).abs(),
    }
}

/// The start delay of each of `count` items
pub fn stagger_delays(count: usize, options: &StaggerOptions) -> Vec<Duration> {
    (0..count)
        .map(|index| {
            let delay = match &options.delay {
                StaggerDelay::Fixed(step) => {
                    let nanos = step.as_nanos() as f64 * distance(index, count, options.from);
                    Duration::from_nanos(nanos.round() as u64)
                }
                StaggerDelay::Custom(f) => f(index, count),
            };
            options.start + delay
        })
        .collect()
}

/// Call `f(item, index)` for every item after its stagger delay
///
/// All runs proceed concurrently once started; the result is the first error
/// in item order after every run has finished. Delays use Tokio timers, so
/// this must be polled inside a Tokio runtime with the time driver enabled.
pub async fn stagger<I, T, F, Fut>(items: I, f: F, options: StaggerOptions) -> Result<()>
where
    I: IntoIterator<Item = T>,
    F: Fn(T, usize) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let items: Vec<T> = items.into_iter().collect();
    let delays = stagger_delays(items.len(), &options);
    let f = &f;

    let runs = items
        .into_iter()
        .zip(delays)
        .enumerate()
        .map(|(index, (item, delay))| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            f(item, index).await
        });

    first_error(join_all(runs).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpringConfig;
    use crate::error::AnimationError;
    use crate::scheduler::FrameLoop;
    use futures::executor::block_on;
    use std::sync::Mutex;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn logged(log: &Arc<Mutex<Vec<usize>>>, tag: usize, result: Result<()>) -> Step {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(tag);
            result
        }
        .boxed()
    }

    #[test]
    fn test_sequence_stops_at_first_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failure = AnimationError::InvalidTrail("boom".into());
        let result = block_on(sequence([
            logged(&log, 0, Ok(())),
            logged(&log, 1, Err(failure.clone())),
            logged(&log, 2, Ok(())),
        ]));

        assert_eq!(result, Err(failure));
        assert_eq!(*log.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_parallel_runs_every_step() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = AnimationError::UnknownKey("a".into());
        let second = AnimationError::UnknownKey("b".into());
        let result = block_on(parallel([
            logged(&log, 0, Ok(())),
            logged(&log, 1, Err(first.clone())),
            logged(&log, 2, Err(second)),
        ]));

        assert_eq!(result, Err(first));
        let mut seen = log.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_sequence_of_spring_steps() {
        let frame_loop = FrameLoop::manual();
        let value = SpringValue::with_loop(0.0, SpringConfig::snappy(), &frame_loop).unwrap();
        let mut choreography = sequence([animate(&value, 10.0), animate(&value, -10.0)]).boxed();

        // The second step must not start before the first has rested
        assert!((&mut choreography).now_or_never().is_none());
        assert_eq!(value.target(), 10.0);

        let mut done = None;
        for _ in 0..2000 {
            frame_loop.advance(Duration::from_micros(16_667));
            if let Some(result) = (&mut choreography).now_or_never() {
                done = Some(result);
                break;
            }
        }
        assert_eq!(done, Some(Ok(())));
        assert_eq!(value.get(), -10.0);
    }

    #[test]
    fn test_stagger_delays_by_origin() {
        let fixed = StaggerOptions::new(ms(10));
        assert_eq!(stagger_delays(3, &fixed), vec![ms(0), ms(10), ms(20)]);
        assert_eq!(
            stagger_delays(3, &fixed.clone().from(StaggerFrom::Last)),
            vec![ms(20), ms(10), ms(0)]
        );
        assert_eq!(
            stagger_delays(5, &fixed.clone().from(StaggerFrom::Center)),
            vec![ms(20), ms(10), ms(0), ms(10), ms(20)]
        );
        assert_eq!(
            stagger_delays(4, &fixed.clone().from(StaggerFrom::Edges)),
            vec![ms(0), ms(10), ms(10), ms(0)]
        );
        assert_eq!(
            stagger_delays(4, &fixed.clone().from(StaggerFrom::Index(1)).start(ms(5))),
            vec![ms(15), ms(5), ms(15), ms(25)]
        );
        assert!(stagger_delays(0, &fixed).is_empty());
    }

    #[test]
    fn test_stagger_custom_delay() {
        let options = StaggerOptions::custom(|index, count| ms((count - index) as u64 * 3));
        assert_eq!(stagger_delays(3, &options), vec![ms(9), ms(6), ms(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stagger_offsets_start_times() {
        let started = Arc::new(Mutex::new(Vec::new()));
        let origin = tokio::time::Instant::now();

        let started_clone = started.clone();
        let result = stagger(
            ["a", "b", "c"],
            move |item, index| {
                let started = started_clone.clone();
                async move {
                    started.lock().unwrap().push((item, index, origin.elapsed()));
                    Ok(())
                }
            },
            StaggerOptions::new(ms(50)),
        )
        .await;

        assert!(result.is_ok());
        let started = started.lock().unwrap();
        let at = |name: &str| started.iter().find(|(item, _, _)| *item == name).unwrap().2;
        assert!(at("b") >= at("a") + ms(50));
        assert!(at("c") >= at("b") + ms(50));
    }
}
