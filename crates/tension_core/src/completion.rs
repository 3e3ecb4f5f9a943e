//! Per-run completion tokens
//!
//! Each animation run owns one [`RunToken`]. Callers obtain a [`Finished`]
//! future from the token; it resolves exactly once with the [`Completion`]
//! that ended the run. Starting a new run creates a new token, so a caller
//! that captured an older `Finished` never observes a later run.
//!
//! A token that is dropped without being resolved resolves its futures with
//! [`Completion::Destroyed`], so an awaiting caller can never hang on a value
//! that went away.

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// How an animation run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Completion {
    /// The value came to rest at its target
    Rested,
    /// The value was moved instantly with `jump`
    Jumped,
    /// `stop` was called mid-run
    Stopped,
    /// A new run (`set`) replaced this one before it came to rest
    Superseded,
    /// The value was destroyed or every handle to it was dropped
    Destroyed,
}

impl Completion {
    /// Whether the run reached its target naturally
    pub fn is_rested(self) -> bool {
        matches!(self, Completion::Rested)
    }
}

/// Resolving side of one animation run
pub struct RunToken {
    sender: Option<oneshot::Sender<Completion>>,
    finished: Finished,
}

impl RunToken {
    /// Start a new pending run
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            sender: Some(sender),
            finished: Finished {
                inner: receiver.shared(),
            },
        }
    }

    /// A future resolving when this run ends
    pub fn finished(&self) -> Finished {
        self.finished.clone()
    }

    /// End the run; later calls are no-ops
    pub fn resolve(&mut self, completion: Completion) {
        if let Some(sender) = self.sender.take() {
            // The receiver side lives inside `self.finished`, so this cannot fail
            let _ = sender.send(completion);
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sender.is_none()
    }
}

impl Default for RunToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunToken")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Future resolving when an animation run ends
///
/// Cheap to clone; every clone resolves with the same [`Completion`].
#[derive(Clone)]
pub struct Finished {
    inner: Shared<oneshot::Receiver<Completion>>,
}

impl Finished {
    /// An already-resolved future
    pub fn resolved(completion: Completion) -> Self {
        let mut token = RunToken::new();
        token.resolve(completion);
        token.finished()
    }

    /// The completion, if the run has already ended
    pub fn peek(&self) -> Option<Completion> {
        // `Shared::peek` only sees results some clone already polled out
        self.inner
            .clone()
            .now_or_never()
            .map(|result| result.unwrap_or(Completion::Destroyed))
    }

    pub fn is_resolved(&self) -> bool {
        self.peek().is_some()
    }
}

impl Future for Finished {
    type Output = Completion;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Completion> {
        self.inner
            .poll_unpin(cx)
            .map(|result| result.unwrap_or(Completion::Destroyed))
    }
}

impl std::fmt::Debug for Finished {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finished")
            .field("completion", &self.peek())
            .finish()
    }
}
