//! Evaluation result types for FHIRPath evaluation
//!
//! An evaluation either completes synchronously ([`EvaluationResult::Ready`])
//! or hands back a future ([`EvaluationResult::Deferred`]) once an
//! asynchronous function was reached, or always when the async mode asks for it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::core::{Collection, Result};

/// Immediate or deferred result collection
pub enum EvaluationResult {
    Ready(Collection),
    Deferred(BoxFuture<'static, Result<Collection>>),
}

impl EvaluationResult {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    /// The collection of a synchronous evaluation, `None` when deferred
    pub fn ready(self) -> Option<Collection> {
        match self {
            Self::Ready(collection) => Some(collection),
            Self::Deferred(_) => None,
        }
    }

    /// Await either shape uniformly
    pub fn into_future(self) -> BoxFuture<'static, Result<Collection>> {
        match self {
            Self::Ready(collection) => futures::future::ready(Ok(collection)).boxed(),
            Self::Deferred(future) => future,
        }
    }
}

impl fmt::Debug for EvaluationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(collection) => f.debug_tuple("Ready").field(collection).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Suspends exactly once
///
/// Awaited at every asynchronous function boundary so a synchronous poll of
/// the evaluation observes `Pending` as soon as async work is reached.
#[derive(Debug, Default)]
pub(crate) struct YieldOnce {
    yielded: bool,
}

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
