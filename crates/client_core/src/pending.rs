use std::{
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};

use tokio::task::{AbortHandle, JoinError, JoinHandle};

use crate::error::{ignore_abort, GatewayError};

/// A query that is already running.
///
/// Awaiting it yields `Ok(Some(value))` on success and `Ok(None)` if it was
/// cancelled. Dropping it does not cancel the request; call [`cancel`] or keep
/// a [`CancelHandle`] for that.
///
/// [`cancel`]: PendingQuery::cancel
pub struct PendingQuery<T> {
    task: JoinHandle<Result<T, GatewayError>>,
}

#[derive(Debug, Clone)]
pub struct CancelHandle(AbortHandle);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.abort();
    }
}

impl<T: Send + 'static> PendingQuery<T> {
    pub(crate) fn spawn<F>(query: F) -> Self
    where
        F: Future<Output = Result<T, GatewayError>> + Send + 'static,
    {
        Self {
            task: tokio::spawn(query),
        }
    }
}

impl<T> PendingQuery<T> {
    /// Abort the underlying transport call. State already dispatched stays.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.task.abort_handle())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Future for PendingQuery<T> {
    type Output = Result<Option<T>, GatewayError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let joined = ready!(Pin::new(&mut self.task).poll(cx));
        Poll::Ready(ignore_abort(flatten_join(joined)))
    }
}

/// Unwrap a gateway task's output. A cancelled task reads as
/// [`GatewayError::Aborted`]; a panic is resumed on the awaiting side.
pub(crate) fn flatten_join<T>(
    joined: Result<Result<T, GatewayError>, JoinError>,
) -> Result<T, GatewayError> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Err(GatewayError::Aborted),
        Err(err) => std::panic::resume_unwind(err.into_panic()),
    }
}
