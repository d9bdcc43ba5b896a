//! Boxed asynchronous operations, the core's unit of schedulable work.

use crate::error::TaskError;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Future returned by an [`Operation`].
pub type OperationFuture<T> = Pin<Box<dyn Future<Output = Result<T, TaskError>> + Send>>;

/// A unit of asynchronous work.
///
/// The core never inspects an operation beyond its outcome. The token handed
/// to the operation is derived from the caller's cancellation scope; the
/// operation must observe it and release external resources (subprocesses,
/// file handles) promptly when it fires.
pub type Operation<T> = Box<dyn FnOnce(CancellationToken) -> OperationFuture<T> + Send>;

/// Boxes an async closure into an [`Operation`].
///
/// # Examples
///
/// ```
/// use conductor::operation;
///
/// let op = operation(|_cancel| async move { Ok(21 * 2) });
/// # let _ = op;
/// ```
pub fn operation<T, F, Fut>(f: F) -> Operation<T>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
{
    Box::new(move |cancel| Box::pin(f(cancel)))
}
