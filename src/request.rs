//! Request handles for nonblocking point-to-point operations.

use crate::error::{Error, Result};
use crate::transport::{Context, Transport};
use std::sync::Arc;

type Finish<T> = Box<dyn FnOnce(Vec<u8>) -> Result<T> + Send>;

enum Pending<T> {
    /// The transport already accepted the operation; only the result is left.
    Ready(T),
    /// A receive still waiting for its message.
    Recv {
        source: i32,
        tag: i32,
        finish: Finish<T>,
    },
}

/// A handle to a nonblocking operation.
///
/// A request is issued by [`isend`](crate::Communicator::isend),
/// [`irecv`](crate::Communicator::irecv) or their `_value` variants and
/// completes exactly once, through [`wait`](Self::wait) or a successful
/// [`test`](Self::test). Completing it again fails with
/// [`Error::RequestAlreadyCompleted`].
///
/// # Example
///
/// ```
/// use ferrogroup::{local, Result, Value};
///
/// local::run(2, |world| -> Result<()> {
///     if world.rank() == 0 {
///         let data = Value::map([("a", Value::Int(7)), ("b", Value::Float(3.5))])?;
///         let mut req = world.isend_value(&data, 1, 11)?;
///         req.wait()?;
///     } else {
///         let mut req = world.irecv_value::<Value>(0, 11)?;
///         // Local work can overlap the transfer here.
///         let data = req.wait()?;
///         assert_eq!(data.get("a"), Some(&Value::Int(7)));
///     }
///     Ok(())
/// })
/// .unwrap();
/// ```
pub struct Request<T> {
    transport: Arc<dyn Transport>,
    op: &'static str,
    pending: Option<Pending<T>>,
}

impl<T> Request<T> {
    /// Request whose result is already available.
    pub(crate) fn ready(transport: Arc<dyn Transport>, op: &'static str, value: T) -> Self {
        Request {
            transport,
            op,
            pending: Some(Pending::Ready(value)),
        }
    }

    /// Receive request completed by `finish` once the frame arrives.
    pub(crate) fn recv(
        transport: Arc<dyn Transport>,
        op: &'static str,
        source: i32,
        tag: i32,
        finish: impl FnOnce(Vec<u8>) -> Result<T> + Send + 'static,
    ) -> Self {
        Request {
            transport,
            op,
            pending: Some(Pending::Recv {
                source,
                tag,
                finish: Box::new(finish),
            }),
        }
    }

    /// Check if this request has been completed.
    pub fn is_completed(&self) -> bool {
        self.pending.is_none()
    }

    /// Wait for this operation to complete and take its result.
    ///
    /// Blocks until the matching message has arrived. After this returns the
    /// request is spent.
    pub fn wait(&mut self) -> Result<T> {
        match self.pending.take() {
            None => Err(Error::RequestAlreadyCompleted),
            Some(Pending::Ready(value)) => Ok(value),
            Some(Pending::Recv {
                source,
                tag,
                finish,
            }) => {
                let frame = self.transport.recv(source, Context::PointToPoint, tag)?;
                finish(frame)
            }
        }
    }

    /// Complete the operation if it can be done without blocking.
    ///
    /// Returns `Some(result)` exactly once, when the request completes, and
    /// `None` while it is still in flight.
    pub fn test(&mut self) -> Result<Option<T>> {
        match self.pending.take() {
            None => Err(Error::RequestAlreadyCompleted),
            Some(Pending::Ready(value)) => Ok(Some(value)),
            Some(Pending::Recv {
                source,
                tag,
                finish,
            }) => match self.transport.try_recv(source, Context::PointToPoint, tag)? {
                Some(frame) => finish(frame).map(Some),
                None => {
                    self.pending = Some(Pending::Recv {
                        source,
                        tag,
                        finish,
                    });
                    Ok(None)
                }
            },
        }
    }

    /// Wait for every request, returning results in the same order.
    pub fn wait_all(requests: impl IntoIterator<Item = Request<T>>) -> Result<Vec<T>> {
        requests.into_iter().map(|mut r| r.wait()).collect()
    }
}

impl<T> Drop for Request<T> {
    fn drop(&mut self) {
        if let Some(Pending::Recv { source, tag, .. }) = &self.pending {
            // The message stays queued and will match the next receive.
            log::warn!(
                "{} request from rank {source} (tag {tag}) dropped before completion",
                self.op
            );
        }
    }
}

impl<T> std::fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("op", &self.op)
            .field("completed", &self.is_completed())
            .finish()
    }
}
