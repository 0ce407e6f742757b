//! Communicator handle and point-to-point channel operations.

use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::message::{typed_frame, value_frame, Frame};
use crate::request::Request;
use crate::status::Status;
use crate::transport::{Context, Envelope, Message, Transport};
use crate::Group;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// A view of the process group through which all communication is issued.
///
/// Obtained from [`Group::world`]; it borrows the group, so it cannot outlive
/// it. Every method fails with [`Error::GroupFinalized`] once the group has
/// been finalized.
///
/// # Example
///
/// ```
/// use ferrogroup::{local, Result};
///
/// let sizes = local::run(4, |world| -> Result<i32> {
///     println!("I am rank {} of {}", world.rank(), world.size());
///     Ok(world.size())
/// })
/// .unwrap();
/// assert_eq!(sizes, vec![4; 4]);
/// ```
#[derive(Clone, Copy)]
pub struct Communicator<'g> {
    group: &'g Group,
}

impl<'g> Communicator<'g> {
    pub(crate) fn new(group: &'g Group) -> Self {
        Communicator { group }
    }

    /// The group this communicator belongs to.
    pub fn group(&self) -> &'g Group {
        self.group
    }

    /// Get the rank of the calling process in this communicator.
    pub fn rank(&self) -> i32 {
        self.group.rank()
    }

    /// Get the number of processes in this communicator.
    pub fn size(&self) -> i32 {
        self.group.size()
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        self.group.transport()
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.group.is_finalized() {
            return Err(Error::GroupFinalized);
        }
        Ok(())
    }

    /// A peer must be another member of the group; self-messaging is refused.
    pub(crate) fn check_peer(&self, op: &'static str, rank: i32) -> Result<()> {
        if rank < 0 || rank >= self.size() || rank == self.rank() {
            return Err(self.unreachable(op, rank));
        }
        Ok(())
    }

    pub(crate) fn check_root(&self, op: &'static str, root: i32) -> Result<()> {
        if root < 0 || root >= self.size() {
            return Err(self.unreachable(op, root));
        }
        Ok(())
    }

    fn unreachable(&self, op: &'static str, rank: i32) -> Error {
        Error::UnreachableRank {
            op,
            caller: self.rank(),
            rank,
            size: self.size(),
        }
    }

    pub(crate) fn post(&self, dest: i32, context: Context, tag: i32, frame: Vec<u8>) -> Result<()> {
        log::trace!(
            "rank {} -> {dest} [{context:?}/{tag}] {} bytes",
            self.rank(),
            frame.len()
        );
        self.transport().send(Message {
            envelope: Envelope {
                source: self.rank(),
                dest,
                context,
                tag,
            },
            frame,
        })
    }

    pub(crate) fn fetch(&self, source: i32, context: Context, tag: i32) -> Result<Vec<u8>> {
        let frame = self.transport().recv(source, context, tag)?;
        log::trace!(
            "rank {} <- {source} [{context:?}/{tag}] {} bytes",
            self.rank(),
            frame.len()
        );
        Ok(frame)
    }

    // ========================================================================
    // Point-to-Point: generic values
    // ========================================================================

    /// Send a serializable value to another process.
    ///
    /// Returns once the value has been handed to the transport.
    pub fn send_value<T: Serialize + ?Sized>(&self, value: &T, dest: i32, tag: i32) -> Result<()> {
        self.ensure_active()?;
        self.check_peer("send_value", dest)?;
        let frame = value_frame(value)?;
        self.post(dest, Context::PointToPoint, tag, frame)
    }

    /// Receive a value sent with [`send_value`](Self::send_value).
    ///
    /// Messages from one source with one tag are received in send order.
    pub fn recv_value<T: DeserializeOwned>(&self, source: i32, tag: i32) -> Result<T> {
        self.ensure_active()?;
        self.check_peer("recv_value", source)?;
        let frame = self.fetch(source, Context::PointToPoint, tag)?;
        Frame::parse(&frame)?.into_value()
    }

    /// Nonblocking [`send_value`](Self::send_value).
    pub fn isend_value<T: Serialize + ?Sized>(
        &self,
        value: &T,
        dest: i32,
        tag: i32,
    ) -> Result<Request<()>> {
        self.send_value(value, dest, tag)?;
        Ok(Request::ready(Arc::clone(self.transport()), "isend_value", ()))
    }

    /// Nonblocking [`recv_value`](Self::recv_value).
    pub fn irecv_value<T>(&self, source: i32, tag: i32) -> Result<Request<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.ensure_active()?;
        self.check_peer("irecv_value", source)?;
        Ok(Request::recv(
            Arc::clone(self.transport()),
            "irecv_value",
            source,
            tag,
            |frame| Frame::parse(&frame)?.into_value(),
        ))
    }

    // ========================================================================
    // Point-to-Point: typed buffers
    // ========================================================================

    /// Send a typed buffer to another process.
    pub fn send<T: Datatype>(&self, data: &[T], dest: i32, tag: i32) -> Result<()> {
        self.ensure_active()?;
        self.check_peer("send", dest)?;
        self.post(dest, Context::PointToPoint, tag, typed_frame(data))
    }

    /// Receive a typed buffer into `data`.
    ///
    /// `data.len()` is the declared element count; a message of any other
    /// length fails with [`Error::BufferSizeMismatch`] and leaves `data`
    /// untouched.
    pub fn recv<T: Datatype>(&self, data: &mut [T], source: i32, tag: i32) -> Result<Status> {
        self.ensure_active()?;
        self.check_peer("recv", source)?;
        let frame = self.fetch(source, Context::PointToPoint, tag)?;
        Frame::parse(&frame)?.read_into("recv", data)?;
        Ok(Status {
            source,
            tag,
            count: data.len(),
        })
    }

    /// Nonblocking [`send`](Self::send). The data is copied out before return.
    pub fn isend<T: Datatype>(&self, data: &[T], dest: i32, tag: i32) -> Result<Request<()>> {
        self.send(data, dest, tag)?;
        Ok(Request::ready(Arc::clone(self.transport()), "isend", ()))
    }

    /// Nonblocking receive of exactly `count` elements.
    pub fn irecv<T: Datatype>(&self, count: usize, source: i32, tag: i32) -> Result<Request<Vec<T>>> {
        self.ensure_active()?;
        self.check_peer("irecv", source)?;
        Ok(Request::recv(
            Arc::clone(self.transport()),
            "irecv",
            source,
            tag,
            move |frame| {
                let mut out = vec![T::default(); count];
                Frame::parse(&frame)?.read_into("irecv", &mut out)?;
                Ok(out)
            },
        ))
    }
}

impl std::fmt::Debug for Communicator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish()
    }
}
