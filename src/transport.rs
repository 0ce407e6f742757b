//! The message substrate beneath the group.
//!
//! A [`Transport`] is one rank's endpoint into a reliable, ordered fabric
//! with a fixed number of ranks. It moves opaque frames; everything above it
//! (framing, codecs, collective algorithms) lives in this crate.
//!
//! Messages are matched on `(source, context, tag)`. Frames sharing a match
//! key are delivered in the order they were sent. Nothing is promised across
//! different keys.

use crate::error::Result;

/// Traffic class of a message.
///
/// Separating classes keeps application tags from ever matching the
/// library's own collective or control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    /// Application point-to-point traffic
    PointToPoint,
    /// Data movement inside collective operations
    Collective,
    /// Group bring-up, barriers and teardown
    Control,
}

/// Routing information of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Envelope {
    /// Sending rank
    pub source: i32,
    /// Receiving rank
    pub dest: i32,
    /// Traffic class
    pub context: Context,
    /// Application- or library-chosen stream identifier
    pub tag: i32,
}

/// A framed message in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Routing information
    pub envelope: Envelope,
    /// Framed payload
    pub frame: Vec<u8>,
}

/// One rank's endpoint into the substrate.
///
/// Implementations must deliver every frame exactly once and preserve send
/// order per `(source, dest, context, tag)`. `send` may return as soon as the
/// frame is queued for delivery.
pub trait Transport: Send + Sync {
    /// Rank of this endpoint.
    fn rank(&self) -> i32;

    /// Number of ranks in the fabric, as seen by this endpoint.
    fn size(&self) -> i32;

    /// Queue a message for delivery.
    fn send(&self, message: Message) -> Result<()>;

    /// Block until a message matching `(source, context, tag)` arrives.
    fn recv(&self, source: i32, context: Context, tag: i32) -> Result<Vec<u8>>;

    /// Take a matching message if one has already arrived.
    fn try_recv(&self, source: i32, context: Context, tag: i32) -> Result<Option<Vec<u8>>>;

    /// Release this endpoint. No further traffic is accepted afterwards.
    fn finalize(&self) -> Result<()>;
}
