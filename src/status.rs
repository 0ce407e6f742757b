//! Message status information.
//!
//! This module provides the [`Status`] struct returned by typed receives,
//! describing the message that was matched.

/// Information about a received message.
///
/// # Example
///
/// ```
/// # use ferrogroup::{local, Result};
/// local::run(2, |world| -> Result<()> {
///     if world.rank() == 0 {
///         world.send(&[1.0f64, 2.0, 3.0], 1, 7)?;
///     } else {
///         let mut buf = [0.0f64; 3];
///         let status = world.recv(&mut buf, 0, 7)?;
///         assert_eq!((status.source, status.tag, status.count), (0, 7, 3));
///     }
///     Ok(())
/// })
/// .unwrap();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Source rank of the message.
    pub source: i32,
    /// Tag of the message.
    pub tag: i32,
    /// Number of elements in the message.
    pub count: usize,
}
