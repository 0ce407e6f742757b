//! # ferrogroup
//!
//! Message passing for a fixed group of cooperating ranks.
//!
//! A group of `N` ranks, numbered `0..N`, exchanges data through:
//! - Point-to-point channels: blocking and nonblocking send/receive of
//!   serializable values or typed numeric buffers, matched on `(source, tag)`
//! - Collectives: barrier, broadcast, scatter, gather, and their
//!   variable-count forms scatterv and gatherv
//! - A local dispatcher hook for mapping a received shard on a rank-private
//!   thread pool before gathering the results
//!
//! Ranks reach each other through a [`Transport`]. The crate ships an
//! in-process substrate in [`local`], which runs every rank as a thread.
//!
//! ## Supported Types
//!
//! Typed-buffer operations are generic over [`Datatype`]:
//! `f32`, `f64`, `i32`, `i64`, `u8`, `u32`, `u64`
//!
//! Generic operations accept anything implementing serde's `Serialize` and
//! `DeserializeOwned`; [`Value`] covers the dynamic case.
//!
//! ## Quick Start
//!
//! ```
//! use ferrogroup::{local, Result};
//!
//! fn main() -> Result<()> {
//!     let sums = local::run(4, |world| -> Result<f64> {
//!         let rank = world.rank();
//!         let size = world.size();
//!         println!("Hello from rank {} of {}", rank, size);
//!
//!         let mut data = vec![0.0f64; 100];
//!         if rank == 0 {
//!             data.fill(42.0);
//!         }
//!         world.broadcast(&mut data, 0)?;
//!         Ok(data.iter().sum())
//!     })?;
//!     assert_eq!(sums, vec![4200.0; 4]);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `FERROGROUP_LOCAL_THREADS` | worker threads of each rank's [`RayonDispatcher`] |
//! | `FERROGROUP_STRICT_SYNC` | fan-in before broadcast and scatter (default on) |
//! | `FERROGROUP_HANDSHAKE` | group-size agreement at init (default on) |
//!
//! See [`Config`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

mod array;
mod codec;
mod collective;
mod comm;
mod config;
mod datatype;
mod dispatch;
mod error;
pub mod local;
mod message;
mod request;
mod status;
mod transport;

pub use array::{partition_counts, ArrayView, NdArray};
pub use codec::{bind, decode, describe, encode, TypedBufferDescriptor, Value};
pub use collective::{CollectiveKind, CollectiveOp, VarBuffer};
pub use comm::Communicator;
pub use config::{Config, ENV_HANDSHAKE, ENV_LOCAL_THREADS, ENV_STRICT_SYNC};
pub use datatype::{Datatype, DatatypeTag};
pub use dispatch::{LocalDispatcher, RayonDispatcher, SerialDispatcher};
pub use error::{Error, OrAbort, Result};
pub use request::Request;
pub use status::Status;
pub use transport::{Context, Envelope, Message, Transport};

use message::{value_frame, Frame};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const HANDSHAKE_REPORT: i32 = 0;
const HANDSHAKE_VERDICT: i32 = 1;

/// Membership of one rank in a process group.
///
/// A group is bound once per transport endpoint and lives until it is
/// finalized or dropped. All communication goes through the communicator
/// returned by [`world`](Self::world).
///
/// # Example
///
/// ```
/// use ferrogroup::local::LocalUniverse;
/// use ferrogroup::Group;
///
/// let universe = LocalUniverse::new(1);
/// let group = Group::init(universe.endpoint(0).unwrap()).unwrap();
/// assert_eq!((group.rank(), group.size()), (0, 1));
/// group.finalize().unwrap();
/// ```
pub struct Group {
    transport: Arc<dyn Transport>,
    rank: i32,
    size: i32,
    config: Config,
    finalized: AtomicBool,
    /// Marker to make Group !Send and !Sync
    _marker: PhantomData<*const ()>,
}

impl Group {
    /// Bind a group on `transport` with configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport reports an impossible rank, or if
    /// the ranks disagree on the group size.
    pub fn init<T: Transport + 'static>(transport: T) -> Result<Self> {
        Self::init_with_config(transport, Config::from_env())
    }

    /// Bind a group with an explicit configuration.
    ///
    /// This is collective when [`Config::handshake`] is set: every rank must
    /// call it before any of them returns.
    pub fn init_with_config<T: Transport + 'static>(transport: T, config: Config) -> Result<Self> {
        let rank = transport.rank();
        let size = transport.size();
        if size < 1 || rank < 0 || rank >= size {
            return Err(Error::UnreachableRank {
                op: "init",
                caller: rank,
                rank,
                size,
            });
        }
        let group = Group {
            transport: Arc::new(transport),
            rank,
            size,
            config,
            finalized: AtomicBool::new(false),
            _marker: PhantomData,
        };
        if group.config.handshake && size > 1 {
            group.agree_on_size()?;
        }
        log::debug!("rank {rank}: joined group of {size}");
        Ok(group)
    }

    /// Rank 0 collects every rank's view of the size and answers with its own.
    fn agree_on_size(&self) -> Result<()> {
        let world = self.world();
        if self.rank != 0 {
            world.post(0, Context::Control, HANDSHAKE_REPORT, value_frame(&self.size)?)?;
            let bytes = world.fetch(0, Context::Control, HANDSHAKE_VERDICT)?;
            let expected: i32 = Frame::parse(&bytes)?.into_value()?;
            if expected != self.size {
                return Err(Error::GroupSizeDisagreement {
                    rank: self.rank,
                    expected,
                    actual: self.size,
                });
            }
            return Ok(());
        }

        let mut disagreement = None;
        for source in 1..self.size {
            let bytes = world.fetch(source, Context::Control, HANDSHAKE_REPORT)?;
            let actual: i32 = Frame::parse(&bytes)?.into_value()?;
            if actual != self.size && disagreement.is_none() {
                disagreement = Some(Error::GroupSizeDisagreement {
                    rank: source,
                    expected: self.size,
                    actual,
                });
            }
        }
        let verdict = value_frame(&self.size)?;
        for dest in 1..self.size {
            world.post(dest, Context::Control, HANDSHAKE_VERDICT, verdict.clone())?;
        }
        disagreement.map_or(Ok(()), Err)
    }

    /// Rank of this process in the group.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Number of ranks in the group.
    pub fn size(&self) -> i32 {
        self.size
    }

    /// Configuration the group was bound with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Check if the group has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Get the communicator spanning every rank of the group.
    pub fn world(&self) -> Communicator<'_> {
        Communicator::new(self)
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Leave the group.
    ///
    /// Collective: waits at a barrier so no rank tears down its endpoint
    /// while a peer may still be sending to it. Every operation afterwards,
    /// including a second `finalize`, fails with [`Error::GroupFinalized`].
    pub fn finalize(&self) -> Result<()> {
        self.world().barrier()?;
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Err(Error::GroupFinalized);
        }
        log::debug!("rank {}: finalizing", self.rank);
        self.transport.finalize()
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        if !self.finalized.swap(true, Ordering::SeqCst) {
            log::debug!("rank {}: group dropped without finalize", self.rank);
            if let Err(err) = self.transport.finalize() {
                log::warn!("rank {}: releasing transport: {err}", self.rank);
            }
        }
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

// Group is neither Send nor Sync: a rank's membership stays on the thread
// that bound it. Requests may still move to other threads.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalTransport, LocalUniverse};

    /// Reports a different group size than the fabric actually has.
    struct Misreporting {
        inner: LocalTransport,
        size: i32,
    }

    impl Transport for Misreporting {
        fn rank(&self) -> i32 {
            self.inner.rank()
        }
        fn size(&self) -> i32 {
            self.size
        }
        fn send(&self, message: Message) -> Result<()> {
            self.inner.send(message)
        }
        fn recv(&self, source: i32, context: Context, tag: i32) -> Result<Vec<u8>> {
            self.inner.recv(source, context, tag)
        }
        fn try_recv(&self, source: i32, context: Context, tag: i32) -> Result<Option<Vec<u8>>> {
            self.inner.try_recv(source, context, tag)
        }
        fn finalize(&self) -> Result<()> {
            self.inner.finalize()
        }
    }

    #[test]
    fn handshake_catches_size_disagreement() {
        let universe = LocalUniverse::new(3);
        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..3)
                .map(|rank| {
                    let endpoint = universe.endpoint(rank).unwrap();
                    scope.spawn(move || {
                        let group = if rank == 2 {
                            Group::init_with_config(
                                Misreporting {
                                    inner: endpoint,
                                    size: 4,
                                },
                                Config::default(),
                            )
                        } else {
                            Group::init_with_config(endpoint, Config::default())
                        };
                        group.map(|_| ())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results[1].is_ok());
        for rank in [0, 2] {
            assert!(matches!(
                results[rank],
                Err(Error::GroupSizeDisagreement {
                    rank: 2,
                    expected: 3,
                    actual: 4
                })
            ));
        }
    }

    #[test]
    fn single_rank_group_finalizes_once() {
        let universe = LocalUniverse::new(1);
        let group = Group::init(universe.endpoint(0).unwrap()).unwrap();
        assert!(!group.is_finalized());
        group.finalize().unwrap();
        assert!(group.is_finalized());
        assert!(matches!(group.finalize(), Err(Error::GroupFinalized)));
        assert!(matches!(group.world().barrier(), Err(Error::GroupFinalized)));
    }

    #[test]
    fn transport_with_bad_rank_is_rejected() {
        let universe = LocalUniverse::new(2);
        let endpoint = universe.endpoint(1).unwrap();
        let lying = Misreporting {
            inner: endpoint,
            size: 1,
        };
        assert!(matches!(
            Group::init(lying),
            Err(Error::UnreachableRank { op: "init", .. })
        ));
    }
}
