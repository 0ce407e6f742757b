//! Collective operations over the whole group.
//!
//! Every collective is a synchronization point: all ranks must call the same
//! operation with the same root, in the same order relative to other
//! collectives. A rank that never calls leaves the others blocked; there is
//! no timeout.
//!
//! Data moves linearly between root and each other rank. With
//! [`Config::strict_sync`](crate::Config::strict_sync) set, broadcast and
//! scatter first collect an arrival token from every rank at root, so no
//! rank sees a result before the whole group has entered the call.

use crate::array::{displacements, NdArray};
use crate::comm::Communicator;
use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::message::{token_frame, typed_frame, value_frame, Frame};
use crate::transport::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Kind of collective operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectiveKind {
    /// Synchronization only
    Barrier,
    /// Root to every rank, same data
    Broadcast,
    /// Root to every rank, one equal share each
    Scatter,
    /// Root to every rank, shares of declared lengths
    ScatterV,
    /// Every rank to root, one equal share each
    Gather,
    /// Every rank to root, shares of any length
    GatherV,
}

impl CollectiveKind {
    fn data_tag(self) -> i32 {
        self as i32 * 2
    }

    fn arrival_tag(self) -> i32 {
        self as i32 * 2 + 1
    }
}

/// One rank's part in one collective call.
///
/// Built on entry to each collective and dropped on return; nothing carries
/// over between calls.
#[derive(Debug, Clone, Copy)]
pub struct CollectiveOp<'g> {
    comm: Communicator<'g>,
    kind: CollectiveKind,
    root: i32,
}

impl<'g> CollectiveOp<'g> {
    fn begin(comm: Communicator<'g>, kind: CollectiveKind, root: i32, op: &'static str) -> Result<Self> {
        comm.ensure_active()?;
        comm.check_root(op, root)?;
        log::debug!("rank {}: {op} (root {root})", comm.rank());
        Ok(CollectiveOp { comm, kind, root })
    }

    /// Operation kind.
    pub fn kind(&self) -> CollectiveKind {
        self.kind
    }

    /// Root rank of this call.
    pub fn root(&self) -> i32 {
        self.root
    }

    fn is_root(&self) -> bool {
        self.comm.rank() == self.root
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn others(&self) -> impl Iterator<Item = i32> {
        let root = self.root;
        (0..self.comm.size()).filter(move |&r| r != root)
    }

    /// Fan every rank in to root.
    fn gather_arrivals(&self) -> Result<()> {
        if self.is_root() {
            for source in self.others() {
                let frame = self
                    .comm
                    .fetch(source, Context::Collective, self.kind.arrival_tag())?;
                Frame::parse(&frame)?.expect_token("arrival")?;
            }
            Ok(())
        } else {
            self.comm.post(
                self.root,
                Context::Collective,
                self.kind.arrival_tag(),
                token_frame(),
            )
        }
    }

    fn arrive(&self) -> Result<()> {
        if self.comm.group().config().strict_sync {
            self.gather_arrivals()
        } else {
            Ok(())
        }
    }

    fn send_to(&self, dest: i32, frame: Vec<u8>) -> Result<()> {
        self.comm
            .post(dest, Context::Collective, self.kind.data_tag(), frame)
    }

    fn recv_from(&self, source: i32) -> Result<Vec<u8>> {
        self.comm
            .fetch(source, Context::Collective, self.kind.data_tag())
    }
}

/// Result of a variable-count gather at root.
#[derive(Debug, Clone, PartialEq)]
pub struct VarBuffer<T> {
    data: Vec<T>,
    counts: Vec<usize>,
}

impl<T> VarBuffer<T> {
    /// All contributions concatenated in rank order.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Element count contributed by each rank.
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Offset of each rank's segment: the prefix sums of [`counts`](Self::counts).
    pub fn displacements(&self) -> Vec<usize> {
        displacements(&self.counts)
    }

    /// The segment contributed by `rank`.
    pub fn segment(&self, rank: usize) -> Option<&[T]> {
        let count = *self.counts.get(rank)?;
        let start: usize = self.counts[..rank].iter().sum();
        self.data.get(start..start + count)
    }

    /// Segments in rank order.
    pub fn segments(&self) -> impl Iterator<Item = &[T]> + '_ {
        let mut rest = self.data.as_slice();
        self.counts.iter().map(move |&count| {
            let (head, tail) = rest.split_at(count);
            rest = tail;
            head
        })
    }

    /// Split into `(data, counts)`.
    pub fn into_parts(self) -> (Vec<T>, Vec<usize>) {
        (self.data, self.counts)
    }
}

impl<'g> Communicator<'g> {
    // ========================================================================
    // Synchronization
    // ========================================================================

    /// Barrier synchronization.
    ///
    /// All processes in the group must call this function. No process will
    /// return until all processes have entered the barrier.
    pub fn barrier(&self) -> Result<()> {
        let op = CollectiveOp::begin(*self, CollectiveKind::Barrier, 0, "barrier")?;
        op.gather_arrivals()?;
        if op.is_root() {
            for dest in op.others() {
                op.send_to(dest, token_frame())?;
            }
            Ok(())
        } else {
            Frame::parse(&op.recv_from(op.root)?)?.expect_token("barrier")
        }
    }

    // ========================================================================
    // Broadcast
    // ========================================================================

    /// Broadcast a typed buffer from root to all processes.
    ///
    /// `data` is the input at root and the output elsewhere; every rank must
    /// pass a buffer of the same length.
    pub fn broadcast<T: Datatype>(&self, data: &mut [T], root: i32) -> Result<()> {
        let op = CollectiveOp::begin(*self, CollectiveKind::Broadcast, root, "broadcast")?;
        op.arrive()?;
        if op.is_root() {
            let frame = typed_frame(data);
            for dest in op.others() {
                op.send_to(dest, frame.clone())?;
            }
            Ok(())
        } else {
            Frame::parse(&op.recv_from(root)?)?.read_into("broadcast", data)
        }
    }

    /// Broadcast an array whose shape every rank already agrees on.
    pub fn broadcast_array<T: Datatype>(&self, array: &mut NdArray<T>, root: i32) -> Result<()> {
        self.broadcast(array.as_mut_slice(), root)
    }

    /// Broadcast a generic value from root.
    ///
    /// Non-root ranks pass a placeholder that is overwritten with root's value.
    pub fn broadcast_value<T>(&self, value: &mut T, root: i32) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        let op = CollectiveOp::begin(*self, CollectiveKind::Broadcast, root, "broadcast_value")?;
        op.arrive()?;
        if op.is_root() {
            let frame = value_frame(&*value)?;
            for dest in op.others() {
                op.send_to(dest, frame.clone())?;
            }
        } else {
            *value = Frame::parse(&op.recv_from(root)?)?.into_value()?;
        }
        Ok(())
    }

    // ========================================================================
    // Scatter
    // ========================================================================

    /// Scatter equal shares of a typed buffer from root.
    ///
    /// Each rank receives `recv.len()` elements; root's `send` must hold
    /// exactly `recv.len() * size` elements and is ignored elsewhere.
    pub fn scatter<T: Datatype>(&self, send: &[T], recv: &mut [T], root: i32) -> Result<()> {
        let op = CollectiveOp::begin(*self, CollectiveKind::Scatter, root, "scatter")?;
        let share = recv.len();
        if op.is_root() && send.len() != share * op.size() {
            return Err(Error::BufferSizeMismatch {
                op: "scatter",
                expected: share * op.size(),
                actual: send.len(),
            });
        }
        op.arrive()?;
        if op.is_root() {
            for (dest, chunk) in (0..self.size()).zip(send.chunks_exact(share.max(1))) {
                if dest == root {
                    recv.copy_from_slice(chunk);
                } else {
                    op.send_to(dest, typed_frame(chunk))?;
                }
            }
            if share == 0 {
                for dest in op.others() {
                    op.send_to(dest, typed_frame::<T>(&[]))?;
                }
            }
            Ok(())
        } else {
            Frame::parse(&op.recv_from(root)?)?.read_into("scatter", recv)
        }
    }

    /// Scatter one sub-array along axis 0 of root's array to each rank.
    ///
    /// Root's array has shape `[size, ...unit]`; every rank's `recv` has the
    /// unit's element count. Element order inside each unit is preserved.
    pub fn scatter_array<T: Datatype>(
        &self,
        send: Option<&NdArray<T>>,
        recv: &mut NdArray<T>,
        root: i32,
    ) -> Result<()> {
        if self.rank() != root {
            return self.scatter(&[], recv.as_mut_slice(), root);
        }
        let size = self.size() as usize;
        let send = send.ok_or(Error::ScatterLengthMismatch {
            op: "scatter_array",
            expected: size,
            actual: 0,
        })?;
        let units = send.shape().first().copied().unwrap_or(0);
        if units != size {
            return Err(Error::ScatterLengthMismatch {
                op: "scatter_array",
                expected: size,
                actual: units,
            });
        }
        if send.unit_len() != recv.len() {
            return Err(Error::BufferSizeMismatch {
                op: "scatter_array",
                expected: recv.len(),
                actual: send.unit_len(),
            });
        }
        self.scatter(send.as_slice(), recv.as_mut_slice(), root)
    }

    /// Scatter one generic value to each rank.
    ///
    /// Root supplies exactly `size` values; rank `i` receives `values[i]`.
    /// Non-root input is ignored.
    pub fn scatter_value<T>(&self, values: Option<Vec<T>>, root: i32) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let op = CollectiveOp::begin(*self, CollectiveKind::Scatter, root, "scatter_value")?;
        if !op.is_root() {
            op.arrive()?;
            return Frame::parse(&op.recv_from(root)?)?.into_value();
        }
        let mismatch = |actual| Error::ScatterLengthMismatch {
            op: "scatter_value",
            expected: op.size(),
            actual,
        };
        let values = values.ok_or_else(|| mismatch(0))?;
        if values.len() != op.size() {
            return Err(mismatch(values.len()));
        }
        op.arrive()?;
        let mut own = None;
        for (dest, value) in (0..self.size()).zip(values) {
            if dest == root {
                own = Some(value);
            } else {
                op.send_to(dest, value_frame(&value)?)?;
            }
        }
        own.ok_or_else(|| mismatch(op.size()))
    }

    /// Scatter shares of declared, possibly different, lengths.
    ///
    /// `counts` must be identical on every rank and hold one entry per rank;
    /// rank `i` receives `counts[i]` elements starting at the sum of the
    /// counts before it. At root the counts must add up to `send.len()`.
    pub fn scatterv<T: Datatype>(&self, send: &[T], counts: &[usize], root: i32) -> Result<Vec<T>> {
        let op = CollectiveOp::begin(*self, CollectiveKind::ScatterV, root, "scatterv")?;
        if counts.len() != op.size() {
            return Err(Error::ScatterLengthMismatch {
                op: "scatterv",
                expected: op.size(),
                actual: counts.len(),
            });
        }
        let total: usize = counts.iter().sum();
        if op.is_root() && total != send.len() {
            return Err(Error::BufferSizeMismatch {
                op: "scatterv",
                expected: total,
                actual: send.len(),
            });
        }
        op.arrive()?;
        let mut own = vec![T::default(); counts[self.rank() as usize]];
        if op.is_root() {
            let displs = displacements(counts);
            for (dest, (&start, &count)) in (0..self.size()).zip(displs.iter().zip(counts)) {
                let segment = &send[start..start + count];
                if dest == root {
                    own.copy_from_slice(segment);
                } else {
                    op.send_to(dest, typed_frame(segment))?;
                }
            }
        } else {
            Frame::parse(&op.recv_from(root)?)?.read_into("scatterv", &mut own)?;
        }
        Ok(own)
    }

    // ========================================================================
    // Gather
    // ========================================================================

    /// Gather equal shares of a typed buffer at root.
    ///
    /// Root's `recv` must hold `send.len() * size` elements and receives the
    /// shares in rank order; it is ignored elsewhere.
    pub fn gather<T: Datatype>(&self, send: &[T], recv: &mut [T], root: i32) -> Result<()> {
        let op = CollectiveOp::begin(*self, CollectiveKind::Gather, root, "gather")?;
        if !op.is_root() {
            return op.send_to(root, typed_frame(send));
        }
        let share = send.len();
        if recv.len() != share * op.size() {
            return Err(Error::BufferSizeMismatch {
                op: "gather",
                expected: share * op.size(),
                actual: recv.len(),
            });
        }
        for source in 0..self.size() {
            let start = source as usize * share;
            let slot = &mut recv[start..start + share];
            if source == root {
                slot.copy_from_slice(send);
            } else {
                Frame::parse(&op.recv_from(source)?)?.read_into("gather", slot)?;
            }
        }
        Ok(())
    }

    /// Gather one array per rank at root, stacked along a new axis 0.
    ///
    /// Every rank must contribute the same shape; root gets
    /// `[size, ...shape]`, other ranks get `None`.
    pub fn gather_array<T: Datatype>(&self, send: &NdArray<T>, root: i32) -> Result<Option<NdArray<T>>> {
        if self.rank() != root {
            self.gather(send.as_slice(), &mut [], root)?;
            return Ok(None);
        }
        let mut shape = Vec::with_capacity(send.ndim() + 1);
        shape.push(self.size() as usize);
        shape.extend_from_slice(send.shape());
        let mut stacked = NdArray::zeros(&shape);
        self.gather(send.as_slice(), stacked.as_mut_slice(), root)?;
        Ok(Some(stacked))
    }

    /// Gather one generic value per rank at root.
    ///
    /// Root receives the values indexed by rank; other ranks get `None`.
    pub fn gather_value<T>(&self, value: T, root: i32) -> Result<Option<Vec<T>>>
    where
        T: Serialize + DeserializeOwned,
    {
        let op = CollectiveOp::begin(*self, CollectiveKind::Gather, root, "gather_value")?;
        if !op.is_root() {
            op.send_to(root, value_frame(&value)?)?;
            return Ok(None);
        }
        let mut own = Some(value);
        let mut gathered = Vec::with_capacity(op.size());
        for source in 0..self.size() {
            if source == root {
                gathered.extend(own.take());
            } else {
                gathered.push(Frame::parse(&op.recv_from(source)?)?.into_value()?);
            }
        }
        Ok(Some(gathered))
    }

    /// Gather buffers of locally determined lengths at root.
    ///
    /// Runs in two phases: the per-rank lengths are gathered first so root
    /// can size its receive buffer, then the data follows. Root gets the
    /// concatenation in rank order with the counts; other ranks get `None`.
    pub fn gatherv<T: Datatype>(&self, send: &[T], root: i32) -> Result<Option<VarBuffer<T>>> {
        let own_len = [send.len() as u64];
        let mut lengths = vec![0u64; if self.rank() == root { self.size() as usize } else { 0 }];
        self.gather(&own_len, &mut lengths, root)?;

        if self.rank() != root {
            self.gatherv_into(send, &mut [], &[], root)?;
            return Ok(None);
        }
        let counts = lengths
            .into_iter()
            .map(|n| {
                usize::try_from(n)
                    .map_err(|_| Error::MalformedPayload(format!("gathered length {n} overflows")))
            })
            .collect::<Result<Vec<usize>>>()?;
        let mut data = vec![T::default(); counts.iter().sum()];
        self.gatherv_into(send, &mut data, &counts, root)?;
        Ok(Some(VarBuffer { data, counts }))
    }

    /// Gather buffers whose lengths root already knows.
    ///
    /// Root passes `counts` (one per rank) and a `recv` of their sum; both are
    /// ignored elsewhere. A rank whose contribution differs from its declared
    /// count fails the call at root with
    /// [`Error::GatherVSizeNotPrenegotiated`]. Use [`gatherv`](Self::gatherv)
    /// when the lengths are not known in advance.
    pub fn gatherv_into<T: Datatype>(
        &self,
        send: &[T],
        recv: &mut [T],
        counts: &[usize],
        root: i32,
    ) -> Result<()> {
        let op = CollectiveOp::begin(*self, CollectiveKind::GatherV, root, "gatherv")?;
        if !op.is_root() {
            return op.send_to(root, typed_frame(send));
        }
        if counts.len() != op.size() {
            return Err(Error::BufferSizeMismatch {
                op: "gatherv counts",
                expected: op.size(),
                actual: counts.len(),
            });
        }
        let total: usize = counts.iter().sum();
        if recv.len() != total {
            return Err(Error::BufferSizeMismatch {
                op: "gatherv",
                expected: total,
                actual: recv.len(),
            });
        }
        let displs = displacements(counts);
        for source in 0..self.size() {
            let r = source as usize;
            let slot = &mut recv[displs[r]..displs[r] + counts[r]];
            if source == root {
                if send.len() != counts[r] {
                    return Err(Error::GatherVSizeNotPrenegotiated {
                        rank: source,
                        declared: counts[r],
                        actual: send.len(),
                    });
                }
                slot.copy_from_slice(send);
                continue;
            }
            let bytes = op.recv_from(source)?;
            let frame = Frame::parse(&bytes)?;
            let actual = frame.typed_count::<T>("gatherv")?;
            if actual != counts[r] {
                return Err(Error::GatherVSizeNotPrenegotiated {
                    rank: source,
                    declared: counts[r],
                    actual,
                });
            }
            frame.read_into("gatherv", slot)?;
        }
        Ok(())
    }
}
