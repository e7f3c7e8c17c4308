//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! The evaluation pipeline needs exactly two kinds of collective: element-wise
//! reductions over small numeric arrays, and a variable-size all-to-all of
//! bytes. [`Communicator`] exposes those and nothing else. Every rank must
//! enter every collective in the same order; there is no timeout.
//!
//! Backends:
//! - [`NoComm`]: a single rank, collectives are copies.
//! - [`ThreadComm`]: several ranks inside one process, one thread each, sharing
//!   a mailbox of `(src, dst, tag) → Bytes`. Used by the multi-rank tests.
//! - `MpiComm` (feature `mpi-support`): MPI collectives through the `mpi` crate.

use crate::cmfe_error::CmfeError;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Element-wise reduction operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    fn fold_f64(self, acc: &mut [f64], other: &[f64]) {
        for (a, b) in acc.iter_mut().zip(other) {
            *a = match self {
                ReduceOp::Sum => *a + *b,
                ReduceOp::Max => a.max(*b),
                ReduceOp::Min => a.min(*b),
            };
        }
    }

    fn fold_u64(self, acc: &mut [u64], other: &[u64]) {
        for (a, b) in acc.iter_mut().zip(other) {
            *a = match self {
                ReduceOp::Sum => *a + *b,
                ReduceOp::Max => (*a).max(*b),
                ReduceOp::Min => (*a).min(*b),
            };
        }
    }
}

/// Blocking collective interface.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// True for the single-rank backend.
    fn is_no_comm(&self) -> bool {
        false
    }

    /// In-place element-wise reduction; every rank receives the result.
    fn all_reduce_f64(&self, values: &mut [f64], op: ReduceOp) -> Result<(), CmfeError>;

    /// In-place element-wise reduction; every rank receives the result.
    fn all_reduce_u64(&self, values: &mut [u64], op: ReduceOp) -> Result<(), CmfeError>;

    /// Send `send[r]` to rank `r`; returns what each rank sent to us.
    fn all_to_all_counts(&self, send: &[u64]) -> Result<Vec<u64>, CmfeError>;

    /// Variable-size all-to-all. `send` is the concatenation of per-destination
    /// blocks of `send_counts[r]` bytes; the result concatenates per-source
    /// blocks of `recv_counts[r]` bytes.
    fn all_to_all_bytes(
        &self,
        send: &[u8],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<u8>, CmfeError>;
}

/// Compile-time no-op comm for the serial path and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn is_no_comm(&self) -> bool {
        true
    }
    fn all_reduce_f64(&self, _values: &mut [f64], _op: ReduceOp) -> Result<(), CmfeError> {
        Ok(())
    }
    fn all_reduce_u64(&self, _values: &mut [u64], _op: ReduceOp) -> Result<(), CmfeError> {
        Ok(())
    }
    fn all_to_all_counts(&self, send: &[u64]) -> Result<Vec<u64>, CmfeError> {
        Ok(send.to_vec())
    }
    fn all_to_all_bytes(
        &self,
        send: &[u8],
        _send_counts: &[usize],
        _recv_counts: &[usize],
    ) -> Result<Vec<u8>, CmfeError> {
        Ok(send.to_vec())
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Bytes>;
}

impl Wait for () {
    fn wait(self) -> Option<Bytes> {
        None
    }
}

// --- ThreadComm: intra-process / multi-thread ---
type Key = (usize, usize, u32); // (src, dst, tag)
type Mailbox = Arc<DashMap<Key, Bytes>>;

/// Receive handle: polls the shared mailbox until the message lands.
pub struct LocalHandle {
    mailbox: Mailbox,
    key: Key,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Bytes> {
        loop {
            if let Some((_, bytes)) = self.mailbox.remove(&self.key) {
                return Some(bytes);
            }
            std::thread::yield_now();
        }
    }
}

/// One rank of an in-process universe.
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    mailbox: Mailbox,
    /// Collective round counter; identical on every rank by construction.
    round: AtomicU32,
}

impl ThreadComm {
    /// Create `size` ranks sharing one mailbox. Move each into its own thread.
    pub fn universe(size: usize) -> Vec<ThreadComm> {
        let mailbox: Mailbox = Arc::new(DashMap::new());
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                round: AtomicU32::new(0),
            })
            .collect()
    }

    fn next_tag(&self) -> u32 {
        self.round.fetch_add(1, Ordering::Relaxed)
    }

    /// Post a message to `peer`. Completes immediately.
    pub fn isend(&self, peer: usize, tag: u32, buf: &[u8]) {
        self.mailbox
            .insert((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    /// Handle for the message `peer` sends us under `tag`.
    pub fn irecv(&self, peer: usize, tag: u32) -> LocalHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
        }
    }

    /// Post one block per rank, then collect one block from each rank.
    fn exchange_blocks(&self, blocks: &[&[u8]]) -> Result<Vec<Bytes>, CmfeError> {
        let tag = self.next_tag();
        for (peer, block) in blocks.iter().enumerate() {
            self.isend(peer, tag, block);
        }
        (0..self.size)
            .map(|peer| {
                self.irecv(peer, tag).wait().ok_or_else(|| CmfeError::CommError {
                    neighbor: peer,
                    reason: "no message".into(),
                })
            })
            .collect()
    }

    /// All-gather of `values` followed by a fold in rank order, so every rank
    /// computes the same result bit for bit.
    fn gather_all<T: bytemuck::Pod>(&self, values: &[T]) -> Result<Vec<Vec<T>>, CmfeError> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let blocks = vec![bytes; self.size];
        let received = self.exchange_blocks(&blocks)?;
        received
            .into_iter()
            .enumerate()
            .map(|(peer, b)| {
                if b.len() != bytes.len() {
                    return Err(CmfeError::CommError {
                        neighbor: peer,
                        reason: format!("expected {} bytes, got {}", bytes.len(), b.len()),
                    });
                }
                Ok(b.chunks_exact(std::mem::size_of::<T>())
                    .map(bytemuck::pod_read_unaligned)
                    .collect())
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_reduce_f64(&self, values: &mut [f64], op: ReduceOp) -> Result<(), CmfeError> {
        let all = self.gather_all(values)?;
        let mut acc = all[0].clone();
        for other in &all[1..] {
            op.fold_f64(&mut acc, other);
        }
        values.copy_from_slice(&acc);
        Ok(())
    }

    fn all_reduce_u64(&self, values: &mut [u64], op: ReduceOp) -> Result<(), CmfeError> {
        let all = self.gather_all(values)?;
        let mut acc = all[0].clone();
        for other in &all[1..] {
            op.fold_u64(&mut acc, other);
        }
        values.copy_from_slice(&acc);
        Ok(())
    }

    fn all_to_all_counts(&self, send: &[u64]) -> Result<Vec<u64>, CmfeError> {
        let blocks: Vec<&[u8]> = send.iter().map(bytemuck::bytes_of).collect();
        let received = self.exchange_blocks(&blocks)?;
        received
            .into_iter()
            .enumerate()
            .map(|(peer, b)| {
                if b.len() != std::mem::size_of::<u64>() {
                    return Err(CmfeError::CommError {
                        neighbor: peer,
                        reason: format!("expected 8-byte count, got {}", b.len()),
                    });
                }
                Ok(bytemuck::pod_read_unaligned::<u64>(&b[..]))
            })
            .collect()
    }

    fn all_to_all_bytes(
        &self,
        send: &[u8],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<u8>, CmfeError> {
        let mut blocks = Vec::with_capacity(self.size);
        let mut offset = 0;
        for &n in send_counts {
            blocks.push(&send[offset..offset + n]);
            offset += n;
        }
        let received = self.exchange_blocks(&blocks)?;
        let mut out = Vec::with_capacity(recv_counts.iter().sum());
        for (peer, (b, &want)) in received.iter().zip(recv_counts).enumerate() {
            if b.len() != want {
                return Err(CmfeError::CommError {
                    neighbor: peer,
                    reason: format!("expected {want} bytes, got {}", b.len()),
                });
            }
            out.extend_from_slice(b);
        }
        Ok(out)
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{CmfeError, Communicator, ReduceOp};
    use mpi::collective::SystemOperation;
    use mpi::datatype::{Partition, PartitionMut};
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator as _, CommunicatorCollectives as _};

    pub struct MpiComm {
        _universe: Universe,
        pub world: SimpleCommunicator,
        pub rank: usize,
        pub size: usize,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, CmfeError> {
            let universe = mpi::initialize().ok_or(CmfeError::MpiInit)?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }

        fn op(op: ReduceOp) -> SystemOperation {
            match op {
                ReduceOp::Sum => SystemOperation::sum(),
                ReduceOp::Max => SystemOperation::max(),
                ReduceOp::Min => SystemOperation::min(),
            }
        }
    }

    fn displacements(counts: &[i32]) -> Vec<i32> {
        counts
            .iter()
            .scan(0, |acc, &x| {
                let old = *acc;
                *acc += x;
                Some(old)
            })
            .collect()
    }

    fn to_i32(counts: &[usize]) -> Result<Vec<i32>, CmfeError> {
        counts
            .iter()
            .enumerate()
            .map(|(peer, &c)| {
                i32::try_from(c).map_err(|_| CmfeError::CommError {
                    neighbor: peer,
                    reason: format!("message of {c} bytes exceeds MPI count range"),
                })
            })
            .collect()
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn all_reduce_f64(&self, values: &mut [f64], op: ReduceOp) -> Result<(), CmfeError> {
            let local = values.to_vec();
            self.world
                .all_reduce_into(&local[..], values, Self::op(op));
            Ok(())
        }

        fn all_reduce_u64(&self, values: &mut [u64], op: ReduceOp) -> Result<(), CmfeError> {
            let local = values.to_vec();
            self.world
                .all_reduce_into(&local[..], values, Self::op(op));
            Ok(())
        }

        fn all_to_all_counts(&self, send: &[u64]) -> Result<Vec<u64>, CmfeError> {
            let mut recv = vec![0u64; self.size];
            self.world.all_to_all_into(send, &mut recv[..]);
            Ok(recv)
        }

        fn all_to_all_bytes(
            &self,
            send: &[u8],
            send_counts: &[usize],
            recv_counts: &[usize],
        ) -> Result<Vec<u8>, CmfeError> {
            let sc = to_i32(send_counts)?;
            let rc = to_i32(recv_counts)?;
            let sd = displacements(&sc);
            let rd = displacements(&rc);
            let mut recv = vec![0u8; recv_counts.iter().sum()];
            let send_partition = Partition::new(send, &sc[..], &sd[..]);
            let mut recv_partition = PartitionMut::new(&mut recv[..], &rc[..], &rd[..]);
            self.world
                .all_to_all_varcount_into(&send_partition, &mut recv_partition);
            Ok(recv)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
