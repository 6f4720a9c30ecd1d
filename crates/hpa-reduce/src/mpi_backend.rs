//! Distributed [`Transport`] over `MPI_COMM_WORLD`, backed by `rsmpi`.
//!
//! MPI is initialized once per process with a requested thread-safety
//! level, and if the library reports less than `MPI_THREAD_MULTIPLE`
//! every call is serialized behind a single process-wide lock rather than
//! trusted to be reentrant.

use std::sync::OnceLock;

use mpi::collective::SystemOperation;
use mpi::datatype::PartitionMut;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Threading;
use parking_lot::Mutex;

use crate::error::Error;
use crate::transport::{segments, Op, Reducible, Transport};

static UNIVERSE: OnceLock<(mpi::environment::Universe, Threading)> = OnceLock::new();

fn threading_rank(t: Threading) -> u8 {
    match t {
        Threading::Single => 0,
        Threading::Funneled => 1,
        Threading::Serialized => 2,
        Threading::Multiple => 3,
    }
}

fn to_system_op(op: Op) -> SystemOperation {
    match op {
        Op::Sum => SystemOperation::sum(),
        Op::Min => SystemOperation::min(),
        Op::Max => SystemOperation::max(),
    }
}

/// Distributed transport over the process's `MPI_COMM_WORLD`.
pub struct MpiTransport {
    world: SimpleCommunicator,
    lock: Option<Mutex<()>>,
}

impl MpiTransport {
    /// Initializes MPI for this process (idempotent; MPI is only
    /// initialized once no matter how many [`MpiTransport`]s are built)
    /// and wraps the world communicator.
    ///
    /// # Errors
    /// Returns [`Error::Failed`] if the MPI library could not be
    /// initialized at all.
    pub fn init() -> Result<Self, Error> {
        let (universe, available) = UNIVERSE.get_or_init(|| {
            mpi::initialize_with_threading(Threading::Multiple)
                .expect("MPI_Init_thread failed; is this process launched under mpirun?")
        });
        let needs_lock = threading_rank(*available) < threading_rank(Threading::Multiple);
        if needs_lock {
            tracing::warn!(
                available = ?available,
                "MPI library does not support MPI_THREAD_MULTIPLE; serializing all transport calls"
            );
        }
        Ok(Self {
            world: universe.world(),
            lock: needs_lock.then(|| Mutex::new(())),
        })
    }

    fn guard(&self) -> Option<parking_lot::MutexGuard<'_, ()>> {
        self.lock.as_ref().map(parking_lot::Mutex::lock)
    }

    fn check_rank(&self, rank: usize) -> Result<(), Error> {
        if rank >= self.size() {
            return Err(Error::RankOutOfRange { rank, size: self.size() });
        }
        Ok(())
    }
}

impl Transport for MpiTransport {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn barrier(&self) -> Result<(), Error> {
        let _guard = self.guard();
        self.world.barrier();
        Ok(())
    }

    fn bcast<T: Reducible>(&self, data: &mut [T], root: usize) -> Result<(), Error> {
        self.check_rank(root)?;
        let _guard = self.guard();
        let root_process = self.world.process_at_rank(root as i32);
        for (off, count) in segments(data.len()) {
            root_process.broadcast_into(&mut data[off..off + count]);
        }
        Ok(())
    }

    fn reduce<T: Reducible>(&self, data: &[T], root: usize, op: Op) -> Result<Option<Vec<T>>, Error> {
        self.check_rank(root)?;
        let _guard = self.guard();
        let root_process = self.world.process_at_rank(root as i32);
        let is_root = self.is_root(root);
        let mut out = is_root.then(|| vec![T::identity(op); data.len()]);
        for (off, count) in segments(data.len()) {
            let chunk = &data[off..off + count];
            if let Some(out) = out.as_mut() {
                root_process.reduce_into_root(chunk, &mut out[off..off + count], to_system_op(op));
            } else {
                root_process.reduce_into(chunk, to_system_op(op));
            }
        }
        Ok(out)
    }

    fn allreduce<T: Reducible>(&self, data: &[T], op: Op) -> Result<Vec<T>, Error> {
        let _guard = self.guard();
        let mut out = vec![T::identity(op); data.len()];
        for (off, count) in segments(data.len()) {
            self.world
                .all_reduce_into(&data[off..off + count], &mut out[off..off + count], to_system_op(op));
        }
        Ok(out)
    }

    fn scan<T: Reducible>(&self, data: &[T], op: Op) -> Result<Vec<T>, Error> {
        let _guard = self.guard();
        let mut out = vec![T::identity(op); data.len()];
        for (off, count) in segments(data.len()) {
            self.world.scan_into(&data[off..off + count], &mut out[off..off + count], to_system_op(op));
        }
        Ok(out)
    }

    fn exscan<T: Reducible>(&self, data: &[T], op: Op) -> Result<Vec<T>, Error> {
        let _guard = self.guard();
        let mut out = vec![T::identity(op); data.len()];
        for (off, count) in segments(data.len()) {
            self.world
                .exclusive_scan_into(&data[off..off + count], &mut out[off..off + count], to_system_op(op));
        }
        Ok(out)
    }

    fn gather<T: Reducible>(&self, send: &[T], root: usize) -> Result<Option<Vec<T>>, Error> {
        self.check_rank(root)?;
        let _guard = self.guard();
        let root_process = self.world.process_at_rank(root as i32);
        if self.is_root(root) {
            let mut out = vec![T::identity(Op::Sum); send.len() * self.size()];
            root_process.gather_into_root(send, &mut out[..]);
            Ok(Some(out))
        } else {
            root_process.gather_into(send);
            Ok(None)
        }
    }

    fn gatherv<T: Reducible>(&self, send: &[T], counts: &[usize], root: usize) -> Result<Option<Vec<T>>, Error> {
        self.check_rank(root)?;
        if counts.len() != self.size() {
            return Err(Error::Malformed {
                reason: format!("expected {} counts, got {}", self.size(), counts.len()),
            });
        }
        let _guard = self.guard();
        let root_process = self.world.process_at_rank(root as i32);
        if self.is_root(root) {
            let icounts: Vec<mpi::Count> = counts.iter().map(|&c| c as mpi::Count).collect();
            let mut displs = Vec::with_capacity(counts.len());
            let mut running = 0_i32;
            for &c in &icounts {
                displs.push(running);
                running += c;
            }
            let mut out = vec![T::identity(Op::Sum); running as usize];
            let mut partition = PartitionMut::new(&mut out[..], icounts, &displs[..]);
            root_process.gather_varcount_into_root(send, &mut partition);
            Ok(Some(out))
        } else {
            root_process.gather_varcount_into(send);
            Ok(None)
        }
    }

    fn scatter<T: Reducible>(&self, send: Option<&[T]>, count: usize, root: usize) -> Result<Vec<T>, Error> {
        self.check_rank(root)?;
        let _guard = self.guard();
        let root_process = self.world.process_at_rank(root as i32);
        let mut out = vec![T::identity(Op::Sum); count];
        if self.is_root(root) {
            let send = send.ok_or_else(|| Error::Malformed {
                reason: "root did not supply data to scatter".to_string(),
            })?;
            root_process.scatter_into_root(send, &mut out[..]);
        } else {
            root_process.scatter_into(&mut out[..]);
        }
        Ok(out)
    }

    fn scatterv<T: Reducible>(&self, send: Option<&[T]>, counts: &[usize], root: usize) -> Result<Vec<T>, Error> {
        self.check_rank(root)?;
        if counts.len() != self.size() {
            return Err(Error::Malformed {
                reason: format!("expected {} counts, got {}", self.size(), counts.len()),
            });
        }
        let _guard = self.guard();
        let root_process = self.world.process_at_rank(root as i32);
        let my_count = counts[self.rank()];
        let mut out = vec![T::identity(Op::Sum); my_count];
        if self.is_root(root) {
            let send = send.ok_or_else(|| Error::Malformed {
                reason: "root did not supply data to scatterv".to_string(),
            })?;
            let icounts: Vec<mpi::Count> = counts.iter().map(|&c| c as mpi::Count).collect();
            let mut displs = Vec::with_capacity(counts.len());
            let mut running = 0_i32;
            for &c in &icounts {
                displs.push(running);
                running += c;
            }
            let partition = mpi::datatype::Partition::new(send, icounts, &displs[..]);
            root_process.scatter_varcount_into_root(&partition, &mut out[..]);
        } else {
            root_process.scatter_varcount_into(&mut out[..]);
        }
        Ok(out)
    }

    fn send<T: Reducible>(&self, data: &[T], tag: u32, dst: usize) -> Result<(), Error> {
        self.check_rank(dst)?;
        let _guard = self.guard();
        let dst_process = self.world.process_at_rank(dst as i32);
        for (off, count) in segments(data.len()) {
            dst_process.send_with_tag(&data[off..off + count], tag as i32);
        }
        Ok(())
    }

    fn recv<T: Reducible>(&self, count: usize, tag: u32, src: usize) -> Result<Vec<T>, Error> {
        self.check_rank(src)?;
        let _guard = self.guard();
        let src_process = self.world.process_at_rank(src as i32);
        let mut out = vec![T::identity(Op::Sum); count];
        for (off, chunk_len) in segments(count) {
            let (received, _status) = src_process.receive_vec_with_tag::<T>(tag as i32);
            out[off..off + chunk_len.min(received.len())].copy_from_slice(&received[..chunk_len.min(received.len())]);
        }
        Ok(out)
    }

    fn recv_server<T: Reducible>(&self, buf: &mut [T], tag: u32) -> Result<Option<usize>, Error> {
        let guard = self.guard();
        if let Some(mut guard) = guard {
            // Poll with a non-blocking probe so the lock is released
            // between attempts; an `MPI_Irecv`/`MPI_Test` loop for
            // thread-unsafe MPI builds.
            loop {
                if let Some((msg, status)) = self.world.any_process().immediate_matched_probe_with_tag(tag as i32) {
                    let (_count, recv_status) = msg.matched_receive_into(buf);
                    let _ = status;
                    let received = recv_status.count(T::equivalent_datatype()) as usize;
                    if received == 0 {
                        return Ok(None);
                    }
                    return Ok(Some(recv_status.source_rank() as usize));
                }
                parking_lot::MutexGuard::unlocked(&mut guard, std::thread::yield_now);
            }
        }
        let (_msg, status) = self.world.any_process().matched_receive_into(buf);
        let received = status.count(T::equivalent_datatype()) as usize;
        if received == 0 {
            return Ok(None);
        }
        Ok(Some(status.source_rank() as usize))
    }

    fn cancel_server(&self, tag: u32) -> Result<(), Error> {
        let _guard = self.guard();
        let me = self.world.process_at_rank(self.rank() as i32);
        me.send_with_tag(&[] as &[u8], tag as i32);
        Ok(())
    }
}
