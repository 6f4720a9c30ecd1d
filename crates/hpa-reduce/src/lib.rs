//! Collective communication for distributed profile aggregation.
//!
//! [`LocalTransport`] is the default, always-compiled backend: a
//! single-rank stand-in used by the `serial` and `merge` CLI modes. The
//! `mpi` feature adds [`MpiTransport`], a real distributed backend over
//! `MPI_COMM_WORLD`, used by the `parallel` mode.

pub mod error;
mod local;
#[cfg(feature = "mpi")]
mod mpi_backend;
pub mod transport;

pub use error::Error;
pub use local::LocalTransport;
#[cfg(feature = "mpi")]
pub use mpi_backend::MpiTransport;
pub use transport::{segments, Op, Reducible, Transport};

/// Either backend, chosen at runtime from `PipelineConfig::distributed`.
pub enum AnyTransport {
    /// Single-rank, in-process.
    Local(LocalTransport),
    /// Distributed over `MPI_COMM_WORLD`.
    #[cfg(feature = "mpi")]
    Mpi(MpiTransport),
}

impl AnyTransport {
    /// The single-rank backend.
    #[must_use]
    pub fn local() -> Self {
        Self::Local(LocalTransport::new())
    }

    /// The distributed backend.
    ///
    /// # Errors
    /// See [`MpiTransport::init`].
    #[cfg(feature = "mpi")]
    pub fn mpi() -> Result<Self, Error> {
        Ok(Self::Mpi(MpiTransport::init()?))
    }
}

/// Forwards every [`Transport`] method to whichever variant is active.
macro_rules! delegate {
    ($self:ident, $method:ident ( $($arg:expr),* )) => {
        match $self {
            AnyTransport::Local(t) => t.$method($($arg),*),
            #[cfg(feature = "mpi")]
            AnyTransport::Mpi(t) => t.$method($($arg),*),
        }
    };
}

impl Transport for AnyTransport {
    fn rank(&self) -> usize {
        delegate!(self, rank())
    }

    fn size(&self) -> usize {
        delegate!(self, size())
    }

    fn barrier(&self) -> Result<(), Error> {
        delegate!(self, barrier())
    }

    fn bcast<T: Reducible>(&self, data: &mut [T], root: usize) -> Result<(), Error> {
        delegate!(self, bcast(data, root))
    }

    fn reduce<T: Reducible>(&self, data: &[T], root: usize, op: Op) -> Result<Option<Vec<T>>, Error> {
        delegate!(self, reduce(data, root, op))
    }

    fn allreduce<T: Reducible>(&self, data: &[T], op: Op) -> Result<Vec<T>, Error> {
        delegate!(self, allreduce(data, op))
    }

    fn scan<T: Reducible>(&self, data: &[T], op: Op) -> Result<Vec<T>, Error> {
        delegate!(self, scan(data, op))
    }

    fn exscan<T: Reducible>(&self, data: &[T], op: Op) -> Result<Vec<T>, Error> {
        delegate!(self, exscan(data, op))
    }

    fn gather<T: Reducible>(&self, send: &[T], root: usize) -> Result<Option<Vec<T>>, Error> {
        delegate!(self, gather(send, root))
    }

    fn gatherv<T: Reducible>(&self, send: &[T], counts: &[usize], root: usize) -> Result<Option<Vec<T>>, Error> {
        delegate!(self, gatherv(send, counts, root))
    }

    fn scatter<T: Reducible>(&self, send: Option<&[T]>, count: usize, root: usize) -> Result<Vec<T>, Error> {
        delegate!(self, scatter(send, count, root))
    }

    fn scatterv<T: Reducible>(&self, send: Option<&[T]>, counts: &[usize], root: usize) -> Result<Vec<T>, Error> {
        delegate!(self, scatterv(send, counts, root))
    }

    fn send<T: Reducible>(&self, data: &[T], tag: u32, dst: usize) -> Result<(), Error> {
        delegate!(self, send(data, tag, dst))
    }

    fn recv<T: Reducible>(&self, count: usize, tag: u32, src: usize) -> Result<Vec<T>, Error> {
        delegate!(self, recv(count, tag, src))
    }

    fn recv_server<T: Reducible>(&self, buf: &mut [T], tag: u32) -> Result<Option<usize>, Error> {
        delegate!(self, recv_server(buf, tag))
    }

    fn cancel_server(&self, tag: u32) -> Result<(), Error> {
        delegate!(self, cancel_server(tag))
    }
}
