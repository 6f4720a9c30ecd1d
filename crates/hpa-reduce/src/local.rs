//! Single-rank, in-process [`Transport`]. Used by the `serial` and `merge`
//! CLI modes, where there is exactly one rank and every collective is
//! trivially satisfied by the caller's own contribution.

use crate::error::Error;
use crate::transport::{Op, Reducible, Transport};

/// A world of exactly one rank. Every collective either returns the
/// caller's own data unchanged or, for prefix scans, the appropriate
/// identity element — there is no other rank to combine with.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

impl LocalTransport {
    /// Creates the single-rank world.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn check_rank(&self, rank: usize) -> Result<(), Error> {
        if rank >= self.size() {
            return Err(Error::RankOutOfRange { rank, size: self.size() });
        }
        Ok(())
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<(), Error> {
        Ok(())
    }

    fn bcast<T: Reducible>(&self, _data: &mut [T], root: usize) -> Result<(), Error> {
        self.check_rank(root)?;
        Ok(())
    }

    fn reduce<T: Reducible>(&self, data: &[T], root: usize, _op: Op) -> Result<Option<Vec<T>>, Error> {
        self.check_rank(root)?;
        Ok(Some(data.to_vec()))
    }

    fn allreduce<T: Reducible>(&self, data: &[T], _op: Op) -> Result<Vec<T>, Error> {
        Ok(data.to_vec())
    }

    fn scan<T: Reducible>(&self, data: &[T], _op: Op) -> Result<Vec<T>, Error> {
        Ok(data.to_vec())
    }

    fn exscan<T: Reducible>(&self, data: &[T], op: Op) -> Result<Vec<T>, Error> {
        Ok(vec![T::identity(op); data.len()])
    }

    fn gather<T: Reducible>(&self, send: &[T], root: usize) -> Result<Option<Vec<T>>, Error> {
        self.check_rank(root)?;
        Ok(Some(send.to_vec()))
    }

    fn gatherv<T: Reducible>(&self, send: &[T], counts: &[usize], root: usize) -> Result<Option<Vec<T>>, Error> {
        self.check_rank(root)?;
        if counts.len() != self.size() {
            return Err(Error::Malformed {
                reason: format!("expected {} counts, got {}", self.size(), counts.len()),
            });
        }
        if counts[0] != send.len() {
            return Err(Error::Malformed {
                reason: format!("counts[0] ({}) does not match send length ({})", counts[0], send.len()),
            });
        }
        Ok(Some(send.to_vec()))
    }

    fn scatter<T: Reducible>(&self, send: Option<&[T]>, count: usize, root: usize) -> Result<Vec<T>, Error> {
        self.check_rank(root)?;
        let send = send.ok_or_else(|| Error::Malformed {
            reason: "root did not supply data to scatter".to_string(),
        })?;
        if send.len() != count {
            return Err(Error::Malformed {
                reason: format!("send length ({}) does not match count ({count})", send.len()),
            });
        }
        Ok(send.to_vec())
    }

    fn scatterv<T: Reducible>(&self, send: Option<&[T]>, counts: &[usize], root: usize) -> Result<Vec<T>, Error> {
        self.check_rank(root)?;
        if counts.len() != self.size() {
            return Err(Error::Malformed {
                reason: format!("expected {} counts, got {}", self.size(), counts.len()),
            });
        }
        let send = send.ok_or_else(|| Error::Malformed {
            reason: "root did not supply data to scatterv".to_string(),
        })?;
        if send.len() != counts[0] {
            return Err(Error::Malformed {
                reason: format!("send length ({}) does not match counts[0] ({})", send.len(), counts[0]),
            });
        }
        Ok(send.to_vec())
    }

    fn send<T: Reducible>(&self, data: &[T], _tag: u32, dst: usize) -> Result<(), Error> {
        self.check_rank(dst)?;
        let _ = data;
        Ok(())
    }

    fn recv<T: Reducible>(&self, count: usize, _tag: u32, src: usize) -> Result<Vec<T>, Error> {
        self.check_rank(src)?;
        Err(Error::Failed {
            message: format!("no peer rank to receive {count} element(s) from in a single-rank world"),
        })
    }

    fn recv_server<T: Reducible>(&self, _buf: &mut [T], _tag: u32) -> Result<Option<usize>, Error> {
        // No other rank could ever send here; a server loop on a
        // single-rank world terminates immediately, as though it observed
        // its own cancellation message.
        Ok(None)
    }

    fn cancel_server(&self, _tag: u32) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_and_bcast_are_no_ops() {
        let t = LocalTransport::new();
        t.barrier().unwrap();
        let mut data = [1.0_f64, 2.0];
        t.bcast(&mut data, 0).unwrap();
        assert_eq!(data, [1.0, 2.0]);
    }

    #[test]
    fn reduce_and_allreduce_return_own_data() {
        let t = LocalTransport::new();
        let data = [1.0_f64, 2.0, 3.0];
        assert_eq!(t.reduce(&data, 0, Op::Sum).unwrap(), Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(t.allreduce(&data, Op::Max).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn exscan_returns_identity_elements() {
        let t = LocalTransport::new();
        let data = [5_u64, 7];
        assert_eq!(t.exscan(&data, Op::Sum).unwrap(), vec![0, 0]);
        assert_eq!(t.exscan(&data, Op::Max).unwrap(), vec![u64::MIN, u64::MIN]);
    }

    #[test]
    fn out_of_range_root_is_rejected() {
        let t = LocalTransport::new();
        let data = [1.0_f64];
        assert!(matches!(t.reduce(&data, 1, Op::Sum), Err(Error::RankOutOfRange { rank: 1, size: 1 })));
    }

    #[test]
    fn scatter_requires_root_data() {
        let t = LocalTransport::new();
        let result: Result<Vec<f64>, _> = t.scatter(None, 1, 0);
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }

    #[test]
    fn recv_server_terminates_immediately_on_a_single_rank() {
        let t = LocalTransport::new();
        let mut buf = [0.0_f64; 4];
        assert_eq!(t.recv_server(&mut buf, 7).unwrap(), None);
    }
}
