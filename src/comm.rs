//! Blocking collectives between cooperating worker processes.
//!
//! The engine never touches ambient global state for parallelism: process
//! identity and process count are explicit values carried by a
//! [`Communicator`] handle threaded through the driver. Every collective is
//! blocking and order-independent: all ranks must call it (supplying additive
//! identity contributions if they hold no data) before any rank proceeds.

use std::sync::{Arc, Barrier, Mutex};

use num_complex::Complex64;

pub trait Communicator: Send + Sync {
    /// Identity of this worker, in `0..size()`.
    fn rank(&self) -> usize;

    /// Fixed number of cooperating workers, determined at launch.
    fn size(&self) -> usize;

    /// Element-wise sum all-reduce; on return every rank holds the global sum.
    fn all_sum_f64(&self, buf: &mut [f64]);

    /// Element-wise sum all-reduce over complex values.
    fn all_sum_c64(&self, buf: &mut [Complex64]);

    /// Replace `buf` on every rank with the contents held by `root`.
    fn broadcast_c64(&self, buf: &mut [Complex64], root: usize);

    /// Block until every rank has arrived.
    fn barrier(&self);
}

/// Sum a single complex scalar over all ranks.
pub fn sum_scalar(comm: &dyn Communicator, x: &mut Complex64) {
    let mut buf = [*x];
    comm.all_sum_c64(&mut buf);
    *x = buf[0];
}

/// Single-process communicator: every collective is the identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalComm;

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_sum_f64(&self, _buf: &mut [f64]) {}

    fn all_sum_c64(&self, _buf: &mut [Complex64]) {}

    fn broadcast_c64(&self, _buf: &mut [Complex64], _root: usize) {}

    fn barrier(&self) {}
}

struct Shared {
    barrier: Barrier,
    acc_f64: Mutex<Vec<f64>>,
    acc_c64: Mutex<Vec<Complex64>>,
    bcast: Mutex<Vec<Complex64>>,
}

/// Communicator backed by a set of threads sharing one [`Barrier`].
///
/// Workers launched from the same [`ThreadComm::create`] call behave like a
/// fixed MPI world: sum all-reduces, root broadcasts and barriers with the
/// same blocking discipline. Used to exercise the multi-worker paths of the
/// engine without an MPI runtime.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    /// Create one communicator handle per worker.
    pub fn create(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "communicator needs at least one worker");
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            acc_f64: Mutex::new(Vec::new()),
            acc_c64: Mutex::new(Vec::new()),
            bcast: Mutex::new(Vec::new()),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                shared: Arc::clone(&shared),
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

    fn all_sum_f64(&self, buf: &mut [f64]) {
        {
            let mut acc = self.shared.acc_f64.lock().unwrap();
            if acc.is_empty() {
                acc.resize(buf.len(), 0.0);
            }
            debug_assert_eq!(acc.len(), buf.len(), "mismatched all-reduce shapes");
            for (a, b) in acc.iter_mut().zip(buf.iter()) {
                *a += *b;
            }
        }
        self.shared.barrier.wait();
        {
            let acc = self.shared.acc_f64.lock().unwrap();
            buf.copy_from_slice(&acc);
        }
        let token = self.shared.barrier.wait();
        if token.is_leader() {
            self.shared.acc_f64.lock().unwrap().clear();
        }
        self.shared.barrier.wait();
    }

    fn all_sum_c64(&self, buf: &mut [Complex64]) {
        {
            let mut acc = self.shared.acc_c64.lock().unwrap();
            if acc.is_empty() {
                acc.resize(buf.len(), Complex64::new(0.0, 0.0));
            }
            debug_assert_eq!(acc.len(), buf.len(), "mismatched all-reduce shapes");
            for (a, b) in acc.iter_mut().zip(buf.iter()) {
                *a += *b;
            }
        }
        self.shared.barrier.wait();
        {
            let acc = self.shared.acc_c64.lock().unwrap();
            buf.copy_from_slice(&acc);
        }
        let token = self.shared.barrier.wait();
        if token.is_leader() {
            self.shared.acc_c64.lock().unwrap().clear();
        }
        self.shared.barrier.wait();
    }

    fn broadcast_c64(&self, buf: &mut [Complex64], root: usize) {
        if self.rank == root {
            let mut slot = self.shared.bcast.lock().unwrap();
            slot.clear();
            slot.extend_from_slice(buf);
        }
        self.shared.barrier.wait();
        if self.rank != root {
            let slot = self.shared.bcast.lock().unwrap();
            buf.copy_from_slice(&slot);
        }
        let token = self.shared.barrier.wait();
        if token.is_leader() {
            self.shared.bcast.lock().unwrap().clear();
        }
        self.shared.barrier.wait();
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }
}
