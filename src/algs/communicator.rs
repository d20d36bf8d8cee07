//! Thin façade over intra-process (threaded) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: callers post every receive,
//! then every send, and only trust a buffer after `.wait()` returns.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::Arc;

/// Typed message tag. Each exchange phase gets its own tag so that
/// concurrent phases never match each other's messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn base(self) -> u16 {
        self.0
    }

    /// Deterministic derived tag, used to give sub-phases distinct tags.
    #[inline]
    pub const fn offset(self, by: u16) -> Self {
        Self(self.0.wrapping_add(by))
    }
}

/// Tags for a two-stage (sizes, then payload) exchange.
#[derive(Copy, Clone, Debug)]
pub struct ExchangeTags {
    pub sizes: CommTag,
    pub data: CommTag,
}

impl ExchangeTags {
    #[inline]
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            sizes: base,
            data: base.offset(1),
        }
    }
}

/// Tag reserved for the default `allgather`/`barrier` implementations.
const COLLECTIVE_TAG: CommTag = CommTag::new(0xFFF0);

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of this process in the communicator.
    fn rank(&self) -> usize;
    /// Number of ranks.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Gather `send` (same length on every rank) from every rank into `recv`,
    /// ordered by rank.
    fn allgather(&self, send: &[u8], recv: &mut [u8]) {
        let n = send.len();
        let me = self.rank();
        let size = self.size();
        debug_assert!(recv.len() >= n * size);
        recv[me * n..(me + 1) * n].copy_from_slice(send);
        if size <= 1 {
            return;
        }

        let mut pending_recvs = Vec::with_capacity(size - 1);
        for peer in (0..size).filter(|&p| p != me) {
            let mut scratch = vec![0u8; n];
            pending_recvs.push((peer, self.irecv(peer, COLLECTIVE_TAG.as_u16(), &mut scratch)));
        }
        let pending_sends: Vec<_> = (0..size)
            .filter(|&p| p != me)
            .map(|peer| self.isend(peer, COLLECTIVE_TAG.as_u16(), send))
            .collect();

        for (peer, h) in pending_recvs {
            if let Some(data) = h.wait() {
                let len = data.len().min(n);
                recv[peer * n..peer * n + len].copy_from_slice(&data[..len]);
            }
        }
        for s in pending_sends {
            let _ = s.wait();
        }
    }

    /// Block until every rank has reached the barrier.
    fn barrier(&self) {
        let mut sink = vec![0u8; self.size()];
        self.allgather(&[0u8], &mut sink);
    }

    /// True when there is nobody to talk to.
    fn is_serial(&self) -> bool {
        self.size() <= 1
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

static MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(DashMap::new()));

/// Receive handle for [`RayonComm`]; resolves once the matching message lands.
pub struct LocalHandle {
    key: Key,
    len: usize,
    mailbox: Arc<Mailbox>,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    let n = bytes.len().min(self.len);
                    return Some(bytes[..n].to_vec());
                }
            }
            std::thread::yield_now();
        }
    }
}

/// Ranks simulated as threads of one process. Messages between the same
/// `(src, dst, tag)` are delivered in FIFO order; longer messages are
/// truncated to the receive buffer length.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl RayonComm {
    /// Rank `rank` of a `size`-rank world sharing the process-wide mailbox.
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            mailbox: Arc::clone(&MAILBOX),
        }
    }

    /// A fresh, isolated world of `size` ranks. Messages never leak into
    /// other worlds, so independent tests may reuse tags.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox: Arc<Mailbox> = Arc::new(DashMap::new());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            key: (peer, self.rank, tag),
            len: buf.len(),
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::sync::Arc;

    /// MPI world communicator. Keeps the universe alive so `MPI_Finalize`
    /// runs when the last clone is dropped.
    #[derive(Clone)]
    pub struct MpiComm {
        _universe: Arc<Universe>,
        pub world: Arc<SimpleCommunicator>,
        pub rank: usize,
        pub size: usize,
    }

    // Handles are only driven from the thread that owns the communicator.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        /// Initialize MPI; `None` if it was already initialized.
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self {
                _universe: Arc::new(universe),
                world: Arc::new(world),
                rank,
                size,
            })
        }
    }

    /// Owns the send buffer until the request completes.
    pub struct MpiSendHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        buf: *mut [u8],
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            // SAFETY: `buf` came from `Box::leak` in `isend` and the request
            // that borrowed it has completed.
            unsafe { drop(Box::from_raw(self.buf)) };
        }
    }

    impl Wait for MpiSendHandle {
        fn wait(self) -> Option<Vec<u8>> {
            drop(self);
            None
        }
    }

    /// Receive posted lazily: sends are immediate, so a blocking matched
    /// receive at `wait` time cannot deadlock.
    pub struct MpiRecvHandle {
        world: Arc<SimpleCommunicator>,
        peer: i32,
        tag: i32,
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let (data, _status) = self
                .world
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let owned: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let raw: *mut [u8] = owned;
            // SAFETY: `raw` stays valid until `MpiSendHandle` is dropped.
            let shared: &'static [u8] = unsafe { &*raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, shared, tag as i32);
            MpiSendHandle {
                req: Some(req),
                buf: raw,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> MpiRecvHandle {
            MpiRecvHandle {
                world: Arc::clone(&self.world),
                peer: peer as i32,
                tag: tag as i32,
            }
        }

        fn allgather(&self, send: &[u8], recv: &mut [u8]) {
            self.world.all_gather_into(send, recv);
        }

        fn barrier(&self) {
            self.world.barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
