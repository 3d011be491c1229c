//! The message-passing interface the suite drives.
//!
//! The suite never implements messaging itself. It consumes the blocking
//! point-to-point, probe, broadcast and communicator-management calls below
//! and checks that their results are correct. [`crate::local`] provides an
//! in-process implementation for running the suite without an external
//! library.

use std::fmt;

use thiserror::Error;

/// Rank of a participant within a group.
pub type Rank = i32;

/// Message tag.
pub type Tag = i32;

/// Largest tag value every conforming transport must accept.
pub const TAG_UB: Tag = 32767;

/// Raw tag value reserved for the wildcard marker. Valid tags are never negative.
pub const ANY_TAG_MARKER: Tag = -1;

/// Source selector for receive and probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Match a message from any sender.
    Any,
    /// Match only messages from this rank.
    Rank(Rank),
}

/// Tag selector for receive and probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagSelector {
    /// Match any tag.
    Any,
    /// Match only this tag.
    Tag(Tag),
}

/// Root argument for broadcast.
///
/// On intra-group communicators every member passes `Rank(root)`. On
/// inter-group communicators the broadcasting process passes `Root`, its
/// group peers pass `ProcNull` and the receiving group passes `Rank(root)`
/// with the root's rank in the remote group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcastRoot {
    /// Rank of the root.
    Rank(Rank),
    /// This process is the root of an inter-group broadcast.
    Root,
    /// This process belongs to the root group but is not the root.
    ProcNull,
}

/// Metadata of a matched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Rank of the sender (in the remote group for inter-group communicators).
    pub source: Rank,
    /// Tag the message was sent with.
    pub tag: Tag,
    /// Payload length in bytes.
    pub count: usize,
}

/// Errors reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Rank outside the addressed group.
    #[error("invalid rank {rank} (group size {size})")]
    InvalidRank {
        /// Requested rank.
        rank: Rank,
        /// Size of the group addressed.
        size: Rank,
    },

    /// Tag outside `0..=TAG_UB`.
    #[error("invalid tag {0}")]
    InvalidTag(Tag),

    /// Root argument inconsistent with the communicator.
    #[error("invalid root {0:?}")]
    InvalidRoot(BcastRoot),

    /// Incoming message larger than the receive buffer.
    #[error("message of {message} bytes truncated into {buffer}-byte buffer")]
    Truncated {
        /// Bytes sent.
        message: usize,
        /// Bytes available.
        buffer: usize,
    },

    /// Operation not available on this kind of communicator.
    #[error("operation not supported on {0} communicator")]
    Unsupported(&'static str),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Numeric error class, following the usual message-passing error codes.
    pub fn code(&self) -> i32 {
        match self {
            TransportError::InvalidTag(_) => 4,
            TransportError::Unsupported(_) => 5,
            TransportError::InvalidRank { .. } => 6,
            TransportError::InvalidRoot(_) => 7,
            TransportError::Truncated { .. } => 15,
            TransportError::Other(_) => 16,
        }
    }
}

/// A type alias for `Result<T, TransportError>`.
pub type TransportResult<T> = Result<T, TransportError>;

/// A communicator handle.
///
/// Handles may be shared between the worker threads of one process, so the
/// trait requires `Send + Sync`. Collective calls (`dup`, `split`,
/// `create_intercomm`, `barrier`, `bcast`) must be issued in the same order by
/// every member; callers serialize them across threads.
pub trait Communicator: Send + Sync + fmt::Debug {
    /// Rank of the calling process in the local group.
    fn rank(&self) -> TransportResult<Rank>;

    /// Size of the local group.
    fn size(&self) -> TransportResult<Rank>;

    /// Size of the remote group. Fails on intra-group communicators.
    fn remote_size(&self) -> TransportResult<Rank>;

    /// Whether this is an inter-group communicator.
    fn is_inter(&self) -> bool;

    /// Opaque identifier of the communication context. Duplicates get fresh ids.
    fn context_id(&self) -> u64;

    /// Blocking standard-mode send.
    fn send(&self, data: &[u8], dest: Rank, tag: Tag) -> TransportResult<()>;

    /// Blocking probe. The matched message stays queued.
    fn probe(&self, source: Source, tag: TagSelector) -> TransportResult<Status>;

    /// Blocking receive into `data`.
    fn recv(&self, data: &mut [u8], source: Source, tag: TagSelector) -> TransportResult<Status>;

    /// Broadcast `data` from the root to the other participants.
    fn bcast(&self, data: &mut [u8], root: BcastRoot) -> TransportResult<()>;

    /// Block until every member has entered the barrier.
    fn barrier(&self) -> TransportResult<()>;

    /// Duplicate this communicator into a fresh context.
    fn dup(&self) -> TransportResult<Box<dyn Communicator>>;

    /// Partition the group by `color`, ordering each part by `key`.
    ///
    /// Processes passing `None` take part but receive no communicator.
    fn split(&self, color: Option<i32>, key: i32) -> TransportResult<Option<Box<dyn Communicator>>>;

    /// Join this intra-group communicator with a disjoint peer group.
    ///
    /// `bridge` must contain both leaders; `remote_leader` is a rank in `bridge`.
    fn create_intercomm(
        &self,
        local_leader: Rank,
        bridge: &dyn Communicator,
        remote_leader: Rank,
        tag: Tag,
    ) -> TransportResult<Box<dyn Communicator>>;

    /// Release the handle.
    fn free(self: Box<Self>) -> TransportResult<()>;
}
