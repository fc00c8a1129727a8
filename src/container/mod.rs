//! Connection Container abstraction (spec §4.3, component C3).
//!
//! The Container is a pluggable strategy for how connections are created,
//! cached, reused, and recycled. Per spec §9's redesign note, it is
//! expressed here as a trait the [`crate::cluster::Cluster`] depends on
//! (monomorphic over the strategy's operations via the generic parameter
//! `C`, not over its concrete type), rather than a C++ template parameter.

mod default;
mod pooled;

pub use default::DefaultContainer;
pub use pooled::PooledContainer;

use std::sync::{Arc, Mutex};

use crate::connection::{Connection, HostEndpoint};
use crate::error::ClusterResult;

/// An inclusive `[begin, end]` slot range (spec §3).
///
/// Ranges are kept ordered by `begin` and must not overlap; `Cluster`
/// validates that invariant while building the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotRange {
    pub begin: u16,
    pub end: u16,
}

impl SlotRange {
    pub fn new(begin: u16, end: u16) -> Self {
        SlotRange { begin, end }
    }

    pub fn contains(&self, slot: u16) -> bool {
        self.begin <= slot && slot <= self.end
    }
}

/// A connection on loan from the container. Shared ownership lets the
/// pooled variant give the same handle to the holder and keep a weak
/// bookkeeping reference of its own.
pub type Entry<C> = Arc<Mutex<C>>;

/// Identifies which pool a borrowed [`Entry`] must be returned to on
/// [`Container::release`].
#[derive(Debug, Clone)]
pub enum ContainerKey {
    SlotRange(SlotRange),
    Host(HostEndpoint),
}

/// A connect recipe a container can call as many times as it needs to
/// (once for [`DefaultContainer`], up to the pool size for
/// [`PooledContainer`]). Owned rather than borrowed so a pooled container
/// can keep replaying it long after the call that installed it returns.
pub type ConnectFn<C> = Box<dyn Fn() -> ClusterResult<C> + Send + Sync>;

/// Store and yield connections by slot-range or by redirection endpoint.
///
/// The Container does not know about the redirection protocol; it only
/// stores and yields connections (spec §4.3). Kept object-safe (no generic
/// methods) so `Cluster<C>` can hold it as `Box<dyn Container<C>>`.
///
/// Deliberately **not** `Send + Sync` at the trait level: [`DefaultContainer`]
/// is explicitly single-threaded (spec §4.3.a), while [`PooledContainer`]
/// is the thread-safe variant (spec §4.3.b). Code that needs a thread-safe
/// cluster (the async executor, or a sync cluster shared across threads)
/// requires `C::Container: Send + Sync` itself at that call site.
pub trait Container<C: Connection> {
    /// Called during initialization: creates a connection to `host` and
    /// binds it to `range`. Fails with
    /// [`crate::error::ErrorKind::ConnectionFailed`] if `connect` errors
    /// (spec §4.3).
    fn insert_slot_range(
        &self,
        range: SlotRange,
        host: HostEndpoint,
        connect: ConnectFn<C>,
    ) -> ClusterResult<()>;

    /// Called for redirection: returns the existing connection for that
    /// endpoint if any, else calls `connect` to create one. Idempotent by
    /// endpoint (spec §3: "asking the container twice for the same
    /// endpoint returns the same handle").
    fn insert_host(
        &self,
        host: HostEndpoint,
        connect: ConnectFn<C>,
    ) -> ClusterResult<(HostEndpoint, Entry<C>)>;

    /// The slot-range entry whose range covers `slot`, or
    /// [`crate::error::ErrorKind::NodeSearch`].
    fn get_connection(&self, slot: u16) -> ClusterResult<(SlotRange, Entry<C>)>;

    /// Return a borrowed connection to the store. A no-op for
    /// [`DefaultContainer`]; essential for [`PooledContainer`], where it
    /// unblocks a waiting borrower.
    fn release(&self, key: ContainerKey, entry: Entry<C>);

    /// Drain and destroy every connection, calling `disconnect` on each.
    /// Must block until every borrowed connection has been released before
    /// tearing down a pooled store (spec §4.3.b).
    fn disconnect_all(&self, disconnect: &dyn Fn(C));

    /// Number of distinct slot ranges currently tracked. Used by tests and
    /// by `Cluster` to report topology size.
    fn slot_range_count(&self) -> usize;
}
