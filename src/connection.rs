//! Transport contract (spec §6) and the data-model types it deals in
//! (spec §3: `HostEndpoint`, `Connection`).
//!
//! The wire codec, event-loop integration, and socket handling are explicitly
//! out of scope (spec §1); this module only defines the narrow interface the
//! routing core consumes.

use std::fmt;

use crate::error::ClusterResult;
use crate::reply::Reply;

/// A `(host, port)` pair, canonicalized as `"host:port"` for use as a map
/// key (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostEndpoint {
    host: String,
    port: u16,
}

impl HostEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        HostEndpoint {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The canonical map key, `"host:port"`.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for HostEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An opaque connection handle managed by the Transport (spec §3).
///
/// The container owns connections; executors only borrow them for the
/// duration of one command exchange. The two observable attributes are
/// whatever the Transport needs the core to see: whether the link is
/// unusable, and whether it has been moved into pub/sub mode (and must
/// therefore not be torn down on ordinary command completion).
pub trait Connection: Send {
    /// True once the connection is known to be unusable.
    fn error_state(&self) -> bool;

    /// True once the connection has been moved into pub/sub mode.
    fn is_subscribed(&self) -> bool;
}

/// Synchronous connect/disconnect and request/response, as consumed by
/// [`crate::sync_executor`].
///
/// This is the "Sync" half of spec §6's Transport contract, narrowed to what
/// the core actually calls: `connect`, `append_formatted` +
/// `get_reply` stand in for `format_command_argv`/`append_formatted`/
/// `get_reply`; the codec itself (formatting argv into bytes, parsing a
/// reply off the wire) is the caller's concern.
pub trait SyncTransport: Send + Sync {
    type Conn: Connection;

    /// Synchronous connect attempt.
    fn connect(&self, host: &str, port: u16) -> ClusterResult<Self::Conn>;

    /// Tear down a connection. Never called for a connection whose
    /// `is_subscribed()` is true while it is still live.
    fn disconnect(&self, conn: Self::Conn);

    /// Write an already-formatted command buffer to `conn` without reading
    /// a reply.
    fn append_formatted(&self, conn: &mut Self::Conn, bytes: &[u8]) -> ClusterResult<()>;

    /// Block for the next reply on `conn`. `Ok(None)` means the connection
    /// produced no reply at all (treated as [`crate::error::ErrorKind::Disconnected`]
    /// by the Reply Classifier).
    fn get_reply(&self, conn: &mut Self::Conn) -> ClusterResult<Option<Reply>>;
}

/// Non-blocking dispatch with callback-delivered replies, as consumed by
/// [`crate::async_executor`].
///
/// This mirrors hiredis's async adapter contract (`redisAsyncFormattedCommand`
/// / `redisAsyncDisconnect` in `original_source/include/asynchirediscommand.h`):
/// the core hands over a formatted buffer and a boxed callback, and is told
/// later, from whatever event loop owns the Transport, how the command
/// resolved. The core places no requirement on which runtime drives that
/// callback.
pub trait AsyncTransport: Send + Sync {
    type Conn: Connection;

    fn connect(&self, host: &str, port: u16) -> ClusterResult<Self::Conn>;
    fn disconnect(&self, conn: &Self::Conn);

    /// Dispatch `bytes` on `conn`; `on_reply` is invoked exactly once, with
    /// `None` if the connection was lost before a reply arrived. Returns an
    /// error if the dispatch could not even be queued (a synchronous
    /// failure, not a reply).
    fn dispatch(
        &self,
        conn: &Self::Conn,
        bytes: Vec<u8>,
        on_reply: Box<dyn FnOnce(Option<Reply>) + Send>,
    ) -> ClusterResult<()>;

    /// Register a callback invoked once if/when `conn` is reported
    /// disconnected by the underlying event loop.
    fn on_disconnect(&self, conn: &Self::Conn, callback: Box<dyn Fn() + Send + Sync>);
}
