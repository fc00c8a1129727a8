//! Cluster (spec §4.4, component C4): owns the topology, brokers
//! redirection-born connections, and carries the `ready_to_use`/`moved`
//! flags. Grounded on `include/cluster.h` in `examples/original_source/`
//! for the construction and lookup algorithm, and on the teacher's
//! `ClusterClientBuilder`/`ClusterParams` split, re-exported at
//! `cluster.rs:61-65` in the teacher, for the configuration shape
//! described in SPEC_FULL.md §10.3.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, trace};

use crate::connection::{Connection, HostEndpoint, SyncTransport};
use crate::container::{Container, ConnectFn, ContainerKey, Entry, SlotRange};
use crate::error::{fail, ClusterError, ClusterResult, ErrorKind};
use crate::reply::Reply;
use crate::slot::slot_for_key;

/// Connects to an arbitrary `(host, port)`. `Arc` so `Cluster` can cheaply
/// hand out a per-host [`ConnectFn`] recipe that closes over `host`/`port`
/// without cloning the whole factory.
pub type HostConnectFn<C> = Arc<dyn Fn(&str, u16) -> ClusterResult<C> + Send + Sync>;

/// Tears down a connection the Cluster no longer needs.
pub type DisconnectFn<C> = Arc<dyn Fn(C) + Send + Sync>;

/// Configuration carried into `Cluster::from_cluster_slots`/`create_cluster`.
/// Mirrors the teacher's `ClusterParams`: values the Cluster itself never
/// inspects but threads through to the caller's connect function so a
/// Transport can honor them.
#[derive(Debug, Clone)]
pub struct ClusterParams {
    /// Advisory; enforcement is the Transport's responsibility (spec §5:
    /// "Sync commands honor the Transport's socket timeout").
    pub connection_timeout: Duration,
    /// Opaque hint threaded through to `connect`, e.g. a TLS identity name.
    /// The core never interprets it.
    pub tls: Option<String>,
}

impl Default for ClusterParams {
    fn default() -> Self {
        ClusterParams {
            connection_timeout: Duration::from_secs(1),
            tls: None,
        }
    }
}

/// Small builder so construction reads `ClusterBuilder::new(...).tls(...).build(...)`
/// instead of a long positional `from_cluster_slots` call.
pub struct ClusterBuilder {
    params: ClusterParams,
}

impl ClusterBuilder {
    pub fn new() -> Self {
        ClusterBuilder {
            params: ClusterParams::default(),
        }
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.params.connection_timeout = timeout;
        self
    }

    pub fn tls(mut self, identity: impl Into<String>) -> Self {
        self.params.tls = Some(identity.into());
        self
    }

    pub fn build<C, Ctr>(
        self,
        reply: &Reply,
        container: Ctr,
        connect: HostConnectFn<C>,
        disconnect: DisconnectFn<C>,
    ) -> ClusterResult<Cluster<C, Ctr>>
    where
        C: Connection,
        Ctr: Container<C>,
    {
        Cluster::from_cluster_slots(reply, container, connect, disconnect, self.params)
    }
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the slot→connection topology and the two state flags (spec §3,
/// §4.4). Generic over the connection type `C` and the Container strategy
/// `Ctr`, mirroring the teacher's `ClusterConnection<C: Connect +
/// ConnectionLike>` generalized over a second axis (the Container), per
/// spec §9's redesign note.
pub struct Cluster<C: Connection, Ctr: Container<C>> {
    container: Ctr,
    connect: HostConnectFn<C>,
    disconnect: DisconnectFn<C>,
    ready_to_use: AtomicBool,
    moved: AtomicBool,
    on_moved: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    params: ClusterParams,
}

impl<C: Connection, Ctr: Container<C>> fmt::Debug for Cluster<C, Ctr> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("ready_to_use", &self.ready_to_use.load(Ordering::Relaxed))
            .field("moved", &self.moved.load(Ordering::Relaxed))
            .field("slot_range_count", &self.container.slot_range_count())
            .finish()
    }
}

impl<C: Connection, Ctr: Container<C>> Cluster<C, Ctr> {
    /// Build from an already-parsed `CLUSTER SLOTS` reply (spec §4.4,
    /// steps 2-4). `container` is filled in by calling
    /// `insert_slot_range` for every element of the reply; construction
    /// fails with `ConnectionFailed` on the first malformed element or
    /// connect failure, matching the teacher's fail-fast
    /// `parse_slots`/`build_slot_map`.
    pub fn from_cluster_slots(
        reply: &Reply,
        container: Ctr,
        connect: HostConnectFn<C>,
        disconnect: DisconnectFn<C>,
        params: ClusterParams,
    ) -> ClusterResult<Self> {
        let entries = parse_slots(reply)?;
        let cluster = Cluster {
            container,
            connect,
            disconnect,
            ready_to_use: AtomicBool::new(false),
            moved: AtomicBool::new(false),
            on_moved: Mutex::new(None),
            params,
        };
        for (range, endpoint) in entries {
            let recipe = cluster.connect_fn(endpoint.host(), endpoint.port());
            cluster.container.insert_slot_range(range, endpoint, recipe)?;
        }
        cluster.ready_to_use.store(true, Ordering::Release);
        trace!(
            "cluster ready with {} slot ranges",
            cluster.container.slot_range_count()
        );
        Ok(cluster)
    }

    pub fn params(&self) -> &ClusterParams {
        &self.params
    }

    /// Compute the slot for `key` and delegate to the Container (spec
    /// §4.4). `NotInitialized` if the cluster isn't ready or has been
    /// stopped.
    pub fn get_connection(&self, key: &[u8]) -> ClusterResult<(ContainerKey, Entry<C>)> {
        if !self.ready_to_use.load(Ordering::Acquire) {
            fail!((ErrorKind::NotInitialized, "cluster not initialized"));
        }
        let slot = slot_for_key(key);
        let (range, entry) = self.container.get_connection(slot)?;
        Ok((ContainerKey::SlotRange(range), entry))
    }

    /// Delegate to the Container's host-keyed insert, used by executors
    /// when a MOVED/ASK names a node not yet in the map (spec §4.4).
    pub fn create_new_connection(
        &self,
        host: &str,
        port: u16,
    ) -> ClusterResult<(ContainerKey, Entry<C>)> {
        let endpoint = HostEndpoint::new(host, port);
        let recipe = self.connect_fn(host, port);
        let (endpoint, entry) = self.container.insert_host(endpoint, recipe)?;
        Ok((ContainerKey::Host(endpoint), entry))
    }

    /// Return a connection borrowed via `get_connection`/`create_new_connection`.
    pub fn release(&self, key: ContainerKey, entry: Entry<C>) {
        self.container.release(key, entry);
    }

    /// Set `moved = true` and invoke the `on_moved` callback, if any
    /// (spec §4.4, §8 scenario 2: "one `on_moved` callback fires").
    pub fn moved(&self) {
        self.moved.store(true, Ordering::Release);
        info!("cluster observed a MOVED redirection");
        if let Some(callback) = self.on_moved.lock().unwrap().as_ref() {
            callback();
        }
    }

    pub fn set_on_moved(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.on_moved.lock().unwrap() = Some(Box::new(callback));
    }

    pub fn is_moved(&self) -> bool {
        self.moved.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.ready_to_use.load(Ordering::Acquire)
    }

    /// Subsequent commands fail with `NotInitialized`; does not close
    /// connections (spec §4.4).
    pub fn stop(&self) {
        self.ready_to_use.store(false, Ordering::Release);
        info!("cluster stopped");
    }

    /// Forward to the Container: drain and destroy every connection
    /// (spec §4.4, §7: "destroying a Cluster closes every owned connection").
    pub fn disconnect(&self) {
        let disconnect = self.disconnect.clone();
        self.container.disconnect_all(&move |conn| disconnect(conn));
    }

    fn connect_fn(&self, host: &str, port: u16) -> ConnectFn<C> {
        let connect = self.connect.clone();
        let host = host.to_string();
        Box::new(move || connect(&host, port))
    }
}

/// One-shot bootstrap (spec §6's `create_cluster`, concretized per
/// SPEC_FULL.md §11 from `asynchirediscommand.h::createCluster`): connect,
/// issue the already-formatted `CLUSTER SLOTS` command, parse the reply,
/// close the bootstrap connection, then build the Cluster from the parsed
/// reply.
pub fn create_cluster<T, Ctr>(
    transport: &T,
    host: &str,
    port: u16,
    cluster_slots_command: &[u8],
    container: Ctr,
    connect: HostConnectFn<T::Conn>,
    disconnect: DisconnectFn<T::Conn>,
    params: ClusterParams,
) -> ClusterResult<Cluster<T::Conn, Ctr>>
where
    T: SyncTransport,
    Ctr: Container<T::Conn>,
{
    let mut bootstrap = transport.connect(host, port)?;
    transport.append_formatted(&mut bootstrap, cluster_slots_command)?;
    let reply = transport.get_reply(&mut bootstrap)?;
    transport.disconnect(bootstrap);
    let reply = reply.ok_or_else(|| {
        ClusterError::new(ErrorKind::ConnectionFailed, "no reply to CLUSTER SLOTS")
    })?;
    Cluster::from_cluster_slots(&reply, container, connect, disconnect, params)
}

/// Validate and parse a `CLUSTER SLOTS` reply (spec §4.4 step 2): a
/// top-level array of `[begin, end, [host, port, ...], ...]` elements.
fn parse_slots(reply: &Reply) -> ClusterResult<Vec<(SlotRange, HostEndpoint)>> {
    let Reply::Array(entries) = reply else {
        fail!((
            ErrorKind::ConnectionFailed,
            "malformed CLUSTER SLOTS reply",
            "expected a top-level array".to_string()
        ));
    };
    let mut ranges = Vec::with_capacity(entries.len());
    for entry in entries {
        let Reply::Array(fields) = entry else {
            fail!((
                ErrorKind::ConnectionFailed,
                "malformed CLUSTER SLOTS reply",
                "expected an array entry".to_string()
            ));
        };
        if fields.len() < 3 {
            fail!((
                ErrorKind::ConnectionFailed,
                "malformed CLUSTER SLOTS reply",
                "expected at least [begin, end, node]".to_string()
            ));
        }
        let begin = as_u16(&fields[0])?;
        let end = as_u16(&fields[1])?;
        let Reply::Array(node) = &fields[2] else {
            fail!((
                ErrorKind::ConnectionFailed,
                "malformed CLUSTER SLOTS reply",
                "expected a node descriptor array".to_string()
            ));
        };
        if node.len() < 2 {
            fail!((
                ErrorKind::ConnectionFailed,
                "malformed CLUSTER SLOTS reply",
                "expected a node descriptor of at least [host, port]".to_string()
            ));
        }
        let host = as_bulk_string(&node[0])?;
        let port = as_u16(&node[1])?;
        ranges.push((SlotRange::new(begin, end), HostEndpoint::new(host, port)));
    }
    Ok(ranges)
}

fn as_u16(reply: &Reply) -> ClusterResult<u16> {
    match reply {
        Reply::Integer(n) if *n >= 0 && *n <= u16::MAX as i64 => Ok(*n as u16),
        other => fail!((
            ErrorKind::ConnectionFailed,
            "malformed CLUSTER SLOTS reply",
            format!("expected a small non-negative integer, got {other:?}")
        )),
    }
}

fn as_bulk_string(reply: &Reply) -> ClusterResult<String> {
    match reply {
        Reply::Bulk(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        Reply::Status(s) => Ok(s.clone()),
        other => fail!((
            ErrorKind::ConnectionFailed,
            "malformed CLUSTER SLOTS reply",
            format!("expected a host string, got {other:?}")
        )),
    }
}
