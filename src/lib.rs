//! Client-side Redis Cluster routing core.
//!
//! Owns a cluster topology (a slot→connection map built from a `CLUSTER
//! SLOTS` reply), selects a connection by key, and drives the
//! cluster-specific redirection protocol (MOVED, ASK, CLUSTERDOWN) on top
//! of a caller-supplied Transport. The wire codec, event-loop integration,
//! and socket handling are explicitly out of scope: this crate consumes a
//! narrow [`connection::SyncTransport`]/[`connection::AsyncTransport`]
//! contract rather than owning sockets itself.
//!
//! Module layout mirrors the component table: [`slot`] (C1), [`reply`]
//! (C2), [`container`] (C3), [`cluster`] (C4), [`sync_executor`] (C5),
//! [`async_executor`] (C6), [`error`] (C7).

#[cfg(feature = "tokio-transport")]
pub mod adapters;
pub mod async_executor;
pub mod cluster;
pub mod connection;
pub mod container;
pub mod error;
pub mod reply;
pub mod slot;
pub mod sync_executor;

pub use async_executor::{Action, AsyncCluster, CommandHandle, CommandStage};
pub use cluster::{create_cluster, Cluster, ClusterBuilder, ClusterParams};
pub use connection::{AsyncTransport, Connection, HostEndpoint, SyncTransport};
pub use container::{Container, ContainerKey, DefaultContainer, Entry, PooledContainer, SlotRange};
pub use error::{ClusterError, ClusterResult, ErrorKind};
pub use reply::{classify, Classification, Reply};
pub use slot::{slot_for_key, SLOT_COUNT};
