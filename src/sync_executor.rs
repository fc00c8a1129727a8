//! Sync Command Executor (spec §4.5, component C5): drives one command
//! through the redirection state machine on blocking I/O. Grounded on the
//! teacher's `ClusterConnection::request` loop in `cluster.rs` (MOVED/ASK
//! branch on `err.kind()`, `ASKING` preamble sent as a literal packed
//! command) and on `include/cluster.h`'s `moved()` in the original source.

use log::trace;

use crate::cluster::Cluster;
use crate::connection::SyncTransport;
use crate::container::{Container, Entry};
use crate::error::{fail, ClusterError, ClusterResult, ErrorKind};
use crate::reply::{classify, Classification, Reply};

/// The literal `ASKING` command, packed RESP (spec §6: "issue the literal
/// command `ASKING` (no arguments)").
const ASKING_COMMAND: &[u8] = b"*1\r\n$6\r\nASKING\r\n";

/// Run `formatted_command` (already-encoded by the caller's codec) against
/// the node responsible for `key`, following at most one level of
/// redirection (spec §4.5).
pub fn command<T, Ctr>(
    transport: &T,
    cluster: &Cluster<T::Conn, Ctr>,
    key: &[u8],
    formatted_command: &[u8],
) -> ClusterResult<Reply>
where
    T: SyncTransport,
    Ctr: Container<T::Conn>,
{
    let (container_key, entry) = cluster.get_connection(key)?;
    let reply = exchange(transport, &entry, formatted_command);
    // Release before inspecting the outcome: a redirect must not hold this
    // slot's pooled connection while waiting on a different node.
    cluster.release(container_key, entry);
    let reply = reply?;

    match classify(reply.as_ref()) {
        Classification::Ready => {
            reply.ok_or_else(|| ClusterError::new(ErrorKind::Disconnected, "no reply"))
        }
        Classification::Failed => Err(ClusterError::new(ErrorKind::Disconnected, "no reply")),
        Classification::ClusterDown => Err(ClusterError::new(
            ErrorKind::ClusterDown,
            error_text(&reply),
        )),
        Classification::Moved { host, port } => {
            follow_moved(transport, cluster, &host, port, formatted_command)
        }
        Classification::Ask { host, port } => {
            follow_ask(transport, cluster, &host, port, formatted_command)
        }
    }
}

fn follow_moved<T, Ctr>(
    transport: &T,
    cluster: &Cluster<T::Conn, Ctr>,
    host: &str,
    port: u16,
    formatted_command: &[u8],
) -> ClusterResult<Reply>
where
    T: SyncTransport,
    Ctr: Container<T::Conn>,
{
    trace!("following MOVED to {host}:{port}");
    let (container_key, entry) = cluster.create_new_connection(host, port)?;
    cluster.moved();
    let reply = exchange(transport, &entry, formatted_command);
    cluster.release(container_key, entry);
    // A second redirection on this attempt is not followed (spec §4.5): the
    // reply, whatever it says, goes straight to the caller.
    reply?.ok_or_else(|| ClusterError::new(ErrorKind::MovedFailed, "no reply after MOVED"))
}

fn follow_ask<T, Ctr>(
    transport: &T,
    cluster: &Cluster<T::Conn, Ctr>,
    host: &str,
    port: u16,
    formatted_command: &[u8],
) -> ClusterResult<Reply>
where
    T: SyncTransport,
    Ctr: Container<T::Conn>,
{
    trace!("following ASK to {host}:{port}");
    let (container_key, entry) = cluster.create_new_connection(host, port)?;
    let outcome = run_ask(transport, &entry, formatted_command);
    cluster.release(container_key, entry);
    outcome
}

fn run_ask<T>(transport: &T, entry: &Entry<T::Conn>, formatted_command: &[u8]) -> ClusterResult<Reply>
where
    T: SyncTransport,
{
    match exchange(transport, entry, ASKING_COMMAND)? {
        Some(Reply::Status(status)) if status == "OK" => {}
        other => fail!((
            ErrorKind::AskingFailed,
            "ASKING",
            format!("expected +OK, got {other:?}")
        )),
    }
    exchange(transport, entry, formatted_command)?
        .ok_or_else(|| ClusterError::new(ErrorKind::AskingFailed, "no reply after ASKING"))
}

fn exchange<T>(
    transport: &T,
    entry: &Entry<T::Conn>,
    bytes: &[u8],
) -> ClusterResult<Option<Reply>>
where
    T: SyncTransport,
{
    let mut conn = entry.lock().unwrap();
    transport.append_formatted(&mut conn, bytes)?;
    transport.get_reply(&mut conn)
}

fn error_text(reply: &Option<Reply>) -> String {
    match reply {
        Some(Reply::Error(message)) => message.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterParams;
    use crate::container::test_support::FakeConnection;
    use crate::container::DefaultContainer;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    struct FakeTransport {
        scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            FakeTransport {
                scripts: Mutex::new(HashMap::new()),
            }
        }

        fn script(&self, label: &str, reply: Reply) {
            self.scripts
                .lock()
                .unwrap()
                .entry(label.to_string())
                .or_default()
                .push_back(reply);
        }
    }

    impl SyncTransport for FakeTransport {
        type Conn = FakeConnection;

        fn connect(&self, host: &str, _port: u16) -> ClusterResult<FakeConnection> {
            Ok(FakeConnection::new(host.to_string()))
        }

        fn disconnect(&self, _conn: FakeConnection) {}

        fn append_formatted(&self, _conn: &mut FakeConnection, _bytes: &[u8]) -> ClusterResult<()> {
            Ok(())
        }

        fn get_reply(&self, conn: &mut FakeConnection) -> ClusterResult<Option<Reply>> {
            Ok(self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&conn.label)
                .and_then(|queue| queue.pop_front()))
        }
    }

    fn three_node_cluster(
        transport: &FakeTransport,
    ) -> Cluster<FakeConnection, DefaultContainer<FakeConnection>> {
        let reply = Reply::Array(vec![
            Reply::Array(vec![
                Reply::Integer(0),
                Reply::Integer(5460),
                Reply::Array(vec![Reply::Bulk(b"A".to_vec()), Reply::Integer(7000)]),
            ]),
            Reply::Array(vec![
                Reply::Integer(5461),
                Reply::Integer(10922),
                Reply::Array(vec![Reply::Bulk(b"B".to_vec()), Reply::Integer(7001)]),
            ]),
            Reply::Array(vec![
                Reply::Integer(10923),
                Reply::Integer(16383),
                Reply::Array(vec![Reply::Bulk(b"C".to_vec()), Reply::Integer(7002)]),
            ]),
        ]);
        let _ = transport;
        Cluster::from_cluster_slots(
            &reply,
            DefaultContainer::new(),
            Arc::new(|host: &str, _port: u16| Ok(FakeConnection::new(host.to_string()))),
            Arc::new(|_conn: FakeConnection| {}),
            ClusterParams::default(),
        )
        .unwrap()
    }

    #[test]
    fn scenario_1_happy_path_set_get() {
        // slot("FOO") = 12182, served by node C.
        let transport = FakeTransport::new();
        let cluster = three_node_cluster(&transport);
        transport.script("C", Reply::Status("OK".to_string()));

        let reply = command(&transport, &cluster, b"FOO", b"SET FOO BAR").unwrap();
        assert_eq!(reply, Reply::Status("OK".to_string()));
        assert!(!cluster.is_moved());
    }

    #[test]
    fn scenario_2_moved_is_followed_once_and_flags_moved() {
        let transport = FakeTransport::new();
        let cluster = three_node_cluster(&transport);
        transport.script("C", Reply::Error("MOVED 12182 B:7001".to_string()));
        transport.script("B", Reply::Status("OK".to_string()));

        let reply = command(&transport, &cluster, b"FOO", b"SET FOO BAR").unwrap();
        assert_eq!(reply, Reply::Status("OK".to_string()));
        assert!(cluster.is_moved());
    }

    #[test]
    fn scenario_3_ask_two_step_does_not_set_moved() {
        let transport = FakeTransport::new();
        let cluster = three_node_cluster(&transport);
        transport.script("C", Reply::Error("ASK 12182 B:7001".to_string()));
        transport.script("B", Reply::Status("OK".to_string())); // ASKING reply
        transport.script("B", Reply::Status("OK".to_string())); // original command reply

        let reply = command(&transport, &cluster, b"FOO", b"SET FOO BAR").unwrap();
        assert_eq!(reply, Reply::Status("OK".to_string()));
        assert!(!cluster.is_moved());
    }

    #[test]
    fn scenario_4_ask_failure_mid_step_is_asking_failed() {
        let transport = FakeTransport::new();
        let cluster = three_node_cluster(&transport);
        transport.script("C", Reply::Error("ASK 12182 B:7001".to_string()));
        transport.script("B", Reply::Error("ERR not-ok".to_string())); // ASKING reply

        let err = command(&transport, &cluster, b"FOO", b"SET FOO BAR").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AskingFailed);
    }

    #[test]
    fn scenario_5_clusterdown_propagates_to_sync_caller() {
        let transport = FakeTransport::new();
        let cluster = three_node_cluster(&transport);
        transport.script("C", Reply::Error("CLUSTERDOWN The cluster is down".to_string()));

        let err = command(&transport, &cluster, b"FOO", b"SET FOO BAR").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClusterDown);
    }

    #[test]
    fn ordinary_errors_are_not_treated_as_routing_failures() {
        let transport = FakeTransport::new();
        let cluster = three_node_cluster(&transport);
        transport.script("C", Reply::Error("WRONGTYPE Operation against a key".to_string()));

        let reply = command(&transport, &cluster, b"FOO", b"GET FOO").unwrap();
        assert_eq!(reply, Reply::Error("WRONGTYPE Operation against a key".to_string()));
    }
}
