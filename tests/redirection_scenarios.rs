//! End-to-end coverage of the six Testable Properties scenarios (spec
//! §8), driven through the public API rather than the crate's internal
//! `#[cfg(test)]` fakes (those aren't visible to an external integration
//! test binary).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use redis_cluster_core::connection::{Connection, SyncTransport};
use redis_cluster_core::container::DefaultContainer;
use redis_cluster_core::error::{ClusterResult, ErrorKind};
use redis_cluster_core::reply::Reply;
use redis_cluster_core::{sync_executor, Cluster, ClusterParams};

#[derive(Debug, Clone, PartialEq, Eq)]
struct NamedConnection {
    label: String,
}

impl Connection for NamedConnection {
    fn error_state(&self) -> bool {
        false
    }
    fn is_subscribed(&self) -> bool {
        false
    }
}

struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
}

impl ScriptedTransport {
    fn new() -> Self {
        ScriptedTransport {
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

impl SyncTransport for ScriptedTransport {
    type Conn = NamedConnection;

    fn connect(&self, host: &str, _port: u16) -> ClusterResult<NamedConnection> {
        Ok(NamedConnection {
            label: host.to_string(),
        })
    }

    fn disconnect(&self, _conn: NamedConnection) {}

    fn append_formatted(&self, _conn: &mut NamedConnection, _bytes: &[u8]) -> ClusterResult<()> {
        Ok(())
    }

    fn get_reply(&self, conn: &mut NamedConnection) -> ClusterResult<Option<Reply>> {
        Ok(self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&conn.label)
            .and_then(|queue| queue.pop_front()))
    }
}

fn topology_reply() -> Reply {
    Reply::Array(vec![
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
    ])
}

fn cluster() -> Cluster<NamedConnection, DefaultContainer<NamedConnection>> {
    Cluster::from_cluster_slots(
        &topology_reply(),
        DefaultContainer::new(),
        Arc::new(|host: &str, _port: u16| {
            Ok(NamedConnection {
                label: host.to_string(),
            })
        }),
        Arc::new(|_conn: NamedConnection| {}),
        ClusterParams::default(),
    )
    .unwrap()
}

#[test]
fn scenario_1_happy_path_set_then_get() {
    let transport = ScriptedTransport::new();
    let cluster = cluster();
    // slot("FOO") = 12182 lands on node C.
    transport.script("C", Reply::Status("OK".to_string()));
    transport.script("C", Reply::Bulk(b"BAR".to_vec()));

    let set_reply = sync_executor::command(&transport, &cluster, b"FOO", b"SET FOO BAR").unwrap();
    assert_eq!(set_reply, Reply::Status("OK".to_string()));

    let get_reply = sync_executor::command(&transport, &cluster, b"FOO", b"GET FOO").unwrap();
    assert_eq!(get_reply, Reply::Bulk(b"BAR".to_vec()));
}

#[test]
fn scenario_2_moved_is_followed_and_observable() {
    let transport = ScriptedTransport::new();
    let cluster = cluster();
    transport.script("C", Reply::Error("MOVED 12182 B:7001".to_string()));
    transport.script("B", Reply::Status("OK".to_string()));

    let reply = sync_executor::command(&transport, &cluster, b"FOO", b"SET FOO BAR").unwrap();
    assert_eq!(reply, Reply::Status("OK".to_string()));
    assert!(cluster.is_moved());
}

#[test]
fn scenario_3_ask_two_step_leaves_moved_false() {
    let transport = ScriptedTransport::new();
    let cluster = cluster();
    transport.script("C", Reply::Error("ASK 12182 B:7001".to_string()));
    transport.script("B", Reply::Status("OK".to_string())); // ASKING
    transport.script("B", Reply::Status("OK".to_string())); // original

    let reply = sync_executor::command(&transport, &cluster, b"FOO", b"SET FOO BAR").unwrap();
    assert_eq!(reply, Reply::Status("OK".to_string()));
    assert!(!cluster.is_moved());
}

#[test]
fn scenario_4_ask_failure_mid_step_is_fatal() {
    let transport = ScriptedTransport::new();
    let cluster = cluster();
    transport.script("C", Reply::Error("ASK 12182 B:7001".to_string()));
    transport.script("B", Reply::Error("ERR not-ok".to_string()));

    let err = sync_executor::command(&transport, &cluster, b"FOO", b"SET FOO BAR").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AskingFailed);
}

#[test]
fn scenario_5_clusterdown_propagates() {
    let transport = ScriptedTransport::new();
    let cluster = cluster();
    transport.script("C", Reply::Error("CLUSTERDOWN The cluster is down".to_string()));

    let err = sync_executor::command(&transport, &cluster, b"FOO", b"SET FOO BAR").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClusterDown);
}

#[test]
fn stop_then_command_raises_not_initialized() {
    let transport = ScriptedTransport::new();
    let cluster = cluster();
    cluster.stop();

    let err = sync_executor::command(&transport, &cluster, b"FOO", b"SET FOO BAR").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotInitialized);
}

#[test]
fn cluster_slots_topology_round_trips_through_container_lookup() {
    use redis_cluster_core::container::{Container, ContainerKey, DefaultContainer, SlotRange};
    use redis_cluster_core::connection::HostEndpoint;

    let container: DefaultContainer<NamedConnection> = DefaultContainer::new();
    let ranges = [
        (SlotRange::new(0, 5460), "A"),
        (SlotRange::new(5461, 10922), "B"),
        (SlotRange::new(10923, 16383), "C"),
    ];
    for (range, label) in ranges {
        let owned_label = label.to_string();
        container
            .insert_slot_range(
                range,
                HostEndpoint::new(owned_label.clone(), 7000),
                Box::new(move || {
                    Ok(NamedConnection {
                        label: owned_label.clone(),
                    })
                }),
            )
            .unwrap();
    }
    assert_eq!(container.slot_range_count(), 3);

    // Every slot the topology claims to cover resolves back to the node it
    // was built from, at both ends of the range and in the middle.
    for (range, label) in ranges {
        for slot in [range.begin, (range.begin + range.end) / 2, range.end] {
            let (found_range, entry) = container.get_connection(slot).unwrap();
            assert_eq!(found_range, range);
            assert_eq!(entry.lock().unwrap().label, label);
            container.release(ContainerKey::SlotRange(found_range), entry);
        }
    }
}
