//! Async executor coverage through the public API (complements the
//! internal tests in `src/async_executor.rs`, which use a private inline
//! Transport not reachable from an external test binary).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use redis_cluster_core::connection::{AsyncTransport, Connection};
use redis_cluster_core::container::DefaultContainer;
use redis_cluster_core::error::ClusterResult;
use redis_cluster_core::reply::Reply;
use redis_cluster_core::{AsyncCluster, Cluster, ClusterParams};

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

struct InlineTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
}

impl InlineTransport {
    fn new() -> Self {
        InlineTransport {
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

impl AsyncTransport for InlineTransport {
    type Conn = NamedConnection;

    fn connect(&self, host: &str, _port: u16) -> ClusterResult<NamedConnection> {
        Ok(NamedConnection {
            label: host.to_string(),
        })
    }

    fn disconnect(&self, _conn: &NamedConnection) {}

    fn dispatch(
        &self,
        conn: &NamedConnection,
        _bytes: Vec<u8>,
        on_reply: Box<dyn FnOnce(Option<Reply>) + Send>,
    ) -> ClusterResult<()> {
        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&conn.label)
            .and_then(|q| q.pop_front());
        on_reply(reply);
        Ok(())
    }

    fn on_disconnect(&self, _conn: &NamedConnection, _callback: Box<dyn Fn() + Send + Sync>) {}
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
fn async_happy_path_delivers_reply_via_callback() {
    let transport = InlineTransport::new();
    transport.script("C", Reply::Status("OK".to_string()));
    let async_cluster = AsyncCluster::new(cluster(), transport);

    let received = Arc::new(Mutex::new(None));
    let sink = received.clone();
    async_cluster
        .command(b"FOO", b"SET FOO BAR".to_vec(), move |reply| {
            *sink.lock().unwrap() = Some(reply);
        })
        .unwrap();

    assert_eq!(
        received.lock().unwrap().take().unwrap().unwrap(),
        Reply::Status("OK".to_string())
    );
    assert_eq!(async_cluster.live_command_count(), 0);
}

#[test]
fn async_moved_redirection_flags_the_cluster_and_still_delivers() {
    let transport = InlineTransport::new();
    transport.script("C", Reply::Error("MOVED 12182 B:7001".to_string()));
    transport.script("B", Reply::Status("OK".to_string()));
    let async_cluster = AsyncCluster::new(cluster(), transport);

    let received = Arc::new(Mutex::new(None));
    let sink = received.clone();
    async_cluster
        .command(b"FOO", b"SET FOO BAR".to_vec(), move |reply| {
            *sink.lock().unwrap() = Some(reply);
        })
        .unwrap();

    assert_eq!(
        received.lock().unwrap().take().unwrap().unwrap(),
        Reply::Status("OK".to_string())
    );
    assert!(async_cluster.cluster().is_moved());
}
