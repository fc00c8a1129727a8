//! Reply Classifier (spec §4.2, component C2).
//!
//! The core never depends on the wire codec; it works against this narrow
//! [`Reply`] shape, which the Transport is responsible for producing.

/// A Redis reply, as handed to the core by the Transport.
///
/// Shape mirrors spec §6's tagged union `{STATUS, ERROR, INTEGER, STRING,
/// ARRAY, NIL}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Array(Vec<Reply>),
    Nil,
}

impl Reply {
    fn error_message(&self) -> Option<&str> {
        match self {
            Reply::Error(msg) => Some(msg.as_str()),
            _ => None,
        }
    }
}

/// The outcome of classifying a reply (spec §4.2).
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Ready,
    Moved { host: String, port: u16 },
    Ask { host: String, port: u16 },
    ClusterDown,
    /// No reply was available at all (a `None`/disconnected read).
    Failed,
}

/// Classify `reply`. `None` (no reply at all, e.g. the connection dropped)
/// classifies as [`Classification::Failed`].
pub fn classify(reply: Option<&Reply>) -> Classification {
    let Some(reply) = reply else {
        return Classification::Failed;
    };
    let Some(message) = reply.error_message() else {
        return Classification::Ready;
    };

    if let Some(rest) = message.strip_prefix("MOVED ") {
        return match parse_redirect(rest) {
            Some((host, port)) => Classification::Moved { host, port },
            None => Classification::Ready,
        };
    }
    if let Some(rest) = message.strip_prefix("ASK ") {
        return match parse_redirect(rest) {
            Some((host, port)) => Classification::Ask { host, port },
            None => Classification::Ready,
        };
    }
    if message.starts_with("CLUSTERDOWN") {
        return Classification::ClusterDown;
    }
    // Any other ERROR reply is a normal command error, not a routing
    // failure: it flows through to the caller as-is (spec §4.2, §7).
    Classification::Ready
}

/// Parse `"<slot> <host>:<port>"`: host is the text between the first space
/// and the last colon, port is the text after the last colon.
fn parse_redirect(body: &str) -> Option<(String, u16)> {
    let (_slot, hostport) = body.split_once(' ')?;
    let (host, port) = hostport.rsplit_once(':')?;
    let port: u16 = port.trim().parse().ok()?;
    Some((host.to_string(), port))
}
