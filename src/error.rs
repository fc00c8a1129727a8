//! Error taxonomy for the cluster routing core (spec §4.7).
//!
//! Mirrors the shape of `redis::RedisError`: a public [`ErrorKind`] plus a
//! struct that carries an optional detail string and, for redirection
//! errors, the parsed `(host, port)` pair.

use std::fmt;

/// The complete set of failure kinds the core raises.
///
/// Grouped per spec §4.7: [`ErrorKind::is_critical`] marks the kinds after
/// which the cluster must be rebuilt, [`ErrorKind::is_bad_state`] marks the
/// kinds after which the cluster is still usable but may be stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A connection attempt to a node failed outright.
    ConnectionFailed,
    /// A connection that was previously usable has gone away.
    Disconnected,
    /// A command was issued before the cluster finished initializing, or
    /// after `stop()`.
    NotInitialized,
    /// The server replied `CLUSTERDOWN`.
    ClusterDown,
    /// A slot lookup found no range covering the requested slot.
    NodeSearch,
    /// A reply violated an invariant the core depends on (e.g. a malformed
    /// `CLUSTER SLOTS` reply, or an `ASKING` reply that wasn't `+OK`).
    LogicError,
    /// The `ASKING` step of an ASK redirection failed.
    AskingFailed,
    /// Following a MOVED redirection failed (e.g. could not connect to the
    /// target node).
    MovedFailed,
    /// Caller misuse: a `None` connect/disconnect function, an empty node
    /// list, a zero pool size, and the like.
    InvalidArgument,
}

impl ErrorKind {
    /// Critical errors mean the cluster must be re-initialized.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionFailed
                | ErrorKind::Disconnected
                | ErrorKind::NotInitialized
                | ErrorKind::ClusterDown
        )
    }

    /// Bad-state errors mean the cluster is usable but possibly stale.
    pub fn is_bad_state(self) -> bool {
        matches!(
            self,
            ErrorKind::NodeSearch
                | ErrorKind::LogicError
                | ErrorKind::AskingFailed
                | ErrorKind::MovedFailed
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConnectionFailed => "connection failed",
            ErrorKind::Disconnected => "disconnected",
            ErrorKind::NotInitialized => "cluster not initialized",
            ErrorKind::ClusterDown => "CLUSTERDOWN",
            ErrorKind::NodeSearch => "no slot range covers this slot",
            ErrorKind::LogicError => "logic error",
            ErrorKind::AskingFailed => "ASKING failed",
            ErrorKind::MovedFailed => "failed to follow MOVED redirection",
            ErrorKind::InvalidArgument => "invalid argument",
        }
    }
}

/// A cluster routing error: a kind, a human-readable detail, and, for
/// redirection-flavored kinds, the node the reply pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterError {
    kind: ErrorKind,
    description: &'static str,
    detail: Option<String>,
    redirect: Option<(String, u16)>,
}

impl ClusterError {
    /// Build a new error, optionally carrying the node a MOVED/ASK reply
    /// named so callers can inspect it.
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        ClusterError {
            kind,
            description: kind.as_str(),
            detail: Some(detail.into()),
            redirect: None,
        }
    }

    /// Attach the `(host, port)` a redirection reply named.
    pub fn with_redirect(mut self, host: impl Into<String>, port: u16) -> Self {
        self.redirect = Some((host.into(), port));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// The node a MOVED/ASK reply pointed at, when this error carries one.
    pub fn redirect_node(&self) -> Option<(&str, u16)> {
        self.redirect.as_ref().map(|(h, p)| (h.as_str(), *p))
    }

    pub fn is_critical(&self) -> bool {
        self.kind.is_critical()
    }

    pub fn is_bad_state(&self) -> bool {
        self.kind.is_bad_state()
    }
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) if !detail.is_empty() => {
                write!(f, "{}: {}", self.description, detail)
            }
            _ => write!(f, "{}", self.description),
        }
    }
}

impl std::error::Error for ClusterError {}

impl From<(ErrorKind, &'static str)> for ClusterError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> Self {
        ClusterError {
            kind,
            description: desc,
            detail: None,
            redirect: None,
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for ClusterError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> Self {
        ClusterError {
            kind,
            description: desc,
            detail: Some(detail),
            redirect: None,
        }
    }
}

/// Shorthand for `return Err(ClusterError::from(...).into())`, mirroring the
/// teacher's `fail!` macro in `cluster.rs`.
macro_rules! fail {
    ($expr:expr) => {
        return Err(::std::convert::From::from($expr))
    };
}

pub(crate) use fail;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_and_bad_state_partition_the_taxonomy() {
        use ErrorKind::*;
        let all = [
            ConnectionFailed,
            Disconnected,
            NotInitialized,
            ClusterDown,
            NodeSearch,
            LogicError,
            AskingFailed,
            MovedFailed,
            InvalidArgument,
        ];
        for kind in all {
            let overlap = kind.is_critical() && kind.is_bad_state();
            assert!(!overlap, "{kind:?} must not be both critical and bad-state");
        }
    }

    #[test]
    fn redirect_node_round_trips() {
        let err = ClusterError::new(ErrorKind::LogicError, "test").with_redirect("10.0.0.1", 7001);
        assert_eq!(err.redirect_node(), Some(("10.0.0.1", 7001)));
    }

    #[test]
    fn display_includes_detail_when_present() {
        let err: ClusterError = (ErrorKind::NodeSearch, "no range", "slot 42".to_string()).into();
        assert_eq!(err.to_string(), "no range: slot 42");
        let err: ClusterError = (ErrorKind::ClusterDown, "CLUSTERDOWN").into();
        assert_eq!(err.to_string(), "CLUSTERDOWN");
    }
}
