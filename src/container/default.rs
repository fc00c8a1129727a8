//! Default Container (spec §4.3.a): one connection per slot-range, one
//! connection per redirection endpoint, not thread-safe, `release` is a
//! no-op. Grounded on `include/container.h`'s `DefaultContainer` in
//! `examples/original_source/` (an ordered map of slot ranges to
//! connections, plus a side map of host-keyed redirection connections).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::trace;

use crate::connection::{Connection, HostEndpoint};
use crate::error::{ClusterError, ClusterResult, ErrorKind};

use super::{Container, ContainerKey, ConnectFn, Entry, SlotRange};

/// Single-connection-per-range, single-connection-per-endpoint container.
/// Not `Send`/`Sync`: intended for a `Cluster` used from one thread.
pub struct DefaultContainer<C> {
    // Keyed by `begin` so lookup can use `range(..=slot).next_back()`
    // (the Rust analogue of the teacher's `lower_bound` + decrement).
    nodes: RefCell<BTreeMap<u16, (SlotRange, Entry<C>)>>,
    redirects: RefCell<std::collections::HashMap<HostEndpoint, Entry<C>>>,
}

impl<C: Connection> DefaultContainer<C> {
    pub fn new() -> Self {
        DefaultContainer {
            nodes: RefCell::new(BTreeMap::new()),
            redirects: RefCell::new(std::collections::HashMap::new()),
        }
    }
}

impl<C: Connection> Default for DefaultContainer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> Container<C> for DefaultContainer<C> {
    fn insert_slot_range(
        &self,
        range: SlotRange,
        _host: HostEndpoint,
        connect: ConnectFn<C>,
    ) -> ClusterResult<()> {
        let conn = connect()?;
        self.nodes
            .borrow_mut()
            .insert(range.begin, (range, Arc::new(Mutex::new(conn))));
        Ok(())
    }

    fn insert_host(
        &self,
        host: HostEndpoint,
        connect: ConnectFn<C>,
    ) -> ClusterResult<(HostEndpoint, Entry<C>)> {
        if let Some(entry) = self.redirects.borrow().get(&host) {
            return Ok((host, entry.clone()));
        }
        let conn = connect()?;
        let entry = Arc::new(Mutex::new(conn));
        self.redirects
            .borrow_mut()
            .insert(host.clone(), entry.clone());
        Ok((host, entry))
    }

    fn get_connection(&self, slot: u16) -> ClusterResult<(SlotRange, Entry<C>)> {
        let nodes = self.nodes.borrow();
        let found = nodes
            .range(..=slot)
            .next_back()
            .map(|(_, (range, entry))| (*range, entry.clone()));
        match found {
            Some((range, entry)) if range.contains(slot) => {
                trace!("default container: slot {slot} -> range {range:?}");
                Ok((range, entry))
            }
            _ => Err(ClusterError::new(
                ErrorKind::NodeSearch,
                format!("no slot range covers slot {slot}"),
            )),
        }
    }

    fn release(&self, _key: ContainerKey, _entry: Entry<C>) {
        // Dummy: a single-threaded container has nothing to signal.
    }

    fn disconnect_all(&self, disconnect: &dyn Fn(C)) {
        for (_, entry) in self.nodes.borrow_mut().drain() {
            if let Ok(conn) = Arc::try_unwrap(entry).map(|m| m.into_inner().unwrap()) {
                disconnect(conn);
            }
        }
        for (_, entry) in self.redirects.borrow_mut().drain() {
            if let Ok(conn) = Arc::try_unwrap(entry).map(|m| m.into_inner().unwrap()) {
                disconnect(conn);
            }
        }
    }

    fn slot_range_count(&self) -> usize {
        self.nodes.borrow().len()
    }
}
