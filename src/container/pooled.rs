//! Pooled Container (spec §4.3.b): the extension-point example. Each
//! slot-range and each redirection endpoint owns a fixed-size FIFO of `N`
//! connections behind a mutex and condition variable.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, RwLock};

use log::trace;

use crate::connection::{Connection, HostEndpoint};
use crate::error::{ClusterError, ClusterResult, ErrorKind};

use super::{Container, ConnectFn, ContainerKey, Entry, SlotRange};

/// A fixed-capacity FIFO of connections, lazily filled up to `capacity`.
struct Pool<C> {
    idle: Mutex<VecDeque<Entry<C>>>,
    not_empty: Condvar,
    capacity: usize,
    created: Mutex<usize>,
    connect: ConnectFn<C>,
}

impl<C: Connection> Pool<C> {
    fn new(capacity: usize, connect: ConnectFn<C>) -> Self {
        Pool {
            idle: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            capacity,
            created: Mutex::new(0),
            connect,
        }
    }

    fn seeded(capacity: usize, connect: ConnectFn<C>, seed: C) -> ClusterResult<Self> {
        let pool = Pool::new(capacity, connect);
        pool.idle.lock().unwrap().push_back(Arc::new(Mutex::new(seed)));
        *pool.created.lock().unwrap() = 1;
        Ok(pool)
    }

    /// Pop a connection, creating a fresh one (up to `capacity`) if the
    /// pool hasn't reached its size yet, else blocking until one is
    /// released (spec §4.3.b: "waiting if empty").
    fn acquire(&self) -> ClusterResult<Entry<C>> {
        let mut idle = self.idle.lock().unwrap();
        loop {
            if let Some(entry) = idle.pop_front() {
                return Ok(entry);
            }
            {
                let mut created = self.created.lock().unwrap();
                if *created < self.capacity {
                    *created += 1;
                    drop(created);
                    drop(idle);
                    trace!("pool: growing to serve a borrower (capacity {})", self.capacity);
                    return (self.connect)().map(|c| Arc::new(Mutex::new(c)));
                }
            }
            trace!("pool: exhausted, waiting for a release");
            idle = self.not_empty.wait(idle).unwrap();
        }
    }

    fn release(&self, entry: Entry<C>) {
        self.idle.lock().unwrap().push_back(entry);
        self.not_empty.notify_one();
    }

    /// Block until every connection this pool ever created has been
    /// returned, then hand each to `disconnect` and reset the pool.
    fn drain(&self, disconnect: &dyn Fn(C)) {
        let mut idle = self.idle.lock().unwrap();
        loop {
            let created = *self.created.lock().unwrap();
            if idle.len() >= created {
                break;
            }
            idle = self.not_empty.wait(idle).unwrap();
        }
        while let Some(entry) = idle.pop_front() {
            if let Ok(conn) = Arc::try_unwrap(entry).map(|m| m.into_inner().unwrap()) {
                disconnect(conn);
            }
        }
        *self.created.lock().unwrap() = 0;
    }

    #[cfg(test)]
    fn borrowed_count(&self) -> usize {
        let created = *self.created.lock().unwrap();
        let idle = self.idle.lock().unwrap().len();
        created - idle
    }
}

/// Thread-safe container: the sole serializer of connection ownership
/// across parallel command executors (spec §4.3.b).
pub struct PooledContainer<C> {
    pool_size: usize,
    nodes: RwLock<BTreeMap<u16, (SlotRange, Arc<Pool<C>>)>>,
    redirects: Mutex<HashMap<HostEndpoint, Arc<Pool<C>>>>,
}

impl<C: Connection> PooledContainer<C> {
    /// `pool_size` is the fixed FIFO depth per slot-range and per
    /// redirection endpoint.
    pub fn new(pool_size: usize) -> ClusterResult<Self> {
        if pool_size == 0 {
            return Err(ClusterError::new(
                ErrorKind::InvalidArgument,
                "pool size must be non-zero",
            ));
        }
        Ok(PooledContainer {
            pool_size,
            nodes: RwLock::new(BTreeMap::new()),
            redirects: Mutex::new(HashMap::new()),
        })
    }

    #[cfg(test)]
    pub fn borrowed_for_slot(&self, slot: u16) -> Option<usize> {
        let nodes = self.nodes.read().unwrap();
        nodes
            .range(..=slot)
            .next_back()
            .filter(|(_, (range, _))| range.contains(slot))
            .map(|(_, (_, pool))| pool.borrowed_count())
    }
}

impl<C: Connection + 'static> Container<C> for PooledContainer<C> {
    fn insert_slot_range(
        &self,
        range: SlotRange,
        _host: HostEndpoint,
        connect: ConnectFn<C>,
    ) -> ClusterResult<()> {
        let seed = connect()?;
        let pool = Arc::new(Pool::seeded(self.pool_size, connect, seed)?);
        self.nodes.write().unwrap().insert(range.begin, (range, pool));
        Ok(())
    }

    fn insert_host(
        &self,
        host: HostEndpoint,
        connect: ConnectFn<C>,
    ) -> ClusterResult<(HostEndpoint, Entry<C>)> {
        let pool = {
            let mut redirects = self.redirects.lock().unwrap();
            if let Some(pool) = redirects.get(&host) {
                pool.clone()
            } else {
                let seed = connect()?;
                let pool = Arc::new(Pool::seeded(self.pool_size, connect, seed)?);
                redirects.insert(host.clone(), pool.clone());
                pool
            }
        };
        let entry = pool.acquire()?;
        Ok((host, entry))
    }

    fn get_connection(&self, slot: u16) -> ClusterResult<(SlotRange, Entry<C>)> {
        let pool = {
            let nodes = self.nodes.read().unwrap();
            nodes
                .range(..=slot)
                .next_back()
                .filter(|(_, (range, _))| range.contains(slot))
                .map(|(_, (range, pool))| (*range, pool.clone()))
        };
        match pool {
            Some((range, pool)) => {
                let entry = pool.acquire()?;
                Ok((range, entry))
            }
            None => Err(ClusterError::new(
                ErrorKind::NodeSearch,
                format!("no slot range covers slot {slot}"),
            )),
        }
    }

    fn release(&self, key: ContainerKey, entry: Entry<C>) {
        let pool = match key {
            ContainerKey::SlotRange(range) => self
                .nodes
                .read()
                .unwrap()
                .get(&range.begin)
                .map(|(_, pool)| pool.clone()),
            ContainerKey::Host(host) => self.redirects.lock().unwrap().get(&host).cloned(),
        };
        if let Some(pool) = pool {
            pool.release(entry);
        }
    }

    fn disconnect_all(&self, disconnect: &dyn Fn(C)) {
        let nodes = std::mem::take(&mut *self.nodes.write().unwrap());
        for (_, (_, pool)) in nodes {
            pool.drain(disconnect);
        }
        let redirects = std::mem::take(&mut *self.redirects.lock().unwrap());
        for (_, pool) in redirects {
            pool.drain(disconnect);
        }
    }

    fn slot_range_count(&self) -> usize {
        self.nodes.read().unwrap().len()
    }
}
