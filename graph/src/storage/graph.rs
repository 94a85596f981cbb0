use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use log::info;

use crate::error::{CResult, Error};
use crate::mvcc::commit_log::CommitLog;
use crate::mvcc::{Transaction, TransactionId};
use super::accessor::{EdgeAccessor, Fillable, VertexAccessor};
use super::edge::Edge;
use super::version::VersionList;
use super::vertex::Vertex;
use super::{EdgeAddress, EdgeTypeId, Gid, Status, VertexAddress, WorkerId};

/// 单个worker的图存储。 vertices/edges为gid到记录的map；记录Box在堆上，
/// 地址在map扩容时保持稳定，所以Address可以直接存指针。
type Records<T> = HashMap<Gid, Box<VersionList<T>>>;

/// The graph storage of one worker: vertex and edge records by gid.
///
/// Records are owned by boxed version lists whose heap address never moves,
/// which is what local [`super::address::Address`]es point at. Accessors
/// borrow the graph, and garbage collection takes the graph exclusively, so
/// no accessor can outlive the versions it reads.
pub struct Graph {
    worker_id: WorkerId,
    vertices: Mutex<Records<Vertex>>,
    edges: Mutex<Records<Edge>>,
    next_gid: AtomicU64,
}

fn locked<T>(records: &Mutex<Records<T>>) -> MutexGuard<'_, Records<T>> {
    // Held only for map lookups and inserts, which do not panic.
    records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Graph {
    pub fn new(worker_id: WorkerId) -> Self {
        Graph {
            worker_id,
            vertices: Mutex::new(HashMap::new()),
            edges: Mutex::new(HashMap::new()),
            next_gid: AtomicU64::new(1),
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Creates a vertex under `tx` and returns a filled accessor for it.
    pub fn insert_vertex<'a>(&'a self, tx: &'a Transaction) -> VertexAccessor<'a> {
        let gid = self.next_gid.fetch_add(1, Ordering::SeqCst);
        let vlist = Box::new(VersionList::new(gid, tx, Vertex::default()));
        let ptr: *const VersionList<Vertex> = &*vlist;
        locked(&self.vertices).insert(gid, vlist);

        let mut vertex = VertexAccessor::new(unsafe { &*ptr }, tx, self);
        vertex.fill();
        vertex
    }

    /// Creates an edge from `from` to `to` under `tx`, attaching it to both
    /// adjacencies, and returns a filled accessor for it.
    pub fn insert_edge<'a>(
        &'a self,
        tx: &'a Transaction,
        from: &mut VertexAccessor<'a>,
        to: &mut VertexAccessor<'a>,
        edge_type: EdgeTypeId,
    ) -> CResult<EdgeAccessor<'a>> {
        let gid = self.next_gid.fetch_add(1, Ordering::SeqCst);
        let payload = Edge::new(edge_type, from.address(), to.address());
        let vlist = Box::new(VersionList::new(gid, tx, payload));
        let ptr: *const VersionList<Edge> = &*vlist;
        locked(&self.edges).insert(gid, vlist);

        let mut edge = EdgeAccessor::new(unsafe { &*ptr }, tx, self);
        edge.fill();
        let address = edge.address();
        from.attach_out(address)?;
        to.attach_in(address)?;
        Ok(edge)
    }

    /// The vertex with this gid, filled under `tx`; absent when it does not
    /// exist or is invisible.
    pub fn vertex<'a>(&'a self, gid: Gid, tx: &'a Transaction) -> Option<VertexAccessor<'a>> {
        let ptr = {
            let records = locked(&self.vertices);
            let vlist = records.get(&gid)?;
            &**vlist as *const VersionList<Vertex>
        };
        let mut vertex = VertexAccessor::new(unsafe { &*ptr }, tx, self);
        if vertex.fill() {
            Some(vertex)
        } else {
            None
        }
    }

    /// The edge with this gid, filled under `tx`.
    pub fn edge<'a>(&'a self, gid: Gid, tx: &'a Transaction) -> Option<EdgeAccessor<'a>> {
        let ptr = {
            let records = locked(&self.edges);
            let vlist = records.get(&gid)?;
            &**vlist as *const VersionList<Edge>
        };
        let mut edge = EdgeAccessor::new(unsafe { &*ptr }, tx, self);
        if edge.fill() {
            Some(edge)
        } else {
            None
        }
    }

    /// Resolves a vertex address: a local one by pointer, a remote one on
    /// this worker by gid. Addresses of other workers need a remote fetch
    /// this storage cannot perform.
    pub(crate) fn vertex_from_address<'a>(
        &'a self,
        address: VertexAddress,
        tx: &'a Transaction,
    ) -> CResult<VertexAccessor<'a>> {
        if address.is_local() {
            let vlist = unsafe { &*address.local().as_ptr() };
            return Ok(VertexAccessor::new(vlist, tx, self));
        }
        if address.worker_id() == self.worker_id {
            let ptr = {
                let records = locked(&self.vertices);
                match records.get(&address.global_id()) {
                    Some(vlist) => &**vlist as *const VersionList<Vertex>,
                    None => {
                        return Err(Error::InvalidData(format!(
                            "no vertex {} on worker {}",
                            address.global_id(),
                            self.worker_id,
                        )))
                    }
                }
            };
            return Ok(VertexAccessor::new(unsafe { &*ptr }, tx, self));
        }
        Err(Error::RemoteUnavailable(format!(
            "vertex {} lives on worker {}",
            address.global_id(),
            address.worker_id(),
        )))
    }

    /// Resolves an edge address, like [`Graph::vertex_from_address`].
    pub(crate) fn edge_from_address<'a>(
        &'a self,
        address: EdgeAddress,
        tx: &'a Transaction,
    ) -> CResult<EdgeAccessor<'a>> {
        if address.is_local() {
            let vlist = unsafe { &*address.local().as_ptr() };
            return Ok(EdgeAccessor::new(vlist, tx, self));
        }
        if address.worker_id() == self.worker_id {
            let ptr = {
                let records = locked(&self.edges);
                match records.get(&address.global_id()) {
                    Some(vlist) => &**vlist as *const VersionList<Edge>,
                    None => {
                        return Err(Error::InvalidData(format!(
                            "no edge {} on worker {}",
                            address.global_id(),
                            self.worker_id,
                        )))
                    }
                }
            };
            return Ok(EdgeAccessor::new(unsafe { &*ptr }, tx, self));
        }
        Err(Error::RemoteUnavailable(format!(
            "edge {} lives on worker {}",
            address.global_id(),
            address.worker_id(),
        )))
    }

    /// All vertex records in gid order, as unfilled accessors; pipe through
    /// the iterator algebra's fill to keep only the visible ones.
    pub fn vertices<'a>(
        &'a self,
        tx: &'a Transaction,
    ) -> impl Iterator<Item = VertexAccessor<'a>> + 'a {
        let mut ptrs: Vec<(Gid, *const VersionList<Vertex>)> = locked(&self.vertices)
            .iter()
            .map(|(gid, vlist)| (*gid, &**vlist as *const VersionList<Vertex>))
            .collect();
        ptrs.sort_unstable_by_key(|(gid, _)| *gid);
        ptrs.into_iter().map(move |(_, ptr)| VertexAccessor::new(unsafe { &*ptr }, tx, self))
    }

    /// All edge records in gid order, as unfilled accessors.
    pub fn edges<'a>(&'a self, tx: &'a Transaction) -> impl Iterator<Item = EdgeAccessor<'a>> + 'a {
        let mut ptrs: Vec<(Gid, *const VersionList<Edge>)> = locked(&self.edges)
            .iter()
            .map(|(gid, vlist)| (*gid, &**vlist as *const VersionList<Edge>))
            .collect();
        ptrs.sort_unstable_by_key(|(gid, _)| *gid);
        ptrs.into_iter().map(move |(_, ptr)| EdgeAccessor::new(unsafe { &*ptr }, tx, self))
    }

    pub fn status(&self) -> Status {
        Status {
            name: "graph".to_string(),
            worker_id: self.worker_id,
            vertices: locked(&self.vertices).len() as u64,
            edges: locked(&self.edges).len() as u64,
        }
    }

    /// Sweeps every version chain, reclaiming versions unreachable below the
    /// engine's horizon. Takes the graph exclusively: no accessor may be
    /// alive, so freed versions cannot be observed. Emptied chains stay in
    /// the maps as inert identities; every find on them misses.
    pub fn collect_garbage(&mut self, horizon: TransactionId, clog: &CommitLog) -> usize {
        let mut freed = 0;
        let vertices = self.vertices.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        for vlist in vertices.values_mut() {
            freed += vlist.gc(horizon, clog);
        }
        let edges = self.edges.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        for vlist in edges.values_mut() {
            freed += vlist.gc(horizon, clog);
        }
        if freed > 0 {
            info!("Garbage collection freed {} versions below horizon {}", freed, horizon);
        }
        freed
    }
}
