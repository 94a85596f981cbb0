use std::ptr::NonNull;

use crate::error::{CResult, Error};
use crate::mvcc::Transaction;
use super::address::Address;
use super::edge::Edge;
use super::graph::Graph;
use super::property::Value;
use super::version::{Version, VersionList};
use super::vertex::Vertex;
use super::{EdgeAddress, EdgeTypeId, Gid, LabelId, PropertyId, VertexAddress};

/// The filtering hook of iterator pipelines: resolve the record version
/// visible to the accessor's transaction.
pub trait Fillable {
    /// Resolves and caches the visible version. False when none exists, in
    /// which case the accessor reads as absent.
    fn fill(&mut self) -> bool;
}

/// The common core of vertex and edge accessors: the record identity, the
/// transaction it is read under, and the cached visible version.
///
/// Reads go through the cached version pointer; all mutation is funneled
/// through [`VersionList::write`], which enforces copy-on-write, and refreshes
/// the cache afterwards.
struct RecordAccessor<'a, T> {
    vlist: &'a VersionList<T>,
    record: Option<NonNull<Version<T>>>,
    tx: &'a Transaction,
    graph: &'a Graph,
}

impl<'a, T> Clone for RecordAccessor<'a, T> {
    fn clone(&self) -> Self {
        RecordAccessor { vlist: self.vlist, record: self.record, tx: self.tx, graph: self.graph }
    }
}

impl<'a, T: Clone> RecordAccessor<'a, T> {
    fn new(vlist: &'a VersionList<T>, tx: &'a Transaction, graph: &'a Graph) -> Self {
        RecordAccessor { vlist, record: None, tx, graph }
    }

    fn fill(&mut self) -> bool {
        self.record = self.vlist.find(self.tx);
        self.record.is_some()
    }

    fn data(&self) -> Option<&T> {
        // The version stays alive as long as the graph: reclamation requires
        // exclusive access to it.
        self.record.map(|version| unsafe { version.as_ref() }.data())
    }

    fn write<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> CResult<R> {
        let result = self.vlist.write(self.tx, f)?;
        self.fill();
        Ok(result)
    }

    fn remove(&mut self) -> CResult<()> {
        self.vlist.remove(self.tx)?;
        self.record = None;
        Ok(())
    }
}

/// A handle on one vertex under one transaction. Call [`Fillable::fill`]
/// before reading; mutations transparently allocate a new version.
pub struct VertexAccessor<'a> {
    record: RecordAccessor<'a, Vertex>,
}

impl<'a> Clone for VertexAccessor<'a> {
    fn clone(&self) -> Self {
        VertexAccessor { record: self.record.clone() }
    }
}

impl<'a> Fillable for VertexAccessor<'a> {
    fn fill(&mut self) -> bool {
        self.record.fill()
    }
}

impl<'a> VertexAccessor<'a> {
    pub(crate) fn new(vlist: &'a VersionList<Vertex>, tx: &'a Transaction, graph: &'a Graph) -> Self {
        VertexAccessor { record: RecordAccessor::new(vlist, tx, graph) }
    }

    pub fn gid(&self) -> Gid {
        self.record.vlist.gid()
    }

    pub fn address(&self) -> VertexAddress {
        Address::new_local(NonNull::from(self.record.vlist))
    }

    fn data(&self) -> Option<&Vertex> {
        self.record.data()
    }

    /// Adds a label. False if the label was already set.
    pub fn add_label(&mut self, label: LabelId) -> CResult<bool> {
        self.record.write(|vertex| vertex.labels.add(label))
    }

    /// Removes a label. False if the label was not set.
    pub fn remove_label(&mut self, label: LabelId) -> CResult<bool> {
        self.record.write(|vertex| vertex.labels.remove(label))
    }

    pub fn has_label(&self, label: LabelId) -> bool {
        self.data().map_or(false, |vertex| vertex.labels.has(label))
    }

    pub fn labels(&self) -> &[LabelId] {
        self.data().map(|vertex| vertex.labels.as_slice()).unwrap_or(&[])
    }

    pub fn property(&self, key: PropertyId) -> Option<&Value> {
        self.data().and_then(|vertex| vertex.properties.get(key))
    }

    /// Sets a property, returning the previous value if any.
    pub fn set_property(&mut self, key: PropertyId, value: Value) -> CResult<Option<Value>> {
        self.record.write(|vertex| vertex.properties.set(key, value))
    }

    pub fn clear_property(&mut self, key: PropertyId) -> CResult<Option<Value>> {
        self.record.write(|vertex| vertex.properties.clear(key))
    }

    pub fn out_degree(&self) -> usize {
        self.data().map_or(0, |vertex| vertex.out_edges.degree())
    }

    pub fn in_degree(&self) -> usize {
        self.data().map_or(0, |vertex| vertex.in_edges.degree())
    }

    pub fn degree(&self) -> usize {
        self.in_degree() + self.out_degree()
    }

    pub fn isolated(&self) -> bool {
        self.out_degree() == 0 && self.in_degree() == 0
    }

    /// Whether some visible in-edge arrives here from `other`.
    pub fn in_contains(&self, other: &VertexAccessor) -> bool {
        let vertex = match self.data() {
            Some(vertex) => vertex,
            None => return false,
        };
        for address in vertex.in_edges.iter() {
            if let Ok(mut edge) = self.record.graph.edge_from_address(address, self.record.tx) {
                if edge.fill() && edge.from_address() == Some(other.address()) {
                    return true;
                }
            }
        }
        false
    }

    /// The visible outgoing edges. Edges that do not resolve on this worker
    /// are skipped; accessors are yielded unfilled.
    pub fn out_edges(&self) -> EdgeIter<'a> {
        let addresses = self.data().map(|vertex| vertex.out_edges.as_slice().to_vec());
        EdgeIter {
            addresses: addresses.unwrap_or_default().into_iter(),
            tx: self.record.tx,
            graph: self.record.graph,
        }
    }

    /// The visible incoming edges, like [`VertexAccessor::out_edges`].
    pub fn in_edges(&self) -> EdgeIter<'a> {
        let addresses = self.data().map(|vertex| vertex.in_edges.as_slice().to_vec());
        EdgeIter {
            addresses: addresses.unwrap_or_default().into_iter(),
            tx: self.record.tx,
            graph: self.record.graph,
        }
    }

    /// Removes the vertex: expires its record, expires every incident edge,
    /// and detaches those edges from the adjacency of their other endpoint.
    /// All of it happens under the accessor's transaction.
    pub fn remove(&mut self) -> CResult<()> {
        if !self.fill() {
            return Err(Error::Serialization);
        }
        let data = match self.data() {
            Some(data) => data.clone(),
            None => return Err(Error::Serialization),
        };
        self.record.remove()?;

        for address in data.out_edges.iter() {
            let mut edge = self.record.graph.edge_from_address(address, self.record.tx)?;
            if !edge.fill() {
                continue;
            }
            let other = match edge.to_address() {
                Some(other) => other,
                None => continue,
            };
            edge.record.remove()?;
            let mut other = self.record.graph.vertex_from_address(other, self.record.tx)?;
            if other.address() != self.address() && other.fill() {
                other.record.write(|vertex| vertex.in_edges.remove(address))?;
            }
        }
        for address in data.in_edges.iter() {
            let mut edge = self.record.graph.edge_from_address(address, self.record.tx)?;
            if !edge.fill() {
                continue;
            }
            let other = match edge.from_address() {
                Some(other) => other,
                None => continue,
            };
            edge.record.remove()?;
            let mut other = self.record.graph.vertex_from_address(other, self.record.tx)?;
            if other.address() != self.address() && other.fill() {
                other.record.write(|vertex| vertex.out_edges.remove(address))?;
            }
        }
        Ok(())
    }

    pub(crate) fn attach_out(&mut self, edge: EdgeAddress) -> CResult<()> {
        self.record.write(|vertex| vertex.out_edges.add(edge))
    }

    pub(crate) fn attach_in(&mut self, edge: EdgeAddress) -> CResult<()> {
        self.record.write(|vertex| vertex.in_edges.add(edge))
    }
}

/// A handle on one edge under one transaction.
pub struct EdgeAccessor<'a> {
    record: RecordAccessor<'a, Edge>,
}

impl<'a> Clone for EdgeAccessor<'a> {
    fn clone(&self) -> Self {
        EdgeAccessor { record: self.record.clone() }
    }
}

impl<'a> Fillable for EdgeAccessor<'a> {
    fn fill(&mut self) -> bool {
        self.record.fill()
    }
}

impl<'a> EdgeAccessor<'a> {
    pub(crate) fn new(vlist: &'a VersionList<Edge>, tx: &'a Transaction, graph: &'a Graph) -> Self {
        EdgeAccessor { record: RecordAccessor::new(vlist, tx, graph) }
    }

    pub fn gid(&self) -> Gid {
        self.record.vlist.gid()
    }

    pub fn address(&self) -> EdgeAddress {
        Address::new_local(NonNull::from(self.record.vlist))
    }

    fn data(&self) -> Option<&Edge> {
        self.record.data()
    }

    pub fn edge_type(&self) -> Option<EdgeTypeId> {
        self.data().map(|edge| edge.edge_type)
    }

    pub fn from_address(&self) -> Option<VertexAddress> {
        self.data().map(|edge| edge.from)
    }

    pub fn to_address(&self) -> Option<VertexAddress> {
        self.data().map(|edge| edge.to)
    }

    /// An accessor for the source vertex.
    pub fn from(&self) -> CResult<VertexAccessor<'a>> {
        let address = self
            .from_address()
            .ok_or_else(|| Error::Internal("edge accessor is not filled".to_string()))?;
        self.record.graph.vertex_from_address(address, self.record.tx)
    }

    /// An accessor for the target vertex.
    pub fn to(&self) -> CResult<VertexAccessor<'a>> {
        let address = self
            .to_address()
            .ok_or_else(|| Error::Internal("edge accessor is not filled".to_string()))?;
        self.record.graph.vertex_from_address(address, self.record.tx)
    }

    pub fn property(&self, key: PropertyId) -> Option<&Value> {
        self.data().and_then(|edge| edge.properties.get(key))
    }

    /// Sets a property, returning the previous value if any.
    pub fn set_property(&mut self, key: PropertyId, value: Value) -> CResult<Option<Value>> {
        self.record.write(|edge| edge.properties.set(key, value))
    }

    pub fn clear_property(&mut self, key: PropertyId) -> CResult<Option<Value>> {
        self.record.write(|edge| edge.properties.clear(key))
    }

    /// Removes the edge: expires its record and detaches it from both
    /// endpoint adjacencies.
    pub fn remove(&mut self) -> CResult<()> {
        if !self.fill() {
            return Err(Error::Serialization);
        }
        let data = match self.data() {
            Some(data) => data.clone(),
            None => return Err(Error::Serialization),
        };
        let address = self.address();
        self.record.remove()?;

        let mut from = self.record.graph.vertex_from_address(data.from, self.record.tx)?;
        if from.fill() {
            from.record.write(|vertex| vertex.out_edges.remove(address))?;
        }
        let mut to = self.record.graph.vertex_from_address(data.to, self.record.tx)?;
        if to.fill() {
            to.record.write(|vertex| vertex.in_edges.remove(address))?;
        }
        Ok(())
    }
}

/// An iterator over one adjacency direction of a vertex.
pub struct EdgeIter<'a> {
    addresses: std::vec::IntoIter<EdgeAddress>,
    tx: &'a Transaction,
    graph: &'a Graph,
}

impl<'a> Iterator for EdgeIter<'a> {
    type Item = EdgeAccessor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let address = self.addresses.next()?;
            // Local traversal skips edges this worker cannot resolve.
            match self.graph.edge_from_address(address, self.tx) {
                Ok(edge) => return Some(edge),
                Err(_) => continue,
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.addresses.size_hint().1)
    }
}
