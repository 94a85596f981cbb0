use super::property::Properties;
use super::{EdgeAddress, LabelId};

/// The label set of a vertex. Small and unordered; kept as a vector.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Labels {
    labels: Vec<LabelId>,
}

impl Labels {
    /// Adds a label. Returns false if it was already present.
    pub fn add(&mut self, label: LabelId) -> bool {
        if self.has(label) {
            return false;
        }
        self.labels.push(label);
        true
    }

    /// Removes a label. Returns false if it was not present.
    pub fn remove(&mut self, label: LabelId) -> bool {
        match self.labels.iter().position(|&l| l == label) {
            Some(index) => {
                self.labels.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn has(&self, label: LabelId) -> bool {
        self.labels.contains(&label)
    }

    pub fn as_slice(&self) -> &[LabelId] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// One direction of a vertex's incident edges, by edge address.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Adjacency {
    edges: Vec<EdgeAddress>,
}

impl Adjacency {
    pub fn add(&mut self, edge: EdgeAddress) {
        self.edges.push(edge);
    }

    /// Removes one occurrence of an edge. Returns false if it was not there.
    pub fn remove(&mut self, edge: EdgeAddress) -> bool {
        match self.edges.iter().position(|&e| e == edge) {
            Some(index) => {
                self.edges.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, edge: EdgeAddress) -> bool {
        self.edges.contains(&edge)
    }

    pub fn degree(&self) -> usize {
        self.edges.len()
    }

    pub fn as_slice(&self) -> &[EdgeAddress] {
        &self.edges
    }

    pub fn iter(&self) -> impl Iterator<Item = EdgeAddress> + '_ {
        self.edges.iter().copied()
    }
}

/// A vertex payload: labels, properties and both adjacency directions. This
/// is what a version chain stores; a new copy is made per write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Vertex {
    pub labels: Labels,
    pub properties: Properties,
    pub out_edges: Adjacency,
    pub in_edges: Adjacency,
}
