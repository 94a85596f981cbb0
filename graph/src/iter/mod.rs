//! The lazy traversal algebra query execution composes over accessors.
//!
//! The std [`Iterator`] trait already supplies `map`, `filter`, `flat_map`
//! and `inspect`; this module adds the graph-specialized adapters as an
//! extension trait. All adapters are pull-based and lazy, so a pipeline
//! composes cleanly with the lifetime of the transaction its accessors were
//! opened under; the adapters themselves carry no concurrency semantics.

use crate::storage::accessor::{EdgeAccessor, EdgeIter, Fillable, VertexAccessor};
use crate::storage::property::Value;
use crate::storage::{EdgeTypeId, LabelId, PropertyId};

/// Bounds on how many items an iterator may still produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Count {
    pub min: usize,
    pub max: Option<usize>,
}

impl Count {
    /// An exactly-known count.
    pub fn exact(n: usize) -> Self {
        Count { min: n, max: Some(n) }
    }
}

/// Graph adapters over any iterator. Blanket-implemented; bring the trait
/// into scope and chain away.
pub trait GraphIter: Iterator + Sized {
    /// The count bounds of this iterator, from its size hint.
    fn count_hint(&self) -> Count {
        let (min, max) = self.size_hint();
        Count { min, max }
    }

    /// Keeps the accessors whose visible version exists, filled.
    fn fill(self) -> Fill<Self>
    where
        Self::Item: Fillable,
    {
        Fill { iter: self }
    }

    /// Maps edges to their target vertices, dropping unresolvable or
    /// invisible ones.
    fn to_vertex<'a>(self) -> ToVertex<Self>
    where
        Self: Iterator<Item = EdgeAccessor<'a>>,
    {
        ToVertex { iter: self }
    }

    /// Maps edges to their source vertices, dropping unresolvable or
    /// invisible ones.
    fn from_vertex<'a>(self) -> FromVertex<Self>
    where
        Self: Iterator<Item = EdgeAccessor<'a>>,
    {
        FromVertex { iter: self }
    }

    /// Flattens vertices into their visible outgoing edges.
    fn out_edges<'a>(self) -> OutEdges<'a, Self>
    where
        Self: Iterator<Item = VertexAccessor<'a>>,
    {
        OutEdges { iter: self, current: None }
    }

    /// Keeps vertices carrying `label`.
    fn label<'a>(self, label: LabelId) -> Label<Self>
    where
        Self: Iterator<Item = VertexAccessor<'a>>,
    {
        Label { iter: self, label }
    }

    /// Keeps edges of `edge_type`.
    fn edge_type<'a>(self, edge_type: EdgeTypeId) -> Type<Self>
    where
        Self: Iterator<Item = EdgeAccessor<'a>>,
    {
        Type { iter: self, edge_type }
    }

    /// Keeps vertices whose property `key` equals `value`.
    fn has_property<'a>(self, key: PropertyId, value: Value) -> HasProperty<Self>
    where
        Self: Iterator<Item = VertexAccessor<'a>>,
    {
        HasProperty { iter: self, key, value }
    }

    /// Keeps vertices with no incident edges.
    fn isolated<'a>(self) -> Isolated<Self>
    where
        Self: Iterator<Item = VertexAccessor<'a>>,
    {
        Isolated { iter: self }
    }

    /// Keeps edges whose source vertex carries `label`.
    fn from_label<'a>(self, label: LabelId) -> FromLabel<Self>
    where
        Self: Iterator<Item = EdgeAccessor<'a>>,
    {
        FromLabel { iter: self, label }
    }

    /// Maps items through `op` for as long as it produces values, then ends.
    fn limited_map<R, F>(self, op: F) -> LimitedMap<Self, F>
    where
        F: FnMut(Self::Item) -> Option<R>,
    {
        LimitedMap { iter: self, op }
    }

    /// Consumes the iterator, calling `op` on every item.
    fn for_all<F>(self, mut op: F)
    where
        F: FnMut(Self::Item),
    {
        for item in self {
            op(item);
        }
    }
}

impl<I: Iterator> GraphIter for I {}

pub struct Fill<I> {
    iter: I,
}

impl<I> Iterator for Fill<I>
where
    I: Iterator,
    I::Item: Fillable,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut item = self.iter.next()?;
            if item.fill() {
                return Some(item);
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.iter.size_hint().1)
    }
}

pub struct ToVertex<I> {
    iter: I,
}

impl<'a, I: Iterator<Item = EdgeAccessor<'a>>> Iterator for ToVertex<I> {
    type Item = VertexAccessor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let edge = self.iter.next()?;
            if let Ok(mut vertex) = edge.to() {
                if vertex.fill() {
                    return Some(vertex);
                }
            }
        }
    }
}

pub struct FromVertex<I> {
    iter: I,
}

impl<'a, I: Iterator<Item = EdgeAccessor<'a>>> Iterator for FromVertex<I> {
    type Item = VertexAccessor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let edge = self.iter.next()?;
            if let Ok(mut vertex) = edge.from() {
                if vertex.fill() {
                    return Some(vertex);
                }
            }
        }
    }
}

pub struct OutEdges<'a, I> {
    iter: I,
    current: Option<Fill<EdgeIter<'a>>>,
}

impl<'a, I: Iterator<Item = VertexAccessor<'a>>> Iterator for OutEdges<'a, I> {
    type Item = EdgeAccessor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some(edge) = current.next() {
                    return Some(edge);
                }
            }
            let vertex = self.iter.next()?;
            self.current = Some(vertex.out_edges().fill());
        }
    }
}

pub struct Label<I> {
    iter: I,
    label: LabelId,
}

impl<'a, I: Iterator<Item = VertexAccessor<'a>>> Iterator for Label<I> {
    type Item = VertexAccessor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.by_ref().find(|vertex| vertex.has_label(self.label))
    }
}

pub struct Type<I> {
    iter: I,
    edge_type: EdgeTypeId,
}

impl<'a, I: Iterator<Item = EdgeAccessor<'a>>> Iterator for Type<I> {
    type Item = EdgeAccessor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.by_ref().find(|edge| edge.edge_type() == Some(self.edge_type))
    }
}

pub struct HasProperty<I> {
    iter: I,
    key: PropertyId,
    value: Value,
}

impl<'a, I: Iterator<Item = VertexAccessor<'a>>> Iterator for HasProperty<I> {
    type Item = VertexAccessor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let vertex = self.iter.next()?;
            if vertex.property(self.key) == Some(&self.value) {
                return Some(vertex);
            }
        }
    }
}

pub struct Isolated<I> {
    iter: I,
}

impl<'a, I: Iterator<Item = VertexAccessor<'a>>> Iterator for Isolated<I> {
    type Item = VertexAccessor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.by_ref().find(|vertex| vertex.isolated())
    }
}

pub struct FromLabel<I> {
    iter: I,
    label: LabelId,
}

impl<'a, I: Iterator<Item = EdgeAccessor<'a>>> Iterator for FromLabel<I> {
    type Item = EdgeAccessor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let edge = self.iter.next()?;
            if let Ok(mut vertex) = edge.from() {
                if vertex.fill() && vertex.has_label(self.label) {
                    return Some(edge);
                }
            }
        }
    }
}

pub struct LimitedMap<I, F> {
    iter: I,
    op: F,
}

impl<I, R, F> Iterator for LimitedMap<I, F>
where
    I: Iterator,
    F: FnMut(I::Item) -> Option<R>,
{
    type Item = R;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.iter.next()?;
        (self.op)(item)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::CResult;
    use crate::mvcc::engine::{Engine, SingleNodeEngine};
    use crate::storage::graph::Graph;
    use crate::storage::Gid;

    const LIKES: EdgeTypeId = EdgeTypeId(1);
    const KNOWS: EdgeTypeId = EdgeTypeId(2);
    const PERSON: LabelId = LabelId(1);
    const NAME: PropertyId = PropertyId(1);

    /// alice -LIKES-> bob -KNOWS-> carol, plus an isolated dangling vertex;
    /// alice and bob are persons.
    fn fixture(engine: &SingleNodeEngine, graph: &Graph) -> CResult<(Gid, Gid, Gid, Gid)> {
        let tx = engine.begin()?;
        let mut alice = graph.insert_vertex(&tx);
        let mut bob = graph.insert_vertex(&tx);
        let mut carol = graph.insert_vertex(&tx);
        let dangling = graph.insert_vertex(&tx);

        alice.add_label(PERSON)?;
        alice.set_property(NAME, Value::from("alice"))?;
        bob.add_label(PERSON)?;
        bob.set_property(NAME, Value::from("bob"))?;
        graph.insert_edge(&tx, &mut alice, &mut bob, LIKES)?;
        graph.insert_edge(&tx, &mut bob, &mut carol, KNOWS)?;

        let gids = (alice.gid(), bob.gid(), carol.gid(), dangling.gid());
        engine.commit(tx.id)?;
        Ok(gids)
    }

    #[test]
    fn fill_filters_invisible_records() -> CResult<()> {
        let engine = SingleNodeEngine::new();
        let graph = Graph::new(0);
        fixture(&engine, &graph)?;

        // One extra uncommitted vertex from a concurrent transaction.
        let other = engine.begin()?;
        graph.insert_vertex(&other);

        let reader = engine.begin()?;
        assert_eq!(graph.vertices(&reader).count(), 5);
        assert_eq!(graph.vertices(&reader).fill().count(), 4);
        engine.abort(other.id)?;
        Ok(())
    }

    #[test]
    fn label_and_property_filters_compose() -> CResult<()> {
        let engine = SingleNodeEngine::new();
        let graph = Graph::new(0);
        let (alice, bob, _, _) = fixture(&engine, &graph)?;

        let reader = engine.begin()?;
        let persons: Vec<Gid> =
            graph.vertices(&reader).fill().label(PERSON).map(|v| v.gid()).collect();
        assert_eq!(persons, vec![alice, bob]);

        let named: Vec<Gid> = graph
            .vertices(&reader)
            .fill()
            .has_property(NAME, Value::from("bob"))
            .map(|v| v.gid())
            .collect();
        assert_eq!(named, vec![bob]);
        Ok(())
    }

    #[test]
    fn traversal_crosses_edges() -> CResult<()> {
        let engine = SingleNodeEngine::new();
        let graph = Graph::new(0);
        let (alice, bob, carol, _) = fixture(&engine, &graph)?;

        let reader = engine.begin()?;

        // Everything reachable over one hop.
        let targets: Vec<Gid> =
            graph.vertices(&reader).fill().out_edges().to_vertex().map(|v| v.gid()).collect();
        assert_eq!(targets, vec![bob, carol]);

        // Type and source-label filters narrow edge sets.
        let knows: Vec<Gid> = graph
            .edges(&reader)
            .fill()
            .edge_type(KNOWS)
            .from_vertex()
            .map(|v| v.gid())
            .collect();
        assert_eq!(knows, vec![bob]);
        let from_persons = graph.edges(&reader).fill().from_label(PERSON).count();
        assert_eq!(from_persons, 2);
        let _ = alice;
        Ok(())
    }

    #[test]
    fn isolated_finds_the_dangling_vertex() -> CResult<()> {
        let engine = SingleNodeEngine::new();
        let graph = Graph::new(0);
        let (_, _, _, dangling) = fixture(&engine, &graph)?;

        let reader = engine.begin()?;
        let isolated: Vec<Gid> =
            graph.vertices(&reader).fill().isolated().map(|v| v.gid()).collect();
        assert_eq!(isolated, vec![dangling]);
        Ok(())
    }

    #[test]
    fn limited_map_stops_at_the_first_none() {
        let taken: Vec<i32> =
            (1..10).limited_map(|i| if i < 4 { Some(i * 2) } else { None }).collect();
        assert_eq!(taken, vec![2, 4, 6]);
    }

    #[test]
    fn count_hint_reflects_size_bounds() -> CResult<()> {
        let engine = SingleNodeEngine::new();
        let graph = Graph::new(0);
        fixture(&engine, &graph)?;

        let reader = engine.begin()?;
        let vertices = graph.vertices(&reader);
        assert_eq!(vertices.count_hint(), Count::exact(4));

        // Filtering keeps the upper bound and drops the lower.
        let filled = graph.vertices(&reader).fill();
        assert_eq!(filled.count_hint(), Count { min: 0, max: Some(4) });
        Ok(())
    }
}
