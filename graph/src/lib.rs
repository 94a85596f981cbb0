//! `graph-rs` is an in-memory graph storage engine with multi-version
//! concurrency control. Vertices and edges live in per-record version chains;
//! transactions get monotonically increasing ids, an active-set snapshot and
//! a lock-free commit log to decide visibility, so readers never block
//! writers and writers never block readers. Records are referenced through
//! one-word addresses that are either local pointers or (worker, global id)
//! pairs, and a process-local reactor carries the typed messages distributed
//! workers exchange. [Author fengyang]
//!
//! ## Getting started
//!
//! ```rust
//! use graph_rs::error::CResult;
//! use graph_rs::mvcc::engine::{Engine, SingleNodeEngine};
//! use graph_rs::storage::graph::Graph;
//! use graph_rs::storage::{EdgeTypeId, LabelId};
//!
//! fn main() -> CResult<()> {
//!     let engine = SingleNodeEngine::new();
//!     let graph = Graph::new(0);
//!
//!     let tx = engine.begin()?;
//!     let mut alice = graph.insert_vertex(&tx);
//!     let mut bob = graph.insert_vertex(&tx);
//!     alice.add_label(LabelId(1))?;
//!     graph.insert_edge(&tx, &mut alice, &mut bob, EdgeTypeId(7))?;
//!     engine.commit(tx.id)?;
//!
//!     // A fresh transaction sees the committed graph.
//!     let reader = engine.begin()?;
//!     let vertex = graph.vertex(alice.gid(), &reader).expect("committed");
//!     assert!(vertex.has_label(LabelId(1)));
//!     assert_eq!(vertex.out_degree(), 1);
//!     engine.abort(reader.id)?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod iter;
pub mod mvcc;
pub mod reactor;
pub mod storage;

#[cfg(test)]
mod test {
    use crate::error::CResult;
    use crate::iter::GraphIter;
    use crate::mvcc::engine::{Engine, SingleNodeEngine};
    use crate::storage::graph::Graph;
    use crate::storage::{EdgeTypeId, LabelId};

    /// End to end: build a small graph, mutate it transactionally, traverse
    /// it, and reclaim what fell out of view.
    #[test]
    fn run() -> CResult<()> {
        let engine = SingleNodeEngine::new();
        let mut graph = Graph::new(0);

        let (a, b, c) = {
            let tx = engine.begin()?;
            let mut a = graph.insert_vertex(&tx);
            let mut b = graph.insert_vertex(&tx);
            let mut c = graph.insert_vertex(&tx);
            a.add_label(LabelId(1))?;
            graph.insert_edge(&tx, &mut a, &mut b, EdgeTypeId(1))?;
            graph.insert_edge(&tx, &mut b, &mut c, EdgeTypeId(1))?;
            let gids = (a.gid(), b.gid(), c.gid());
            engine.commit(tx.id)?;
            gids
        };

        {
            let tx = engine.begin()?;
            graph.vertex(b, &tx).expect("visible").remove()?;
            engine.commit(tx.id)?;
        }

        graph.collect_garbage(engine.gc_horizon()?, engine.commit_log());

        let reader = engine.begin()?;
        assert!(graph.vertex(b, &reader).is_none());
        let reachable = graph.vertices(&reader).fill().map(|v| v.gid()).collect::<Vec<_>>();
        assert_eq!(reachable, vec![a, c]);
        assert_eq!(graph.vertices(&reader).fill().isolated().count(), 2);
        engine.abort(reader.id)?;
        Ok(())
    }
}
