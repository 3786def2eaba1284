//! The per-slot query engine.
//!
//! A query is an accumulator booked at a selection: whenever the selection's
//! cut chain passes, the query receives the effective row weight (times its
//! own scale, or a flat `1.0` for raw queries) and records a contribution.
//! After the pass every slot holds a partial state; slot 0 acts as the model
//! that folds all partial outputs into the final result.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tally_core::{Error, Result};

use crate::column::ColumnSet;
use crate::selection::{SelectionId, SelectionSet};

/// A user-supplied accumulator.
///
/// Per-slot state is exclusive to its slot until the merge phase, so
/// contributions must be commutative and associative for `merge` to be a
/// correct reduction.
pub trait Query: Send + 'static {
    type Output: Clone + Send + 'static;

    /// Record one passing row with its effective weight.
    fn count(&mut self, weight: f64);

    /// Partial state of this replica after the pass.
    fn result(&self) -> Self::Output;

    /// Fold all per-slot outputs into the final result.
    fn merge(&self, parts: Vec<Self::Output>) -> Self::Output;
}

/// A query that additionally observes column values on each passing row.
///
/// `V` is the tuple of observed values; the hook is called once per recorded
/// fill tuple, in place of [`Query::count`].
pub trait Fill<V>: Query {
    fn fill(&mut self, values: &V, weight: f64);
}

/// Typed handle to a query inside a [`QuerySet`].
pub struct QueryId<Q> {
    index: usize,
    _marker: PhantomData<fn() -> Q>,
}

impl<Q> QueryId<Q> {
    fn new(index: usize) -> Self {
        QueryId {
            index,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl<Q> Clone for QueryId<Q> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Q> Copy for QueryId<Q> {}

impl<Q> PartialEq for QueryId<Q> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<Q> Eq for QueryId<Q> {}

impl<Q> fmt::Debug for QueryId<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryId({})", self.index)
    }
}

/// A recorded fill: reads the bound columns and feeds one fill hook call.
pub type FillFn<Q> = Arc<dyn Fn(&ColumnSet, &mut Q, f64) -> Result<()> + Send + Sync>;

/// One slot's replica of a booked query.
pub struct QueryNode<Q: Query> {
    query: RefCell<Q>,
    selection: SelectionId,
    scale: f64,
    raw: bool,
    fills: Vec<FillFn<Q>>,
}

impl<Q: Query> QueryNode<Q> {
    pub fn new(
        query: Q,
        selection: SelectionId,
        scale: f64,
        raw: bool,
        fills: Vec<FillFn<Q>>,
    ) -> Self {
        QueryNode {
            query: RefCell::new(query),
            selection,
            scale,
            raw,
            fills,
        }
    }
}

trait QueryAction: Send {
    fn execute(&self, columns: &ColumnSet, selections: &SelectionSet, entry: u64) -> Result<()>;

    /// Fold the partial outputs of all lockstep replicas, model first.
    fn merged(&self, peers: &[&dyn QueryAction]) -> Result<Box<dyn Any + Send>>;

    fn as_any(&self) -> &dyn Any;
}

impl<Q: Query> QueryAction for QueryNode<Q> {
    fn execute(&self, columns: &ColumnSet, selections: &SelectionSet, _entry: u64) -> Result<()> {
        if !selections.passed(self.selection, columns)? {
            return Ok(());
        }
        let weight = self.scale
            * if self.raw {
                1.0
            } else {
                selections.weight(self.selection, columns)?
            };
        let mut query = self.query.borrow_mut();
        if self.fills.is_empty() {
            query.count(weight);
        } else {
            for fill in &self.fills {
                fill(columns, &mut query, weight)?;
            }
        }
        Ok(())
    }

    fn merged(&self, peers: &[&dyn QueryAction]) -> Result<Box<dyn Any + Send>> {
        let parts = peers
            .iter()
            .map(|peer| {
                peer.as_any()
                    .downcast_ref::<QueryNode<Q>>()
                    .map(|node| node.query.borrow().result())
                    .ok_or(Error::Invariant("query replicas out of lockstep"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(self.query.borrow().merge(parts)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One slot's arena of booked queries.
#[derive(Default)]
pub struct QuerySet {
    nodes: Vec<Box<dyn QueryAction>>,
}

impl QuerySet {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add<Q: Query>(&mut self, node: QueryNode<Q>) -> QueryId<Q> {
        let index = self.nodes.len();
        self.nodes.push(Box::new(node));
        QueryId::new(index)
    }

    /// Partial (per-slot) output of the addressed query.
    pub fn result<Q: Query>(&self, id: QueryId<Q>) -> Result<Q::Output> {
        let node = self
            .nodes
            .get(id.index)
            .ok_or(Error::Invariant("query id out of range"))?;
        let node = node
            .as_any()
            .downcast_ref::<QueryNode<Q>>()
            .ok_or(Error::Invariant("query type mismatch"))?;
        Ok(node.query.borrow().result())
    }

    /// Merge one query across all lockstep replicas; `self` must be the
    /// model (slot 0) set, `peers` every slot's set in order.
    pub fn merged_with(&self, index: usize, peers: &[&QuerySet]) -> Result<Box<dyn Any + Send>> {
        let model = self
            .nodes
            .get(index)
            .ok_or(Error::Invariant("query index out of range"))?;
        let nodes = peers
            .iter()
            .map(|set| {
                set.nodes
                    .get(index)
                    .map(|boxed| boxed.as_ref())
                    .ok_or(Error::Invariant("query replicas out of lockstep"))
            })
            .collect::<Result<Vec<_>>>()?;
        model.merged(&nodes)
    }

    /// Drop every booked query, e.g. after its results were merged.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub(crate) fn execute(
        &self,
        index: usize,
        columns: &ColumnSet,
        selections: &SelectionSet,
        entry: u64,
    ) -> Result<()> {
        self.nodes[index].execute(columns, selections, entry)
    }
}
