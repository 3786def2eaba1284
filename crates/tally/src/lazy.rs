//! Typed handles to instantiated actions.
//!
//! A handle is a plain id valid for every slot of the dataflow that created
//! it (lockstep construction keeps the per-slot arenas aligned). Handles
//! are stamped with their dataflow's id so that passing one to a different
//! dataflow is caught as a construction error instead of silently
//! addressing an unrelated node.

use std::fmt;

use tally_core::{ColumnValue, Error, Result};
use tally_engine::{ColumnArgs, ColumnId, Query, QueryId, SelectionId};

/// Handle to a column producing a value of type `T` per row.
pub struct LazyColumn<T: ColumnValue> {
    pub(crate) flow: u64,
    pub(crate) id: ColumnId<T>,
}

impl<T: ColumnValue> Clone for LazyColumn<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ColumnValue> Copy for LazyColumn<T> {}

impl<T: ColumnValue> fmt::Debug for LazyColumn<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyColumn")
            .field("flow", &self.flow)
            .field("id", &self.id)
            .finish()
    }
}

/// Handle to a selection in the cutflow.
#[derive(Clone, Copy, Debug)]
pub struct LazySelection {
    pub(crate) flow: u64,
    pub(crate) id: SelectionId,
}

/// Handle to a booked query.
///
/// The `ticket` survives the post-run merge: once results are folded, the
/// per-slot replicas are dropped and the merged value is served from the
/// dataflow's result cache under this ticket.
pub struct LazyQuery<Q: Query> {
    pub(crate) flow: u64,
    pub(crate) ticket: u64,
    pub(crate) id: QueryId<Q>,
}

impl<Q: Query> Clone for LazyQuery<Q> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Q: Query> Copy for LazyQuery<Q> {}

impl<Q: Query> fmt::Debug for LazyQuery<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyQuery")
            .field("flow", &self.flow)
            .field("ticket", &self.ticket)
            .field("id", &self.id)
            .finish()
    }
}

/// A tuple of column handles bindable as action arguments.
///
/// Binding checks that every handle belongs to the same dataflow and yields
/// the slot-uniform engine ids.
pub trait LazyArgs {
    type Ids: ColumnArgs;

    fn bind(&self) -> Result<(Self::Ids, Option<u64>)>;
}

impl LazyArgs for () {
    type Ids = ();

    fn bind(&self) -> Result<((), Option<u64>)> {
        Ok(((), None))
    }
}

macro_rules! impl_lazy_args {
    ($(($T:ident, $idx:tt)),+) => {
        impl<'a, $($T: ColumnValue),+> LazyArgs for ($(&'a LazyColumn<$T>,)+) {
            type Ids = ($(ColumnId<$T>,)+);

            fn bind(&self) -> Result<(Self::Ids, Option<u64>)> {
                let flows = [$(self.$idx.flow),+];
                if flows.iter().any(|flow| *flow != flows[0]) {
                    return Err(Error::ForeignHandle);
                }
                Ok((($(self.$idx.id,)+), Some(flows[0])))
            }
        }
    };
}

impl_lazy_args!((A, 0));
impl_lazy_args!((A, 0), (B, 1));
impl_lazy_args!((A, 0), (B, 1), (C, 2));
impl_lazy_args!((A, 0), (B, 1), (C, 2), (D, 3));
