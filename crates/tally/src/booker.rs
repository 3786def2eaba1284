//! Deferred query construction.
//!
//! A [`Booker`] captures everything needed to instantiate a query except
//! the selection it is booked at: a constructor closure, the recorded fill
//! tuples, and the raw/scale settings. Booking the same booker at several
//! selections produces one query per selection, indexed by selection path
//! in a [`Bookkeeper`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tally_core::{Error, Result};
use tally_engine::{ColumnArgs, Fill, FillFn, Query};

use crate::lazy::{LazyArgs, LazyQuery};

/// A deferred query factory parameterized by selection.
pub struct Booker<Q: Query> {
    name: String,
    ctor: Arc<dyn Fn() -> Q + Send + Sync>,
    fills: Vec<FillFn<Q>>,
    raw: bool,
    scale: f64,
    flow: Option<u64>,
}

impl<Q: Query> Clone for Booker<Q> {
    fn clone(&self) -> Self {
        Booker {
            name: self.name.clone(),
            ctor: Arc::clone(&self.ctor),
            fills: self.fills.clone(),
            raw: self.raw,
            scale: self.scale,
            flow: self.flow,
        }
    }
}

impl<Q: Query> Booker<Q> {
    /// A booker constructing fresh `Q` state per slot via `ctor`.
    pub fn new(name: impl Into<String>, ctor: impl Fn() -> Q + Send + Sync + 'static) -> Self {
        Booker {
            name: name.into(),
            ctor: Arc::new(ctor),
            fills: Vec::new(),
            raw: false,
            scale: 1.0,
            flow: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record a fill tuple; every booked query will observe these columns
    /// on each passing row. May be called repeatedly to concatenate fills.
    pub fn fill<L>(mut self, columns: L) -> Result<Self>
    where
        L: LazyArgs,
        Q: Fill<<L::Ids as ColumnArgs>::Values>,
    {
        let (ids, flow) = columns.bind()?;
        self.merge_flow(flow)?;
        let fill: FillFn<Q> = Arc::new(move |columns, query, weight| {
            let values = ids.read(columns)?;
            query.fill(&values, weight);
            Ok(())
        });
        self.fills.push(fill);
        Ok(self)
    }

    /// Disable weighting: booked queries count each passing row as `1.0`
    /// (the per-booker scale still applies).
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    /// Multiply `factor` into the weight of every booked query.
    pub fn scale(mut self, factor: f64) -> Self {
        self.scale *= factor;
        self
    }

    pub(crate) fn fills(&self) -> &[FillFn<Q>] {
        &self.fills
    }

    pub(crate) fn is_raw(&self) -> bool {
        self.raw
    }

    pub(crate) fn scale_factor(&self) -> f64 {
        self.scale
    }

    pub(crate) fn flow(&self) -> Option<u64> {
        self.flow
    }

    pub(crate) fn instantiate(&self) -> Q {
        (self.ctor)()
    }

    fn merge_flow(&mut self, flow: Option<u64>) -> Result<()> {
        match (self.flow, flow) {
            (Some(existing), Some(bound)) if existing != bound => Err(Error::ForeignHandle),
            (None, Some(bound)) => {
                self.flow = Some(bound);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Queries produced by booking one booker at several selections, indexed
/// by selection path.
pub struct Bookkeeper<Q: Query> {
    entries: BTreeMap<String, LazyQuery<Q>>,
}

impl<Q: Query> Bookkeeper<Q> {
    pub(crate) fn new() -> Self {
        Bookkeeper {
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, path: String, query: LazyQuery<Q>) {
        self.entries.insert(path, query);
    }

    /// The query booked at the given selection path.
    pub fn get(&self, path: &str) -> Result<&LazyQuery<Q>> {
        self.entries
            .get(path)
            .ok_or_else(|| Error::UnknownSelection(path.to_string()))
    }

    pub fn paths(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LazyQuery<Q>)> {
        self.entries
            .iter()
            .map(|(path, query)| (path.as_str(), query))
    }
}
