//! Systematic variations.
//!
//! A [`Varied`] wrapper carries a nominal node plus named alternatives, one
//! per variation universe. Composition takes the union of the variation
//! names across all arguments; for each name, every argument contributes
//! its own variation or falls back to its nominal. All universes share the
//! single dataset pass — each one only adds its own replicas to the graph.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tally_core::{ColumnValue, DataSet, Error, ReadColumn, Result};
use tally_engine::{Decision, EquationFn, Fill, Query};

use crate::booker::Booker;
use crate::dataflow::{Dataflow, SelectionMode};
use crate::lazy::{LazyColumn, LazyQuery, LazySelection};

/// A nominal node plus its named variations.
pub struct Varied<N> {
    nominal: N,
    variations: BTreeMap<String, N>,
}

impl<N: Clone> Clone for Varied<N> {
    fn clone(&self) -> Self {
        Varied {
            nominal: self.nominal.clone(),
            variations: self.variations.clone(),
        }
    }
}

impl<N> Varied<N> {
    pub fn new(nominal: N) -> Self {
        Varied {
            nominal,
            variations: BTreeMap::new(),
        }
    }

    /// Attach a variation; a second node under the same name is rejected.
    pub fn set_variation(&mut self, name: impl Into<String>, node: N) -> Result<()> {
        let name = name.into();
        if self.variations.contains_key(&name) {
            return Err(Error::DuplicateVariation(name));
        }
        self.variations.insert(name, node);
        Ok(())
    }

    pub fn nominal(&self) -> &N {
        &self.nominal
    }

    /// The node of the named universe, falling back to nominal when the
    /// name is unknown.
    pub fn variation(&self, name: &str) -> &N {
        self.variations.get(name).unwrap_or(&self.nominal)
    }

    pub fn has_variation(&self, name: &str) -> bool {
        self.variations.contains_key(name)
    }

    pub fn variation_names(&self) -> BTreeSet<String> {
        self.variations.keys().cloned().collect()
    }
}

/// Uniform view over nominal-only and varied nodes, used to lift graph
/// operations across variation universes.
pub trait Systematic<N> {
    fn nominal_node(&self) -> &N;

    /// The node for a universe, nominal when this argument lacks it.
    fn variation_node(&self, name: &str) -> &N;

    fn names(&self) -> BTreeSet<String>;
}

impl<N> Systematic<N> for Varied<N> {
    fn nominal_node(&self) -> &N {
        self.nominal()
    }

    fn variation_node(&self, name: &str) -> &N {
        self.variation(name)
    }

    fn names(&self) -> BTreeSet<String> {
        self.variation_names()
    }
}

impl Systematic<LazySelection> for LazySelection {
    fn nominal_node(&self) -> &LazySelection {
        self
    }

    fn variation_node(&self, _name: &str) -> &LazySelection {
        self
    }

    fn names(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

impl<T: ColumnValue> Systematic<LazyColumn<T>> for LazyColumn<T> {
    fn nominal_node(&self) -> &LazyColumn<T> {
        self
    }

    fn variation_node(&self, _name: &str) -> &LazyColumn<T> {
        self
    }

    fn names(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

impl<Q: Query> Systematic<Booker<Q>> for Booker<Q> {
    fn nominal_node(&self) -> &Booker<Q> {
        self
    }

    fn variation_node(&self, _name: &str) -> &Booker<Q> {
        self
    }

    fn names(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

impl<Q: Query> Systematic<LazyQuery<Q>> for LazyQuery<Q> {
    fn nominal_node(&self) -> &LazyQuery<Q> {
        self
    }

    fn variation_node(&self, _name: &str) -> &LazyQuery<Q> {
        self
    }

    fn names(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

fn union_names<A, B>(a: &impl Systematic<A>, b: &impl Systematic<B>) -> BTreeSet<String> {
    let mut names = a.names();
    names.extend(b.names());
    names
}

fn variant_name(name: &str, variation: &str) -> String {
    format!("{name}:{variation}")
}

impl<Q: Query> Booker<Q> {
    /// Record a single-column fill across all universes of `column`.
    pub fn fill_varied1<A>(
        &self,
        column: &impl Systematic<LazyColumn<A>>,
    ) -> Result<Varied<Booker<Q>>>
    where
        A: ColumnValue,
        Q: Fill<(A,)>,
    {
        let mut varied = Varied::new(self.clone().fill((column.nominal_node(),))?);
        for name in column.names() {
            let booker = self.clone().fill((column.variation_node(&name),))?;
            varied.set_variation(name, booker)?;
        }
        Ok(varied)
    }

    /// Record a two-column fill across the union of both columns' universes.
    pub fn fill_varied2<A, B>(
        &self,
        a: &impl Systematic<LazyColumn<A>>,
        b: &impl Systematic<LazyColumn<B>>,
    ) -> Result<Varied<Booker<Q>>>
    where
        A: ColumnValue,
        B: ColumnValue,
        Q: Fill<(A, B)>,
    {
        let mut varied = Varied::new(self.clone().fill((a.nominal_node(), b.nominal_node()))?);
        for name in union_names(a, b) {
            let booker = self
                .clone()
                .fill((a.variation_node(&name), b.variation_node(&name)))?;
            varied.set_variation(name, booker)?;
        }
        Ok(varied)
    }
}

impl<D: DataSet> Dataflow<D> {
    /// Read a dataset column together with alternatives sourced from other
    /// dataset columns, one per variation name.
    pub fn read_varied<T>(
        &mut self,
        name: &str,
        variations: &[(&str, &str)],
    ) -> Result<Varied<LazyColumn<T>>>
    where
        T: ColumnValue,
        D::Reader: ReadColumn<T>,
    {
        let mut varied = Varied::new(self.read::<T>(name)?);
        for (variation, alternate) in variations {
            varied.set_variation(*variation, self.read::<T>(alternate)?)?;
        }
        Ok(varied)
    }

    /// A constant with per-universe alternative values.
    pub fn constant_varied<T: ColumnValue>(
        &mut self,
        name: &str,
        nominal: T,
        variations: &[(&str, T)],
    ) -> Result<Varied<LazyColumn<T>>> {
        let mut varied = Varied::new(self.constant(name, nominal)?);
        for (variation, value) in variations {
            let column = self.constant(&variant_name(name, variation), value.clone())?;
            varied.set_variation(*variation, column)?;
        }
        Ok(varied)
    }

    /// Lift a one-column equation across the column's universes.
    pub fn eval_varied1<A, F, T>(
        &mut self,
        name: &str,
        function: F,
        column: &impl Systematic<LazyColumn<A>>,
    ) -> Result<Varied<LazyColumn<T>>>
    where
        A: ColumnValue,
        F: EquationFn<(A,), T>,
        T: ColumnValue,
    {
        let function = Arc::new(function);
        let mut varied = Varied::new(self.eval_arc(
            name,
            Arc::clone(&function),
            (column.nominal_node(),),
        )?);
        for variation in column.names() {
            let node = self.eval_arc(
                &variant_name(name, &variation),
                Arc::clone(&function),
                (column.variation_node(&variation),),
            )?;
            varied.set_variation(variation, node)?;
        }
        Ok(varied)
    }

    /// Lift a two-column equation across the union of both universes.
    pub fn eval_varied2<A, B, F, T>(
        &mut self,
        name: &str,
        function: F,
        a: &impl Systematic<LazyColumn<A>>,
        b: &impl Systematic<LazyColumn<B>>,
    ) -> Result<Varied<LazyColumn<T>>>
    where
        A: ColumnValue,
        B: ColumnValue,
        F: EquationFn<(A, B), T>,
        T: ColumnValue,
    {
        let function = Arc::new(function);
        let mut varied = Varied::new(self.eval_arc(
            name,
            Arc::clone(&function),
            (a.nominal_node(), b.nominal_node()),
        )?);
        for variation in union_names(a, b) {
            let node = self.eval_arc(
                &variant_name(name, &variation),
                Arc::clone(&function),
                (a.variation_node(&variation), b.variation_node(&variation)),
            )?;
            varied.set_variation(variation, node)?;
        }
        Ok(varied)
    }

    /// A root cut lifted across the universes of its decision input.
    pub fn filter_varied<A, F, B>(
        &mut self,
        name: &str,
        expr: F,
        column: &impl Systematic<LazyColumn<A>>,
    ) -> Result<Varied<LazySelection>>
    where
        A: ColumnValue,
        F: EquationFn<(A,), B>,
        B: Decision,
    {
        let expr = Arc::new(expr);
        let mut varied = Varied::new(self.select_expr(
            name,
            None,
            SelectionMode::Cut { channel: false },
            Arc::clone(&expr),
            (column.nominal_node(),),
        )?);
        for variation in column.names() {
            let node = self.select_expr(
                &variant_name(name, &variation),
                None,
                SelectionMode::Cut { channel: false },
                Arc::clone(&expr),
                (column.variation_node(&variation),),
            )?;
            varied.set_variation(variation, node)?;
        }
        Ok(varied)
    }

    /// A root cut gating directly on each universe of a column.
    pub fn filter_on_varied<T: Decision>(
        &mut self,
        name: &str,
        column: &impl Systematic<LazyColumn<T>>,
    ) -> Result<Varied<LazySelection>> {
        let mut varied = Varied::new(self.select_on(
            name,
            None,
            SelectionMode::Cut { channel: false },
            column.nominal_node(),
        )?);
        for variation in column.names() {
            let node = self.select_on(
                &variant_name(name, &variation),
                None,
                SelectionMode::Cut { channel: false },
                column.variation_node(&variation),
            )?;
            varied.set_variation(variation, node)?;
        }
        Ok(varied)
    }

    /// A root weight multiplying each universe of a column into the row
    /// weight.
    pub fn weight_on_varied<T: Decision>(
        &mut self,
        name: &str,
        column: &impl Systematic<LazyColumn<T>>,
    ) -> Result<Varied<LazySelection>> {
        let mut varied = Varied::new(self.select_on(
            name,
            None,
            SelectionMode::Weight,
            column.nominal_node(),
        )?);
        for variation in column.names() {
            let node = self.select_on(
                &variant_name(name, &variation),
                None,
                SelectionMode::Weight,
                column.variation_node(&variation),
            )?;
            varied.set_variation(variation, node)?;
        }
        Ok(varied)
    }

    /// Book a query across the union of the booker's and the selection's
    /// universes.
    pub fn book_varied<Q: Query>(
        &mut self,
        booker: &impl Systematic<Booker<Q>>,
        selection: &impl Systematic<LazySelection>,
    ) -> Result<Varied<LazyQuery<Q>>> {
        let mut varied = Varied::new(self.book_inner(
            booker.nominal_node(),
            selection.nominal_node(),
            None,
        )?);
        for variation in union_names(booker, selection) {
            let query = self.book_inner(
                booker.variation_node(&variation),
                selection.variation_node(&variation),
                Some(&variation),
            )?;
            varied.set_variation(variation, query)?;
        }
        Ok(varied)
    }

    /// All results of a varied query, keyed by universe name and including
    /// `"nominal"`. Every universe is served by the same single pass.
    pub fn result_varied<Q: Query>(
        &mut self,
        queries: &Varied<LazyQuery<Q>>,
    ) -> Result<BTreeMap<String, Q::Output>> {
        let mut results = BTreeMap::new();
        results.insert("nominal".to_string(), self.result(queries.nominal())?);
        for variation in queries.variation_names() {
            let output = self.result(queries.variation(&variation))?;
            results.insert(variation, output);
        }
        Ok(results)
    }

    /// The result of one universe, falling back to nominal for an unknown
    /// variation name.
    pub fn result_variation<Q: Query>(
        &mut self,
        queries: &Varied<LazyQuery<Q>>,
        variation: &str,
    ) -> Result<Q::Output> {
        self.result(queries.variation(variation))
    }
}
