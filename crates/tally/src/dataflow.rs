//! The dataflow frontend.
//!
//! A [`Dataflow`] owns the dataset, one [`Processor`] per worker slot, and
//! the name registries that keep columns, selection paths and query paths
//! unique. Graph operations scatter across all slots in lockstep and return
//! typed handles; reading a query result triggers the (single) pass over
//! the dataset, folds the per-slot states and caches the merged values.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tally_core::{
    ColumnValue, DataSet, Error, Multithread, Progress, Range, ReadColumn, Result,
};
use tally_engine::{
    run_slots, ColumnArgs, Decision, Definition, EquationFn, Processor, Query, QueryNode,
    QuerySet, SelectionId, Slots,
};

use crate::booker::{Booker, Bookkeeper};
use crate::lazy::{LazyArgs, LazyColumn, LazyQuery, LazySelection};

static NEXT_FLOW_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) enum SelectionMode {
    Cut { channel: bool },
    Weight,
}

/// A declarative dataflow over one dataset.
pub struct Dataflow<D: DataSet> {
    id: u64,
    dataset: D,
    norm: f64,
    multithread: Multithread,
    total_entries: u64,
    progress: Arc<Progress>,
    processors: Slots<Processor<D::Reader>>,
    column_names: Vec<String>,
    columns_by_name: HashSet<String>,
    selection_paths: Vec<String>,
    selections_by_path: HashMap<String, SelectionId>,
    query_paths: Vec<String>,
    queries_by_path: HashSet<String>,
    live: Vec<(u64, usize)>,
    merged: HashMap<u64, Box<dyn Any + Send>>,
    next_ticket: u64,
    analyzed: bool,
}

impl<D: DataSet> Dataflow<D> {
    /// A sequential dataflow over `dataset`.
    pub fn new(dataset: D) -> Result<Self> {
        Self::with(dataset, Multithread::default())
    }

    /// A dataflow with the given worker-slot configuration.
    pub fn with(dataset: D, multithread: Multithread) -> Result<Self> {
        Self::with_head(dataset, multithread, None)
    }

    /// A dataflow processing at most `head` entries of the dataset.
    pub fn with_head(mut dataset: D, multithread: Multithread, head: Option<u64>) -> Result<Self> {
        let mut partition = dataset.allocate()?;
        if let Some(limit) = head {
            partition.truncate(limit);
        }
        partition.merge_to(multithread.concurrency());

        let mut parts = partition.parts;
        if parts.is_empty() {
            parts.push(Range::new(0, 0, 0));
        }
        let total_entries: u64 = parts.iter().map(Range::entries).sum();
        let progress = Arc::new(Progress::new(total_entries));
        let norm = dataset.normalize();

        let mut processors = Vec::with_capacity(parts.len());
        for (slot, range) in parts.iter().enumerate() {
            let reader = dataset.open(*range)?;
            processors.push(Processor::new(slot, *range, reader, Arc::clone(&progress)));
        }

        let id = NEXT_FLOW_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            flow = id,
            slots = processors.len(),
            entries = total_entries,
            "dataflow constructed"
        );

        Ok(Dataflow {
            id,
            dataset,
            norm,
            multithread,
            total_entries,
            progress,
            processors: Slots::new(processors),
            column_names: Vec::new(),
            columns_by_name: HashSet::new(),
            selection_paths: Vec::new(),
            selections_by_path: HashMap::new(),
            query_paths: Vec::new(),
            queries_by_path: HashSet::new(),
            live: Vec::new(),
            merged: HashMap::new(),
            next_ticket: 0,
            analyzed: false,
        })
    }

    /// Number of worker slots the dataset is partitioned over.
    pub fn slots(&self) -> usize {
        self.processors.width()
    }

    /// Total entries processed by one pass.
    pub fn entries(&self) -> u64 {
        self.total_entries
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    // ------------------------------------------------------------------
    // columns
    // ------------------------------------------------------------------

    /// Read a named dataset column.
    pub fn read<T>(&mut self, name: &str) -> Result<LazyColumn<T>>
    where
        T: ColumnValue,
        D::Reader: ReadColumn<T>,
    {
        self.reserve_column(name)?;
        let id = self
            .processors
            .try_invoke(|_, processor| processor.read_column::<T>(name))?
            .unify();
        self.insert_column(name);
        Ok(self.column_handle(id))
    }

    /// A column holding the same value for every row.
    pub fn constant<T: ColumnValue>(&mut self, name: &str, value: T) -> Result<LazyColumn<T>> {
        self.reserve_column(name)?;
        let id = self
            .processors
            .invoke(|_, processor| processor.constant(value.clone()))
            .unify();
        self.insert_column(name);
        Ok(self.column_handle(id))
    }

    /// A column computed by a [`Definition`] instance, constructed per slot
    /// by `make` and bound to the given argument columns.
    pub fn define<L, Def>(
        &mut self,
        name: &str,
        make: impl Fn() -> Def,
        columns: L,
    ) -> Result<LazyColumn<Def::Output>>
    where
        L: LazyArgs,
        Def: Definition<Input = <L::Ids as ColumnArgs>::Values>,
    {
        let (ids, flow) = columns.bind()?;
        self.check_flow(flow)?;
        self.reserve_column(name)?;
        let id = self
            .processors
            .try_invoke(|_, processor| processor.define(make(), ids))?
            .unify();
        self.insert_column(name);
        Ok(self.column_handle(id))
    }

    /// A column evaluating a pure function of its argument columns.
    pub fn eval<L, F, T>(&mut self, name: &str, function: F, columns: L) -> Result<LazyColumn<T>>
    where
        L: LazyArgs,
        F: EquationFn<<L::Ids as ColumnArgs>::Values, T>,
        T: ColumnValue,
    {
        self.eval_arc(name, Arc::new(function), columns)
    }

    pub(crate) fn eval_arc<L, F, T>(
        &mut self,
        name: &str,
        function: Arc<F>,
        columns: L,
    ) -> Result<LazyColumn<T>>
    where
        L: LazyArgs,
        F: EquationFn<<L::Ids as ColumnArgs>::Values, T>,
        T: ColumnValue,
    {
        let (ids, flow) = columns.bind()?;
        self.check_flow(flow)?;
        self.reserve_column(name)?;
        let id = self
            .processors
            .try_invoke(|_, processor| processor.equation(Arc::clone(&function), ids))?
            .unify();
        self.insert_column(name);
        Ok(self.column_handle(id))
    }

    /// A column converting an existing column to another value type.
    pub fn convert<F, T>(&mut self, name: &str, column: &LazyColumn<F>) -> Result<LazyColumn<T>>
    where
        F: ColumnValue,
        T: ColumnValue + From<F>,
    {
        self.check_flow(Some(column.flow))?;
        self.reserve_column(name)?;
        let arg = column.id;
        let id = self
            .processors
            .try_invoke(|_, processor| processor.conversion::<F, T>(arg))?
            .unify();
        self.insert_column(name);
        Ok(self.column_handle(id))
    }

    /// A column bundling two columns into a tuple per row.
    pub fn zip2<A, B>(
        &mut self,
        name: &str,
        a: &LazyColumn<A>,
        b: &LazyColumn<B>,
    ) -> Result<LazyColumn<(A, B)>>
    where
        A: ColumnValue,
        B: ColumnValue,
    {
        self.eval(name, |a: &A, b: &B| (a.clone(), b.clone()), (a, b))
    }

    /// A column bundling three columns into a tuple per row.
    pub fn zip3<A, B, C>(
        &mut self,
        name: &str,
        a: &LazyColumn<A>,
        b: &LazyColumn<B>,
        c: &LazyColumn<C>,
    ) -> Result<LazyColumn<(A, B, C)>>
    where
        A: ColumnValue,
        B: ColumnValue,
        C: ColumnValue,
    {
        self.eval(
            name,
            |a: &A, b: &B, c: &C| (a.clone(), b.clone(), c.clone()),
            (a, b, c),
        )
    }

    // ------------------------------------------------------------------
    // selections
    // ------------------------------------------------------------------

    /// A cut at the root of the cutflow, gating on `expr` over `columns`.
    pub fn filter<L, F, B>(&mut self, name: &str, expr: F, columns: L) -> Result<LazySelection>
    where
        L: LazyArgs,
        F: EquationFn<<L::Ids as ColumnArgs>::Values, B>,
        B: Decision,
    {
        self.select_expr(
            name,
            None,
            SelectionMode::Cut { channel: false },
            Arc::new(expr),
            columns,
        )
    }

    /// A cut chained under `parent`.
    pub fn filter_at<L, F, B>(
        &mut self,
        parent: &LazySelection,
        name: &str,
        expr: F,
        columns: L,
    ) -> Result<LazySelection>
    where
        L: LazyArgs,
        F: EquationFn<<L::Ids as ColumnArgs>::Values, B>,
        B: Decision,
    {
        self.select_expr(
            name,
            Some(parent),
            SelectionMode::Cut { channel: false },
            Arc::new(expr),
            columns,
        )
    }

    /// Like [`Dataflow::filter`], but the selection contributes its name to
    /// the path of its descendants.
    pub fn channel<L, F, B>(&mut self, name: &str, expr: F, columns: L) -> Result<LazySelection>
    where
        L: LazyArgs,
        F: EquationFn<<L::Ids as ColumnArgs>::Values, B>,
        B: Decision,
    {
        self.select_expr(
            name,
            None,
            SelectionMode::Cut { channel: true },
            Arc::new(expr),
            columns,
        )
    }

    /// A channel chained under `parent`.
    pub fn channel_at<L, F, B>(
        &mut self,
        parent: &LazySelection,
        name: &str,
        expr: F,
        columns: L,
    ) -> Result<LazySelection>
    where
        L: LazyArgs,
        F: EquationFn<<L::Ids as ColumnArgs>::Values, B>,
        B: Decision,
    {
        self.select_expr(
            name,
            Some(parent),
            SelectionMode::Cut { channel: true },
            Arc::new(expr),
            columns,
        )
    }

    /// A weight at the root of the cutflow.
    pub fn weight<L, F, B>(&mut self, name: &str, expr: F, columns: L) -> Result<LazySelection>
    where
        L: LazyArgs,
        F: EquationFn<<L::Ids as ColumnArgs>::Values, B>,
        B: Decision,
    {
        self.select_expr(name, None, SelectionMode::Weight, Arc::new(expr), columns)
    }

    /// A weight chained under `parent`.
    pub fn weight_at<L, F, B>(
        &mut self,
        parent: &LazySelection,
        name: &str,
        expr: F,
        columns: L,
    ) -> Result<LazySelection>
    where
        L: LazyArgs,
        F: EquationFn<<L::Ids as ColumnArgs>::Values, B>,
        B: Decision,
    {
        self.select_expr(
            name,
            Some(parent),
            SelectionMode::Weight,
            Arc::new(expr),
            columns,
        )
    }

    /// A cut gating directly on an existing column.
    pub fn filter_on<T: Decision>(
        &mut self,
        name: &str,
        column: &LazyColumn<T>,
    ) -> Result<LazySelection> {
        self.select_on(name, None, SelectionMode::Cut { channel: false }, column)
    }

    /// A cut under `parent` gating directly on an existing column.
    pub fn filter_on_at<T: Decision>(
        &mut self,
        parent: &LazySelection,
        name: &str,
        column: &LazyColumn<T>,
    ) -> Result<LazySelection> {
        self.select_on(
            name,
            Some(parent),
            SelectionMode::Cut { channel: false },
            column,
        )
    }

    /// A weight multiplying an existing column into the row weight.
    pub fn weight_on<T: Decision>(
        &mut self,
        name: &str,
        column: &LazyColumn<T>,
    ) -> Result<LazySelection> {
        self.select_on(name, None, SelectionMode::Weight, column)
    }

    /// A weight under `parent` multiplying an existing column.
    pub fn weight_on_at<T: Decision>(
        &mut self,
        parent: &LazySelection,
        name: &str,
        column: &LazyColumn<T>,
    ) -> Result<LazySelection> {
        self.select_on(name, Some(parent), SelectionMode::Weight, column)
    }

    /// The conjunction of two independently built selections: passes iff
    /// both pass, with the product of both weights.
    pub fn join(
        &mut self,
        name: &str,
        left: &LazySelection,
        right: &LazySelection,
    ) -> Result<LazySelection> {
        self.check_flow(Some(left.flow))?;
        self.check_flow(Some(right.flow))?;
        self.validate_selection_name(name)?;
        if self.selections_by_path.contains_key(name) {
            return Err(Error::DuplicateSelection(name.to_string()));
        }
        let (left_id, right_id) = (left.id, right.id);
        let id = self
            .processors
            .invoke(|_, processor| processor.join(name, left_id, right_id))
            .unify();
        self.insert_selection(name.to_string(), id);
        Ok(LazySelection { flow: self.id, id })
    }

    pub(crate) fn select_expr<L, F, B>(
        &mut self,
        name: &str,
        parent: Option<&LazySelection>,
        mode: SelectionMode,
        expr: Arc<F>,
        columns: L,
    ) -> Result<LazySelection>
    where
        L: LazyArgs,
        F: EquationFn<<L::Ids as ColumnArgs>::Values, B>,
        B: Decision,
    {
        let parent_id = self.selection_parent(parent)?;
        let path = self.reserve_selection(parent_id, name)?;
        let (ids, flow) = columns.bind()?;
        self.check_flow(flow)?;
        let id = self
            .processors
            .try_invoke(|_, processor| {
                let value = processor.equation(Arc::clone(&expr), ids)?;
                let decision = processor.decision(value)?;
                Ok(match &mode {
                    SelectionMode::Cut { channel } => {
                        processor.cut(name, *channel, parent_id, decision)
                    }
                    SelectionMode::Weight => processor.weight(name, parent_id, decision),
                })
            })?
            .unify();
        self.insert_selection(path, id);
        Ok(LazySelection { flow: self.id, id })
    }

    pub(crate) fn select_on<T: Decision>(
        &mut self,
        name: &str,
        parent: Option<&LazySelection>,
        mode: SelectionMode,
        column: &LazyColumn<T>,
    ) -> Result<LazySelection> {
        self.check_flow(Some(column.flow))?;
        let parent_id = self.selection_parent(parent)?;
        let path = self.reserve_selection(parent_id, name)?;
        let arg = column.id;
        let id = self
            .processors
            .try_invoke(|_, processor| {
                let decision = processor.decision(arg)?;
                Ok(match &mode {
                    SelectionMode::Cut { channel } => {
                        processor.cut(name, *channel, parent_id, decision)
                    }
                    SelectionMode::Weight => processor.weight(name, parent_id, decision),
                })
            })?
            .unify();
        self.insert_selection(path, id);
        Ok(LazySelection { flow: self.id, id })
    }

    // ------------------------------------------------------------------
    // queries
    // ------------------------------------------------------------------

    /// Book a query at one selection.
    pub fn book<Q: Query>(
        &mut self,
        booker: &Booker<Q>,
        selection: &LazySelection,
    ) -> Result<LazyQuery<Q>> {
        self.book_inner(booker, selection, None)
    }

    /// Book a query at each of several selections.
    pub fn book_all<Q: Query>(
        &mut self,
        booker: &Booker<Q>,
        selections: &[&LazySelection],
    ) -> Result<Bookkeeper<Q>> {
        let mut bookkeeper = Bookkeeper::new();
        for selection in selections {
            let path = self.selection_path(selection)?;
            let query = self.book(booker, selection)?;
            bookkeeper.insert(path, query);
        }
        Ok(bookkeeper)
    }

    pub(crate) fn book_inner<Q: Query>(
        &mut self,
        booker: &Booker<Q>,
        selection: &LazySelection,
        variation: Option<&str>,
    ) -> Result<LazyQuery<Q>> {
        self.check_flow(booker.flow())?;
        self.check_flow(Some(selection.flow))?;

        let selection_path = self.processors.model().selections().path(selection.id);
        let query_path = match variation {
            None => format!("{selection_path}/{}", booker.name()),
            Some(variation) => format!("{selection_path}/{}:{variation}", booker.name()),
        };
        if self.queries_by_path.contains(&query_path) {
            return Err(Error::DuplicateQuery(query_path));
        }

        let scale = booker.scale_factor() * self.norm;
        let raw = booker.is_raw();
        let selection_id = selection.id;
        let id = self
            .processors
            .try_invoke(|_, processor| {
                Ok(processor.book(QueryNode::new(
                    booker.instantiate(),
                    selection_id,
                    scale,
                    raw,
                    booker.fills().to_vec(),
                )))
            })?
            .unify();

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.live.push((ticket, id.index()));
        self.query_paths.push(query_path.clone());
        self.queries_by_path.insert(query_path);
        // a fresh booking means the next result() must re-run the pass
        self.analyzed = false;

        Ok(LazyQuery {
            flow: self.id,
            ticket,
            id,
        })
    }

    /// The merged result of a booked query, running the dataset pass first
    /// if needed. Idempotent: repeated calls return the cached value.
    pub fn result<Q: Query>(&mut self, query: &LazyQuery<Q>) -> Result<Q::Output> {
        if query.flow != self.id {
            return Err(Error::ForeignHandle);
        }
        self.analyze()?;
        let merged = self
            .merged
            .get(&query.ticket)
            .ok_or(Error::Invariant("merged result missing"))?;
        let output = merged
            .downcast_ref::<Q::Output>()
            .ok_or(Error::Invariant("merged result type mismatch"))?;
        Ok(output.clone())
    }

    // ------------------------------------------------------------------
    // registries
    // ------------------------------------------------------------------

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn selection_paths(&self) -> &[String] {
        &self.selection_paths
    }

    pub fn query_paths(&self) -> &[String] {
        &self.query_paths
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns_by_name.contains(name)
    }

    pub fn has_selection(&self, path: &str) -> bool {
        self.selections_by_path.contains_key(path)
    }

    /// Recover a selection handle by its path.
    pub fn selection_at(&self, path: &str) -> Result<LazySelection> {
        let id = self
            .selections_by_path
            .get(path)
            .copied()
            .ok_or_else(|| Error::UnknownSelection(path.to_string()))?;
        Ok(LazySelection { flow: self.id, id })
    }

    /// Channel path of a selection.
    pub fn selection_path(&self, selection: &LazySelection) -> Result<String> {
        self.check_flow(Some(selection.flow))?;
        Ok(self.processors.model().selections().path(selection.id))
    }

    /// Path of a selection through every ancestor, channel or not.
    pub fn selection_full_path(&self, selection: &LazySelection) -> Result<String> {
        self.check_flow(Some(selection.flow))?;
        Ok(self.processors.model().selections().full_path(selection.id))
    }

    // ------------------------------------------------------------------
    // run & merge
    // ------------------------------------------------------------------

    fn analyze(&mut self) -> Result<()> {
        if self.analyzed {
            return Ok(());
        }
        tracing::info!(
            slots = self.processors.width(),
            entries = self.total_entries,
            queries = self.live.len(),
            "starting dataset pass"
        );
        self.progress.reset(self.total_entries);
        self.dataset.start()?;
        let outcome = run_slots(&mut self.processors, self.multithread.is_enabled(), |p| {
            p.play()
        });
        let finished = self.dataset.finish();
        outcome?;
        finished?;
        self.merge_results()?;
        self.analyzed = true;
        tracing::info!("dataset pass complete");
        Ok(())
    }

    fn merge_results(&mut self) -> Result<()> {
        let mut collected = Vec::with_capacity(self.live.len());
        {
            let sets: Vec<&QuerySet> = self.processors.iter().map(|p| p.queries()).collect();
            for (ticket, index) in &self.live {
                collected.push((*ticket, sets[0].merged_with(*index, &sets)?));
            }
        }
        for (ticket, output) in collected {
            self.merged.insert(ticket, output);
        }
        self.live.clear();
        self.processors.apply(|_, processor| processor.clear_queries());
        Ok(())
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    fn column_handle<T: ColumnValue>(
        &self,
        id: tally_engine::ColumnId<T>,
    ) -> LazyColumn<T> {
        LazyColumn { flow: self.id, id }
    }

    pub(crate) fn check_flow(&self, flow: Option<u64>) -> Result<()> {
        match flow {
            Some(bound) if bound != self.id => Err(Error::ForeignHandle),
            _ => Ok(()),
        }
    }

    fn selection_parent(&self, parent: Option<&LazySelection>) -> Result<Option<SelectionId>> {
        match parent {
            Some(selection) => {
                self.check_flow(Some(selection.flow))?;
                Ok(Some(selection.id))
            }
            None => Ok(None),
        }
    }

    fn reserve_column(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::InvalidName(name.to_string()));
        }
        if self.columns_by_name.contains(name) {
            return Err(Error::DuplicateColumn(name.to_string()));
        }
        Ok(())
    }

    fn insert_column(&mut self, name: &str) {
        self.column_names.push(name.to_string());
        self.columns_by_name.insert(name.to_string());
    }

    fn validate_selection_name(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() || name.contains('/') {
            return Err(Error::InvalidName(name.to_string()));
        }
        Ok(())
    }

    fn reserve_selection(&self, parent: Option<SelectionId>, name: &str) -> Result<String> {
        self.validate_selection_name(name)?;
        let path = self
            .processors
            .model()
            .selections()
            .child_path(parent, name);
        if self.selections_by_path.contains_key(&path) {
            return Err(Error::DuplicateSelection(path));
        }
        Ok(path)
    }

    fn insert_selection(&mut self, path: String, id: SelectionId) {
        self.selection_paths.push(path.clone());
        self.selections_by_path.insert(path, id);
    }
}
