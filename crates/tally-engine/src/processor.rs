//! The per-slot processor.
//!
//! A [`Processor`] owns one slot's dataset reader and one replica of every
//! action, in the order they were added. Columns are added before their
//! dependents, selections before their children, queries after their bound
//! selection — the driver loop then executes actions in that order for each
//! row of the slot's range.

use std::sync::Arc;

use tally_core::{ColumnValue, DataReader, Progress, Range, ReadColumn, Result};

use crate::column::{ColumnArgs, ColumnId, ColumnSet, Decision, Definition, EquationFn};
use crate::query::{Query, QueryId, QueryNode, QuerySet};
use crate::selection::{SelectionId, SelectionSet};

enum ActionRef {
    Column(usize),
    Selection(usize),
    Query(usize),
}

/// One worker slot: a reader over a row range plus the slot's replica of
/// the action graph.
pub struct Processor<R: DataReader> {
    slot: usize,
    range: Range,
    reader: R,
    columns: ColumnSet,
    selections: SelectionSet,
    queries: QuerySet,
    order: Vec<ActionRef>,
    progress: Arc<Progress>,
}

impl<R: DataReader> Processor<R> {
    pub fn new(slot: usize, range: Range, reader: R, progress: Arc<Progress>) -> Self {
        Processor {
            slot,
            range,
            reader,
            columns: ColumnSet::default(),
            selections: SelectionSet::default(),
            queries: QuerySet::default(),
            order: Vec::new(),
            progress,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub fn selections(&self) -> &SelectionSet {
        &self.selections
    }

    pub fn queries(&self) -> &QuerySet {
        &self.queries
    }

    /// Add a reader column bound to the named dataset column.
    pub fn read_column<T>(&mut self, name: &str) -> Result<ColumnId<T>>
    where
        T: ColumnValue,
        R: ReadColumn<T>,
    {
        let cell = self.reader.read_column(&self.range, name)?;
        let id = self.columns.add_reader(cell);
        self.order.push(ActionRef::Column(id.index()));
        Ok(id)
    }

    pub fn constant<T: ColumnValue>(&mut self, value: T) -> ColumnId<T> {
        let id = self.columns.add_constant(value);
        self.order.push(ActionRef::Column(id.index()));
        id
    }

    pub fn define<I, D>(&mut self, definition: D, args: I) -> Result<ColumnId<D::Output>>
    where
        I: ColumnArgs,
        D: Definition<Input = I::Values>,
    {
        let id = self.columns.add_definition(definition, args)?;
        self.order.push(ActionRef::Column(id.index()));
        Ok(id)
    }

    pub fn equation<I, F, T>(&mut self, function: Arc<F>, args: I) -> Result<ColumnId<T>>
    where
        I: ColumnArgs,
        F: EquationFn<I::Values, T>,
        T: ColumnValue,
    {
        let id = self.columns.add_equation(function, args)?;
        self.order.push(ActionRef::Column(id.index()));
        Ok(id)
    }

    pub fn conversion<F, T>(&mut self, arg: ColumnId<F>) -> Result<ColumnId<T>>
    where
        F: ColumnValue,
        T: ColumnValue + From<F>,
    {
        let id = self.columns.add_conversion(arg)?;
        self.order.push(ActionRef::Column(id.index()));
        Ok(id)
    }

    pub fn decision<T: Decision>(&mut self, arg: ColumnId<T>) -> Result<ColumnId<f64>> {
        let id = self.columns.add_decision(arg)?;
        self.order.push(ActionRef::Column(id.index()));
        Ok(id)
    }

    pub fn cut(
        &mut self,
        name: &str,
        channel: bool,
        parent: Option<SelectionId>,
        decision: ColumnId<f64>,
    ) -> SelectionId {
        let id = self.selections.add_cut(name, channel, parent, decision);
        self.order.push(ActionRef::Selection(id.index()));
        id
    }

    pub fn weight(
        &mut self,
        name: &str,
        parent: Option<SelectionId>,
        decision: ColumnId<f64>,
    ) -> SelectionId {
        let id = self.selections.add_weight(name, parent, decision);
        self.order.push(ActionRef::Selection(id.index()));
        id
    }

    pub fn join(&mut self, name: &str, left: SelectionId, right: SelectionId) -> SelectionId {
        let id = self.selections.add_join(name, left, right);
        self.order.push(ActionRef::Selection(id.index()));
        id
    }

    pub fn book<Q: Query>(&mut self, node: QueryNode<Q>) -> QueryId<Q> {
        let id = self.queries.add(node);
        self.order.push(ActionRef::Query(id.index()));
        id
    }

    /// Drop all booked queries (after their results were merged).
    pub fn clear_queries(&mut self) {
        self.queries.clear();
        self.order.retain(|action| !matches!(action, ActionRef::Query(_)));
    }

    /// Drive this slot over its range.
    pub fn play(&mut self) -> Result<()> {
        let slot = self.slot;
        tracing::debug!(
            slot,
            begin = self.range.begin,
            end = self.range.end,
            "slot pass begin"
        );

        let Processor {
            range,
            reader,
            columns,
            selections,
            queries,
            order,
            progress,
            ..
        } = self;

        reader.begin()?;
        for action in order.iter() {
            match action {
                ActionRef::Column(index) => columns.initialize(*index, range)?,
                ActionRef::Selection(index) => selections.initialize(*index),
                ActionRef::Query(_) => {}
            }
        }

        for entry in range.begin..range.end {
            if !reader.next()? {
                break;
            }
            for action in order.iter() {
                match action {
                    ActionRef::Column(index) => columns.execute(*index, entry)?,
                    ActionRef::Selection(index) => selections.execute(*index),
                    ActionRef::Query(index) => {
                        queries.execute(*index, columns, selections, entry)?
                    }
                }
            }
            progress.tick();
        }

        for action in order.iter() {
            match action {
                ActionRef::Column(index) => columns.finalize(*index, range)?,
                ActionRef::Selection(index) => selections.finalize(*index),
                ActionRef::Query(_) => {}
            }
        }
        reader.end()?;

        tracing::debug!(slot, progress = progress.percent(), "slot pass end");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{CellReader, Error};

    struct RowsReader {
        rows: Arc<Vec<f64>>,
        cursor: u64,
        end: u64,
    }

    impl DataReader for RowsReader {
        fn next(&mut self) -> Result<bool> {
            if self.cursor >= self.end {
                return Ok(false);
            }
            self.cursor += 1;
            Ok(true)
        }
    }

    struct RowsCell {
        rows: Arc<Vec<f64>>,
    }

    impl CellReader<f64> for RowsCell {
        fn read(&mut self, entry: u64) -> Result<f64> {
            self.rows
                .get(entry as usize)
                .copied()
                .ok_or_else(|| Error::read("rows", entry, "entry out of range"))
        }
    }

    impl ReadColumn<f64> for RowsReader {
        fn read_column(&mut self, _range: &Range, _name: &str) -> Result<Box<dyn CellReader<f64>>> {
            Ok(Box::new(RowsCell {
                rows: Arc::clone(&self.rows),
            }))
        }
    }

    #[derive(Default)]
    struct WeightTotal {
        total: f64,
    }

    impl Query for WeightTotal {
        type Output = f64;

        fn count(&mut self, weight: f64) {
            self.total += weight;
        }

        fn result(&self) -> f64 {
            self.total
        }

        fn merge(&self, parts: Vec<f64>) -> f64 {
            parts.into_iter().sum()
        }
    }

    fn processor_over(rows: Vec<f64>) -> Processor<RowsReader> {
        let rows = Arc::new(rows);
        let entries = rows.len() as u64;
        let range = Range::new(0, 0, entries);
        let reader = RowsReader {
            rows,
            cursor: 0,
            end: entries,
        };
        Processor::new(0, range, reader, Arc::new(Progress::new(entries)))
    }

    #[test]
    fn driver_loop_feeds_booked_queries() {
        let mut processor = processor_over(vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        let x = processor.read_column::<f64>("rows").expect("read");
        let decision = processor
            .equation(Arc::new(|x: &f64| *x > 2.5), (x,))
            .and_then(|gt| processor.decision(gt))
            .expect("decision");
        let big = processor.cut("big", false, None, decision);
        let counted = processor.book(QueryNode::new(
            WeightTotal::default(),
            big,
            1.0,
            false,
            vec![],
        ));

        processor.play().expect("play");
        assert_eq!(processor.queries().result(counted).expect("result"), 3.0);
    }

    #[test]
    fn clear_queries_keeps_columns_and_selections() {
        let mut processor = processor_over(vec![1.0, 2.0]);
        let x = processor.read_column::<f64>("rows").expect("read");
        let decision = processor.decision(x).expect("decision");
        let any = processor.cut("any", false, None, decision);
        let _ = processor.book(QueryNode::new(
            WeightTotal::default(),
            any,
            1.0,
            false,
            vec![],
        ));

        processor.clear_queries();
        assert!(processor.queries().is_empty());

        // the remaining graph still plays cleanly
        processor.play().expect("play");
        assert_eq!(processor.columns().len(), 2);
        assert_eq!(processor.selections().len(), 1);
    }

    #[test]
    fn progress_counts_each_processed_row() {
        let progress = Arc::new(Progress::new(3));
        let rows = Arc::new(vec![1.0, 2.0, 3.0]);
        let reader = RowsReader {
            rows: Arc::clone(&rows),
            cursor: 0,
            end: 3,
        };
        let mut processor = Processor::new(0, Range::new(0, 0, 3), reader, Arc::clone(&progress));
        processor.play().expect("play");
        assert!(progress.is_done());
        assert_eq!(progress.processed(), 3);
    }
}
