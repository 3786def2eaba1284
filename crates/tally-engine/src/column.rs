//! The per-slot column graph.
//!
//! Columns live in a [`ColumnSet`] arena and are addressed by typed
//! [`ColumnId`] handles. Three kinds exist: readers (value fetched from the
//! dataset each row), constants, and definitions (value computed on demand
//! from other columns). A definition's value is calculated at most once per
//! row: `execute` clears the cached value, and the first read of the row
//! fills it back in, so fan-out to any number of consumers is free.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tally_core::{CellReader, ColumnValue, Error, Range, Result};

/// Typed handle to a column inside a [`ColumnSet`].
///
/// Handles are plain indices; lockstep construction guarantees the same
/// handle addresses the equivalent column in every slot's arena.
pub struct ColumnId<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ColumnId<T> {
    fn new(index: usize) -> Self {
        ColumnId {
            index,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for ColumnId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ColumnId<T> {}

impl<T> PartialEq for ColumnId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for ColumnId<T> {}

impl<T> fmt::Debug for ColumnId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnId({})", self.index)
    }
}

/// A user-supplied column computed from other columns.
///
/// The implementation receives the current values of its argument columns
/// and returns the per-row value; the engine caches the result for the rest
/// of the row. `calculate` must be pure with respect to the row.
pub trait Definition: Send + 'static {
    /// Tuple of argument values, matching the bound argument columns.
    type Input: Send + 'static;
    type Output: ColumnValue;

    fn calculate(&self, input: &Self::Input) -> Self::Output;
}

/// A pure function usable as the body of an equation column.
///
/// Implemented for closures of matching arity taking their arguments by
/// reference, e.g. `Fn(&A, &B) -> T` for a two-column equation.
pub trait EquationFn<V, T>: Send + Sync + 'static {
    fn apply(&self, values: &V) -> T;
}

macro_rules! impl_equation_fn {
    ($(($T:ident, $idx:tt)),+) => {
        impl<Fun, Out, $($T),+> EquationFn<($($T,)+), Out> for Fun
        where
            Fun: Fn($(&$T),+) -> Out + Send + Sync + 'static,
        {
            fn apply(&self, values: &($($T,)+)) -> Out {
                (self)($(&values.$idx),+)
            }
        }
    };
}

impl_equation_fn!((A, 0));
impl_equation_fn!((A, 0), (B, 1));
impl_equation_fn!((A, 0), (B, 1), (C, 2));
impl_equation_fn!((A, 0), (B, 1), (C, 2), (D, 3));

/// A tuple of column handles readable as a tuple of values.
pub trait ColumnArgs: Copy + Send + Sync + 'static {
    type Values: Send + 'static;

    /// Read the current row's value of every argument column.
    fn read(&self, columns: &ColumnSet) -> Result<Self::Values>;

    /// Largest arena index among the arguments, if any.
    fn max_index(&self) -> Option<usize>;
}

impl ColumnArgs for () {
    type Values = ();

    fn read(&self, _columns: &ColumnSet) -> Result<()> {
        Ok(())
    }

    fn max_index(&self) -> Option<usize> {
        None
    }
}

macro_rules! impl_column_args {
    ($(($T:ident, $idx:tt)),+) => {
        impl<$($T: ColumnValue),+> ColumnArgs for ($(ColumnId<$T>,)+) {
            type Values = ($($T,)+);

            fn read(&self, columns: &ColumnSet) -> Result<Self::Values> {
                Ok(($(columns.value(self.$idx)?,)+))
            }

            fn max_index(&self) -> Option<usize> {
                [$(self.$idx.index()),+].into_iter().max()
            }
        }
    };
}

impl_column_args!((A, 0));
impl_column_args!((A, 0), (B, 1));
impl_column_args!((A, 0), (B, 1), (C, 2));
impl_column_args!((A, 0), (B, 1), (C, 2), (D, 3));

/// Value types that can act as a selection decision.
///
/// A cut treats a non-zero decision as passing; a weight multiplies the
/// decision into the accumulated row weight. Binding a column of any other
/// value type as a decision fails to compile.
pub trait Decision: ColumnValue {
    fn decision(&self) -> f64;
}

impl Decision for bool {
    fn decision(&self) -> f64 {
        if *self {
            1.0
        } else {
            0.0
        }
    }
}

impl Decision for f64 {
    fn decision(&self) -> f64 {
        *self
    }
}

macro_rules! impl_decision_numeric {
    ($($ty:ty),+) => {
        $(impl Decision for $ty {
            fn decision(&self) -> f64 {
                *self as f64
            }
        })+
    };
}

impl_decision_numeric!(f32, i64, i32, u64, u32, usize);

type EvalFn<T> = Box<dyn Fn(&ColumnSet) -> Result<T> + Send>;

enum ColumnKind<T: ColumnValue> {
    Reader {
        cell: RefCell<Box<dyn CellReader<T>>>,
    },
    Constant {
        value: T,
    },
    Definition {
        eval: EvalFn<T>,
    },
}

struct Column<T: ColumnValue> {
    kind: ColumnKind<T>,
    cache: RefCell<Option<T>>,
}

impl<T: ColumnValue> Column<T> {
    fn reader(cell: Box<dyn CellReader<T>>) -> Self {
        Column {
            kind: ColumnKind::Reader {
                cell: RefCell::new(cell),
            },
            cache: RefCell::new(None),
        }
    }

    fn constant(value: T) -> Self {
        Column {
            kind: ColumnKind::Constant { value },
            cache: RefCell::new(None),
        }
    }

    fn definition(eval: EvalFn<T>) -> Self {
        Column {
            kind: ColumnKind::Definition { eval },
            cache: RefCell::new(None),
        }
    }

    fn value(&self, columns: &ColumnSet) -> Result<T> {
        match &self.kind {
            ColumnKind::Reader { .. } => self
                .cache
                .borrow()
                .clone()
                .ok_or(Error::Invariant("reader column read outside the row loop")),
            ColumnKind::Constant { value } => Ok(value.clone()),
            ColumnKind::Definition { eval } => {
                {
                    let cached = self.cache.borrow();
                    if let Some(value) = cached.as_ref() {
                        return Ok(value.clone());
                    }
                }
                let value = eval(columns)?;
                *self.cache.borrow_mut() = Some(value.clone());
                Ok(value)
            }
        }
    }
}

trait ColumnNode: Send {
    fn execute(&self, columns: &ColumnSet, entry: u64) -> Result<()>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: ColumnValue> ColumnNode for Column<T> {
    fn execute(&self, _columns: &ColumnSet, entry: u64) -> Result<()> {
        match &self.kind {
            ColumnKind::Reader { cell } => {
                let value = cell.borrow_mut().read(entry)?;
                *self.cache.borrow_mut() = Some(value);
            }
            ColumnKind::Constant { .. } => {}
            ColumnKind::Definition { .. } => {
                self.cache.borrow_mut().take();
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One slot's arena of column nodes.
#[derive(Default)]
pub struct ColumnSet {
    nodes: Vec<Box<dyn ColumnNode>>,
}

impl ColumnSet {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current row's value of the addressed column.
    ///
    /// Definitions are computed on first access and served from the cache
    /// afterwards until the next row.
    pub fn value<T: ColumnValue>(&self, id: ColumnId<T>) -> Result<T> {
        let node = self
            .nodes
            .get(id.index)
            .ok_or(Error::Invariant("column id out of range"))?;
        let column = node
            .as_any()
            .downcast_ref::<Column<T>>()
            .ok_or(Error::Invariant("column value type mismatch"))?;
        column.value(self)
    }

    pub fn add_reader<T: ColumnValue>(&mut self, cell: Box<dyn CellReader<T>>) -> ColumnId<T> {
        self.push(Column::reader(cell))
    }

    pub fn add_constant<T: ColumnValue>(&mut self, value: T) -> ColumnId<T> {
        self.push(Column::constant(value))
    }

    /// Add a definition column bound to its argument columns.
    pub fn add_definition<I, D>(&mut self, definition: D, args: I) -> Result<ColumnId<D::Output>>
    where
        I: ColumnArgs,
        D: Definition<Input = I::Values>,
    {
        self.guard_args(args.max_index())?;
        let eval: EvalFn<D::Output> =
            Box::new(move |columns| Ok(definition.calculate(&args.read(columns)?)));
        Ok(self.push(Column::definition(eval)))
    }

    /// Add an equation column evaluating a pure function of its arguments.
    pub fn add_equation<I, F, T>(&mut self, function: Arc<F>, args: I) -> Result<ColumnId<T>>
    where
        I: ColumnArgs,
        F: EquationFn<I::Values, T>,
        T: ColumnValue,
    {
        self.guard_args(args.max_index())?;
        let eval: EvalFn<T> = Box::new(move |columns| Ok(function.apply(&args.read(columns)?)));
        Ok(self.push(Column::definition(eval)))
    }

    /// Add a column converting an existing column's value type.
    pub fn add_conversion<F, T>(&mut self, arg: ColumnId<F>) -> Result<ColumnId<T>>
    where
        F: ColumnValue,
        T: ColumnValue + From<F>,
    {
        self.guard_args(Some(arg.index()))?;
        let eval: EvalFn<T> = Box::new(move |columns| Ok(T::from(columns.value(arg)?)));
        Ok(self.push(Column::definition(eval)))
    }

    /// Add the `f64` decision view of an existing column.
    pub fn add_decision<T: Decision>(&mut self, arg: ColumnId<T>) -> Result<ColumnId<f64>> {
        self.guard_args(Some(arg.index()))?;
        let eval: EvalFn<f64> = Box::new(move |columns| Ok(columns.value(arg)?.decision()));
        Ok(self.push(Column::definition(eval)))
    }

    pub(crate) fn initialize(&self, _index: usize, _range: &Range) -> Result<()> {
        Ok(())
    }

    pub(crate) fn execute(&self, index: usize, entry: u64) -> Result<()> {
        self.nodes[index].execute(self, entry)
    }

    pub(crate) fn finalize(&self, _index: usize, _range: &Range) -> Result<()> {
        Ok(())
    }

    fn push<T: ColumnValue>(&mut self, column: Column<T>) -> ColumnId<T> {
        let index = self.nodes.len();
        self.nodes.push(Box::new(column));
        ColumnId::new(index)
    }

    // Handles are created by this arena in insertion order, so an argument
    // index at or past the next slot cannot belong to an upstream column.
    fn guard_args(&self, max_index: Option<usize>) -> Result<()> {
        if let Some(max) = max_index {
            if max >= self.nodes.len() {
                return Err(Error::Cycle(format!("column #{}", self.nodes.len())));
            }
        }
        Ok(())
    }
}
