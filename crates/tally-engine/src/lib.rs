//! Tally Engine - per-slot execution machinery for the tally dataflow.
//!
//! Each worker slot owns one replica of the whole action graph: a
//! [`column::ColumnSet`] of per-row values, a [`selection::SelectionSet`]
//! cutflow, and a [`query::QuerySet`] of accumulators. A
//! [`processor::Processor`] drives one slot over its row range, and
//! [`concurrent::Slots`] keeps the N replicas in lockstep and runs them on
//! worker threads.

pub mod column;
pub mod concurrent;
pub mod processor;
pub mod query;
pub mod selection;

pub use column::{ColumnArgs, ColumnId, ColumnSet, Decision, Definition, EquationFn};
pub use concurrent::{run_slots, Slots};
pub use processor::Processor;
pub use query::{Fill, FillFn, Query, QueryId, QueryNode, QuerySet};
pub use selection::{SelectionId, SelectionSet};
