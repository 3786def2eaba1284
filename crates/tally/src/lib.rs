//! Tally - a declarative, multithreaded columnar dataflow engine.
//!
//! A dataflow is a directed graph of *columns* (per-row values),
//! *selections* (cuts and weights organized into a cutflow tree) and
//! *queries* (accumulators booked at selections). The engine executes a
//! single pass over the dataset with the rows partitioned across worker
//! slots; every graph node is replicated once per slot, per-row evaluation
//! is lock-free, and the per-slot query states are folded into one merged
//! result when it is first read.
//!
//! ```
//! use tally::{Booker, Dataflow, Multithread, Query};
//! use tally_json::Json;
//!
//! #[derive(Default)]
//! struct RowCount {
//!     total: f64,
//! }
//!
//! impl Query for RowCount {
//!     type Output = f64;
//!
//!     fn count(&mut self, weight: f64) {
//!         self.total += weight;
//!     }
//!
//!     fn result(&self) -> f64 {
//!         self.total
//!     }
//!
//!     fn merge(&self, parts: Vec<f64>) -> f64 {
//!         parts.into_iter().sum()
//!     }
//! }
//!
//! # fn main() -> tally::Result<()> {
//! let data = Json::from_str(r#"[{"x": 1.0}, {"x": 3.0}, {"x": 5.0}]"#)?;
//! let mut df = Dataflow::with(data, Multithread::enable(2))?;
//!
//! let x = df.read::<f64>("x")?;
//! let big = df.filter("big", |x: &f64| *x > 2.0, (&x,))?;
//! let count = df.book(&Booker::new("count", RowCount::default), &big)?;
//!
//! assert_eq!(df.result(&count)?, 2.0);
//! # Ok(())
//! # }
//! ```
//!
//! Systematic variations mirror graph construction across named universes:
//! composing varied nodes takes the union of the variation names, with each
//! argument falling back to its nominal where a universe is missing, and
//! all universes share the one dataset pass.

pub mod booker;
pub mod dataflow;
pub mod lazy;
pub mod systematic;

pub use booker::{Booker, Bookkeeper};
pub use dataflow::Dataflow;
pub use lazy::{LazyArgs, LazyColumn, LazyQuery, LazySelection};
pub use systematic::{Systematic, Varied};

pub use tally_core::{
    CellReader, ColumnValue, DataReader, DataSet, Error, Multithread, Partition, Progress, Range,
    ReadColumn, Result,
};
pub use tally_engine::{Decision, Definition, EquationFn, Fill, Query};
