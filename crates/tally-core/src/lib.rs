//! Tally Core - Fundamental types and plug-in contracts for the tally
//! columnar dataflow engine.
//!
//! This crate provides the foundational pieces that all other tally
//! components depend on: the shared error type, dataset row ranges and
//! partitions, multithreading configuration, progress accounting, and the
//! contracts a dataset plug-in must fulfill.

pub mod dataset;
pub mod error;
pub mod multithread;
pub mod progress;
pub mod range;

pub use dataset::{CellReader, ColumnValue, DataReader, DataSet, ReadColumn};
pub use error::{Error, Result};
pub use multithread::Multithread;
pub use progress::Progress;
pub use range::{Partition, Range};
