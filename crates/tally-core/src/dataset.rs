//! Dataset plug-in contracts.
//!
//! A dataset plug-in supplies the rows a dataflow iterates over. The engine
//! asks the dataset for an initial [`Partition`], opens one independent
//! [`DataReader`] per worker slot, and pulls per-row values through
//! [`CellReader`] cells bound to named columns.

use crate::error::Result;
use crate::range::{Partition, Range};

/// Marker for types that can flow through a column: cheap to hand out per
/// row and safe to move to a worker thread.
pub trait ColumnValue: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> ColumnValue for T {}

/// The per-column read cell a [`DataReader`] hands to the engine.
///
/// The engine calls [`CellReader::read`] once per row, before any dependent
/// column observes the value.
pub trait CellReader<T: ColumnValue>: Send {
    fn read(&mut self, entry: u64) -> Result<T>;
}

/// Per-slot row iteration over one range of the dataset.
///
/// `next` advances the reader and reports whether a row is available; the
/// engine stops iterating a range as soon as it returns `false`.
pub trait DataReader: Send + 'static {
    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn next(&mut self) -> Result<bool>;

    fn end(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Typed column access on a reader.
///
/// A reader implements `ReadColumn<T>` for every value type it can
/// materialize; requesting an unsupported type fails to compile rather than
/// at run time.
pub trait ReadColumn<T: ColumnValue>: DataReader {
    fn read_column(&mut self, range: &Range, name: &str) -> Result<Box<dyn CellReader<T>>>;
}

/// A dataset plug-in.
///
/// `allocate` produces the initial partition (possibly fixed), `open` yields
/// an independent reader per slot, and the lifecycle hooks bracket every
/// pass over the data. `normalize` is a scalar folded into the weight of
/// every query booked on the dataflow.
pub trait DataSet: 'static {
    type Reader: DataReader;

    fn allocate(&mut self) -> Result<Partition>;

    fn open(&self, range: Range) -> Result<Self::Reader>;

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn normalize(&self) -> f64 {
        1.0
    }
}
