//! Error handling for the tally crates.
//!
//! All construction-time and execution-time failures across the workspace
//! surface as the single [`Error`] enum. Construction errors (duplicate or
//! unknown names, incompatible handles) abort the offending graph operation
//! and leave the dataflow usable for further construction; execution errors
//! abort the run and are reported on the main thread after all workers
//! finish.

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A column with the same name was already defined.
    #[error("column `{0}` already exists")]
    DuplicateColumn(String),

    /// A selection resolving to the same path was already defined.
    #[error("selection `{0}` already exists")]
    DuplicateSelection(String),

    /// A query with the same path was already booked.
    #[error("query `{0}` already booked")]
    DuplicateQuery(String),

    /// A variation under this name was already registered on the node.
    #[error("variation `{0}` already set on this node")]
    DuplicateVariation(String),

    /// A column or selection name that cannot be registered.
    #[error("invalid name `{0}`")]
    InvalidName(String),

    /// Lookup of a column by name failed.
    #[error("column `{0}` does not exist")]
    UnknownColumn(String),

    /// Lookup of a selection by path failed.
    #[error("selection `{0}` does not exist")]
    UnknownSelection(String),

    /// A handle created by one dataflow was passed to another.
    #[error("handle does not belong to this dataflow")]
    ForeignHandle,

    /// A node referred to an argument that is not upstream of it.
    #[error("column dependency cycle detected at `{0}`")]
    Cycle(String),

    /// Reading a value out of the dataset failed.
    #[error("reading column `{column}` failed at entry {entry}")]
    Read {
        column: String,
        entry: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The dataset plug-in reported a failure outside of a column read.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// An internal invariant of the engine was violated.
    #[error("engine invariant violated: {0}")]
    Invariant(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::Read`] from any source error.
    pub fn read(
        column: impl Into<String>,
        entry: u64,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Read {
            column: column.into(),
            entry,
            source: source.into(),
        }
    }

    /// Build a [`Error::Dataset`] from a message.
    pub fn dataset(message: impl Into<String>) -> Self {
        Error::Dataset(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_path() {
        let err = Error::DuplicateSelection("region/signal".to_string());
        assert_eq!(err.to_string(), "selection `region/signal` already exists");
    }

    #[test]
    fn read_error_carries_its_source() {
        let err = Error::read("pt", 42, "field missing");
        assert_eq!(err.to_string(), "reading column `pt` failed at entry 42");
        let source = std::error::Error::source(&err).expect("source attached");
        assert_eq!(source.to_string(), "field missing");
    }
}
