//! JSON dataset plug-in for tally.
//!
//! Rows are the elements of a JSON array, typically objects; a column read
//! extracts one named field per row and deserializes it into the requested
//! value type. All per-slot readers share the parsed rows, so opening a
//! range is cheap and any number of slots can read concurrently.

use std::io::Read;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use tally_core::{
    CellReader, ColumnValue, DataReader, DataSet, Error, Partition, Range, ReadColumn, Result,
};

/// An in-memory JSON dataset: one row per array element.
#[derive(Debug)]
pub struct Json {
    rows: Arc<Vec<Value>>,
}

impl Json {
    /// Dataset over already-parsed rows.
    pub fn from_rows(rows: Vec<Value>) -> Self {
        Json {
            rows: Arc::new(rows),
        }
    }

    /// Parse a JSON array from a string.
    pub fn from_str(input: &str) -> Result<Self> {
        let parsed: Value = serde_json::from_str(input)
            .map_err(|error| Error::dataset(format!("malformed JSON input: {error}")))?;
        Self::from_value(parsed)
    }

    /// Parse a JSON array from a reader (e.g. an open file).
    pub fn from_reader(input: impl Read) -> Result<Self> {
        let parsed: Value = serde_json::from_reader(input)
            .map_err(|error| Error::dataset(format!("malformed JSON input: {error}")))?;
        Self::from_value(parsed)
    }

    /// Use a parsed JSON value, which must be an array.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(rows) => {
                tracing::debug!(rows = rows.len(), "loaded JSON dataset");
                Ok(Json::from_rows(rows))
            }
            other => Err(Error::dataset(format!(
                "expected a JSON array of rows, got {}",
                kind_of(&other)
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl DataSet for Json {
    type Reader = JsonReader;

    fn allocate(&mut self) -> Result<Partition> {
        Ok(Partition::new(self.rows.len() as u64, 1))
    }

    fn open(&self, range: Range) -> Result<JsonReader> {
        Ok(JsonReader {
            rows: Arc::clone(&self.rows),
            range,
            cursor: range.begin,
        })
    }
}

/// Per-slot reader over one range of rows.
pub struct JsonReader {
    rows: Arc<Vec<Value>>,
    range: Range,
    cursor: u64,
}

impl DataReader for JsonReader {
    fn begin(&mut self) -> Result<()> {
        self.cursor = self.range.begin;
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        if self.cursor >= self.range.end || self.cursor >= self.rows.len() as u64 {
            return Ok(false);
        }
        self.cursor += 1;
        Ok(true)
    }
}

impl<T> ReadColumn<T> for JsonReader
where
    T: ColumnValue + DeserializeOwned,
{
    fn read_column(&mut self, _range: &Range, name: &str) -> Result<Box<dyn CellReader<T>>> {
        Ok(Box::new(JsonCell {
            rows: Arc::clone(&self.rows),
            name: name.to_string(),
            _marker: std::marker::PhantomData,
        }))
    }
}

struct JsonCell<T> {
    rows: Arc<Vec<Value>>,
    name: String,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> CellReader<T> for JsonCell<T>
where
    T: ColumnValue + DeserializeOwned,
{
    fn read(&mut self, entry: u64) -> Result<T> {
        let row = self
            .rows
            .get(entry as usize)
            .ok_or_else(|| Error::read(&self.name, entry, "row index out of range"))?;
        let field = row
            .get(&self.name)
            .ok_or_else(|| Error::read(&self.name, entry, "field not present in row"))?;
        serde_json::from_value(field.clone()).map_err(|error| Error::read(&self.name, entry, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Json {
        Json::from_str(
            r#"[
                {"x": 1.0, "n": 4, "tag": "a"},
                {"x": 2.5, "n": 5, "tag": "b"},
                {"x": -3.0, "n": 6, "tag": "c"}
            ]"#,
        )
        .expect("valid sample")
    }

    #[test]
    fn parses_an_array_of_rows() {
        let data = sample();
        assert_eq!(data.len(), 3);
        assert!(!data.is_empty());
    }

    #[test]
    fn rejects_non_array_input() {
        let err = Json::from_str(r#"{"x": 1}"#).expect_err("not an array");
        assert!(err.to_string().contains("expected a JSON array"));
    }

    #[test]
    fn rejects_malformed_input() {
        let err = Json::from_str("[{").expect_err("malformed");
        assert!(err.to_string().contains("malformed JSON"));
    }

    #[test]
    fn allocates_one_range_per_row() {
        let mut data = sample();
        let partition = data.allocate().expect("allocate");
        assert_eq!(partition.len(), 3);
        assert_eq!(partition.total_entries(), 3);
        assert!(!partition.fixed);
    }

    #[test]
    fn reads_typed_fields_per_row() {
        let data = sample();
        let mut reader = data.open(Range::new(0, 0, 3)).expect("open");
        let mut x = ReadColumn::<f64>::read_column(&mut reader, &Range::new(0, 0, 3), "x")
            .expect("column");
        let mut n = ReadColumn::<i64>::read_column(&mut reader, &Range::new(0, 0, 3), "n")
            .expect("column");
        assert_eq!(x.read(1).expect("value"), 2.5);
        assert_eq!(n.read(2).expect("value"), 6);
    }

    #[test]
    fn reader_iterates_exactly_its_range() {
        let data = sample();
        let mut reader = data.open(Range::new(0, 1, 3)).expect("open");
        reader.begin().expect("begin");
        assert!(reader.next().expect("next"));
        assert!(reader.next().expect("next"));
        assert!(!reader.next().expect("next"));
        reader.end().expect("end");
    }

    #[test]
    fn missing_fields_surface_as_read_errors() {
        let data = sample();
        let mut reader = data.open(Range::new(0, 0, 3)).expect("open");
        let mut cell = ReadColumn::<f64>::read_column(&mut reader, &Range::new(0, 0, 3), "absent")
            .expect("column");
        let err = cell.read(0).expect_err("missing field");
        assert!(err.to_string().contains("absent"));
    }

    #[test]
    fn type_mismatches_surface_as_read_errors() {
        let data = sample();
        let mut reader = data.open(Range::new(0, 0, 3)).expect("open");
        let mut cell = ReadColumn::<f64>::read_column(&mut reader, &Range::new(0, 0, 3), "tag")
            .expect("column");
        assert!(cell.read(0).is_err());
    }
}
