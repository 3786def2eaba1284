#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use tally::{DataSet, Fill, Partition, Query, Range, Result};
use tally_json::Json;

/// Dataset with a single `x` column.
pub fn dataset_x(values: &[f64]) -> Json {
    Json::from_rows(values.iter().map(|x| json!({ "x": x })).collect())
}

/// Dataset with `x` and `w` columns.
pub fn dataset_xw(values: &[(f64, f64)]) -> Json {
    Json::from_rows(
        values
            .iter()
            .map(|(x, w)| json!({ "x": x, "w": w }))
            .collect(),
    )
}

/// Wrapper instrumenting a dataset's lifecycle, for asserting how many
/// passes actually ran.
pub struct Counted<D> {
    inner: D,
    starts: Arc<AtomicUsize>,
    norm: f64,
}

pub fn counted<D: DataSet>(inner: D) -> (Counted<D>, Arc<AtomicUsize>) {
    let starts = Arc::new(AtomicUsize::new(0));
    (
        Counted {
            inner,
            starts: Arc::clone(&starts),
            norm: 1.0,
        },
        starts,
    )
}

impl<D> Counted<D> {
    pub fn with_norm(mut self, norm: f64) -> Self {
        self.norm = norm;
        self
    }
}

impl<D: DataSet> DataSet for Counted<D> {
    type Reader = D::Reader;

    fn allocate(&mut self) -> Result<Partition> {
        self.inner.allocate()
    }

    fn open(&self, range: Range) -> Result<Self::Reader> {
        self.inner.open(range)
    }

    fn start(&mut self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::Relaxed);
        self.inner.start()
    }

    fn finish(&mut self) -> Result<()> {
        self.inner.finish()
    }

    fn normalize(&self) -> f64 {
        self.norm * self.inner.normalize()
    }
}

/// Counts passing rows, weighted.
#[derive(Default)]
pub struct RowCount {
    total: f64,
}

impl Query for RowCount {
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

/// Sums an observed column, ignoring the weight.
#[derive(Default)]
pub struct SumOf {
    sum: f64,
}

impl Query for SumOf {
    type Output = f64;

    fn count(&mut self, _weight: f64) {}

    fn result(&self) -> f64 {
        self.sum
    }

    fn merge(&self, parts: Vec<f64>) -> f64 {
        parts.into_iter().sum()
    }
}

impl Fill<(f64,)> for SumOf {
    fn fill(&mut self, values: &(f64,), _weight: f64) {
        self.sum += values.0;
    }
}

/// Collects every observed value; merging concatenates in slot order.
#[derive(Default)]
pub struct Series {
    values: Vec<f64>,
}

impl Query for Series {
    type Output = Vec<f64>;

    fn count(&mut self, _weight: f64) {}

    fn result(&self) -> Vec<f64> {
        self.values.clone()
    }

    fn merge(&self, parts: Vec<Vec<f64>>) -> Vec<f64> {
        parts.into_iter().flatten().collect()
    }
}

impl Fill<(f64,)> for Series {
    fn fill(&mut self, values: &(f64,), _weight: f64) {
        self.values.push(values.0);
    }
}

/// Collects observed pairs.
#[derive(Default)]
pub struct PairSeries {
    values: Vec<(f64, f64)>,
}

impl Query for PairSeries {
    type Output = Vec<(f64, f64)>;

    fn count(&mut self, _weight: f64) {}

    fn result(&self) -> Vec<(f64, f64)> {
        self.values.clone()
    }

    fn merge(&self, parts: Vec<Vec<(f64, f64)>>) -> Vec<(f64, f64)> {
        parts.into_iter().flatten().collect()
    }
}

impl Fill<((f64, f64),)> for PairSeries {
    fn fill(&mut self, values: &((f64, f64),), _weight: f64) {
        self.values.push(values.0);
    }
}
