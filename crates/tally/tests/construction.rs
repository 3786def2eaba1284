//! Graph construction rules, registries, and the run lifecycle.

mod common;

use std::sync::atomic::Ordering;

use common::{counted, dataset_x, dataset_xw, PairSeries, RowCount, Series, SumOf};
use tally::{Booker, Dataflow, Definition, Error};

#[test]
fn duplicate_column_names_are_rejected() {
    let mut df = Dataflow::new(dataset_x(&[1.0])).expect("dataflow");
    let _ = df.read::<f64>("x").expect("read");
    let err = df.constant("x", 1.0_f64).expect_err("duplicate");
    assert!(matches!(err, Error::DuplicateColumn(name) if name == "x"));
}

#[test]
fn empty_names_are_rejected() {
    let mut df = Dataflow::new(dataset_x(&[1.0])).expect("dataflow");
    let err = df.constant("", 1.0_f64).expect_err("empty name");
    assert!(matches!(err, Error::InvalidName(_)));
}

#[test]
fn colliding_selection_paths_are_rejected() {
    let mut df = Dataflow::new(dataset_x(&[1.0])).expect("dataflow");
    let x = df.read::<f64>("x").expect("read");
    let a = df.filter("a", |x: &f64| *x > 0.0, (&x,)).expect("filter");

    // same name under the same parent
    let err = df
        .filter("a", |x: &f64| *x > 1.0, (&x,))
        .expect_err("duplicate");
    assert!(matches!(err, Error::DuplicateSelection(path) if path == "a"));

    // a non-channel parent contributes nothing to the path, so the same
    // name still collides
    let err = df
        .filter_at(&a, "a", |x: &f64| *x > 1.0, (&x,))
        .expect_err("duplicate");
    assert!(matches!(err, Error::DuplicateSelection(path) if path == "a"));
}

#[test]
fn channels_namespace_their_descendants() {
    let mut df = Dataflow::new(dataset_x(&[1.0])).expect("dataflow");
    let x = df.read::<f64>("x").expect("read");
    let left = df.channel("left", |x: &f64| *x > 0.0, (&x,)).expect("channel");
    let right = df.channel("right", |x: &f64| *x > 0.0, (&x,)).expect("channel");

    let sig_left = df
        .filter_at(&left, "sig", |x: &f64| *x > 0.5, (&x,))
        .expect("filter");
    let sig_right = df
        .filter_at(&right, "sig", |x: &f64| *x > 0.5, (&x,))
        .expect("filter");

    assert_eq!(df.selection_path(&sig_left).expect("path"), "left/sig");
    assert_eq!(df.selection_path(&sig_right).expect("path"), "right/sig");
    assert_eq!(
        df.selection_paths(),
        &["left", "right", "left/sig", "right/sig"]
    );
}

#[test]
fn selections_can_be_recovered_by_path() {
    let mut df = Dataflow::new(dataset_x(&[1.0, 2.0, 3.0])).expect("dataflow");
    let x = df.read::<f64>("x").expect("read");
    let gate = df.channel("gate", |x: &f64| *x > 1.0, (&x,)).expect("channel");
    let _deep = df
        .filter_at(&gate, "deep", |x: &f64| *x > 2.0, (&x,))
        .expect("filter");

    let recovered = df.selection_at("gate/deep").expect("lookup");
    let count = df
        .book(&Booker::new("count", RowCount::default), &recovered)
        .expect("book");
    assert_eq!(df.result(&count).expect("result"), 1.0);

    let err = df.selection_at("gate/missing").expect_err("unknown");
    assert!(matches!(err, Error::UnknownSelection(path) if path == "gate/missing"));
}

#[test]
fn handles_from_another_dataflow_are_rejected() {
    let mut df1 = Dataflow::new(dataset_x(&[1.0])).expect("dataflow");
    let foreign = df1.read::<f64>("x").expect("read");

    let mut df2 = Dataflow::new(dataset_x(&[1.0])).expect("dataflow");
    let err = df2
        .filter("f", |x: &f64| *x > 0.0, (&foreign,))
        .expect_err("foreign");
    assert!(matches!(err, Error::ForeignHandle));
}

#[test]
fn a_booker_books_once_per_selection() {
    let mut df = Dataflow::new(dataset_x(&[1.0])).expect("dataflow");
    let x = df.read::<f64>("x").expect("read");
    let all = df.filter("all", |_x: &f64| true, (&x,)).expect("filter");

    let booker = Booker::new("count", RowCount::default);
    let _ = df.book(&booker, &all).expect("book");
    let err = df.book(&booker, &all).expect_err("duplicate");
    assert!(matches!(err, Error::DuplicateQuery(path) if path == "all/count"));

    // a differently named booker can share the selection
    let other = Booker::new("count2", RowCount::default);
    let _ = df.book(&other, &all).expect("book");
    assert_eq!(df.query_paths(), &["all/count", "all/count2"]);
}

#[test]
fn bookkeepers_index_queries_by_selection_path() {
    let values: Vec<f64> = (0..10).map(f64::from).collect();
    let mut df = Dataflow::new(dataset_x(&values)).expect("dataflow");
    let x = df.read::<f64>("x").expect("read");
    let low = df.filter("low", |x: &f64| *x < 5.0, (&x,)).expect("filter");
    let high = df.filter("high", |x: &f64| *x >= 5.0, (&x,)).expect("filter");

    let bookkeeper = df
        .book_all(&Booker::new("count", RowCount::default), &[&low, &high])
        .expect("book");
    assert_eq!(bookkeeper.len(), 2);
    assert_eq!(bookkeeper.paths(), vec!["high", "low"]);

    let low_count = *bookkeeper.get("low").expect("entry");
    let high_count = *bookkeeper.get("high").expect("entry");
    assert_eq!(df.result(&low_count).expect("result"), 5.0);
    assert_eq!(df.result(&high_count).expect("result"), 5.0);
    assert!(bookkeeper.get("absent").is_err());
}

#[test]
fn results_are_idempotent_and_reruns_only_follow_new_bookings() {
    let (data, starts) = counted(dataset_x(&[1.0, 2.0, 3.0]));
    let mut df = Dataflow::new(data).expect("dataflow");
    let x = df.read::<f64>("x").expect("read");
    let all = df.filter("all", |_x: &f64| true, (&x,)).expect("filter");

    let first = df
        .book(&Booker::new("count", RowCount::default), &all)
        .expect("book");
    assert_eq!(df.result(&first).expect("result"), 3.0);
    assert_eq!(df.result(&first).expect("result"), 3.0);
    assert_eq!(starts.load(Ordering::Relaxed), 1, "cached result, no rerun");

    // a new booking re-arms the pass; the old result stays cached
    let second = df
        .book(&Booker::new("sum", SumOf::default).fill((&x,)).expect("fill"), &all)
        .expect("book");
    assert_eq!(df.result(&second).expect("result"), 6.0);
    assert_eq!(starts.load(Ordering::Relaxed), 2);
    assert_eq!(df.result(&first).expect("result"), 3.0);
    assert_eq!(starts.load(Ordering::Relaxed), 2);
}

#[test]
fn raw_bookers_ignore_weights_and_scales_multiply() {
    let data = dataset_xw(&[(1.0, 2.0), (2.0, 2.0), (3.0, 2.0)]);
    let mut df = Dataflow::new(data).expect("dataflow");
    let w = df.read::<f64>("w").expect("read");
    let weighted = df.weight_on("w", &w).expect("weight");

    let plain = df
        .book(&Booker::new("plain", RowCount::default), &weighted)
        .expect("book");
    let raw = df
        .book(&Booker::new("raw", RowCount::default).raw(), &weighted)
        .expect("book");
    let scaled = df
        .book(
            &Booker::new("scaled", RowCount::default).scale(10.0),
            &weighted,
        )
        .expect("book");

    assert_eq!(df.result(&plain).expect("result"), 6.0);
    assert_eq!(df.result(&raw).expect("result"), 3.0);
    assert_eq!(df.result(&scaled).expect("result"), 60.0);
}

#[test]
fn fill_hooks_run_even_when_the_weight_is_zero() {
    let data = dataset_xw(&[(1.0, 0.0), (2.0, 0.0)]);
    let mut df = Dataflow::new(data).expect("dataflow");
    let x = df.read::<f64>("x").expect("read");
    let w = df.read::<f64>("w").expect("read");
    let weighted = df.weight_on("w", &w).expect("weight");

    let series = df
        .book(
            &Booker::new("series", Series::default)
                .fill((&x,))
                .expect("fill"),
            &weighted,
        )
        .expect("book");
    assert_eq!(df.result(&series).expect("result"), vec![1.0, 2.0]);
}

#[test]
fn repeated_fills_concatenate() {
    let data = dataset_xw(&[(1.0, 10.0), (2.0, 20.0)]);
    let mut df = Dataflow::new(data).expect("dataflow");
    let x = df.read::<f64>("x").expect("read");
    let w = df.read::<f64>("w").expect("read");
    let one = df.constant("one", 1.0_f64).expect("constant");
    let all = df.filter_on("all", &one).expect("filter");

    let series = df
        .book(
            &Booker::new("series", Series::default)
                .fill((&x,))
                .and_then(|booker| booker.fill((&w,)))
                .expect("fill"),
            &all,
        )
        .expect("book");

    // each row contributes one value per recorded fill tuple
    assert_eq!(
        df.result(&series).expect("result"),
        vec![1.0, 10.0, 2.0, 20.0]
    );
}

#[test]
fn joins_conjoin_independent_branches() {
    let values: Vec<f64> = (0..10).map(f64::from).collect();
    let mut df = Dataflow::new(dataset_x(&values)).expect("dataflow");
    let x = df.read::<f64>("x").expect("read");
    let low = df.filter("low", |x: &f64| *x < 5.0, (&x,)).expect("filter");
    let even = df
        .filter("even", |x: &f64| (*x as i64) % 2 == 0, (&x,))
        .expect("filter");

    let both = df.join("low_and_even", &low, &even).expect("join");
    let count = df
        .book(&Booker::new("count", RowCount::default), &both)
        .expect("book");
    // x in {0, 2, 4}
    assert_eq!(df.result(&count).expect("result"), 3.0);
}

struct ScaleBy {
    factor: f64,
}

impl Definition for ScaleBy {
    type Input = (f64,);
    type Output = f64;

    fn calculate(&self, input: &(f64,)) -> f64 {
        self.factor * input.0
    }
}

#[test]
fn definition_instances_compute_per_row_values() {
    let mut df = Dataflow::new(dataset_x(&[1.0, 2.0])).expect("dataflow");
    let x = df.read::<f64>("x").expect("read");
    let y = df
        .define("y", || ScaleBy { factor: 3.0 }, (&x,))
        .expect("define");
    let one = df.constant("one", 1.0_f64).expect("constant");
    let all = df.filter_on("all", &one).expect("filter");
    let sum = df
        .book(
            &Booker::new("sum", SumOf::default).fill((&y,)).expect("fill"),
            &all,
        )
        .expect("book");
    assert_eq!(df.result(&sum).expect("result"), 9.0);
}

#[test]
fn conversions_and_representations_flow_through_queries() {
    let data = dataset_xw(&[(1.0, 10.0), (2.0, 20.0)]);
    let mut df = Dataflow::new(data).expect("dataflow");
    let x = df.read::<f64>("x").expect("read");
    let w = df.read::<f64>("w").expect("read");
    let n = df.read::<i32>("x").map(|_| ()).err();
    assert!(matches!(n, Some(Error::DuplicateColumn(_))));

    let pair = df.zip2("xw", &x, &w).expect("zip");
    let one = df.constant("one", 1.0_f64).expect("constant");
    let all = df.filter_on("all", &one).expect("filter");
    let pairs = df
        .book(
            &Booker::new("pairs", PairSeries::default)
                .fill((&pair,))
                .expect("fill"),
            &all,
        )
        .expect("book");
    let mut collected = df.result(&pairs).expect("result");
    collected.sort_by(|a, b| a.partial_cmp(b).expect("ordered"));
    assert_eq!(collected, vec![(1.0, 10.0), (2.0, 20.0)]);
}

#[test]
fn integer_conversions_widen_column_types() {
    let data = tally_json::Json::from_str(r#"[{"n": 3}, {"n": 0}]"#).expect("data");
    let mut df = Dataflow::new(data).expect("dataflow");
    let n = df.read::<i32>("n").expect("read");
    let wide = df.convert::<i32, i64>("n_wide", &n).expect("convert");
    let positive = df.filter_on("positive", &wide).expect("filter");
    let count = df
        .book(&Booker::new("count", RowCount::default), &positive)
        .expect("book");
    assert_eq!(df.result(&count).expect("result"), 1.0);
}

#[test]
fn varied_composition_takes_the_union_of_universes() {
    let mut df = Dataflow::new(dataset_x(&[0.0])).expect("dataflow");
    let a = df
        .constant_varied("a", 1.0_f64, &[("up", 2.0)])
        .expect("constant");
    let b = df
        .constant_varied("b", 10.0_f64, &[("down", 20.0)])
        .expect("constant");
    let y = df
        .eval_varied2("y", |a: &f64, b: &f64| a + b, &a, &b)
        .expect("eval");

    use tally::Systematic;
    let names: Vec<String> = y.variation_names().into_iter().collect();
    assert_eq!(names, vec!["down".to_string(), "up".to_string()]);
    assert!(y.names().contains("up"));

    let one = df.constant("one", 1.0_f64).expect("constant");
    let all = df.filter_on("all", &one).expect("filter");
    let sum = Booker::new("sum_y", SumOf::default)
        .fill_varied1(&y)
        .expect("fill");
    let booked = df.book_varied(&sum, &all).expect("book");
    let results = df.result_varied(&booked).expect("results");

    assert_eq!(results.get("nominal"), Some(&11.0));
    assert_eq!(results.get("up"), Some(&12.0));
    assert_eq!(results.get("down"), Some(&21.0));
}

#[test]
fn unknown_variation_lookups_fall_back_to_nominal() {
    let mut df = Dataflow::new(dataset_x(&[1.0, 2.0])).expect("dataflow");
    let x = df
        .constant_varied("k", 1.0_f64, &[("up", 2.0)])
        .expect("constant");
    let one = df.constant("one", 1.0_f64).expect("constant");
    let all = df.filter_on("all", &one).expect("filter");
    let sum = Booker::new("sum_k", SumOf::default)
        .fill_varied1(&x)
        .expect("fill");
    let booked = df.book_varied(&sum, &all).expect("book");

    let nominal = df.result_variation(&booked, "nominal_only").expect("result");
    assert_eq!(nominal, df.result(booked.nominal()).expect("result"));
    assert_eq!(nominal, 2.0);
}

#[test]
fn varied_selections_gate_each_universe_independently() {
    let values: Vec<f64> = (1..=4).map(f64::from).collect();
    let mut df = Dataflow::new(dataset_x(&values)).expect("dataflow");
    let x = df.read::<f64>("x").expect("read");
    let threshold = df
        .constant_varied("threshold", 2.0_f64, &[("loose", 1.0)])
        .expect("constant");
    let above = df
        .eval_varied2("above", |x: &f64, t: &f64| x > t, &x, &threshold)
        .expect("eval");
    let cut = df.filter_on_varied("cut", &above).expect("filter");

    let count = Booker::new("count", RowCount::default);
    let booked = df.book_varied(&count, &cut).expect("book");
    let results = df.result_varied(&booked).expect("results");

    assert_eq!(results.get("nominal"), Some(&2.0));
    assert_eq!(results.get("loose"), Some(&3.0));
}

#[test]
fn listed_names_and_paths_stay_unique() {
    let mut df = Dataflow::new(dataset_xw(&[(1.0, 1.0)])).expect("dataflow");
    let x = df.read::<f64>("x").expect("read");
    let w = df.read::<f64>("w").expect("read");
    let _y = df.eval("y", |x: &f64, w: &f64| x * w, (&x, &w)).expect("eval");
    let a = df.filter("a", |x: &f64| *x > 0.0, (&x,)).expect("filter");
    let _b = df
        .filter_at(&a, "b", |x: &f64| *x > 0.0, (&x,))
        .expect("filter");
    let _ = df
        .book(&Booker::new("count", RowCount::default), &a)
        .expect("book");

    assert_eq!(df.column_names(), &["x", "w", "y"]);
    assert!(df.has_column("y"));
    assert!(!df.has_column("z"));
    assert_eq!(df.selection_paths(), &["a", "b"]);
    assert!(df.has_selection("b"));
    assert_eq!(df.query_paths(), &["a/count"]);

    for paths in [df.selection_paths(), df.query_paths()] {
        let mut unique = paths.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), paths.len());
    }
}
