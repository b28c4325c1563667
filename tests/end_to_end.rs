//! Scenario-level coverage across the whole stack: one test per
//! conjunctive/join/collect/vector/time-series/CDC path through [`Facade`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use weave_engine::gorilla::{decode, encode, RawPoint};
use weavedb::{
    CdcFilters, ChangeOp, DataPoint, DistanceMetric, Facade, IndexKind, QueryOptions, Value,
    VectorConfig, WeaveConfig,
};

fn open() -> (tempfile::TempDir, Facade) {
    let dir = tempdir().unwrap();
    let db = Facade::open(dir.path(), WeaveConfig::default()).unwrap();
    (dir, db)
}

fn obj(pairs: Vec<(&str, Value)>) -> Value {
    Value::Object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

#[test]
fn conjunctive_with_a_range_predicate_returns_sorted_top_n() {
    let (_d, db) = open();
    let mut rng = StdRng::seed_from_u64(1);

    for i in 0..1000 {
        let city = if i % 2 == 0 { "Berlin" } else { "Munich" };
        let age = rng.gen_range(18..=80);
        db.upsert("users", obj(vec![("city", Value::String(city.to_string())), ("age", Value::Int(age))])).unwrap();
    }
    db.create_index(IndexKind::Equality, "users", vec!["city".to_string()]).unwrap();
    db.create_index(IndexKind::Range, "users", vec!["age".to_string()]).unwrap();

    let result = db
        .execute(
            "FOR u IN users FILTER u.city==\"Berlin\" AND u.age>=30 SORT u.age DESC LIMIT 10 RETURN u._key",
            Default::default(),
        )
        .unwrap();

    assert_eq!(result.items.len(), 10);
}

#[test]
fn hash_join_returns_the_requested_page_of_matches() {
    let (_d, db) = open();
    let mut user_keys = Vec::new();
    for i in 0..200 {
        let pk = db.upsert("users", obj(vec![("name", Value::String(format!("user-{i}")))])).unwrap();
        user_keys.push(pk.rsplit_once(':').unwrap().1.to_string());
    }
    let mut rng = StdRng::seed_from_u64(2);
    for _ in 0..1000 {
        let user_id = user_keys[rng.gen_range(0..user_keys.len())].clone();
        db.upsert("orders", obj(vec![("user_id", Value::String(user_id))])).unwrap();
    }

    let result = db
        .execute("FOR u IN users FOR o IN orders FILTER o.user_id == u._key LIMIT 50 RETURN u", Default::default())
        .unwrap();

    assert_eq!(result.items.len(), 50);
    for item in &result.items {
        assert!(matches!(item, Value::Object(fields) if fields.contains_key("_key")));
    }
}

#[test]
fn collect_aggregates_per_city_above_the_having_threshold() {
    let (_d, db) = open();
    let cities = ["london", "paris", "berlin"];
    let mut expected: BTreeMap<&str, (f64, u64)> = BTreeMap::new();
    for (ci, city) in cities.iter().enumerate() {
        for i in 0..10u32 {
            let amount = (ci as f64 + 1.0) * 10.0 + i as f64;
            db.upsert("sales", obj(vec![("city", Value::String(city.to_string())), ("amount", Value::Double(amount))])).unwrap();
            let entry = expected.entry(city).or_insert((0.0, 0));
            entry.0 += amount;
            entry.1 += 1;
        }
    }

    let result = db
        .execute(
            "FOR s IN sales COLLECT c = s.city AGGREGATE sum = SUM(s.amount), n = COUNT() HAVING n >= 10 RETURN {c: c, sum: sum, n: n}",
            Default::default(),
        )
        .unwrap();

    assert_eq!(result.items.len(), 3);
    for item in &result.items {
        let Value::Object(fields) = item else { panic!("expected an object row") };
        let Value::String(city) = &fields["c"] else { panic!("c should be a string") };
        let (sum, n) = expected[city.as_str()];
        assert_eq!(fields["n"], Value::Int(n as i64));
        match &fields["sum"] {
            Value::Double(v) => assert!((v - sum).abs() < 1e-9),
            Value::Int(v) => assert_eq!(*v as f64, sum),
            other => panic!("unexpected sum type {other:?}"),
        }
    }
}

#[test]
fn hnsw_index_survives_a_save_and_reload_round_trip() {
    let dir = tempdir().unwrap();
    let save_path = dir.path().join("docs.hnsw").to_str().unwrap().to_string();
    let data_dir = dir.path().join("data");

    let mut rng = StdRng::seed_from_u64(3);
    let dim = 16;
    let count = 300;
    let config = VectorConfig {
        object_name: "docs".to_string(),
        dimension: dim,
        metric: DistanceMetric::Cosine,
        save_path: Some(save_path),
        load_on_startup: true,
        save_on_shutdown: true,
        ..VectorConfig::default()
    };

    let db = Facade::open(&data_dir, WeaveConfig::default()).unwrap();
    db.vector_init("docs", config.clone(), "embedding").unwrap();

    let mut vectors = Vec::new();
    for _ in 0..count {
        let v: Vec<f64> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        db.upsert("docs", obj(vec![("embedding", Value::Array(v.iter().map(|x| Value::Double(*x)).collect()))])).unwrap();
        vectors.push(v);
    }
    db.checkpoint(dir.path().join("snap")).unwrap();

    let queries: Vec<Vec<f32>> = (0..20)
        .map(|i| vectors[i * (count / 20)].iter().map(|x| *x as f32).collect())
        .collect();
    let before: Vec<Vec<String>> = queries
        .iter()
        .map(|q| {
            let mut pks: Vec<String> = db.vector_search("docs", q, 10, None).unwrap().into_iter().map(|h| h.pk).collect();
            pks.sort();
            pks
        })
        .collect();

    drop(db);
    let db2 = Facade::open(&data_dir, WeaveConfig::default()).unwrap();
    db2.vector_init("docs", config, "embedding").unwrap();
    let after: Vec<Vec<String>> = queries
        .iter()
        .map(|q| {
            let mut pks: Vec<String> = db2.vector_search("docs", q, 10, None).unwrap().into_iter().map(|h| h.pk).collect();
            pks.sort();
            pks
        })
        .collect();

    assert_eq!(before, after);
}

#[test]
fn gorilla_round_trip_preserves_timestamps_and_values_bitwise() {
    let mut rng = StdRng::seed_from_u64(4);
    let mut points = Vec::with_capacity(1000);
    let mut ts = 1_700_000_000_000i64;
    let mut value = 0.0f64;
    for _ in 0..1000 {
        ts += rng.gen_range(1..=60) * 1000;
        value += rng.gen_range(-1.0..1.0);
        points.push(RawPoint { ts_ms: ts, value });
    }

    let chunk = encode(&points).unwrap();
    let decoded = decode(&chunk).unwrap();

    assert_eq!(decoded.len(), points.len());
    for (a, b) in points.iter().zip(decoded.iter()) {
        assert_eq!(a.ts_ms, b.ts_ms);
        assert_eq!(a.value.to_bits(), b.value.to_bits());
    }
}

#[test]
fn cdc_long_poll_wakes_on_the_next_commit() {
    let (_d, db) = open();
    db.upsert("events", obj(vec![("kind", Value::String("seed".to_string()))])).unwrap();
    let baseline = db.cdc_list(0, 1000, &CdcFilters::default(), 0).unwrap().last().unwrap().sequence;

    let db = Arc::new(db);
    let writer = db.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        writer.upsert("events", obj(vec![("kind", Value::String("triggered".to_string()))])).unwrap();
    });

    let events = db.cdc_list(baseline, 10, &CdcFilters::default(), 500).unwrap();
    handle.join().unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sequence, baseline + 1);
    assert_eq!(events[0].op, ChangeOp::Insert);
}

#[test]
fn timeseries_query_spanning_zero_points_is_empty() {
    let (_d, db) = open();
    db.ts_put(DataPoint {
        metric: "cpu.load".to_string(),
        entity: "host-1".to_string(),
        ts_ms: 1000,
        value: 0.5,
        tags: BTreeMap::new(),
        metadata: BTreeMap::new(),
    })
    .unwrap();

    let options = QueryOptions { entity: Some("host-1".to_string()), from: 5000, to: 6000, tags: BTreeMap::new(), limit: None };
    let result = db.ts_query("cpu.load", &options).unwrap();
    assert!(result.is_empty());
}
