//! End-to-end compilation: wire JSON -> canonical descriptor -> SQL, for
//! both the raw and rollup paths.

use std::collections::{BTreeMap, BTreeSet};

use granary_sql::{
    assemble, canonicalize, Fingerprint, QueryDoc, ResolvedSource, RollupSource,
};

fn country_day_rollup() -> RollupSource {
    RollupSource {
        table: "rollup_by_country_day".to_string(),
        dimensions: BTreeSet::from(["country".to_string(), "day".to_string()]),
        count_column: Some("cnt".to_string()),
        sum_columns: BTreeMap::from([
            ("bid_price".to_string(), "sum_bid".to_string()),
            ("total_price".to_string(), "sum_total".to_string()),
        ]),
        min_columns: BTreeMap::new(),
        max_columns: BTreeMap::new(),
    }
}

#[test]
fn compiles_daily_revenue_by_country_both_ways() {
    let doc = QueryDoc::from_json(
        r#"{
            "select": [
                "country",
                "day",
                {"agg": "count", "col": "*"},
                {"agg": "sum", "col": "total_price"}
            ],
            "from": "events",
            "where": [{"col": "day", "op": "between", "val": ["2024-03-01", "2024-03-31"]}],
            "group_by": ["country", "day"],
            "order_by": [{"col": "sum(total_price)", "dir": "desc"}],
            "limit": 100
        }"#,
    )
    .unwrap();
    let desc = canonicalize(&doc).unwrap();

    let raw = assemble(
        &desc,
        &ResolvedSource::Raw {
            table: "events".to_string(),
        },
    )
    .unwrap();
    let routed = assemble(&desc, &ResolvedSource::Rollup(country_day_rollup())).unwrap();

    // Same output header either way.
    assert_eq!(raw.columns, routed.columns);
    assert_eq!(
        raw.columns,
        vec!["country", "day", "count_star()", "sum(total_price)"]
    );

    assert!(raw.sql.contains("COUNT(*) AS \"count_star()\""));
    assert!(raw.sql.contains("SUM(\"total_price\") AS \"sum(total_price)\""));
    assert!(routed.sql.contains("SUM(\"cnt\") AS \"count_star()\""));
    assert!(routed.sql.contains("SUM(\"sum_total\") AS \"sum(total_price)\""));
    assert!(routed.sql.contains("FROM \"rollup_by_country_day\""));
    assert!(routed
        .sql
        .contains("\"day\" BETWEEN '2024-03-01' AND '2024-03-31'"));
    assert!(routed.sql.ends_with("ORDER BY \"sum(total_price)\" DESC LIMIT 100"));
}

#[test]
fn fingerprint_tracks_source_not_wire_spelling() {
    let spellings = [
        r#"{
            "select": [{"agg": "avg", "col": "bid_price"}],
            "from": "events",
            "where": [
                {"col": "country", "op": "in", "val": ["US", "DE", "FR"]},
                {"col": "day", "op": ">=", "val": "2024-01-01"}
            ]
        }"#,
        r#"{
            "select": [{"agg": "avg", "col": "bid_price"}],
            "from": "events",
            "where": [
                {"col": "day", "op": ">=", "val": "2024-01-01"},
                {"col": "country", "op": "in", "val": ["FR", "DE", "US"]}
            ]
        }"#,
    ];

    let fps: Vec<Fingerprint> = spellings
        .iter()
        .map(|raw| {
            let desc = canonicalize(&QueryDoc::from_json(raw).unwrap()).unwrap();
            Fingerprint::compute(&desc, "rollup_by_country_day", 3)
        })
        .collect();
    assert_eq!(fps[0], fps[1]);

    // Same query answered from a different source is a different entry.
    let desc = canonicalize(&QueryDoc::from_json(spellings[0]).unwrap()).unwrap();
    assert_ne!(fps[0], Fingerprint::compute(&desc, "events", 3));
}

#[test]
fn hostile_filter_values_never_break_out_of_literals() {
    let doc = QueryDoc::from_json(
        r#"{
            "select": [{"agg": "count", "col": "*"}],
            "from": "events",
            "where": [{"col": "country", "op": "=", "val": "US'; DROP TABLE events; --"}]
        }"#,
    )
    .unwrap();
    let desc = canonicalize(&doc).unwrap();
    let q = assemble(
        &desc,
        &ResolvedSource::Raw {
            table: "events".to_string(),
        },
    )
    .unwrap();
    assert!(q.sql.contains("'US''; DROP TABLE events; --'"));
}
