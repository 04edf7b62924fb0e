// End-to-end runs over a temp data directory with a scripted data source.
// Precondition for every test: runs do not overlap on the same directories.

use async_trait::async_trait;
use chrono::NaiveDate;
use flight_kpi_pipeline::artifacts::{read_csv, write_csv};
use flight_kpi_pipeline::config::{DEFAULT_CONN_ID, PipelineConfig, RetryPolicy};
use flight_kpi_pipeline::context::{BRONZE_FILE, GOLD_FILE, Handoff, RunContext, SILVER_FILE};
use flight_kpi_pipeline::error::PipelineError;
use flight_kpi_pipeline::fetch::HttpClient;
use flight_kpi_pipeline::pipeline::{Pipeline, Stage};
use flight_kpi_pipeline::schema::{AggregatedRecord, GOLD_COLUMNS, RefinedRecord, SILVER_COLUMNS};
use flight_kpi_pipeline::stages::load::run_load;
use flight_kpi_pipeline::stages::{InputSource, StageOutcome};
use flight_kpi_pipeline::warehouse::{ConnectionProfile, ConnectionStore, SqliteConnector};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Fails the first `failures` requests with a 503, then serves `body`.
struct ScriptedSource {
    failures: usize,
    calls: AtomicUsize,
    body: String,
}

impl ScriptedSource {
    fn serving(body: &str) -> Self {
        Self::flaky(0, body)
    }

    fn flaky(failures: usize, body: &str) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
            body: body.to_string(),
        }
    }
}

#[async_trait]
impl HttpClient for ScriptedSource {
    async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let (status, body) = if call < self.failures {
            (503, "service unavailable".to_string())
        } else {
            (200, self.body.clone())
        };
        let resp = http::Response::builder()
            .status(status)
            .body(body)
            .expect("static response parts are valid");
        Ok(reqwest::Response::from(resp))
    }
}

fn fixture(name: &str) -> String {
    std::fs::read_to_string(Path::new("tests/fixtures").join(name)).unwrap()
}

fn ctx() -> RunContext {
    RunContext::for_date(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
}

fn connections() -> ConnectionStore {
    let profile: ConnectionProfile = serde_json::from_str(
        r#"{"conn_type": "snowflake", "login": "loader", "password": "secret",
            "extra": {"account": "https://xy12345.eu-west-1.snowflakecomputing.com"}}"#,
    )
    .unwrap();
    let mut profiles = HashMap::new();
    profiles.insert(DEFAULT_CONN_ID.to_string(), profile);
    ConnectionStore::from_profiles(profiles)
}

fn pipeline(data_dir: &Path, source: ScriptedSource) -> Pipeline<ScriptedSource, SqliteConnector> {
    let mut config = PipelineConfig::new(data_dir);
    config.api_url = "http://flights.test/api/states/all".to_string();
    config.retry = RetryPolicy {
        retries: 0,
        delay: Duration::ZERO,
    };
    Pipeline {
        client: source,
        connector: SqliteConnector::new(config.default_warehouse_path()),
        connections: connections(),
        config,
    }
}

fn warehouse_rows(db: &Path) -> Vec<(String, String, i64, Option<f64>, bool)> {
    let conn = Connection::open(db).unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT WINDOW_START, ORIGIN_COUNTRY, TOTAL_FLIGHTS, AVG_VELOCITY, ON_GROUND
             FROM FLIGHT_KPIS ORDER BY ORIGIN_COUNTRY",
        )
        .unwrap();
    stmt.query_map([], |r| {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
    })
    .unwrap()
    .map(Result::unwrap)
    .collect()
}

fn has_error(err: &anyhow::Error, pred: impl Fn(&PipelineError) -> bool) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<PipelineError>())
        .any(pred)
}

#[tokio::test]
async fn test_scenario_a_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), ScriptedSource::serving(&fixture("states_scenario_a.json")));

    let outcomes = pipeline.run(&ctx()).await.unwrap();

    let stages: Vec<_> = outcomes.iter().map(|(s, _)| *s).collect();
    assert_eq!(stages, Stage::ALL);
    assert_eq!(outcomes[3].1, StageOutcome::Loaded { rows: 2 });

    let silver: Vec<RefinedRecord> = read_csv(
        &dir.path().join("silver/flights_silver_20240601.csv"),
        &SILVER_COLUMNS,
    )
    .unwrap();
    assert_eq!(silver.len(), 3);
    assert_eq!(silver[0].icao24, "a1b2c3");
    assert_eq!(silver[0].velocity, Some(100.0));
    assert_eq!(silver[2].origin_country, "FR");
    assert_eq!(silver[2].velocity, None);

    let StageOutcome::Produced(gold_path) = &outcomes[2].1 else {
        panic!("aggregation should produce a gold artifact");
    };
    let gold: Vec<AggregatedRecord> = read_csv(gold_path, &GOLD_COLUMNS).unwrap();
    assert_eq!(
        gold,
        vec![
            AggregatedRecord {
                origin_country: "FR".into(),
                total_flights: 1,
                avg_velocity: None,
                on_ground: 0,
            },
            AggregatedRecord {
                origin_country: "US".into(),
                total_flights: 2,
                avg_velocity: Some(150.0),
                on_ground: 1,
            },
        ]
    );

    let rows = warehouse_rows(&dir.path().join("warehouse.db"));
    assert_eq!(
        rows,
        vec![
            ("2024-06-01 00:00:00".into(), "FR".into(), 1, None, false),
            ("2024-06-01 00:00:00".into(), "US".into(), 2, Some(150.0), true),
        ]
    );

    let handoff = Handoff::open(&Handoff::path_for(&pipeline.config, &ctx())).unwrap();
    assert!(handoff.pull(BRONZE_FILE).is_some());
    assert!(handoff.pull(SILVER_FILE).is_some());
    assert_eq!(handoff.pull(GOLD_FILE), Some(gold_path.as_path()));
}

#[tokio::test]
async fn test_scenario_b_null_states_fails_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), ScriptedSource::serving(&fixture("states_null.json")));

    let err = pipeline.run(&ctx()).await.unwrap_err();

    assert!(err.to_string().contains("load_warehouse"));
    assert!(has_error(&err, |e| matches!(
        e,
        PipelineError::MissingInput { key } if key == GOLD_FILE
    )));

    let silver = dir.path().join("silver/flights_silver_20240601.csv");
    assert_eq!(
        std::fs::read_to_string(silver).unwrap(),
        "icao24,origin_country,velocity,on_ground\n"
    );
    assert!(!dir.path().join("gold").exists());
    assert!(!dir.path().join("warehouse.db").exists());

    let debug_log =
        std::fs::read_to_string(dir.path().join("logs/load_debug_20240601.log")).unwrap();
    assert!(debug_log.starts_with("--- ATTEMPT AT "));
    assert!(debug_log.contains("ERROR:"));
}

#[tokio::test]
async fn test_scenario_c_load_creates_table_and_shares_window() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::new(dir.path());
    let gold = config.gold_dir().join("flight_kpis_20240601_020000.csv");
    let rows = vec![
        AggregatedRecord {
            origin_country: "Germany".into(),
            total_flights: 40,
            avg_velocity: Some(201.5),
            on_ground: 3,
        },
        AggregatedRecord {
            origin_country: "Spain".into(),
            total_flights: 12,
            avg_velocity: Some(180.25),
            on_ground: 0,
        },
    ];
    write_csv(&gold, &GOLD_COLUMNS, &rows).unwrap();

    let mut handoff = Handoff::in_memory();
    handoff.push(GOLD_FILE, &gold).unwrap();
    let db = config.default_warehouse_path();
    assert!(!db.exists());

    let outcome = run_load(
        &SqliteConnector::new(&db),
        &connections(),
        &config,
        &ctx(),
        InputSource::Handoff,
        &handoff,
    )
    .unwrap();

    assert_eq!(outcome, StageOutcome::Loaded { rows: 2 });
    let loaded = warehouse_rows(&db);
    assert_eq!(loaded.len(), 2);
    assert!(loaded.iter().all(|r| r.0 == "2024-06-01 00:00:00"));
    assert_eq!(loaded[0].1, "Germany");
    assert!(loaded[0].4);
    assert!(!loaded[1].4);

    let conn = Connection::open(&db).unwrap();
    let load_times: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM FLIGHT_KPIS WHERE LOAD_TIME IS NOT NULL",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(load_times, 2);
}

#[tokio::test]
async fn test_load_is_append_only() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::new(dir.path());
    let gold = config.gold_dir().join("flight_kpis_20240601_020000.csv");
    let rows = vec![AggregatedRecord {
        origin_country: "Italy".into(),
        total_flights: 5,
        avg_velocity: None,
        on_ground: 5,
    }];
    write_csv(&gold, &GOLD_COLUMNS, &rows).unwrap();
    let mut handoff = Handoff::in_memory();
    handoff.push(GOLD_FILE, &gold).unwrap();
    let connector = SqliteConnector::new(config.default_warehouse_path());

    for _ in 0..2 {
        run_load(
            &connector,
            &connections(),
            &config,
            &ctx(),
            InputSource::Handoff,
            &handoff,
        )
        .unwrap();
    }

    assert_eq!(warehouse_rows(&config.default_warehouse_path()).len(), 2);
}

#[tokio::test]
async fn test_fetch_failure_is_retried_then_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline(
        dir.path(),
        ScriptedSource::flaky(1, &fixture("states_scenario_a.json")),
    );
    pipeline.config.retry.retries = 1;

    let outcomes = pipeline.run(&ctx()).await.unwrap();

    assert_eq!(pipeline.client.calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcomes.len(), 4);
}

#[tokio::test]
async fn test_exhausted_retries_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline(
        dir.path(),
        ScriptedSource::flaky(5, &fixture("states_scenario_a.json")),
    );
    pipeline.config.retry.retries = 2;

    let err = pipeline.run(&ctx()).await.unwrap_err();

    assert!(err.to_string().contains("ingest_bronze"));
    assert_eq!(pipeline.client.calls.load(Ordering::SeqCst), 3);
    assert!(has_error(&err, |e| matches!(
        e,
        PipelineError::HttpStatus { status: 503, .. }
    )));
    assert!(!dir.path().join("bronze").exists());
    assert!(!dir.path().join("silver").exists());
}

#[tokio::test]
async fn test_extended_tuple_aborts_refinement() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), ScriptedSource::serving(&fixture("states_extended.json")));

    let err = pipeline.run(&ctx()).await.unwrap_err();

    assert!(err.to_string().contains("transform_silver"));
    assert!(has_error(&err, |e| matches!(
        e,
        PipelineError::SchemaMismatch { index: 0, .. }
    )));
    assert!(!dir.path().join("silver").exists());
}

#[tokio::test]
async fn test_standalone_stages_share_persisted_handoff() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), ScriptedSource::serving(&fixture("states_scenario_a.json")));

    for stage in Stage::ALL {
        let mut handoff = pipeline.stage_handoff(stage, &ctx()).unwrap();
        pipeline
            .run_stage(stage, &ctx(), InputSource::Handoff, &mut handoff)
            .await
            .unwrap();
    }

    assert_eq!(warehouse_rows(&dir.path().join("warehouse.db")).len(), 2);
}

#[tokio::test]
async fn test_standalone_rerun_does_not_reload_previous_gold() {
    let dir = tempfile::tempdir().unwrap();

    let first = pipeline(dir.path(), ScriptedSource::serving(&fixture("states_scenario_a.json")));
    for stage in Stage::ALL {
        let mut handoff = first.stage_handoff(stage, &ctx()).unwrap();
        first
            .run_stage(stage, &ctx(), InputSource::Handoff, &mut handoff)
            .await
            .unwrap();
    }
    assert_eq!(warehouse_rows(&dir.path().join("warehouse.db")).len(), 2);

    // Same date, one process per stage, but the source now has no states.
    let second = pipeline(dir.path(), ScriptedSource::serving(&fixture("states_null.json")));
    let mut load_result = None;
    for stage in Stage::ALL {
        let mut handoff = second.stage_handoff(stage, &ctx()).unwrap();
        let result = second
            .run_stage(stage, &ctx(), InputSource::Handoff, &mut handoff)
            .await;
        match stage {
            Stage::Aggregate => {
                assert!(matches!(result.unwrap(), StageOutcome::Skipped(_)));
                assert!(handoff.pull(GOLD_FILE).is_none());
            }
            Stage::Load => load_result = Some(result),
            _ => {
                result.unwrap();
            }
        }
    }

    let err = load_result.unwrap().unwrap_err();
    assert!(has_error(&err, |e| matches!(
        e,
        PipelineError::MissingInput { key } if key == GOLD_FILE
    )));
    assert_eq!(warehouse_rows(&dir.path().join("warehouse.db")).len(), 2);

    let handoff = Handoff::open(&Handoff::path_for(&second.config, &ctx())).unwrap();
    assert!(handoff.pull(GOLD_FILE).is_none());
}
