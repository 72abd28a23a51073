// tests/checkpoint_resume.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{Value, json};

use tunedag::checkpoint::{
    Checkpoint, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, deserialize,
    to_value, validate, validate_value,
};
use tunedag::config::JobDeclaration;
use tunedag::dag::{DagExecution, JobExecution};
use tunedag::engine::{ExecuteOptions, Orchestrator};
use tunedag::errors::TunedagError;
use tunedag::types::{CheckpointTrigger, DagStatus, JobStatus};
use tunedag_test_utils::builders::JobBuilder;
use tunedag_test_utils::handlers::ConcurrencyProbe;
use tunedag_test_utils::{init_tracing, with_timeout};

fn job(id: &str, status: JobStatus, output: Option<Value>) -> JobExecution {
    let mut job = JobExecution::new(id);
    job.status = status;
    job.output = output;
    if status != JobStatus::Pending {
        job.attempt = 1;
        job.started_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }
    if status == JobStatus::Completed {
        job.completed_at = Some(Utc::now());
    }
    job
}

fn awkward_execution() -> DagExecution {
    let mut exec = DagExecution::new("résumé \"sweep\" 🚀");
    exec.status = DagStatus::Running;

    let output = json!({
        "text": "naïve café — 東京 \"quoted\" \\ back\nslash",
        "nested": { "list": [1, "two", null, { "deep": [true, false, null] }], "empty": {} },
        "nothing": null,
        "metrics": { "accuracy": 0.9375, "loss": -1.5e-3 },
    });
    let mut a = job("a", JobStatus::Completed, Some(output));
    a.append_log("attempt 1 started");
    a.append_log("ünïcödé log line with \"quotes\"");
    exec.jobs.insert("a".to_string(), a);

    // Output that is itself null must stay distinguishable from no output.
    exec.jobs.insert(
        "null-output".to_string(),
        job("null-output", JobStatus::Completed, Some(Value::Null)),
    );

    let mut failed = job("b", JobStatus::Failed, None);
    failed.error = Some("CUDA out of memory: tried to allocate 2.00 GiB".to_string());
    exec.jobs.insert("b".to_string(), failed);
    exec.jobs
        .insert("c".to_string(), job("c", JobStatus::Pending, None));
    exec
}

#[test]
fn round_trip_preserves_unicode_quotes_and_nested_nulls() {
    let exec = awkward_execution();

    let value = to_value(&exec).unwrap();
    assert_eq!(deserialize(&value).unwrap(), exec);

    // And through text, as a store would persist it.
    let decls: Vec<JobDeclaration> = vec![JobDeclaration::new("a", "train")];
    let cp = Checkpoint::capture(&exec, &decls, CheckpointTrigger::Manual, "before eval").unwrap();
    let parsed = Checkpoint::from_json(&cp.to_json().unwrap()).unwrap();
    assert_eq!(parsed, cp);
    assert_eq!(parsed.restore().unwrap(), exec);
}

#[test]
fn validate_rejects_missing_jobs_and_accepts_serialized_state() {
    let exec = awkward_execution();
    let decls: Vec<JobDeclaration> = Vec::new();
    let cp = Checkpoint::capture(&exec, &decls, CheckpointTrigger::Periodic, "p").unwrap();
    assert!(validate(&cp));

    let raw: Value = serde_json::from_str(&cp.to_json().unwrap()).unwrap();
    assert!(validate_value(&raw));

    let mut broken = cp.clone();
    broken.state.as_object_mut().unwrap().remove("jobs");
    assert!(!validate(&broken));

    let mut raw_broken = raw.clone();
    raw_broken["state"].as_object_mut().unwrap().remove("jobs");
    assert!(!validate_value(&raw_broken));

    let mut bad_status = cp.clone();
    bad_status.state["jobs"][0]["value"]["status"] = json!("exploded");
    assert!(!validate(&bad_status));
}

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        // Binary fractions survive text round-trips exactly.
        (-1000i32..1000).prop_map(|n| json!(f64::from(n) / 8.0)),
        "\\PC{0,12}".prop_map(Value::String),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    json_leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            proptest::collection::btree_map("\\PC{0,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn status_strategy() -> impl Strategy<Value = JobStatus> {
    prop_oneof![
        Just(JobStatus::Pending),
        Just(JobStatus::Running),
        Just(JobStatus::Completed),
        Just(JobStatus::Failed),
    ]
}

proptest! {
    #[test]
    fn any_reachable_state_survives_a_text_round_trip(
        jobs in proptest::collection::vec(
            (status_strategy(), json_value(), proptest::collection::vec("\\PC{0,10}", 0..3)),
            0..6,
        )
    ) {
        let mut exec = DagExecution::new("prop");
        exec.status = DagStatus::Running;
        for (idx, (status, output, logs)) in jobs.into_iter().enumerate() {
            let id = format!("job-{idx}");
            let mut record = job(
                &id,
                status,
                (status == JobStatus::Completed).then_some(output),
            );
            if status == JobStatus::Failed {
                record.error = Some(format!("failure {idx} \"quoted\""));
            }
            record.logs = logs;
            exec.jobs.insert(id, record);
        }

        let decls: Vec<JobDeclaration> = Vec::new();
        let cp = Checkpoint::capture(&exec, &decls, CheckpointTrigger::Periodic, "prop").unwrap();
        let parsed = Checkpoint::from_json(&cp.to_json().unwrap()).unwrap();
        prop_assert!(validate(&parsed));
        prop_assert_eq!(parsed.restore().unwrap(), exec);
    }
}

#[tokio::test]
async fn resume_skips_completed_jobs_and_restarts_interrupted_ones() {
    init_tracing();

    let decls = vec![
        JobBuilder::new("prepare", "train").build(),
        JobBuilder::new("fit", "train").after("prepare").build(),
        JobBuilder::new("eval", "train").after("fit").build(),
    ];

    // State as a crash would leave it: prepare done, fit mid-flight.
    let mut exec = DagExecution::new("resume");
    exec.status = DagStatus::Running;
    exec.jobs.insert(
        "prepare".to_string(),
        job("prepare", JobStatus::Completed, Some(json!({ "rows": 10 }))),
    );
    exec.jobs
        .insert("fit".to_string(), job("fit", JobStatus::Running, None));
    exec.jobs
        .insert("eval".to_string(), job("eval", JobStatus::Pending, None));
    let cp = Checkpoint::capture(&exec, &decls, CheckpointTrigger::Periodic, "crash").unwrap();

    let probe = ConcurrencyProbe::new();
    let mut orchestrator = Orchestrator::default();
    orchestrator
        .register_handler("train", probe.ok_handler(Duration::from_millis(1)))
        .unwrap();

    let handle = orchestrator.resume(&cp, ExecuteOptions::default()).unwrap();
    assert_eq!(handle.execution_id(), exec.id);
    let resumed = with_timeout(handle.wait()).await.unwrap();

    assert_eq!(resumed.status, DagStatus::Completed);
    assert_eq!(
        probe.started(),
        vec![("fit".to_string(), 2), ("eval".to_string(), 1)]
    );
    assert_eq!(resumed.jobs["prepare"].output, Some(json!({ "rows": 10 })));
    assert!(
        resumed.jobs["fit"]
            .logs
            .iter()
            .any(|l| l.contains("reverted to pending"))
    );
}

#[test]
fn resume_rejects_invalid_checkpoints_before_running_anything() {
    let orchestrator = Orchestrator::default();
    let exec = awkward_execution();
    let decls: Vec<JobDeclaration> = Vec::new();
    let mut cp = Checkpoint::capture(&exec, &decls, CheckpointTrigger::Manual, "x").unwrap();
    cp.state.as_object_mut().unwrap().remove("jobs");

    let err = orchestrator
        .resume(&cp, ExecuteOptions::default())
        .unwrap_err();
    assert!(matches!(err, TunedagError::Checkpoint(_)), "got {err:?}");

    // Records without declarations cannot be scheduled.
    let cp = Checkpoint::capture(&exec, &decls, CheckpointTrigger::Manual, "x").unwrap();
    let err = orchestrator
        .resume(&cp, ExecuteOptions::default())
        .unwrap_err();
    assert!(matches!(err, TunedagError::Checkpoint(_)), "got {err:?}");
}

#[tokio::test]
async fn automatic_checkpoints_land_in_the_file_store() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path().join("checkpoints")));

    let probe = ConcurrencyProbe::new();
    let mut orchestrator = Orchestrator::default();
    orchestrator
        .register_handler("train", probe.ok_handler(Duration::from_millis(1)))
        .unwrap();

    let options = ExecuteOptions {
        checkpoint_every: Some(1),
        ..ExecuteOptions::default()
    }
    .with_checkpoint_store(store.clone());

    let jobs = vec![
        JobBuilder::new("a", "train").build(),
        JobBuilder::new("b", "train").after("a").build(),
    ];
    let exec = with_timeout(orchestrator.execute("stored", jobs, options))
        .await
        .unwrap();
    assert_eq!(exec.status, DagStatus::Completed);

    let all = store.list().unwrap();
    assert!(all.iter().any(|cp| cp.trigger == CheckpointTrigger::Periodic));

    let latest = store.latest_for(&exec.id).unwrap().unwrap();
    assert_eq!(latest.trigger, CheckpointTrigger::OnCompletion);
    assert_eq!(latest.restore().unwrap(), exec);
    assert_eq!(latest.declarations.len(), 2);
}

#[tokio::test]
async fn manual_checkpoint_captures_live_state() {
    init_tracing();

    let store = Arc::new(InMemoryCheckpointStore::new());
    let mut orchestrator = Orchestrator::default();
    orchestrator
        .register_handler("wait", |ctx: tunedag::exec::JobContext| async move {
            ctx.cancelled().await;
            Ok::<_, anyhow::Error>(json!({ "stopped": true }))
        })
        .unwrap();

    let handle = orchestrator
        .start(
            "manual",
            vec![JobBuilder::new("long", "wait").build()],
            ExecuteOptions::default().with_checkpoint_store(store.clone()),
        )
        .unwrap();

    let mut updates = handle.subscribe();
    with_timeout(updates.wait_for(|exec| {
        exec.job("long").is_some_and(|j| j.status == JobStatus::Running)
    }))
    .await
    .unwrap();

    let cp = with_timeout(handle.checkpoint("mid-run")).await.unwrap();
    assert_eq!(cp.trigger, CheckpointTrigger::Manual);
    assert_eq!(cp.label, "mid-run");
    assert_eq!(cp.execution_id, handle.execution_id());
    assert_eq!(
        cp.restore().unwrap().jobs["long"].status,
        JobStatus::Running
    );
    assert_eq!(store.load(&cp.id).unwrap(), cp);

    handle.cancel().await;
    let exec = with_timeout(handle.wait()).await.unwrap();
    assert_eq!(exec.status, DagStatus::Cancelled);
}

#[tokio::test]
async fn finished_checkpoints_are_refused_and_cancelled_ones_resume() {
    init_tracing();

    let decls = vec![
        JobBuilder::new("prepare", "train").build(),
        JobBuilder::new("fit", "train").after("prepare").build(),
        JobBuilder::new("eval", "train").after("fit").build(),
    ];

    let probe = ConcurrencyProbe::new();
    let mut orchestrator = Orchestrator::default();
    orchestrator
        .register_handler("train", probe.ok_handler(Duration::from_millis(1)))
        .unwrap();

    for status in [DagStatus::Completed, DagStatus::Failed] {
        let mut exec = DagExecution::new("finished");
        exec.status = status;
        exec.completed_at = Some(Utc::now());
        for id in ["prepare", "fit", "eval"] {
            let job_status = if status == DagStatus::Completed {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            };
            exec.jobs.insert(id.to_string(), job(id, job_status, None));
        }
        let cp = Checkpoint::capture(&exec, &decls, CheckpointTrigger::for_terminal(status).unwrap(), "end")
            .unwrap();

        let err = orchestrator
            .resume(&cp, ExecuteOptions::default())
            .err()
            .unwrap();
        assert!(
            matches!(&err, TunedagError::Checkpoint(msg) if msg.contains("nothing to resume")),
            "got {err:?}"
        );
    }
    assert!(probe.started().is_empty());

    let mut exec = DagExecution::new("stopped");
    exec.status = DagStatus::Cancelled;
    exec.completed_at = Some(Utc::now());
    exec.jobs.insert(
        "prepare".to_string(),
        job("prepare", JobStatus::Completed, Some(json!({ "rows": 10 }))),
    );
    exec.jobs
        .insert("fit".to_string(), job("fit", JobStatus::Pending, None));
    exec.jobs
        .insert("eval".to_string(), job("eval", JobStatus::Pending, None));
    let cp = Checkpoint::capture(&exec, &decls, CheckpointTrigger::OnCancel, "stopped").unwrap();

    let handle = orchestrator.resume(&cp, ExecuteOptions::default()).unwrap();
    let resumed = with_timeout(handle.wait()).await.unwrap();

    assert_eq!(resumed.status, DagStatus::Completed);
    assert_eq!(
        probe.started(),
        vec![("fit".to_string(), 1), ("eval".to_string(), 1)]
    );
}
