// tests/end_to_end.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use tunedag::engine::{ExecuteOptions, LogCursor, Orchestrator};
use tunedag::exec::JobContext;
use tunedag::types::{CancelBehaviour, DagStatus, JobStatus};
use tunedag_test_utils::builders::JobBuilder;
use tunedag_test_utils::handlers::{ConcurrencyProbe, flaky};
use tunedag_test_utils::{init_tracing, with_timeout};

fn orchestrator_with(job_type: &str, handler: impl tunedag::exec::JobHandler + 'static) -> Orchestrator {
    let mut orchestrator = Orchestrator::default();
    orchestrator.register_handler(job_type, handler).unwrap();
    orchestrator
}

#[tokio::test]
async fn join_waits_for_three_roots_under_parallelism_two() {
    init_tracing();

    let probe = ConcurrencyProbe::new();
    let orchestrator = orchestrator_with("train", probe.ok_handler(Duration::from_millis(30)));

    let jobs = vec![
        JobBuilder::new("A", "train").build(),
        JobBuilder::new("B", "train").build(),
        JobBuilder::new("C", "train").build(),
        JobBuilder::new("D", "train").after("A").after("B").after("C").build(),
    ];

    let exec = with_timeout(orchestrator.execute(
        "abc-d",
        jobs,
        ExecuteOptions::default().with_parallelism(2),
    ))
    .await
    .unwrap();

    assert_eq!(exec.status, DagStatus::Completed);
    assert_eq!(probe.peak(), 2, "two roots should overlap, never three");

    let started = probe.started_ids();
    assert_eq!(started.len(), 4);
    assert_eq!(started.last().map(String::as_str), Some("D"));

    let d_started = exec.jobs["D"].started_at.unwrap();
    for root in ["A", "B", "C"] {
        let root = &exec.jobs[root];
        assert_eq!(root.status, JobStatus::Completed);
        assert!(root.completed_at.unwrap() <= d_started);
    }
    assert_eq!(exec.jobs["D"].output, Some(json!({ "job": "D" })));
}

#[tokio::test]
async fn flaky_job_is_retried_and_callbacks_fire() {
    init_tracing();

    let orchestrator = orchestrator_with("train", flaky(2));
    let completed = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::new(Mutex::new(Vec::new()));

    let options = {
        let completed = Arc::clone(&completed);
        let failed = Arc::clone(&failed);
        ExecuteOptions {
            max_attempts: 3,
            ..ExecuteOptions::default()
        }
        .on_job_complete(move |job| completed.lock().unwrap().push(job.job_id.clone()))
        .on_job_failed(move |job| failed.lock().unwrap().push((job.job_id.clone(), job.attempt)))
    };

    let exec = with_timeout(orchestrator.execute(
        "retry",
        vec![JobBuilder::new("fit", "train").build()],
        options,
    ))
    .await
    .unwrap();

    assert_eq!(exec.status, DagStatus::Completed);
    let fit = &exec.jobs["fit"];
    assert_eq!(fit.attempt, 3);
    assert_eq!(fit.output, Some(json!({ "attempt": 3 })));
    assert!(fit.error.is_none());

    assert_eq!(*completed.lock().unwrap(), vec!["fit".to_string()]);
    assert_eq!(
        *failed.lock().unwrap(),
        vec![("fit".to_string(), 1), ("fit".to_string(), 2)]
    );
}

#[tokio::test]
async fn exhausted_attempts_fail_the_job_and_its_dependents() {
    init_tracing();

    let orchestrator = orchestrator_with("train", flaky(5));
    let jobs = vec![
        JobBuilder::new("fit", "train").max_attempts(2).build(),
        JobBuilder::new("eval", "train").after("fit").build(),
        JobBuilder::new("other", "train").max_attempts(6).build(),
    ];

    let exec = with_timeout(orchestrator.execute("fail", jobs, ExecuteOptions::default()))
        .await
        .unwrap();

    assert_eq!(exec.status, DagStatus::Failed);
    assert_eq!(exec.jobs["fit"].status, JobStatus::Failed);
    assert_eq!(exec.jobs["fit"].attempt, 2);
    assert_eq!(
        exec.jobs["fit"].error.as_deref(),
        Some("transient failure on attempt 2")
    );

    let eval = &exec.jobs["eval"];
    assert_eq!(eval.status, JobStatus::Failed);
    assert_eq!(eval.attempt, 0);
    assert!(eval.error.as_deref().unwrap().contains("'fit'"));

    // "other" is independent and still ran to completion.
    assert_eq!(exec.jobs["other"].status, JobStatus::Completed);
    assert_eq!(exec.jobs["other"].attempt, 6);
}

#[tokio::test]
async fn identical_jobs_hit_the_cache() {
    init_tracing();

    let probe = ConcurrencyProbe::new();
    let orchestrator = orchestrator_with("train", probe.ok_handler(Duration::from_millis(5)));
    let jobs = vec![
        JobBuilder::new("first", "train").config("lr", json!(0.1)).build(),
        JobBuilder::new("again", "train")
            .config("lr", json!(0.1))
            .after("first")
            .build(),
    ];

    let exec = with_timeout(orchestrator.execute(
        "cache",
        jobs,
        ExecuteOptions::default().with_cache(true),
    ))
    .await
    .unwrap();

    assert_eq!(exec.status, DagStatus::Completed);
    assert_eq!(probe.started_ids(), vec!["first".to_string()]);
    assert_eq!(exec.jobs["again"].output, exec.jobs["first"].output);
    assert_eq!(exec.jobs["again"].attempt, 0);
}

#[tokio::test]
async fn handler_exceeding_its_timeout_fails_the_attempt() {
    init_tracing();

    let probe = ConcurrencyProbe::new();
    let orchestrator = orchestrator_with("train", probe.ok_handler(Duration::from_secs(3600)));
    let jobs = vec![JobBuilder::new("slow", "train").timeout("50ms").build()];

    let exec = with_timeout(orchestrator.execute("timeout", jobs, ExecuteOptions::default()))
        .await
        .unwrap();

    assert_eq!(exec.status, DagStatus::Failed);
    let error = exec.jobs["slow"].error.as_deref().unwrap();
    assert!(error.contains("timed out"), "unexpected error: {error}");
}

#[tokio::test]
async fn timed_out_handler_is_told_to_stop() {
    init_tracing();

    let stopped = Arc::new(AtomicBool::new(false));
    let orchestrator = orchestrator_with("train", {
        let stopped = stopped.clone();
        move |ctx: JobContext| {
            let stopped = stopped.clone();
            async move {
                tokio::select! {
                    _ = ctx.cancelled() => stopped.store(true, Ordering::SeqCst),
                    _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                }
                Ok::<_, anyhow::Error>(json!({}))
            }
        }
    });
    let jobs = vec![JobBuilder::new("slow", "train").timeout("50ms").build()];

    let exec = with_timeout(orchestrator.execute("timeout-cancel", jobs, ExecuteOptions::default()))
        .await
        .unwrap();
    assert_eq!(exec.status, DagStatus::Failed);

    with_timeout(async {
        while !stopped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn cancel_stops_dispatch_and_drains_cooperative_handlers() {
    init_tracing();

    let mut orchestrator = Orchestrator::default();
    orchestrator
        .register_handler("wait", |ctx: JobContext| async move {
            ctx.log("waiting for cancellation").await;
            ctx.cancelled().await;
            Err::<serde_json::Value, _>(anyhow::anyhow!("stopped by request"))
        })
        .unwrap();

    let jobs = vec![
        JobBuilder::new("long", "wait").build(),
        JobBuilder::new("next", "wait").after("long").build(),
    ];
    let handle = orchestrator
        .start("cancel", jobs, ExecuteOptions::default())
        .unwrap();

    let mut updates = handle.subscribe();
    with_timeout(updates.wait_for(|exec| {
        exec.job("long")
            .is_some_and(|j| j.logs.iter().any(|l| l == "waiting for cancellation"))
    }))
    .await
    .unwrap();

    handle.cancel().await;
    let exec = with_timeout(handle.wait()).await.unwrap();

    assert_eq!(exec.status, DagStatus::Cancelled);
    assert_eq!(exec.jobs["long"].status, JobStatus::Failed);
    assert_eq!(exec.jobs["long"].error.as_deref(), Some("stopped by request"));
    assert_eq!(exec.jobs["next"].attempt, 0, "pending job must never start");
}

#[tokio::test]
async fn abandon_finishes_without_waiting_for_handlers() {
    init_tracing();

    let probe = ConcurrencyProbe::new();
    let orchestrator = orchestrator_with("train", probe.ok_handler(Duration::from_secs(3600)));
    let options = ExecuteOptions {
        cancel_behaviour: CancelBehaviour::Abandon,
        ..ExecuteOptions::default()
    };
    let handle = orchestrator
        .start("abandon", vec![JobBuilder::new("stuck", "train").build()], options)
        .unwrap();

    let mut updates = handle.subscribe();
    with_timeout(updates.wait_for(|exec| exec.status == DagStatus::Running))
        .await
        .unwrap();

    handle.cancel().await;
    let exec = with_timeout(handle.wait()).await.unwrap();

    assert_eq!(exec.status, DagStatus::Cancelled);
    assert_eq!(
        exec.jobs["stuck"].error.as_deref(),
        Some("abandoned after cancellation")
    );
}

#[tokio::test]
async fn logs_stream_incrementally_and_status_reports_progress() {
    init_tracing();

    let mut orchestrator = Orchestrator::default();
    orchestrator
        .register_handler("talk", |ctx: JobContext| async move {
            for step in 0..3 {
                ctx.log(format!("step {step}")).await;
            }
            Ok::<_, anyhow::Error>(json!({ "loss": 0.1 }))
        })
        .unwrap();

    let handle = orchestrator
        .start(
            "logs",
            vec![JobBuilder::new("a", "talk").build()],
            ExecuteOptions::default(),
        )
        .unwrap();
    let execution_id = handle.execution_id().to_string();
    let exec = with_timeout(handle.wait()).await.unwrap();

    let mut cursor = LogCursor::new();
    let lines: Vec<&str> = cursor.poll_job(&exec, "a").iter().map(String::as_str).collect();
    assert_eq!(
        lines,
        vec![
            "attempt 1 started",
            "step 0",
            "step 1",
            "step 2",
            "attempt 1 completed"
        ]
    );
    assert!(cursor.poll(&exec).is_empty());

    let status = tunedag::engine::ExecutionStatus::from(&exec);
    assert_eq!(status.execution_id, execution_id);
    assert_eq!(status.progress, 100.0);
    assert!(status.root_cause.is_none());
}
