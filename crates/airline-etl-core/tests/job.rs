use std::sync::Arc;

use airline_etl_core::job::{InMemoryJobLedger, JobArgs, JobError, JobRun, JobStatus};
use serde_json::json;

#[tokio::test]
async fn commit_records_success_with_summary() {
    let ledger = Arc::new(InMemoryJobLedger::new());
    let args = JobArgs::new("flight-fact").with_argument("JOB_NAME", "flight-fact");

    let run = JobRun::init(ledger.clone(), &args).await.expect("init");
    let run_id = run.run_id();
    assert_eq!(run.job_name(), "flight-fact");

    let started = ledger.records();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].status, JobStatus::Running);
    assert_eq!(started[0].arguments, json!({ "JOB_NAME": "flight-fact" }));

    let record = run
        .commit(&json!({ "output_rows": 1 }))
        .await
        .expect("commit");
    assert_eq!(record.run_id, run_id);
    assert_eq!(record.status, JobStatus::Succeeded);

    let finished = ledger.records();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].status, JobStatus::Succeeded);
    assert_eq!(finished[0].summary, Some(json!({ "output_rows": 1 })));
    assert!(finished[0].finished_at >= Some(finished[0].started_at));
}

#[tokio::test]
async fn abort_records_failure_message() {
    let ledger = Arc::new(InMemoryJobLedger::new());
    let run = JobRun::init(ledger.clone(), &JobArgs::new("flight-fact"))
        .await
        .expect("init");

    run.abort("warehouse unreachable").await.expect("abort");

    let records = ledger.records();
    assert_eq!(records[0].status, JobStatus::Failed);
    assert_eq!(records[0].error.as_deref(), Some("warehouse unreachable"));
    assert!(records[0].summary.is_none());
}

#[tokio::test]
async fn dropped_run_stays_marked_running() {
    let ledger = Arc::new(InMemoryJobLedger::new());
    {
        let _run = JobRun::init(ledger.clone(), &JobArgs::new("flight-fact"))
            .await
            .expect("init");
    }

    let records = ledger.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, JobStatus::Running);
}

#[tokio::test]
async fn empty_job_name_is_rejected() {
    let ledger = Arc::new(InMemoryJobLedger::new());
    let err = JobRun::init(ledger.clone(), &JobArgs::new("  "))
        .await
        .expect_err("empty name");
    assert!(matches!(err, JobError::EmptyJobName));
    assert!(ledger.records().is_empty());
}
