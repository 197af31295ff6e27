//! Integration tests for batch scheduling, checkpointing, resume and cancellation

use crate::support::{self, fast_policy, ScriptedProvider};
use outlet_facility_analyzer::analysis::{BatchScheduler, SchedulerError};
use outlet_facility_analyzer::config::EscalationTrigger;
use outlet_facility_analyzer::fetcher::AttemptErrorType;
use outlet_facility_analyzer::resume::{
    compute_fingerprint, ProgressState, ResumeError, ResumeMode, ResumeOutcome, RunLock,
};
use outlet_facility_analyzer::shutdown::SharedShutdown;
use outlet_facility_analyzer::{FacilityCategory, Outlet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const MATERIAL: &str = "escalation=never;";

fn scheduler(
    provider: Arc<ScriptedProvider>,
    shutdown: SharedShutdown,
    progress: &Path,
    workers: usize,
) -> BatchScheduler {
    let client = support::client(provider, 2, fast_policy(2, 4), shutdown.clone());
    BatchScheduler::new(Arc::new(support::aggregator(client, EscalationTrigger::Never)))
        .with_progress_file(progress)
        .with_shutdown(shutdown)
        .with_workers(workers)
}

fn load(path: &Path, outlets: &[Outlet]) -> (ProgressState, ResumeOutcome) {
    let fingerprint = compute_fingerprint(outlets, MATERIAL);
    ProgressState::load_or_fresh(path, &fingerprint, ResumeMode::On).unwrap()
}

#[tokio::test]
async fn test_full_run_checkpoints_every_outlet() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("progress.json");
    let outlets = support::outlets(6);
    let provider = Arc::new(ScriptedProvider::constant(1));

    let (state, outcome) = load(&progress, &outlets);
    assert_eq!(outcome, ResumeOutcome::Fresh);

    let batch = scheduler(provider.clone(), support::shutdown(), &progress, 3)
        .run(&outlets, state)
        .await
        .unwrap();

    assert!(!batch.cancelled);
    assert_eq!(batch.counts.dispatched, 6);
    assert_eq!(batch.counts.complete, 6);
    assert_eq!(batch.state.completed_count(), 6);
    assert_eq!(provider.call_count(), 6 * 9);

    let reloaded = ProgressState::load(&progress).unwrap();
    assert_eq!(reloaded.completed_count(), 6);
    assert_eq!(reloaded.result("OUT-003").unwrap().star_rating, 5);
}

#[tokio::test]
async fn test_resume_dispatches_only_pending_outlets() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("progress.json");
    let outlets = support::outlets(5);
    let fingerprint = compute_fingerprint(&outlets, MATERIAL);

    // A previous run that got through the first two outlets
    let first = Arc::new(ScriptedProvider::constant(1));
    scheduler(first, support::shutdown(), &progress, 1)
        .run(&outlets[..2], ProgressState::new(fingerprint.clone()))
        .await
        .unwrap();

    let (state, outcome) = load(&progress, &outlets);
    assert_eq!(outcome, ResumeOutcome::Resumed { completed: 2 });

    let second = Arc::new(ScriptedProvider::constant(1));
    let batch = scheduler(second.clone(), support::shutdown(), &progress, 2)
        .run(&outlets, state)
        .await
        .unwrap();

    assert_eq!(batch.counts.already_completed, 2);
    assert_eq!(batch.counts.dispatched, 3);
    assert_eq!(second.call_count(), 3 * 9);
    assert_eq!(batch.state.completed_count(), 5);
}

#[tokio::test]
async fn test_duplicate_ids_are_analyzed_once() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("progress.json");
    let mut outlets = support::outlets(3);
    outlets.push(support::outlet(1));
    let provider = Arc::new(ScriptedProvider::constant(0));

    let (state, _) = load(&progress, &outlets);
    let batch = scheduler(provider.clone(), support::shutdown(), &progress, 2)
        .run(&outlets, state)
        .await
        .unwrap();

    assert_eq!(batch.counts.duplicates, 1);
    assert_eq!(batch.counts.dispatched, 3);
    assert_eq!(batch.state.completed_count(), 3);
    assert_eq!(provider.call_count(), 3 * 9);
}

#[tokio::test]
async fn test_failed_outlets_are_recorded_and_not_retried_on_resume() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("progress.json");
    let outlets = support::outlets(2);
    let provider = Arc::new(ScriptedProvider::new(|_, _| Err(AttemptErrorType::InvalidQuery)));

    let (state, _) = load(&progress, &outlets);
    let batch = scheduler(provider, support::shutdown(), &progress, 2)
        .run(&outlets, state)
        .await
        .unwrap();
    assert_eq!(batch.counts.failed, 2);

    let (state, outcome) = load(&progress, &outlets);
    assert_eq!(outcome, ResumeOutcome::Resumed { completed: 2 });
    let again = Arc::new(ScriptedProvider::constant(1));
    let batch = scheduler(again.clone(), support::shutdown(), &progress, 2)
        .run(&outlets, state)
        .await
        .unwrap();
    assert_eq!(batch.counts.dispatched, 0);
    assert_eq!(again.call_count(), 0);
}

#[tokio::test]
async fn test_cancellation_leaves_interrupted_outlet_pending() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("progress.json");
    let outlets = support::outlets(5);
    let shutdown = support::shutdown();

    let target = outlets[2].clone();
    let trigger = shutdown.clone();
    let provider = Arc::new(ScriptedProvider::new(move |_, query| {
        if support::targets(query, &target) && query.category() == FacilityCategory::Culinary {
            trigger.request_shutdown("test");
            return Err(AttemptErrorType::ServerError(503));
        }
        Ok(1)
    }));

    let (state, _) = load(&progress, &outlets);
    let batch = scheduler(provider, shutdown, &progress, 1)
        .run(&outlets, state)
        .await
        .unwrap();

    assert!(batch.cancelled);
    assert_eq!(batch.counts.complete, 2);
    assert_eq!(batch.counts.interrupted, 1);
    assert_eq!(batch.counts.dispatched, 3);
    assert!(!batch.state.is_completed(&outlets[2].id));

    let saved = ProgressState::load(&progress).unwrap();
    assert_eq!(saved.completed_count(), 2);
    assert!(saved.result(&outlets[2].id).is_none());

    // The next run picks up the remaining three
    let (state, outcome) = load(&progress, &outlets);
    assert_eq!(outcome, ResumeOutcome::Resumed { completed: 2 });
    let resumed = Arc::new(ScriptedProvider::constant(1));
    let batch = scheduler(resumed.clone(), support::shutdown(), &progress, 2)
        .run(&outlets, state)
        .await
        .unwrap();
    assert!(!batch.cancelled);
    assert_eq!(batch.counts.dispatched, 3);
    assert_eq!(batch.state.completed_count(), 5);
}

#[tokio::test]
async fn test_failed_save_aborts_run_and_keeps_earlier_checkpoints() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("progress.json");
    let outlets = support::outlets(4);

    // Once the third outlet is queried, the save lock path becomes a
    // directory, so that outlet's checkpoint cannot be written
    let target = outlets[2].clone();
    let blocker = progress.with_extension("lock");
    let provider = Arc::new(ScriptedProvider::new(move |_, query| {
        if support::targets(query, &target) {
            let _ = std::fs::remove_file(&blocker);
            let _ = std::fs::create_dir_all(&blocker);
        }
        Ok(1)
    }));

    let (state, _) = load(&progress, &outlets);
    let err = scheduler(provider, support::shutdown(), &progress, 1)
        .run(&outlets, state)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Progress(_)));

    std::fs::remove_dir(progress.with_extension("lock")).unwrap();
    let saved = ProgressState::load(&progress).unwrap();
    assert_eq!(saved.completed_count(), 2);
    assert!(saved.is_completed(&outlets[0].id));
    assert!(saved.is_completed(&outlets[1].id));
    assert!(!saved.is_completed(&outlets[2].id));
}

#[tokio::test]
async fn test_aborted_run_stops_in_flight_analyses() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("progress.json");
    let outlets = support::outlets(2);

    // The second outlet keeps retrying while the first one finishes and
    // fails to checkpoint
    let slow = outlets[1].clone();
    let provider = Arc::new(
        ScriptedProvider::new(move |_, query| {
            if support::targets(query, &slow) {
                Err(AttemptErrorType::ServerError(503))
            } else {
                Ok(1)
            }
        })
        .with_delay(Duration::from_millis(5)),
    );

    let (state, _) = load(&progress, &outlets);
    std::fs::create_dir_all(progress.with_extension("lock")).unwrap();
    let err = scheduler(provider.clone(), support::shutdown(), &progress, 2)
        .run(&outlets, state)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Progress(_)));

    let calls_at_abort = provider.call_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(provider.call_count(), calls_at_abort);
    assert!(calls_at_abort < 9 + 9 * 4);
}

#[tokio::test]
async fn test_cancelled_before_start_dispatches_nothing() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("progress.json");
    let outlets = support::outlets(3);
    let shutdown = support::shutdown();
    shutdown.request_shutdown("test");
    let provider = Arc::new(ScriptedProvider::constant(1));

    let (state, _) = load(&progress, &outlets);
    let batch = scheduler(provider.clone(), shutdown, &progress, 2)
        .run(&outlets, state)
        .await
        .unwrap();

    assert!(batch.cancelled);
    assert_eq!(batch.counts.dispatched, 0);
    assert_eq!(provider.call_count(), 0);
    assert!(progress.exists());
}

#[tokio::test]
async fn test_second_run_on_same_progress_file_is_refused() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("progress.json");
    let outlets = support::outlets(1);

    let mut held = RunLock::open(&progress).unwrap();
    let _guard = held.try_exclusive().unwrap();

    let (state, _) = load(&progress, &outlets);
    let err = scheduler(Arc::new(ScriptedProvider::constant(1)), support::shutdown(), &progress, 1)
        .run(&outlets, state)
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::Progress(ResumeError::LockError(_))));
}

#[tokio::test]
async fn test_changed_outlet_list_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("progress.json");
    let outlets = support::outlets(2);

    let (state, _) = load(&progress, &outlets);
    scheduler(Arc::new(ScriptedProvider::constant(1)), support::shutdown(), &progress, 1)
        .run(&outlets, state)
        .await
        .unwrap();

    let (state, outcome) = load(&progress, &support::outlets(3));
    assert_eq!(outcome, ResumeOutcome::FingerprintChanged);
    assert_eq!(state.completed_count(), 0);
}
