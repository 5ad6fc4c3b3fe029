mod common;

use common::{camera, ScriptedBackend};
use rollcall_core::EnrollmentPhase;
use rollcall_engine::{EngineError, EnrollmentOptions, EnrollmentRunner};
use rollcall_hw::session::is_claimed;
use rollcall_hw::SyntheticSource;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn options() -> EnrollmentOptions {
    EnrollmentOptions {
        num_images: 20,
        interval: Duration::from_millis(300),
    }
}

#[tokio::test(start_paused = true)]
async fn test_enrollment_reaches_done_with_single_finalize() {
    let backend = Arc::new(ScriptedBackend::default());
    let cam = camera(&SyntheticSource::default(), "test:enroll-done");
    let runner = EnrollmentRunner::new(backend.clone(), cam, options());
    let snapshots = runner.subscribe();

    let report = runner.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.phase, EnrollmentPhase::Done);
    assert_eq!(report.session_id.as_deref(), Some("enr-1"));
    assert_eq!(report.captured, 20);
    assert_eq!(backend.submissions.load(Ordering::SeqCst), 20);
    assert_eq!(backend.finalizes.load(Ordering::SeqCst), 1);
    assert!(!is_claimed("test:enroll-done"));

    let last = snapshots.borrow().clone();
    assert_eq!(last.phase, EnrollmentPhase::Done);
    assert_eq!(last.current, 20);
    assert_eq!(last.fraction, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_backend_quota_replaces_requested_count() {
    let backend = Arc::new(ScriptedBackend {
        quota: 5,
        ..ScriptedBackend::default()
    });
    let cam = camera(&SyntheticSource::default(), "test:enroll-quota");
    let report = EnrollmentRunner::new(backend.clone(), cam, options())
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.phase, EnrollmentPhase::Done);
    assert_eq!(report.target, 5);
    assert_eq!(backend.submissions.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn test_abort_mid_capture_releases_everything() {
    let backend = Arc::new(ScriptedBackend::default());
    let cam = camera(&SyntheticSource::default(), "test:enroll-abort");
    let abort = CancellationToken::new();
    let task = tokio::spawn(EnrollmentRunner::new(backend.clone(), cam, options()).run(abort.clone()));

    tokio::time::sleep(Duration::from_millis(1000)).await;
    abort.cancel();
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.phase, EnrollmentPhase::Aborted);
    let submitted = backend.submissions.load(Ordering::SeqCst);
    assert!(submitted >= 3 && submitted < 20, "submitted {submitted}");
    assert_eq!(backend.finalizes.load(Ordering::SeqCst), 0);
    assert!(!is_claimed("test:enroll-abort"));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(backend.submissions.load(Ordering::SeqCst), submitted);
}

#[tokio::test(start_paused = true)]
async fn test_finalize_failure_is_terminal() {
    let backend = Arc::new(ScriptedBackend {
        quota: 3,
        finalize_ok: false,
        ..ScriptedBackend::default()
    });
    let cam = camera(&SyntheticSource::default(), "test:enroll-finalize-fail");
    let runner = EnrollmentRunner::new(backend.clone(), cam, options());
    let snapshots = runner.subscribe();

    let err = runner.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::Finalize(ref reason) if reason == "not enough usable frames"));
    assert_eq!(backend.finalizes.load(Ordering::SeqCst), 1);
    assert_eq!(snapshots.borrow().phase, EnrollmentPhase::Errored);
    assert!(!is_claimed("test:enroll-finalize-fail"));
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_releases_camera() {
    let backend = Arc::new(ScriptedBackend {
        fail_start: true,
        ..ScriptedBackend::default()
    });
    let cam = camera(&SyntheticSource::default(), "test:enroll-start-fail");
    let runner = EnrollmentRunner::new(backend.clone(), cam, options());
    let snapshots = runner.subscribe();

    let err = runner.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::Backend(_)));
    assert_eq!(snapshots.borrow().phase, EnrollmentPhase::Errored);
    assert_eq!(backend.submissions.load(Ordering::SeqCst), 0);
    assert!(!is_claimed("test:enroll-start-fail"));
}

#[tokio::test(start_paused = true)]
async fn test_track_ending_fails_session() {
    let backend = Arc::new(ScriptedBackend::default());
    let source = SyntheticSource::default().ending_after(4);
    let cam = camera(&source, "test:enroll-track-end");

    let err = EnrollmentRunner::new(backend.clone(), cam, options())
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::CaptureLost(_)));
    assert_eq!(backend.submissions.load(Ordering::SeqCst), 4);
    assert_eq!(backend.finalizes.load(Ordering::SeqCst), 0);
    assert!(!is_claimed("test:enroll-track-end"));
}

#[tokio::test(start_paused = true)]
async fn test_warmup_frames_are_not_submitted() {
    let backend = Arc::new(ScriptedBackend {
        quota: 3,
        ..ScriptedBackend::default()
    });
    let source = SyntheticSource::default().with_warmup(2);
    let cam = camera(&source, "test:enroll-warmup");

    let report = EnrollmentRunner::new(backend.clone(), cam, options())
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.phase, EnrollmentPhase::Done);
    assert_eq!(report.stats.started, 5);
    assert_eq!(backend.submissions.load(Ordering::SeqCst), 3);
    assert_eq!(source.grabs(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_token_surfaces_unauthorized() {
    let backend = Arc::new(ScriptedBackend {
        reject_token: true,
        ..ScriptedBackend::default()
    });
    let cam = camera(&SyntheticSource::default(), "test:enroll-401");
    let runner = EnrollmentRunner::new(backend.clone(), cam, options());
    let snapshots = runner.subscribe();

    let err = runner.run(CancellationToken::new()).await.unwrap_err();

    assert!(err.is_unauthorized(), "got {err:?}");
    assert_eq!(backend.submit_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.finalizes.load(Ordering::SeqCst), 0);
    assert_eq!(snapshots.borrow().phase, EnrollmentPhase::Errored);
    assert!(!is_claimed("test:enroll-401"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_upload_is_retried_next_tick() {
    let backend = Arc::new(ScriptedBackend {
        quota: 5,
        fail_submit: vec![2, 3],
        ..ScriptedBackend::default()
    });
    let cam = camera(&SyntheticSource::default(), "test:enroll-retry");

    let report = EnrollmentRunner::new(backend.clone(), cam, options())
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.phase, EnrollmentPhase::Done);
    assert_eq!(report.captured, 5);
    assert_eq!(backend.submit_calls.load(Ordering::SeqCst), 7);
    assert_eq!(backend.submissions.load(Ordering::SeqCst), 5);
    assert_eq!(backend.finalizes.load(Ordering::SeqCst), 1);
    assert!(!is_claimed("test:enroll-retry"));
}
