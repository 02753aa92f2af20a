use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::*;

fn fixed_backoff(
    delay: Duration,
    calls: usize,
) -> Arc<dyn BackoffCalculator> {
    let mut backoff = MockBackoffCalculator::new();
    backoff.expect_backoff_delay().times(calls).return_const(delay);
    Arc::new(backoff)
}

fn conflict() -> UpdateError {
    UpdateError::Conflict("Document update conflict".to_string())
}

#[tokio::test(start_paused = true)]
async fn test_success_first_time_does_not_wait() {
    let processor =
        RetryableUpdateProcessor::default().with_backoff(fixed_backoff(Duration::from_secs(1), 0));
    let start = Instant::now();

    let value = processor.run(|| async { Ok::<_, UpdateError>(42) }).await.unwrap();

    assert_eq!(value, 42);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_n_conflicts_then_success_sleeps_n_times() {
    let attempts = Arc::new(AtomicU32::new(0));
    let processor = RetryableUpdateProcessor::default()
        .with_backoff(fixed_backoff(Duration::from_millis(100), 3));
    let start = Instant::now();

    let result = processor
        .run(|| {
            let attempts = attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(conflict())
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(310));
}

#[tokio::test(start_paused = true)]
async fn test_constant_conflicts_exhaust_the_budget() {
    let attempts = Arc::new(AtomicU32::new(0));
    let processor = RetryableUpdateProcessor::default()
        .with_backoff(fixed_backoff(Duration::from_millis(1), 9));

    let err = processor
        .run(|| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(conflict())
            }
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), DEFAULT_MAX_ATTEMPTS);
    assert!(err
        .to_string()
        .contains("Update operation failed after 10 attempts, due to conflicts."));
    match err {
        UpdateError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 10);
            assert!(last.is_conflict());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_terminal_error_is_not_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let processor =
        RetryableUpdateProcessor::default().with_backoff(fixed_backoff(Duration::from_secs(1), 0));

    let err = processor
        .run(|| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(UpdateError::failed("document store returned 500"))
            }
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(err, UpdateError::Failed { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_custom_attempt_budget() {
    let processor = RetryableUpdateProcessor::default()
        .with_max_attempts(3)
        .with_backoff(fixed_backoff(Duration::from_millis(5), 2));

    let err = processor
        .run(|| async { Err::<(), _>(conflict()) })
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::RetriesExhausted { attempts: 3, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_backoff_aborts() {
    let token = CancellationToken::new();
    let processor = RetryableUpdateProcessor::default()
        .with_backoff(fixed_backoff(Duration::from_secs(60), 1))
        .with_cancellation(token.clone());
    let attempts = Arc::new(AtomicU32::new(0));

    let run = {
        let attempts = attempts.clone();
        async move {
            processor
                .run(|| {
                    let attempts = attempts.clone();
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(conflict())
                    }
                })
                .await
        }
    };
    let handle = tokio::spawn(run);

    tokio::time::sleep(Duration::from_secs(1)).await;
    token.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, UpdateError::Cancelled));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_processor_does_not_start() {
    let token = CancellationToken::new();
    token.cancel();
    let processor = RetryableUpdateProcessor::default().with_cancellation(token);

    let err = processor
        .run(|| async { Ok::<_, UpdateError>(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::Cancelled));
}

#[test]
fn test_default_backoff_stays_in_range() {
    let backoff = RandomBackoff::default();
    for _ in 0..100 {
        let delay = backoff.backoff_delay();
        assert!(delay >= Duration::from_millis(1000));
        assert!(delay < Duration::from_millis(4000));
    }
}

#[test]
fn test_degenerate_backoff_range() {
    let backoff = RandomBackoff::new(Duration::from_millis(5), Duration::from_millis(5));
    assert_eq!(backoff.backoff_delay(), Duration::from_millis(5));
}

#[test]
fn test_http_status_mapping() {
    assert!(UpdateError::from_http_status(201, "").is_ok());
    assert!(UpdateError::from_http_status(409, "conflict")
        .unwrap_err()
        .is_conflict());
    assert!(matches!(
        UpdateError::from_http_status(500, "boom"),
        Err(UpdateError::Failed { .. })
    ));
}

/// Revision-checked document, rejecting stale writes with HTTP 409
struct FakeDocument {
    revision: u64,
    body: Vec<String>,
}

impl FakeDocument {
    fn put(
        &mut self,
        revision: u64,
        body: Vec<String>,
    ) -> u16 {
        if revision != self.revision {
            return 409;
        }
        self.revision += 1;
        self.body = body;
        201
    }
}

#[tokio::test(start_paused = true)]
async fn test_read_modify_write_against_conflicting_writer() {
    let document = Arc::new(Mutex::new(FakeDocument {
        revision: 1,
        body: vec!["first".to_string()],
    }));
    let interference = Arc::new(AtomicU32::new(2));
    let processor = RetryableUpdateProcessor::default()
        .with_backoff(fixed_backoff(Duration::from_millis(10), 2));

    processor
        .run(|| {
            let document = document.clone();
            let interference = interference.clone();
            async move {
                let (revision, mut body) = {
                    let doc = document.lock();
                    (doc.revision, doc.body.clone())
                };
                // Another writer sneaks in between read and write
                if interference.load(Ordering::SeqCst) > 0 {
                    interference.fetch_sub(1, Ordering::SeqCst);
                    let mut doc = document.lock();
                    let current = doc.revision;
                    let other = doc.body.iter().cloned().chain(["other".to_string()]).collect();
                    doc.put(current, other);
                }
                body.push("mine".to_string());
                let status = document.lock().put(revision, body);
                UpdateError::from_http_status(status, "Document update conflict")
            }
        })
        .await
        .unwrap();

    let doc = document.lock();
    assert_eq!(doc.revision, 4);
    assert_eq!(doc.body, vec!["first", "other", "other", "mine"]);
}
