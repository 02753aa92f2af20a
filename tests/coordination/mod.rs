use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dstore::DssAction;
use dstore::DssError;
use dstore::DynamicStatusStore;
use dstore::EventKind;
use dstore::RandomBackoff;
use dstore::RetryableUpdateProcessor;
use dstore::UpdateError;
use futures::future::join_all;
use tokio::time::timeout;

use crate::commons::mem_store;
use crate::commons::EVENT_TIMEOUT;

const SLOTS_USED: &str = "dss.framework.slots.used";
const SLOTS_MAX: u32 = 3;

/// Claims one run slot: bumps the counter and creates the run lease in one
/// transaction. `Ok(false)` when every slot is taken.
async fn claim_slot(
    store: &DynamicStatusStore,
    run: &str,
    worker: &str,
) -> Result<bool, UpdateError> {
    let used = store
        .get(SLOTS_USED)
        .await
        .map_err(store_failure)?
        .unwrap_or_else(|| "0".to_string());
    let used_count: u32 = used.parse().map_err(|_| UpdateError::failed("bad slot counter"))?;
    if used_count >= SLOTS_MAX {
        return Ok(false);
    }

    let actions = [
        DssAction::swap(SLOTS_USED, used, (used_count + 1).to_string()),
        DssAction::add(format!("dss.framework.run.{run}.lease"), worker),
        DssAction::update(format!("dss.framework.run.{run}.status"), "allocated"),
    ];
    match store.perform_actions(&actions).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_match_failure() => Err(UpdateError::Conflict(e.to_string())),
        Err(e) => Err(store_failure(e)),
    }
}

fn store_failure(e: DssError) -> UpdateError {
    UpdateError::Failed {
        message: e.to_string(),
        source: Some(Box::new(e)),
    }
}

fn fast_retries() -> RetryableUpdateProcessor {
    RetryableUpdateProcessor::default()
        .with_max_attempts(50)
        .with_backoff(Arc::new(RandomBackoff::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
        )))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workers_never_oversubscribe_slots() {
    let store = mem_store().await;
    store.put(SLOTS_USED, "0").await.unwrap();
    let mut leases = store.watch_prefix("dss.framework.run.").await.unwrap();

    let workers = (0..8).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            let run = format!("U{i}");
            let worker = format!("worker-{i}");
            let claimed = fast_retries()
                .run(|| claim_slot(&store, &run, &worker))
                .await
                .unwrap();
            (run, claimed)
        })
    });
    let results: Vec<(String, bool)> = join_all(workers)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let winners: HashSet<String> = results
        .into_iter()
        .filter(|(_, claimed)| *claimed)
        .map(|(run, _)| run)
        .collect();
    assert_eq!(winners.len(), SLOTS_MAX as usize);
    assert_eq!(store.get(SLOTS_USED).await.unwrap().as_deref(), Some("3"));

    let runs = store.get_prefix("dss.framework.run.").await.unwrap();
    assert_eq!(runs.len(), winners.len() * 2);
    for run in &winners {
        assert!(runs.contains_key(&format!("dss.framework.run.{run}.lease")));
    }

    // Every committed batch shows up as NEW events for the lease and status keys
    let mut seen = HashSet::new();
    for _ in 0..runs.len() {
        let event = timeout(EVENT_TIMEOUT, leases.recv()).await.unwrap().unwrap();
        assert_eq!(event.kind, EventKind::New);
        seen.insert(event.key);
    }
    assert_eq!(seen, runs.keys().cloned().collect::<HashSet<_>>());

    store.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lease_release_requires_current_owner() {
    let store = mem_store().await;
    store.put(SLOTS_USED, "1").await.unwrap();
    store
        .put("dss.framework.run.U1.lease", "worker-1")
        .await
        .unwrap();

    let stale_release = [
        DssAction::swap(SLOTS_USED, "1", "0"),
        DssAction::delete_if("dss.framework.run.U1.lease", "worker-2"),
    ];
    let err = store.perform_actions(&stale_release).await.unwrap_err();
    assert!(err.is_match_failure());
    assert_eq!(store.get(SLOTS_USED).await.unwrap().as_deref(), Some("1"));

    let release = [
        DssAction::swap(SLOTS_USED, "1", "0"),
        DssAction::delete_if("dss.framework.run.U1.lease", "worker-1"),
        DssAction::delete_prefix("dss.framework.run.U1."),
    ];
    store.perform_actions(&release).await.unwrap();
    assert_eq!(store.get(SLOTS_USED).await.unwrap().as_deref(), Some("0"));
    assert!(store
        .get_prefix("dss.framework.run.U1.")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_scoped_store_and_watch_lifecycle() {
    let store = mem_store().await;
    let framework = store.scoped("framework").unwrap();

    let mut status = framework.watch("run.U1.status").await.unwrap();
    framework.put("run.U1.status", "queued").await.unwrap();
    assert!(framework
        .put_swap("run.U1.status", Some("queued"), "running")
        .await
        .unwrap());
    framework.delete("run.U1.status").await.unwrap();

    let kinds: Vec<EventKind> = vec![
        status.recv().await.unwrap().kind,
        status.recv().await.unwrap().kind,
        status.recv().await.unwrap().kind,
    ];
    assert_eq!(
        kinds,
        vec![EventKind::New, EventKind::Modified, EventKind::Delete]
    );

    framework.unwatch(status.id());
    framework.unwatch(status.id());
    assert!(status.recv().await.is_none());
    assert_eq!(store.active_watches(), 0);

    store.shutdown().await.unwrap();
    assert!(framework.get("run.U1.status").await.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_metrics_reflect_activity() {
    let store = mem_store().await;
    store.put("metrics.k", "v").await.unwrap();
    let _ = store
        .perform_actions(&[DssAction::add("metrics.k", "again")])
        .await;

    let body = dstore::gather_metrics();
    assert!(body.contains("dss_operations_total{op=\"put\"}"));
    assert!(body.contains("dss_txn_match_failures_total"));
}
