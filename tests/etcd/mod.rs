//! Runs against a live etcd when `DSS_TEST_ETCD_URI` is set:
//!
//! ```text
//! DSS_TEST_ETCD_URI=etcd:http://127.0.0.1:2379 cargo test -- --ignored
//! ```

use dstore::BackendEndpoint;
use dstore::BackendError;
use dstore::Credentials;
use dstore::CredentialsEntry;
use dstore::CredentialsStore;
use dstore::DssAction;
use dstore::DynamicStatusStore;
use dstore::EtcdKvBackend;
use dstore::EventKind;
use dstore::KvBackend;
use dstore::StoreConfig;
use dstore::WatchTarget;
use tokio::time::timeout;

use crate::commons::ENCRYPTION_SECRET;
use crate::commons::ETCD_URI_ENV;
use crate::commons::EVENT_TIMEOUT;

async fn etcd_store() -> Option<DynamicStatusStore> {
    let uri = std::env::var(ETCD_URI_ENV).ok()?;
    let mut config = StoreConfig::default();
    config.backend.uri = uri;
    let config = config.validate().unwrap();
    Some(DynamicStatusStore::connect(&config).await.unwrap())
}

#[tokio::test]
#[ignore = "needs a live etcd, see DSS_TEST_ETCD_URI"]
async fn test_etcd_swap_batch_and_watch() {
    let Some(store) = etcd_store().await else {
        return;
    };
    let prefix = format!("dstore.it.{}.", unique_suffix());
    let key = format!("{prefix}status");

    let mut watch = store.watch(&key).await.unwrap();

    assert!(store.put_swap(&key, None, "v1").await.unwrap());
    assert!(!store.put_swap(&key, None, "other").await.unwrap());
    assert!(store.put_swap(&key, Some("v1"), "v2").await.unwrap());

    let err = store
        .perform_actions(&[
            DssAction::add(key.clone(), "dup"),
            DssAction::update(format!("{prefix}extra"), "x"),
        ])
        .await
        .unwrap_err();
    assert!(err.is_match_failure());
    assert_eq!(store.get(&format!("{prefix}extra")).await.unwrap(), None);

    store.delete(&key).await.unwrap();

    let mut kinds = Vec::new();
    for _ in 0..3 {
        let event = timeout(EVENT_TIMEOUT, watch.recv()).await.unwrap().unwrap();
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![EventKind::New, EventKind::Modified, EventKind::Delete]
    );

    store.delete_prefix(&prefix).await.unwrap();
    store.shutdown().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a live etcd, see DSS_TEST_ETCD_URI"]
async fn test_etcd_credentials_set_and_overwrite() {
    let Some(store) = etcd_store().await else {
        return;
    };
    let mut config = StoreConfig::default();
    config.credentials.namespace = format!("it{}", unique_suffix());
    config.credentials.encryption_key = Some(ENCRYPTION_SECRET.to_string());
    let credentials = CredentialsStore::new(store.clone(), &config.credentials).unwrap();

    let first = CredentialsEntry::new(Credentials::UsernamePassword {
        username: "deployer".to_string(),
        password: "p@ss".to_string(),
    })
    .with_description("deployment account");
    credentials.set_credentials("DEPLOY", &first).await.unwrap();
    assert_eq!(
        credentials.get_credentials("DEPLOY").await.unwrap(),
        Some(first)
    );

    let second = CredentialsEntry::new(Credentials::UsernameToken {
        username: "deployer".to_string(),
        token: "ghp_secret".to_string(),
    });
    credentials.set_credentials("DEPLOY", &second).await.unwrap();
    assert_eq!(
        credentials.get_credentials("DEPLOY").await.unwrap(),
        Some(second)
    );

    credentials.delete_credentials("DEPLOY").await.unwrap();
    assert_eq!(credentials.get_credentials("DEPLOY").await.unwrap(), None);
    store.shutdown().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a live etcd, see DSS_TEST_ETCD_URI"]
async fn test_etcd_backend_close_releases_clients() {
    let Ok(uri) = std::env::var(ETCD_URI_ENV) else {
        return;
    };
    let mut config = StoreConfig::default();
    config.backend.uri = uri;
    let BackendEndpoint::Etcd(endpoints) = config.backend.endpoint().unwrap() else {
        panic!("{ETCD_URI_ENV} must use the etcd: scheme");
    };

    let backend = EtcdKvBackend::connect(endpoints, &config.backend)
        .await
        .unwrap();
    backend.get("dstore.it.close").await.unwrap();

    backend.close().await.unwrap();
    backend.close().await.unwrap();
    assert!(matches!(
        backend.get("dstore.it.close").await,
        Err(BackendError::Closed)
    ));
    assert!(matches!(
        backend.watch(WatchTarget::Key("k".to_string())).await,
        Err(BackendError::Closed)
    ));
}

fn unique_suffix() -> String {
    format!(
        "{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    )
}
