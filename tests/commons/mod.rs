use std::time::Duration;

use dstore::DynamicStatusStore;
use dstore::StoreConfig;

pub const ENCRYPTION_SECRET: &str = "integration-secret";

/// Environment variable naming a live etcd endpoint, e.g. `etcd:http://127.0.0.1:2379`
pub const ETCD_URI_ENV: &str = "DSS_TEST_ETCD_URI";

// Upper bound for any single watch delivery in these tests
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn mem_config() -> StoreConfig {
    let mut config = StoreConfig::default();
    config.backend.uri = "mem:".to_string();
    config.credentials.encryption_key = Some(ENCRYPTION_SECRET.to_string());
    config.validate().unwrap()
}

pub async fn mem_store() -> DynamicStatusStore {
    DynamicStatusStore::connect(&mem_config()).await.unwrap()
}
