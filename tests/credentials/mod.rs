use dstore::Credentials;
use dstore::CredentialsEntry;
use dstore::CredentialsStore;

use crate::commons::mem_config;
use crate::commons::mem_store;

#[tokio::test]
async fn test_credentials_lifecycle() {
    let config = mem_config();
    let store = mem_store().await;
    let credentials = CredentialsStore::new(store.clone(), &config.credentials).unwrap();

    let entry = CredentialsEntry::new(Credentials::UsernamePassword {
        username: "deployer".to_string(),
        password: "p@ss".to_string(),
    })
    .with_description("deployment account")
    .updated_by("admin");
    credentials.set_credentials("DEPLOY", &entry).await.unwrap();
    credentials
        .set_credentials(
            "GITHUB",
            &CredentialsEntry::new(Credentials::Token {
                token: "ghp_secret".to_string(),
            }),
        )
        .await
        .unwrap();

    assert_eq!(
        credentials.get_credentials("DEPLOY").await.unwrap(),
        Some(entry)
    );

    let raw = store.get_prefix("secure.credentials.").await.unwrap();
    assert!(raw.values().all(|v| !v.contains("p@ss") && !v.contains("ghp_secret")));

    let all = credentials.get_all_credentials().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["GITHUB"].credentials.token(), Some("ghp_secret"));

    credentials.delete_credentials("DEPLOY").await.unwrap();
    assert_eq!(credentials.get_credentials("DEPLOY").await.unwrap(), None);
    assert!(store
        .get_prefix("secure.credentials.DEPLOY.")
        .await
        .unwrap()
        .is_empty());

    credentials.shutdown().await.unwrap();
    assert!(store.is_shutdown());
}
