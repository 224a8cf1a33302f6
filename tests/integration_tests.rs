//! Integration tests for the Azure Blob Storage provider.
//!
//! Tests that need a live endpoint target the Azurite emulator and are
//! marked `#[ignore]`:
//!
//! ```text
//! azurite --silent &
//! cargo test -- --ignored
//! ```

use azure_upload_provider::{Error, ProviderConfig, StorageProvider, UploadFile};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

/// Well-known development-storage key, as shipped with Azurite.
const AZURITE_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

const AZURITE_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

fn azurite_config() -> ProviderConfig {
    ProviderConfig {
        auth_type: Some("default".to_string()),
        account: Some("devstoreaccount1".to_string()),
        account_key: Some(AZURITE_ACCOUNT_KEY.to_string()),
        service_base_url: Some(AZURITE_BLOB_ENDPOINT.to_string()),
        container_name: Some(format!("assets-{}", uuid::Uuid::new_v4().simple())),
        default_path: Some("uploads".to_string()),
        create_container_if_not_exist: Some("true".to_string()),
        ..ProviderConfig::default()
    }
}

#[test]
fn test_instantiate_from_toml() {
    let config = ProviderConfig::from_toml(
        r#"
        authType = "default"
        account = "acct"
        accountKey = "c2VjcmV0"
        containerName = "assets"
        defaultPath = "uploads"
        "#,
    )
    .unwrap();

    let provider = config.instantiate().unwrap();

    assert!(provider.is_private());
}

#[test]
fn test_instantiate_rejects_unknown_auth_type() {
    let config = ProviderConfig::from_toml(r#"authType = "managed""#).unwrap();

    match config.instantiate() {
        Err(Error::Configuration(message)) => assert!(message.contains("managed")),
        Err(other) => panic!("expected a configuration error, got: {}", other),
        Ok(_) => panic!("expected a configuration error"),
    }
}

#[tokio::test]
async fn test_signed_url_shape() {
    let config = ProviderConfig::from_toml(
        r#"
        authType = "default"
        account = "acct"
        accountKey = "c2VjcmV0"
        containerName = "assets"
        defaultPath = "uploads"
        "#,
    )
    .unwrap();
    let provider = config.instantiate().unwrap();

    let mut file = UploadFile::from_bytes("photo.png", ".png", "image/png", "payload");
    file.refresh_hash();

    let url = provider.signed_url(&file).await.unwrap();

    assert!(url.starts_with("https://acct.blob.core.windows.net/assets/uploads/photo_"));
    assert!(url.contains(".png?"));
    assert!(url.contains("sp=r"));
    assert!(url.contains("sig="));

    // The signing window is 86,400 milliseconds, not seconds.
    let expiry = url
        .split_once('?')
        .and_then(|(_, query)| query.split('&').find_map(|pair| pair.strip_prefix("se=")))
        .expect("signed url carries an expiry");
    let expiry = OffsetDateTime::parse(&expiry.replace("%3A", ":"), &Rfc3339).unwrap();
    let validity = expiry - OffsetDateTime::now_utc();

    assert!(validity > Duration::seconds(60));
    assert!(validity < Duration::seconds(300));
}

#[tokio::test]
async fn test_signing_runs_on_spawned_tasks() {
    let config = ProviderConfig::from_toml(
        r#"
        authType = "default"
        account = "acct"
        accountKey = "c2VjcmV0"
        containerName = "assets"
        defaultPath = "uploads"
        "#,
    )
    .unwrap();
    let provider = config.instantiate().unwrap();

    let handle = tokio::spawn(async move {
        let mut file = UploadFile::from_bytes("photo.png", ".png", "image/png", "payload");
        file.refresh_hash();

        provider.signed_url(&file).await
    });

    assert!(handle.await.unwrap().is_ok());
}

// Needs a running Azurite instance.
#[ignore]
#[tokio::test]
async fn test_azurite_upload_and_delete() {
    let provider = azurite_config().instantiate().unwrap();

    let mut file = UploadFile::from_bytes("photo.png", ".png", "image/png", "some content");

    provider.upload(&mut file).await.unwrap();

    assert!(file.hash.starts_with("photo_"));

    let url = file.url.clone().unwrap();

    assert!(url.starts_with(AZURITE_BLOB_ENDPOINT));
    assert!(url.contains("/uploads/photo_"));

    provider.delete(&mut file).await.unwrap();

    // The blob is gone: deleting it again surfaces the service error.
    assert!(provider.delete(&mut file).await.is_err());
}

// Needs a running Azurite instance.
#[ignore]
#[tokio::test]
async fn test_azurite_streamed_upload_in_chunks() {
    let mut config = azurite_config();
    config.upload_options.buffer_size = 1024;
    config.upload_options.max_buffers = 2;

    let provider = config.instantiate().unwrap();

    let payload = vec![7_u8; 10 * 1024];
    let mut file = UploadFile::from_stream(
        "dump.bin",
        ".bin",
        "application/octet-stream",
        Box::pin(std::io::Cursor::new(payload)),
    );

    provider.upload_stream(&mut file).await.unwrap();

    assert!(file.url.is_some());

    provider.delete(&mut file).await.unwrap();
}

// Needs a running Azurite instance.
#[ignore]
#[tokio::test]
async fn test_azurite_upload_twice_never_collides() {
    let provider = azurite_config().instantiate().unwrap();

    let mut first = UploadFile::from_bytes("photo.png", ".png", "image/png", "first");
    let mut second = UploadFile::from_bytes("photo.png", ".png", "image/png", "second");

    provider.upload(&mut first).await.unwrap();
    provider.upload(&mut second).await.unwrap();

    assert_ne!(first.hash, second.hash);
    assert_ne!(first.url, second.url);

    provider.delete(&mut first).await.unwrap();
    provider.delete(&mut second).await.unwrap();
}
