use std::fmt::{self, Display};
use std::sync::Arc;

use async_trait::async_trait;
use azure_identity::{DefaultAzureCredential, ImdsManagedIdentityCredential};
use azure_storage::prelude::*;
use azure_storage::shared_access_signature::service_sas::BlobSasPermissions;
use azure_storage::CloudLocation;
use azure_storage_blobs::prelude::*;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use time::{Duration, OffsetDateTime};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::config::ResolvedConfig;
use crate::{AuthMode, BoxedAsyncRead, Error, ProviderConfig, Result, StorageProvider, UploadFile};

/// How long signed URLs remain valid.
const SIGNED_URL_VALIDITY: Duration = Duration::milliseconds(86_400);

/// A storage provider backed by Azure Blob Storage.
pub struct AzureStorageProvider {
    config: ResolvedConfig,
    container: ContainerClient,
}

impl AzureStorageProvider {
    /// Instantiates a new provider from the specified configuration.
    ///
    /// The service client is built once and shared by all operations;
    /// only signed-URL generation constructs fresh credentials.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the authentication type is
    /// unknown or the streaming tuning values cannot be used.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let config = config.resolve()?;
        let credentials = credentials(&config)?;
        let container = container_client(&config, credentials);

        info!(
            "created azure blob storage provider for account `{}`, container `{}`",
            config.account, config.container_name
        );

        Ok(Self { config, container })
    }

    async fn put_file(&self, file: &mut UploadFile) -> Result<()> {
        file.refresh_hash();

        self.ensure_container().await?;

        let key = self.blob_key(file);
        let blob = self.container.blob_client(key.clone());

        // The host reads the URL off the record as soon as the call
        // returns, so it is written before the bytes move.
        file.url = Some(self.public_url(blob.url()?.as_str()));

        let reader = file
            .content
            .take()
            .ok_or_else(|| Error::NoContent(file.name.clone()))?
            .into_reader();

        debug!("uploading blob `{}` ({})", key, file.mime);

        let block_list = self.put_blocks(&blob, reader).await?;

        self.commit_blocks(&blob, block_list, &file.mime).await
    }

    /// Stages the content as uncommitted blocks, reading one chunk at
    /// a time and keeping at most `max_buffers` uploads in flight.
    async fn put_blocks(&self, blob: &BlobClient, mut reader: BoxedAsyncRead) -> Result<BlockList> {
        let mut blocks = Vec::new();
        let mut staged = FuturesUnordered::new();
        let mut ordinal = 0_usize;

        loop {
            let chunk = read_chunk(&mut reader, self.config.buffer_size).await?;

            if chunk.is_empty() {
                break;
            }

            let block_id = azure_core::base64::encode(format!("{:08}", ordinal));
            blocks.push(BlobBlockType::new_uncommitted(block_id.clone()));
            staged.push(blob.put_block(block_id, chunk).into_future());
            ordinal += 1;

            if staged.len() >= self.config.max_buffers {
                if let Some(response) = staged.next().await {
                    response?;
                }
            }
        }

        while let Some(response) = staged.next().await {
            response?;
        }

        Ok(BlockList { blocks })
    }

    async fn commit_blocks(
        &self,
        blob: &BlobClient,
        block_list: BlockList,
        mime: &str,
    ) -> Result<()> {
        blob.put_block_list(block_list)
            .content_type(mime.to_string())
            .await?;

        // Set Blob Properties clears every header it is not given, so
        // the content type rides along with the cache control.
        if !self.config.default_cache_control.is_empty() {
            blob.set_properties()
                .content_type(mime.to_string())
                .cache_control(self.config.default_cache_control.clone())
                .await?;
        }

        Ok(())
    }

    async fn delete_blob(&self, file: &mut UploadFile) -> Result<()> {
        let key = self.blob_key(file);
        let blob = self.container.blob_client(key.clone());

        debug!("deleting blob `{}`", key);

        blob.delete().await?;

        // Canonical URL, never the CDN form.
        file.url = Some(blob.url()?.to_string());

        Ok(())
    }

    async fn make_signed_url(&self, file: &UploadFile) -> Result<String> {
        let key = self.blob_key(file);

        // Signing always goes through the shared key, independently of
        // how the shared client authenticates. Under managed identity
        // the key is typically empty and the produced URL cannot
        // verify.
        let credentials = StorageCredentials::access_key(
            self.config.account.clone(),
            self.config.account_key.clone(),
        );
        let blob = container_client(&self.config, credentials).blob_client(key.clone());

        let permissions = BlobSasPermissions {
            read: true,
            ..Default::default()
        };
        let expiry = OffsetDateTime::now_utc() + SIGNED_URL_VALIDITY;

        debug!("signing read-only url for blob `{}`", key);

        let signature = blob.shared_access_signature(permissions, expiry).await?;
        let url = blob.generate_signed_blob_url(&signature)?;

        Ok(url.to_string())
    }

    /// Ensures the target container exists when auto-creation is
    /// enabled. Losing the creation race to a concurrent creator is
    /// not an error.
    async fn ensure_container(&self) -> Result<()> {
        if !self.config.create_container {
            return Ok(());
        }

        if self.container.exists().await? {
            return Ok(());
        }

        info!("creating container `{}`", self.config.container_name);

        let mut create = self.container.create();

        if let Some(access) = public_access_level(&self.config.public_access_type) {
            create = create.public_access(access);
        }

        match create.await {
            Ok(_) => Ok(()),
            Err(err) if is_container_already_exists(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn blob_key(&self, file: &UploadFile) -> String {
        format!("{}/{}{}", self.config.default_path, file.hash, file.ext)
    }

    /// Rewrites a blob URL into its public form: the CDN prefix
    /// replaces the service base URL when configured, and the
    /// container-name segment is collapsed when so requested.
    fn public_url(&self, blob_url: &str) -> String {
        let mut url = if self.config.cdn_base_url.is_empty() {
            blob_url.to_string()
        } else if let Some(rest) = blob_url.strip_prefix(&self.config.service_base_url) {
            format!("{}{}", self.config.cdn_base_url, rest)
        } else {
            blob_url.to_string()
        };

        if self.config.remove_cn {
            url = url.replacen(&format!("/{}/", self.config.container_name), "/", 1);
        }

        url
    }
}

#[async_trait]
impl StorageProvider for AzureStorageProvider {
    async fn upload(&self, file: &mut UploadFile) -> Result<()> {
        self.put_file(file).await
    }

    async fn upload_stream(&self, file: &mut UploadFile) -> Result<()> {
        self.put_file(file).await
    }

    async fn delete(&self, file: &mut UploadFile) -> Result<()> {
        self.delete_blob(file).await
    }

    fn is_private(&self) -> bool {
        true
    }

    async fn signed_url(&self, file: &UploadFile) -> Result<String> {
        self.make_signed_url(file).await
    }
}

impl Display for AzureStorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Azure Blob Storage (account: {}, container: {}, path: {})",
            self.config.account, self.config.container_name, self.config.default_path
        )
    }
}

impl fmt::Debug for AzureStorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureStorageProvider")
            .field("account", &self.config.account)
            .field("container", &self.config.container_name)
            .finish()
    }
}

/// Builds the credentials mandated by the resolved configuration,
/// first matching rule wins.
fn credentials(config: &ResolvedConfig) -> Result<StorageCredentials> {
    match config.auth {
        AuthMode::Default if !config.sas_token.is_empty() => {
            // The SDK wants the token without the leading `?` some
            // portals include when handing it out.
            let token = config.sas_token.trim_start_matches('?');

            Ok(StorageCredentials::sas_token(token)?)
        }
        AuthMode::Default => Ok(StorageCredentials::access_key(
            config.account.clone(),
            config.account_key.clone(),
        )),
        AuthMode::ManagedIdentity if !config.client_id.is_empty() => {
            let credential =
                ImdsManagedIdentityCredential::default().with_client_id(config.client_id.clone());

            Ok(StorageCredentials::token_credential(Arc::new(credential)))
        }
        AuthMode::ManagedIdentity => Ok(StorageCredentials::token_credential(Arc::new(
            DefaultAzureCredential::default(),
        ))),
    }
}

fn container_client(config: &ResolvedConfig, credentials: StorageCredentials) -> ContainerClient {
    let location = CloudLocation::Custom {
        account: config.account.clone(),
        uri: config.service_base_url.clone(),
    };

    ClientBuilder::with_location(location, credentials)
        .container_client(config.container_name.clone())
}

fn public_access_level(tag: &str) -> Option<PublicAccess> {
    match tag {
        "container" => Some(PublicAccess::Container),
        "blob" => Some(PublicAccess::Blob),
        _ => None,
    }
}

fn is_container_already_exists(err: &azure_core::error::Error) -> bool {
    err.as_http_error()
        .map_or(false, |http| http.error_code() == Some("ContainerAlreadyExists"))
}

async fn read_chunk(reader: &mut BoxedAsyncRead, size: usize) -> Result<Bytes> {
    let mut chunk = vec![0_u8; size];
    let mut filled = 0;

    while filled < size {
        let read = reader.read(&mut chunk[filled..]).await?;

        if read == 0 {
            break;
        }

        filled += read;
    }

    chunk.truncate(filled);

    Ok(Bytes::from(chunk))
}
