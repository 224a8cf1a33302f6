//! Azure Blob Storage upload provider
//!
//! lets a content-management host delegate file persistence to Azure
//! Blob Storage: uploads rewrite the host's file record with a
//! uniquified name and a public URL, deletions address the same blob,
//! and reads go through short-lived signed URLs

// crate-specific lint exceptions:
//#![allow()]

mod azure;
mod config;
mod errors;
mod file;

pub use azure::AzureStorageProvider;
pub use config::{AuthMode, ProviderConfig, UploadOptions, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_BUFFERS};
pub use errors::{Error, Result};
pub use file::{FileContent, UploadFile};

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

/// A handle to a stream of bytes to upload.
///
/// Readers are `Sync` as well as `Send` so that a record holding one
/// can still be referenced from a spawned task.
pub type BoxedAsyncRead = Pin<Box<dyn AsyncRead + Send + Sync>>;

/// The operations a storage provider exposes to its host.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Uploads the file's content, rewriting the record's hash and
    /// URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the record has no content left or the
    /// service rejects the upload.
    async fn upload(&self, file: &mut UploadFile) -> Result<()>;

    /// Same as [`upload`](Self::upload): both accept buffered and
    /// streamed content.
    ///
    /// # Errors
    ///
    /// Returns an error if the record has no content left or the
    /// service rejects the upload.
    async fn upload_stream(&self, file: &mut UploadFile) -> Result<()>;

    /// Deletes the blob addressed by the record's current hash and
    /// rewrites the record's URL to the canonical blob URL.
    ///
    /// # Errors
    ///
    /// Returns the service's error verbatim, a missing blob included.
    async fn delete(&self, file: &mut UploadFile) -> Result<()>;

    /// Whether hosted files require a signed URL to be read.
    fn is_private(&self) -> bool;

    /// Returns a time-limited read-only URL for the record's blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature cannot be computed.
    async fn signed_url(&self, file: &UploadFile) -> Result<String>;
}
