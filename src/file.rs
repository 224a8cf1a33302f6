use std::fmt;
use std::path::Path;

use bytes::Bytes;
use uuid::Uuid;

use crate::BoxedAsyncRead;

/// A mutable file record, as handed over by the content-management
/// host.
///
/// Operations write their resulting state back into the record: the
/// upload family rewrites `hash` and `url`, deletion rewrites `url`.
#[derive(Debug, Default)]
pub struct UploadFile {
    /// Display name. `@` acts as a path separator within it.
    pub name: String,

    /// File extension, dot included (e.g. `.png`).
    pub ext: String,

    /// MIME type, applied as the blob's content type.
    pub mime: String,

    /// Uniquified storage name, refreshed by every upload.
    pub hash: String,

    /// Public URL of the blob.
    pub url: Option<String>,

    /// Content to persist, consumed by the upload.
    pub content: Option<FileContent>,
}

impl UploadFile {
    /// Creates a record whose content is an in-memory buffer.
    pub fn from_bytes(name: &str, ext: &str, mime: &str, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.to_string(),
            ext: ext.to_string(),
            mime: mime.to_string(),
            content: Some(FileContent::Buffer(content.into())),
            ..Self::default()
        }
    }

    /// Creates a record whose content is a stream of bytes.
    pub fn from_stream(name: &str, ext: &str, mime: &str, content: BoxedAsyncRead) -> Self {
        Self {
            name: name.to_string(),
            ext: ext.to_string(),
            mime: mime.to_string(),
            content: Some(FileContent::Stream(content)),
            ..Self::default()
        }
    }

    /// Rewrites the hash from the display name, appending a fresh
    /// random suffix so repeated uploads of the same name never
    /// collide.
    pub fn refresh_hash(&mut self) {
        let normalized = self.name.replace('@', "/");
        let path = Path::new(&normalized);
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let suffix = Uuid::new_v4().simple();

        self.hash = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                format!("{}/{}_{}", parent.display(), stem, suffix)
            }
            _ => format!("{}_{}", stem, suffix),
        };
    }
}

/// The content of a file, either fully buffered or streamed.
pub enum FileContent {
    Buffer(Bytes),
    Stream(BoxedAsyncRead),
}

impl FileContent {
    pub(crate) fn into_reader(self) -> BoxedAsyncRead {
        match self {
            Self::Buffer(bytes) => Box::pin(std::io::Cursor::new(bytes)),
            Self::Stream(reader) => reader,
        }
    }
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}
