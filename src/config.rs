use std::fmt::{self, Display};
use std::str::FromStr;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::{AzureStorageProvider, Error, Result, StorageProvider};

/// Default streaming chunk size, in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Default bound on concurrent chunk uploads.
pub const DEFAULT_MAX_BUFFERS: usize = 20;

/// The provider configuration, as supplied by the content-management
/// host.
///
/// All keys are free text: defaults and fallbacks are applied during
/// resolution, not at parse time. Keys deserialize under their host
/// names (camelCase) and accept snake_case aliases so that they can
/// also be set through environment variables.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Authentication mode: `default` (shared key or SAS) or `msi`
    /// (ambient managed identity). Anything else fails resolution.
    #[serde(alias = "auth_type")]
    pub auth_type: Option<String>,

    /// User-assigned identity for `msi` authentication.
    #[serde(alias = "client_id")]
    pub client_id: Option<String>,

    /// Storage account name.
    pub account: Option<String>,

    /// Shared key for `default` authentication.
    #[serde(alias = "account_key")]
    pub account_key: Option<String>,

    /// SAS token. When present under `default` authentication it wins
    /// over the shared key.
    #[serde(alias = "sas_token")]
    pub sas_token: Option<String>,

    /// Service endpoint override, e.g. for an emulator.
    #[serde(rename = "serviceBaseURL", alias = "service_base_url")]
    pub service_base_url: Option<String>,

    /// Target container.
    #[serde(alias = "container_name")]
    pub container_name: Option<String>,

    /// Key prefix inside the container.
    #[serde(alias = "default_path")]
    pub default_path: Option<String>,

    /// The literal `"true"` enables container auto-creation.
    #[serde(alias = "create_container_if_not_exist")]
    pub create_container_if_not_exist: Option<String>,

    /// Public access level for auto-created containers: only the exact
    /// values `"container"` and `"blob"` are forwarded, anything else
    /// means private.
    #[serde(alias = "public_access_type")]
    pub public_access_type: Option<String>,

    /// CDN prefix substituted into public URLs.
    #[serde(rename = "cdnBaseURL", alias = "cdn_base_url")]
    pub cdn_base_url: Option<String>,

    /// `Cache-Control` value applied to uploaded blobs.
    #[serde(alias = "default_cache_control")]
    pub default_cache_control: Option<String>,

    /// The literal `"true"` strips the container-name segment from
    /// public URLs.
    #[serde(rename = "removeCN", alias = "remove_cn")]
    pub remove_cn: Option<String>,

    /// Streaming tuning.
    #[serde(alias = "upload_options")]
    pub upload_options: UploadOptions,
}

impl ProviderConfig {
    /// Name of the default configuration file.
    pub const DEFAULT_FILENAME: &'static str = "azure-storage.toml";

    /// Prefix for environment-variable overrides.
    pub const ENV_PREFIX: &'static str = "AZURE_STORAGE_";

    /// Loads the configuration by merging the default configuration
    /// file, when present, with environment-variable overrides, the
    /// latter taking precedence.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the merged layers cannot be
    /// deserialized.
    pub fn load() -> Result<Self> {
        Figment::new()
            .merge(Toml::file(Self::DEFAULT_FILENAME))
            .merge(Env::prefixed(Self::ENV_PREFIX))
            .extract()
            .map_err(|err| Error::Configuration(err.to_string()))
    }

    /// Parses a configuration from its TOML representation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the TOML cannot be
    /// deserialized.
    pub fn from_toml(toml: &str) -> Result<Self> {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(|err| Error::Configuration(err.to_string()))
    }

    /// Instantiates the provider described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the authentication type is
    /// unknown or the streaming tuning values cannot be used.
    pub fn instantiate(&self) -> Result<Box<dyn StorageProvider + Send + Sync>> {
        Ok(Box::new(AzureStorageProvider::new(self)?))
    }

    /// Trims every value and applies defaults, yielding a
    /// configuration ready to build clients from.
    pub(crate) fn resolve(&self) -> Result<ResolvedConfig> {
        let auth: AuthMode = trimmed(&self.auth_type).parse()?;
        let account = trimmed(&self.account);
        let service_base_url = match trimmed(&self.service_base_url) {
            url if url.is_empty() => format!("https://{}.blob.core.windows.net", account),
            url => url,
        };

        if self.upload_options.buffer_size == 0 {
            return Err(Error::Configuration(
                "uploadOptions.bufferSize must be greater than zero".to_string(),
            ));
        }

        if self.upload_options.max_buffers == 0 {
            return Err(Error::Configuration(
                "uploadOptions.maxBuffers must be greater than zero".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            auth,
            client_id: trimmed(&self.client_id),
            account,
            account_key: trimmed(&self.account_key),
            sas_token: trimmed(&self.sas_token),
            service_base_url,
            container_name: trimmed(&self.container_name),
            default_path: trimmed(&self.default_path),
            create_container: trimmed(&self.create_container_if_not_exist) == "true",
            public_access_type: trimmed(&self.public_access_type),
            cdn_base_url: trimmed(&self.cdn_base_url),
            default_cache_control: trimmed(&self.default_cache_control),
            remove_cn: trimmed(&self.remove_cn) == "true",
            buffer_size: self.upload_options.buffer_size,
            max_buffers: self.upload_options.max_buffers,
        })
    }
}

/// Streaming tuning knobs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadOptions {
    /// Chunk size for block uploads, in bytes.
    #[serde(alias = "buffer_size")]
    pub buffer_size: usize,

    /// Bound on concurrent chunk uploads.
    #[serde(alias = "max_buffers")]
    pub max_buffers: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_buffers: DEFAULT_MAX_BUFFERS,
        }
    }
}

/// The authentication mode, parsed from the host's `authType` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Shared-key or SAS-token authentication.
    Default,

    /// Ambient managed identity.
    ManagedIdentity,
}

impl FromStr for AuthMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(Self::Default),
            "msi" => Ok(Self::ManagedIdentity),
            other => Err(Error::Configuration(format!(
                "unknown authentication type `{}`: expected `default` or `msi`",
                other
            ))),
        }
    }
}

impl Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::ManagedIdentity => write!(f, "msi"),
        }
    }
}

/// Whitespace-trimmed configuration with defaults applied.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub(crate) auth: AuthMode,
    pub(crate) client_id: String,
    pub(crate) account: String,
    pub(crate) account_key: String,
    pub(crate) sas_token: String,
    pub(crate) service_base_url: String,
    pub(crate) container_name: String,
    pub(crate) default_path: String,
    pub(crate) create_container: bool,
    pub(crate) public_access_type: String,
    pub(crate) cdn_base_url: String,
    pub(crate) default_cache_control: String,
    pub(crate) remove_cn: bool,
    pub(crate) buffer_size: usize,
    pub(crate) max_buffers: usize,
}

fn trimmed(value: &Option<String>) -> String {
    value.as_deref().unwrap_or_default().trim().to_string()
}
