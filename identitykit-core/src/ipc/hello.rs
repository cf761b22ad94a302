//! Protocol version negotiation with the broker, and its on-device cache.
//!
//! Every broker operation is preceded by a hello. The negotiated version (or
//! the fact that the broker rejected the handshake) is cached per target app
//! version, so the round trip happens once per broker install.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use super::{
    bundle::Bundle,
    error::BrokerError,
    operation::{BrokerOperationBundle, Operation},
    platform::PackageInspector,
    strategy::IpcStrategy,
};
use crate::{config::IpcSettings, platform::NameValueStore};

/// Protocol spoken between MSAL and the broker.
pub const MSAL_TO_BROKER_PROTOCOL_NAME: &str = "msal.to.broker";
/// Highest protocol version this client speaks.
pub const CLIENT_MAX_PROTOCOL_VERSION: &str = "14.0";

/// Request key: highest version the client speaks.
pub const CLIENT_ADVERTISED_MAXIMUM_BP_VERSION_KEY: &str = "broker.protocol.version.name";
/// Request key: lowest version the client accepts.
pub const CLIENT_CONFIGURED_MINIMUM_BP_VERSION_KEY: &str = "required.broker.protocol.version.name";
/// Response key: negotiated version.
pub const NEGOTIATED_BP_VERSION_KEY: &str = "common.broker.protocol.version.name";
/// Response key: error code.
pub const ERROR_KEY: &str = "error";
/// Response key: error description.
pub const ERROR_DESCRIPTION_KEY: &str = "error_description";

/// Name of the store backing [`HelloCache`].
pub const HELLO_CACHE_STORE_NAME: &str = "com.microsoft.common.ipc.hello.cache";

const HANDSHAKE_ERROR: &str = "handshake_error";
const SEPARATOR: char = ',';

/// What the client offers in a hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloRequest {
    /// Protocol name, e.g. [`MSAL_TO_BROKER_PROTOCOL_NAME`].
    pub protocol_name: String,
    /// Lowest acceptable version, if the app requires one.
    pub min_version: Option<String>,
    /// Highest version the client speaks.
    pub max_version: String,
}

impl HelloRequest {
    /// An MSAL-to-broker hello.
    #[must_use]
    pub fn msal(min_version: Option<String>) -> Self {
        Self {
            protocol_name: MSAL_TO_BROKER_PROTOCOL_NAME.to_string(),
            min_version,
            max_version: CLIENT_MAX_PROTOCOL_VERSION.to_string(),
        }
    }

    /// Request payload.
    #[must_use]
    pub fn to_bundle(&self) -> Bundle {
        let mut bundle =
            Bundle::new().with_string(CLIENT_ADVERTISED_MAXIMUM_BP_VERSION_KEY, &self.max_version);
        if let Some(min) = &self.min_version {
            bundle.put_string(CLIENT_CONFIGURED_MINIMUM_BP_VERSION_KEY, min);
        }
        bundle
    }
}

/// Reads the negotiated version out of a hello reply.
///
/// # Errors
///
/// - [`BrokerError::Remote`] if the broker answered with an error.
/// - [`BrokerError::UnsupportedBroker`] for a missing or unrecognized reply.
pub fn parse_hello_response(result: Option<&Bundle>) -> Result<String, BrokerError> {
    let Some(result) = result else {
        return Err(BrokerError::UnsupportedBroker(
            "broker returned no hello result".to_string(),
        ));
    };
    if let Some(version) = result.get_string(NEGOTIATED_BP_VERSION_KEY) {
        return Ok(version.to_string());
    }
    if let Some(code) = result.get_string(ERROR_KEY) {
        return Err(BrokerError::Remote {
            code: code.to_string(),
            description: result
                .get_string(ERROR_DESCRIPTION_KEY)
                .unwrap_or_default()
                .to_string(),
        });
    }
    Err(BrokerError::UnsupportedBroker(
        "hello result carries no negotiated protocol version".to_string(),
    ))
}

/// A cached hello outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelloCacheResult {
    /// The broker agreed on `version`.
    Negotiated {
        /// Negotiated protocol version.
        version: String,
        /// When the entry was written, in Unix milliseconds.
        timestamp_ms: u64,
    },
    /// The broker failed the handshake.
    Error {
        /// Error tag, `handshake_error` for rejected handshakes.
        error: String,
        /// When the entry was written, in Unix milliseconds.
        timestamp_ms: u64,
    },
}

impl HelloCacheResult {
    const fn timestamp_ms(&self) -> u64 {
        match self {
            Self::Negotiated { timestamp_ms, .. } | Self::Error { timestamp_ms, .. } => {
                *timestamp_ms
            }
        }
    }

    /// Whether this entry records a rejected handshake.
    #[must_use]
    pub fn is_handshake_error(&self) -> bool {
        matches!(self, Self::Error { error, .. } if error == HANDSHAKE_ERROR)
    }

    /// `S,<version>,<ts>` or `E,<error>,<ts>`.
    #[must_use]
    pub fn serialize(&self) -> String {
        match self {
            Self::Negotiated {
                version,
                timestamp_ms,
            } => format!("S{SEPARATOR}{version}{SEPARATOR}{timestamp_ms}"),
            Self::Error {
                error,
                timestamp_ms,
            } => format!("E{SEPARATOR}{error}{SEPARATOR}{timestamp_ms}"),
        }
    }

    /// Parses [`HelloCacheResult::serialize`] output. Returns `None` for
    /// legacy or corrupt values.
    #[must_use]
    pub fn deserialize(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.split(SEPARATOR).collect();
        let [kind, payload, timestamp] = parts.as_slice() else {
            tracing::warn!(value, "legacy or invalid hello cache entry");
            return None;
        };
        if payload.is_empty() {
            return None;
        }
        let timestamp_ms = timestamp.parse().ok()?;
        Some(if *kind == "E" {
            Self::Error {
                error: (*payload).to_string(),
                timestamp_ms,
            }
        } else {
            Self::Negotiated {
                version: (*payload).to_string(),
                timestamp_ms,
            }
        })
    }
}

/// Caches hello outcomes per protocol, client version range and installed
/// broker version.
pub struct HelloCache {
    store: Arc<dyn NameValueStore>,
    packages: Arc<dyn PackageInspector>,
    timeout_ms: u64,
    enabled: bool,
}

impl HelloCache {
    /// Creates a cache over `store`, which should be the store named
    /// [`HELLO_CACHE_STORE_NAME`].
    #[must_use]
    pub fn new(
        store: Arc<dyn NameValueStore>,
        packages: Arc<dyn PackageInspector>,
        settings: &IpcSettings,
    ) -> Self {
        Self {
            store,
            packages,
            timeout_ms: settings.hello_cache_timeout_ms,
            enabled: settings.hello_cache_enabled,
        }
    }

    /// `protocol[min,max]:package[versionCode]`, or `None` when the target
    /// app is not installed.
    fn key(&self, request: &HelloRequest, target_package: &str) -> Option<String> {
        let Some(version_code) = self.packages.version_code(target_package) else {
            tracing::error!(package = target_package, "target app not installed, not caching hello");
            return None;
        };
        Some(format!(
            "{}[{},{}]:{target_package}[{version_code}]",
            request.protocol_name,
            request.min_version.as_deref().unwrap_or("null"),
            request.max_version,
        ))
    }

    /// Cached outcome, if present and fresh. Stale or unreadable entries are
    /// removed.
    #[must_use]
    pub fn get(
        &self,
        request: &HelloRequest,
        target_package: &str,
        now_ms: u64,
    ) -> Option<HelloCacheResult> {
        if !self.enabled {
            tracing::info!("hello cache is not enabled");
            return None;
        }
        let key = self.key(request, target_package)?;
        let value = match self.store.get(key.clone()) {
            Ok(Some(value)) if !value.is_empty() => value,
            Ok(_) => return None,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read hello cache");
                return None;
            }
        };

        let Some(result) = HelloCacheResult::deserialize(&value) else {
            tracing::info!("legacy or invalid hello cache value");
            self.remove(key);
            return None;
        };
        if now_ms.saturating_sub(result.timestamp_ms()) > self.timeout_ms {
            tracing::info!("hello cache entry is expired");
            self.remove(key);
            return None;
        }
        Some(result)
    }

    /// Records a successful negotiation.
    pub fn save_negotiated_version(
        &self,
        request: &HelloRequest,
        target_package: &str,
        version: &str,
        now_ms: u64,
    ) {
        self.save(
            request,
            target_package,
            &HelloCacheResult::Negotiated {
                version: version.to_string(),
                timestamp_ms: now_ms,
            },
        );
    }

    /// Records a rejected handshake.
    pub fn save_handshake_error(&self, request: &HelloRequest, target_package: &str, now_ms: u64) {
        self.save(
            request,
            target_package,
            &HelloCacheResult::Error {
                error: HANDSHAKE_ERROR.to_string(),
                timestamp_ms: now_ms,
            },
        );
    }

    /// Drops every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be cleared.
    pub fn clear(&self) -> crate::error::StorageResult<()> {
        self.store.clear()
    }

    fn save(&self, request: &HelloRequest, target_package: &str, result: &HelloCacheResult) {
        if !self.enabled {
            return;
        }
        let Some(key) = self.key(request, target_package) else {
            return;
        };
        if let Err(err) = self.store.put(key, result.serialize()) {
            tracing::warn!(error = %err, "failed to write hello cache");
        }
    }

    fn remove(&self, key: String) {
        if let Err(err) = self.store.remove(key) {
            tracing::warn!(error = %err, "failed to remove hello cache entry");
        }
    }
}

/// Runs hellos through a transport, consulting the cache first.
pub struct HelloNegotiator {
    request: HelloRequest,
    cache: Option<HelloCache>,
}

impl HelloNegotiator {
    /// A negotiator without a cache.
    #[must_use]
    pub const fn new(request: HelloRequest) -> Self {
        Self {
            request,
            cache: None,
        }
    }

    /// Adds a cache.
    #[must_use]
    pub fn with_cache(mut self, cache: HelloCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The hello this negotiator sends.
    #[must_use]
    pub const fn request(&self) -> &HelloRequest {
        &self.request
    }

    /// Negotiates with `target_package` over `strategy`.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::Communication`] if the transport failed.
    /// - [`BrokerError::UnsupportedBroker`] if the broker rejected the
    ///   handshake now or on a cached earlier attempt.
    /// - [`BrokerError::Remote`] if the broker answered with an error.
    pub fn negotiate(
        &self,
        strategy: &dyn IpcStrategy,
        target_package: &str,
    ) -> Result<String, BrokerError> {
        self.negotiate_at(strategy, target_package, unix_now_ms())
    }

    /// [`HelloNegotiator::negotiate`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`HelloNegotiator::negotiate`].
    pub fn negotiate_at(
        &self,
        strategy: &dyn IpcStrategy,
        target_package: &str,
        now_ms: u64,
    ) -> Result<String, BrokerError> {
        if let Some(cached) = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(&self.request, target_package, now_ms))
        {
            match cached {
                HelloCacheResult::Negotiated { version, .. } => {
                    tracing::info!(version = %version, "using cached negotiated protocol version");
                    return Ok(version);
                }
                result if result.is_handshake_error() => {
                    return Err(BrokerError::UnsupportedBroker(
                        "broker rejected the handshake on an earlier attempt".to_string(),
                    ));
                }
                HelloCacheResult::Error { .. } => {}
            }
        }

        let bundle = BrokerOperationBundle::new(
            Operation::MsalHello,
            target_package,
            self.request.to_bundle(),
        );
        let reply = strategy.communicate_to_broker(&bundle)?;
        match parse_hello_response(reply.as_ref()) {
            Ok(version) => {
                if let Some(cache) = &self.cache {
                    cache.save_negotiated_version(&self.request, target_package, &version, now_ms);
                }
                Ok(version)
            }
            Err(err @ BrokerError::UnsupportedBroker(_)) => {
                if let Some(cache) = &self.cache {
                    cache.save_handshake_error(&self.request, target_package, now_ms);
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}
