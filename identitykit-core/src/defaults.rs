//! Well-known broker apps and default values.

/// Package name of the Company Portal broker app.
pub const COMPANY_PORTAL_PACKAGE: &str = "com.microsoft.windowsintune.companyportal";

/// Package name of the Authenticator broker app.
pub const AUTHENTICATOR_PACKAGE: &str = "com.azure.authenticator";

/// Package name of the Link To Windows broker app.
pub const LINK_TO_WINDOWS_PACKAGE: &str = "com.microsoft.appmanager";

/// Name of the blob holding the wrapped storage key.
pub const DEFAULT_KEY_FILE_NAME: &str = "adalks";

/// Alias of the keystore key pair that wraps the storage key.
pub const DEFAULT_KEYSTORE_ALIAS: &str = "AdalKey";

/// Lowest platform API level with a usable hardware keystore.
pub const DEFAULT_MIN_KEYSTORE_API_LEVEL: u32 = 18;

/// Bound service calls give up after this long.
pub const DEFAULT_BOUND_SERVICE_TIMEOUT_MS: u64 = 30_000;

/// `AccountManager` round trips give up after this long.
pub const DEFAULT_ACCOUNT_MANAGER_TIMEOUT_MS: u64 = 5_000;

/// Negotiated protocol versions are trusted for four hours.
pub const DEFAULT_HELLO_CACHE_TIMEOUT_MS: u64 = 4 * 60 * 60 * 1000;
