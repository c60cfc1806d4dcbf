//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton containing
//! runtime configuration values loaded from environment variables. It provides
//! thread-safe access and mutation for testing or overrides in runtime environments.

use std::env;
use std::sync::{OnceLock, RwLock};

/// Represents the complete application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_to_stdout: bool,
    /// Root directory for extraction trees and versioned report directories.
    pub storage_root: String,
    /// MOSS account id. Empty means "credentials not configured".
    pub moss_user_id: String,
    pub moss_server: String,
    pub moss_port: u16,
    /// Base URL of the chunked-RPC comparison service. Empty means unconfigured.
    pub jplag_base_url: String,
    pub jplag_username: String,
    pub jplag_password: String,
    /// Optional HTTP-CONNECT proxy for the socket engine. Empty host disables it.
    pub proxy_host: String,
    pub proxy_port: u16,
    /// Seconds between scheduler ticks, and between polls in wait mode.
    pub poll_interval_secs: u64,
    /// Minutes after which a non-terminal job with no updates is considered stuck.
    pub stale_after_minutes: i64,
}

/// Lazily-initialized, thread-safe singleton instance of `AppConfig`.
static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// This method is used internally to populate the singleton. Credentials
    /// default to empty strings so that missing credentials surface as job
    /// errors instead of startup panics.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            env: env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            project_name: env::var("PROJECT_NAME").unwrap_or_else(|_| "simscan".into()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "simscan.log".into()),
            log_to_stdout: env::var("LOG_TO_STDOUT").unwrap_or_else(|_| "true".into()) == "true",
            storage_root: env::var("STORAGE_ROOT").unwrap_or_else(|_| "data/simscan".into()),
            moss_user_id: env::var("MOSS_USER_ID").unwrap_or_default(),
            moss_server: env::var("MOSS_SERVER").unwrap_or_else(|_| "moss.stanford.edu".into()),
            moss_port: env::var("MOSS_PORT")
                .unwrap_or_else(|_| "7690".into())
                .parse()
                .unwrap_or(7690),
            jplag_base_url: env::var("JPLAG_BASE_URL").unwrap_or_default(),
            jplag_username: env::var("JPLAG_USERNAME").unwrap_or_default(),
            jplag_password: env::var("JPLAG_PASSWORD").unwrap_or_default(),
            proxy_host: env::var("PROXY_HOST").unwrap_or_default(),
            proxy_port: env::var("PROXY_PORT")
                .unwrap_or_else(|_| "3128".into())
                .parse()
                .unwrap_or(3128),
            poll_interval_secs: env::var("POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .unwrap_or(5),
            stale_after_minutes: env::var("STALE_AFTER_MINUTES")
                .unwrap_or_else(|_| "120".into())
                .parse()
                .unwrap_or(120),
        }
    }

    /// Returns a shared reference to the global configuration.
    ///
    /// # Panics
    /// Panics if the lock cannot be acquired.
    pub fn global() -> std::sync::RwLockReadGuard<'static, AppConfig> {
        CONFIG_INSTANCE
            .get_or_init(|| RwLock::new(AppConfig::from_env()))
            .read()
            .expect("Failed to acquire AppConfig read lock")
    }

    /// Resets the configuration by reloading from environment variables.
    ///
    /// Useful in tests to clear overrides.
    pub fn reset() {
        if let Some(lock) = CONFIG_INSTANCE.get() {
            let mut guard = lock.write().unwrap();
            *guard = AppConfig::from_env();
        }
    }

    /// Generic internal setter for any field in the config.
    ///
    /// Used by public per-field setter methods.
    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = lock
            .write()
            .expect("Failed to acquire AppConfig write lock");
        setter(&mut guard);
    }

    // --- Per-field setters below ---

    pub fn set_env(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.env = value.into());
    }

    pub fn set_log_level(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_level = value.into());
    }

    pub fn set_log_file(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_file = value.into());
    }

    pub fn set_log_to_stdout(value: bool) {
        AppConfig::set_field(|cfg| cfg.log_to_stdout = value);
    }

    pub fn set_storage_root(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.storage_root = value.into());
    }

    pub fn set_moss_user_id(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.moss_user_id = value.into());
    }

    pub fn set_moss_server(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.moss_server = value.into());
    }

    pub fn set_moss_port(value: u16) {
        AppConfig::set_field(|cfg| cfg.moss_port = value);
    }

    pub fn set_jplag_base_url(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.jplag_base_url = value.into());
    }

    pub fn set_jplag_username(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.jplag_username = value.into());
    }

    pub fn set_jplag_password(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.jplag_password = value.into());
    }

    pub fn set_proxy_host(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.proxy_host = value.into());
    }

    pub fn set_proxy_port(value: u16) {
        AppConfig::set_field(|cfg| cfg.proxy_port = value);
    }

    pub fn set_poll_interval_secs(value: u64) {
        AppConfig::set_field(|cfg| cfg.poll_interval_secs = value);
    }

    pub fn set_stale_after_minutes(value: i64) {
        AppConfig::set_field(|cfg| cfg.stale_after_minutes = value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_without_env() {
        AppConfig::reset();
        let cfg = AppConfig::global();
        assert_eq!(cfg.moss_server, "moss.stanford.edu");
        assert_eq!(cfg.moss_port, 7690);
        assert_eq!(cfg.poll_interval_secs, 5);
    }

    #[test]
    #[serial]
    fn setters_override_fields() {
        AppConfig::reset();
        AppConfig::set_moss_user_id("12345");
        AppConfig::set_poll_interval_secs(1);
        let cfg = AppConfig::global();
        assert_eq!(cfg.moss_user_id, "12345");
        assert_eq!(cfg.poll_interval_secs, 1);
    }
}
