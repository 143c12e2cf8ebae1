use std::path::Path;

use serde::{Deserialize, Serialize};

use kstore_client::ClientConfig;
use kstore_events::{BroadcasterConfig, SinkOptions};
use kstore_registry::RegistryConfig;
use kstore_storage::{KeyConfig, MemoryStorageConfig};

use crate::error::{SdkError, SdkResult};

pub const ENV_TENANT: &str = "KSTORE_TENANT";
pub const ENV_KEY_PREFIX: &str = "KSTORE_KEY_PREFIX";
pub const ENV_NAMESPACE: &str = "KSTORE_NAMESPACE";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `KSTORE_LOG` is unset, e.g. `info` or
    /// `kstore_client=debug,info`.
    pub level: String,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Persist recorded events to the store.
    pub enabled: bool,
    /// Source component stamped on events from the store's recorder.
    pub component: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            component: "kstore".to_string(),
        }
    }
}

/// Everything needed to open a [`Store`](crate::Store).
///
/// Every section is optional in TOML; missing values take their defaults.
///
/// ```toml
/// [keys]
/// prefix = "/registry"
/// tenant = "acme"
///
/// [broadcaster]
/// queue_capacity = 5000
///
/// [log]
/// level = "kstore_client=debug,info"
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub keys: KeyConfig,
    pub memory: MemoryStorageConfig,
    pub registry: RegistryConfig,
    pub client: ClientConfig,
    pub broadcaster: BroadcasterConfig,
    pub sink: SinkOptions,
    pub log: LogConfig,
    pub events: EventsConfig,
}

impl StoreConfig {
    pub fn from_toml_str(text: &str) -> SdkResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> SdkResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SdkError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Override key settings from `KSTORE_TENANT`, `KSTORE_KEY_PREFIX` and
    /// `KSTORE_NAMESPACE`.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// [`apply_env`](Self::apply_env) with an explicit variable source.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(tenant) = lookup(ENV_TENANT) {
            self.keys.tenant = if tenant.is_empty() { None } else { Some(tenant) };
        }
        if let Some(prefix) = lookup(ENV_KEY_PREFIX).filter(|p| !p.is_empty()) {
            self.keys.prefix = prefix;
        }
        if let Some(namespace) = lookup(ENV_NAMESPACE).filter(|n| !n.is_empty()) {
            self.keys.default_namespace = namespace.clone();
            self.client.default_namespace = Some(namespace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn defaults() {
        let c = StoreConfig::default();
        assert_eq!(c.keys.prefix, "/registry");
        assert!(c.keys.tenant.is_none());
        assert_eq!(c.broadcaster.queue_capacity, 1000);
        assert_eq!(c.sink.max_attempts, 3);
        assert_eq!(c.log.level, "info");
        assert!(c.events.enabled);
        assert_eq!(c.client.default_field_manager, "kstore");
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let c = StoreConfig::from_toml_str(
            r#"
            [keys]
            tenant = "acme"

            [broadcaster]
            queue_capacity = 10

            [sink]
            retry_interval_ms = 5
            dedup_window_secs = 30

            [events]
            component = "scheduler"
            "#,
        )
        .unwrap();
        assert_eq!(c.keys.tenant.as_deref(), Some("acme"));
        assert_eq!(c.keys.prefix, "/registry");
        assert_eq!(c.broadcaster.queue_capacity, 10);
        assert_eq!(c.sink.retry_interval(), Duration::from_millis(5));
        assert_eq!(c.sink.dedup_window(), Duration::from_secs(30));
        assert_eq!(c.sink.max_attempts, 3);
        assert_eq!(c.events.component, "scheduler");
        assert!(c.events.enabled);
    }

    #[test]
    fn sink_section_round_trips_as_plain_integers() {
        let mut config = StoreConfig::default();
        config.sink.dedup_window_secs = 30;
        config.sink.retry_interval_ms = 250;

        let text = toml::to_string(&config.sink).unwrap();
        assert!(text.contains("dedup_window_secs = 30"));
        assert!(text.contains("retry_interval_ms = 250"));

        let back = StoreConfig::from_toml_str(&format!("[sink]\n{text}")).unwrap();
        assert_eq!(back.sink, config.sink);
    }

    #[test]
    fn malformed_toml_is_a_bad_request() {
        let err = StoreConfig::from_toml_str("[keys\nprefix = 1").unwrap_err();
        assert!(matches!(err, SdkError::ConfigParse(_)));
        assert_eq!(err.kind(), kstore_types::ErrorKind::BadRequest);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[log]\nlevel = \"debug\"").unwrap();
        let c = StoreConfig::load(file.path()).unwrap();
        assert_eq!(c.log.level, "debug");

        let missing = file.path().with_extension("absent");
        assert!(matches!(
            StoreConfig::load(&missing),
            Err(SdkError::ConfigRead { .. })
        ));
    }

    #[test]
    fn env_overrides() {
        let vars = HashMap::from([
            (ENV_TENANT, "t1".to_string()),
            (ENV_KEY_PREFIX, "/kv".to_string()),
            (ENV_NAMESPACE, "team-a".to_string()),
        ]);
        let mut c = StoreConfig::default();
        c.apply_env_from(|name| vars.get(name).cloned());
        assert_eq!(c.keys.tenant.as_deref(), Some("t1"));
        assert_eq!(c.keys.prefix, "/kv");
        assert_eq!(c.keys.default_namespace, "team-a");
        assert_eq!(c.client.default_namespace.as_deref(), Some("team-a"));

        // An empty tenant clears it.
        c.apply_env_from(|name| (name == ENV_TENANT).then(String::new));
        assert!(c.keys.tenant.is_none());
        assert_eq!(c.keys.prefix, "/kv");
    }
}
