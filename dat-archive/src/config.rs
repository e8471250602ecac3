//! Configuration for archive sessions.

use std::{env, path::Path, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::manifest::ManifestMode;

/// Overrides [`Config::timeout_ms`], in milliseconds.
pub const ENV_TIMEOUT: &str = "DAT_ARCHIVE_TIMEOUT";
/// Overrides [`Config::networked`].
pub const ENV_NETWORKED: &str = "DAT_ARCHIVE_NETWORKED";

/// The default deadline of every operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Session configuration.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Deadline for operations which do not carry their own, `0` waits forever.
    pub timeout_ms: u64,
    /// Whether sessions join the network when they open.
    pub networked: bool,
    /// How `configure` writes the manifest.
    pub manifest: ManifestMode,
    /// Name resolution.
    pub dns: DnsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            networked: true,
            manifest: ManifestMode::default(),
            dns: DnsConfig::default(),
        }
    }
}

/// Configuration of the [`crate::dns::DnsResolver`].
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DnsConfig {
    /// Try `https://<name>/.well-known/dat` before DNS TXT records.
    pub well_known: bool,
    /// How long resolved names are cached when the answer carries no TTL.
    pub cache_ttl_secs: u64,
    /// Deadline of a single lookup.
    pub lookup_timeout_ms: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            well_known: true,
            cache_ttl_secs: 3600,
            lookup_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Loads the configuration.
    ///
    /// If *file* is `Some` it is parsed as TOML, otherwise the defaults are used. Environment
    /// overrides are applied on top in both cases.
    pub async fn load(file: Option<&Path>) -> Result<Config> {
        let mut config = match file {
            Some(file) => {
                let text = tokio::fs::read_to_string(file)
                    .await
                    .with_context(|| format!("reading config file {}", file.display()))?;
                Self::load_toml(&text)?
            }
            None => Self::default(),
        };

        // override from env vars
        if let Some(timeout) = env_var::<u64>(ENV_TIMEOUT).transpose()? {
            config.timeout_ms = timeout;
        }
        if let Some(networked) = env_var::<bool>(ENV_NETWORKED).transpose()? {
            config.networked = networked;
        }
        Ok(config)
    }

    fn load_toml(s: &str) -> Result<Config> {
        let config = toml::from_str(s)?;
        Ok(config)
    }

    /// The default operation deadline, `None` if disabled.
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl DnsConfig {
    pub(crate) fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub(crate) fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

/// Parses an environment variable. Returns `None` if not present.
fn env_var<T>(name: &str) -> Option<Result<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(s) => Some(
            s.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {name}: {s:?}")),
        ),
        Err(e) => match e {
            env::VarError::NotPresent => None,
            e @ env::VarError::NotUnicode(_) => Some(Err(e.into())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::load_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.timeout(), Some(Duration::from_secs(5)));
        assert!(config.networked);
        assert_eq!(config.manifest, ManifestMode::Merge);
    }

    #[test]
    fn test_parse_config() {
        let config = Config::load_toml(
            r#"
            timeout_ms = 0
            networked = false
            manifest = "replace"

            [dns]
            well_known = false
            cache_ttl_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.timeout(), None);
        assert!(!config.networked);
        assert_eq!(config.manifest, ManifestMode::Replace);
        assert!(!config.dns.well_known);
        assert_eq!(config.dns.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.dns.lookup_timeout_ms, 5000);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(Config::load_toml("timeout = 10").is_err());
        assert!(Config::load_toml("[dns]\nttl = 10").is_err());
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dat-archive.toml");
        std::fs::write(&path, "networked = false\n").unwrap();
        let config = Config::load(Some(&path)).await.unwrap();
        assert!(!config.networked);

        let missing = dir.path().join("missing.toml");
        assert!(Config::load(Some(&missing)).await.is_err());
    }
}
