//! Resolving archive names to keys.
//!
//! A name is either a key already, a `dat://` locator carrying a key, or a domain name. Domain
//! names are looked up via `https://<name>/.well-known/dat` first and DNS TXT records second.

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context};
use dat_archive_base::{key::ArchiveKey, locator::ArchiveLocator, locator::Host};
use futures::future::BoxFuture;
use hickory_resolver::{AsyncResolver, TokioAsyncResolver};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{config::DnsConfig, error::ArchiveError, error::Result};

/// The prefix of TXT records carrying an archive key.
pub const TXT_PREFIX: &str = "datkey=";

/// Path of the well-known document naming an archive.
pub const WELL_KNOWN_PATH: &str = "/.well-known/dat";

/// Resolves names to [`ArchiveKey`]s.
pub trait NameResolver: fmt::Debug + Send + Sync + 'static {
    /// Resolves `name`.
    ///
    /// Fails with [`ArchiveError::NameNotResolved`] if the name does not map to a key.
    fn resolve_name(&self, name: &str) -> BoxFuture<'_, Result<ArchiveKey>>;
}

impl<T: NameResolver> NameResolver for Arc<T> {
    fn resolve_name(&self, name: &str) -> BoxFuture<'_, Result<ArchiveKey>> {
        self.as_ref().resolve_name(name)
    }
}

/// The name part of `name`, or its key if it carries one.
fn parse_name(name: &str) -> Result<Host> {
    let locator = ArchiveLocator::from_str(name).map_err(|err| ArchiveError::NameNotResolved {
        name: name.to_string(),
        reason: err.to_string(),
    })?;
    Ok(locator.host().clone())
}

/// Resolver backed by in-memory entries.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    names: HashMap<String, ArchiveKey>,
}

impl StaticResolver {
    /// Creates an empty resolver. It still resolves literal keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `name` to `key`.
    pub fn with(mut self, name: impl Into<String>, key: ArchiveKey) -> Self {
        self.insert(name, key);
        self
    }

    /// Maps `name` to `key`.
    pub fn insert(&mut self, name: impl Into<String>, key: ArchiveKey) {
        self.names.insert(name.into().to_ascii_lowercase(), key);
    }
}

impl NameResolver for StaticResolver {
    fn resolve_name(&self, name: &str) -> BoxFuture<'_, Result<ArchiveKey>> {
        let res = match parse_name(name) {
            Ok(Host::Key(key)) => Ok(key),
            Ok(Host::Name(host)) => {
                self.names
                    .get(&host)
                    .copied()
                    .ok_or_else(|| ArchiveError::NameNotResolved {
                        name: name.to_string(),
                        reason: "unknown name".to_string(),
                    })
            }
            Err(err) => Err(err),
        };
        Box::pin(futures::future::ready(res))
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedKey {
    key: ArchiveKey,
    expires: Instant,
}

/// Resolver looking names up on the web and in DNS.
///
/// Successful lookups are cached until their TTL runs out.
#[derive(derive_more::Debug)]
pub struct DnsResolver {
    config: DnsConfig,
    http: reqwest::Client,
    #[debug(skip)]
    dns: OnceLock<TokioAsyncResolver>,
    cache: Mutex<HashMap<String, CachedKey>>,
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new(DnsConfig::default())
    }
}

impl DnsResolver {
    /// Creates a resolver with the given configuration.
    pub fn new(config: DnsConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            dns: OnceLock::new(),
            cache: Default::default(),
        }
    }

    /// Drops all cached entries.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    fn cached(&self, name: &str) -> Option<ArchiveKey> {
        let mut cache = self.cache.lock();
        match cache.get(name) {
            Some(entry) if entry.expires > Instant::now() => Some(entry.key),
            Some(_) => {
                cache.remove(name);
                None
            }
            None => None,
        }
    }

    fn dns(&self) -> &TokioAsyncResolver {
        self.dns.get_or_init(|| {
            let (config, options) =
                hickory_resolver::system_conf::read_system_conf().unwrap_or_default();
            AsyncResolver::tokio(config, options)
        })
    }

    async fn lookup(&self, name: &str) -> anyhow::Result<(ArchiveKey, Option<Duration>)> {
        let timeout = self.config.lookup_timeout();
        let mut errors = Vec::new();
        if self.config.well_known {
            match tokio::time::timeout(timeout, self.lookup_well_known(name)).await {
                Ok(Ok(found)) => return Ok(found),
                Ok(Err(err)) => errors.push(format!("{WELL_KNOWN_PATH}: {err:#}")),
                Err(_) => errors.push(format!("{WELL_KNOWN_PATH}: timed out")),
            }
        }
        match tokio::time::timeout(timeout, self.lookup_txt(name)).await {
            Ok(Ok(found)) => Ok(found),
            Ok(Err(err)) => {
                errors.push(format!("dns: {err:#}"));
                Err(anyhow!(errors.join(", ")))
            }
            Err(_) => {
                errors.push("dns: timed out".to_string());
                Err(anyhow!(errors.join(", ")))
            }
        }
    }

    async fn lookup_well_known(
        &self,
        name: &str,
    ) -> anyhow::Result<(ArchiveKey, Option<Duration>)> {
        let url = format!("https://{name}{WELL_KNOWN_PATH}");
        trace!(%url, "fetching well-known document");
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            bail!("request failed with status {}", response.status());
        }
        let body = response.text().await?;
        parse_well_known(&body)
    }

    async fn lookup_txt(&self, name: &str) -> anyhow::Result<(ArchiveKey, Option<Duration>)> {
        let lookup = self
            .dns()
            .txt_lookup(name)
            .await
            .with_context(|| format!("TXT lookup for {name}"))?;
        let ttl = lookup
            .as_lookup()
            .valid_until()
            .checked_duration_since(Instant::now());
        let records = lookup.iter().map(|txt| {
            txt.txt_data()
                .iter()
                .map(|part| String::from_utf8_lossy(part))
                .collect::<String>()
        });
        let key = parse_txt_records(records)?;
        Ok((key, ttl))
    }
}

impl NameResolver for DnsResolver {
    fn resolve_name(&self, name: &str) -> BoxFuture<'_, Result<ArchiveKey>> {
        let name = name.to_string();
        Box::pin(async move {
            let host = match parse_name(&name)? {
                Host::Key(key) => return Ok(key),
                Host::Name(host) => host,
            };
            if let Some(key) = self.cached(&host) {
                trace!(%host, "resolved from cache");
                return Ok(key);
            }
            let (key, ttl) =
                self.lookup(&host)
                    .await
                    .map_err(|err| ArchiveError::NameNotResolved {
                        name: name.clone(),
                        reason: format!("{err:#}"),
                    })?;
            let ttl = ttl.unwrap_or_else(|| self.config.cache_ttl());
            debug!(%host, key = %key.fmt_short(), ?ttl, "resolved name");
            if !ttl.is_zero() {
                self.cache.lock().insert(
                    host,
                    CachedKey {
                        key,
                        expires: Instant::now() + ttl,
                    },
                );
            }
            Ok(key)
        })
    }
}

/// Parses a `/.well-known/dat` document.
///
/// The first line is the archive locator, an optional `TTL=<secs>` line follows.
pub fn parse_well_known(body: &str) -> anyhow::Result<(ArchiveKey, Option<Duration>)> {
    let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());
    let first = lines.next().context("empty document")?;
    let locator = ArchiveLocator::from_str(first).context("invalid locator")?;
    let key = locator
        .key()
        .with_context(|| format!("{first:?} does not name a key"))?;
    let ttl = lines.find_map(|line| {
        let (attr, value) = line.split_once('=')?;
        if !attr.trim().eq_ignore_ascii_case("ttl") {
            return None;
        }
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    });
    Ok((key, ttl))
}

/// Finds the archive key in a set of TXT records.
pub fn parse_txt_records<I, S>(records: I) -> anyhow::Result<ArchiveKey>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for record in records {
        let record = record.as_ref().trim();
        if let Some(key) = record.strip_prefix(TXT_PREFIX) {
            return ArchiveKey::from_str(key.trim())
                .with_context(|| format!("invalid key in TXT record {record:?}"));
        }
    }
    bail!("no {TXT_PREFIX} record found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const KEY: &str = "a5a3ec3c8b1b2a2b3f4d2d7f8e6c1a0b9c8d7e6f5a4b3c2d1e0f9a8b7c6d5e4f";

    fn key() -> ArchiveKey {
        KEY.parse().unwrap()
    }

    #[tokio::test]
    async fn literal_keys_resolve_without_lookup() {
        // no network access needed for keys
        let resolver = DnsResolver::default();
        assert_eq!(resolver.resolve_name(KEY).await.unwrap(), key());
        let url = format!("dat://{KEY}+3/");
        assert_eq!(resolver.resolve_name(&url).await.unwrap(), key());
    }

    #[tokio::test]
    async fn static_resolver() {
        let resolver = StaticResolver::new().with("Example.com", key());
        assert_eq!(resolver.resolve_name("example.com").await.unwrap(), key());
        assert_eq!(
            resolver.resolve_name("dat://example.com/+2").await.unwrap(),
            key()
        );
        let err = resolver.resolve_name("other.org").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameNotResolved);
        let err = resolver.resolve_name("ftp://example.com").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameNotResolved);
    }

    #[test]
    fn well_known_document() {
        let (found, ttl) = parse_well_known(&format!("dat://{KEY}\nTTL=60\n")).unwrap();
        assert_eq!(found, key());
        assert_eq!(ttl, Some(Duration::from_secs(60)));

        let (found, ttl) = parse_well_known(&format!("\n  dat://{KEY}/  \n")).unwrap();
        assert_eq!(found, key());
        assert_eq!(ttl, None);

        assert!(parse_well_known("").is_err());
        assert!(parse_well_known("dat://example.com\n").is_err());
        assert!(parse_well_known("<html></html>").is_err());
    }

    #[test]
    fn txt_records() {
        let found =
            parse_txt_records(["v=spf1 -all".to_string(), format!("datkey={KEY}")]).unwrap();
        assert_eq!(found, key());
        assert!(parse_txt_records(["v=spf1 -all"]).is_err());
        assert!(parse_txt_records(["datkey=nope"]).is_err());
    }

    #[test]
    fn cache_expires() {
        let resolver = DnsResolver::default();
        resolver.cache.lock().insert(
            "fresh.example".into(),
            CachedKey {
                key: key(),
                expires: Instant::now() + Duration::from_secs(60),
            },
        );
        resolver.cache.lock().insert(
            "stale.example".into(),
            CachedKey {
                key: key(),
                expires: Instant::now() - Duration::from_secs(1),
            },
        );
        assert_eq!(resolver.cached("fresh.example"), Some(key()));
        assert_eq!(resolver.cached("stale.example"), None);
        assert!(!resolver.cache.lock().contains_key("stale.example"));
        resolver.clear_cache();
        assert_eq!(resolver.cached("fresh.example"), None);
    }
}
