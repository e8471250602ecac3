//! Parsing of `dat://` locators.
//!
//! A locator names an archive either directly by its [`ArchiveKey`] or by a domain name
//! that still has to be resolved, and optionally pins a historic version:
//!
//! ```text
//! dat://<64 hex chars or name>[/][+<version>][/path]
//! ```
//!
//! The scheme may be omitted.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::key::ArchiveKey;

/// The URL scheme of dat archives.
pub const DAT_SCHEME: &str = "dat";

/// The host part of a locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Host {
    /// The archive key itself.
    Key(ArchiveKey),
    /// A domain name which resolves to an archive key.
    Name(String),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Key(key) => write!(f, "{key}"),
            Host::Name(name) => f.write_str(name),
        }
    }
}

/// A parsed `dat://` locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveLocator {
    host: Host,
    version: Option<u64>,
    path: Option<String>,
}

/// Error when parsing an [`ArchiveLocator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocatorError {
    /// The locator had a scheme other than `dat`.
    #[error("unsupported scheme {0:?}")]
    Scheme(String),
    /// The locator had no host.
    #[error("missing archive key or name")]
    MissingHost,
    /// The host was neither a key nor a valid domain name.
    #[error("invalid archive name {0:?}")]
    InvalidHost(String),
    /// The version suffix was not a non-negative integer.
    #[error("invalid version {0:?}")]
    Version(String),
}

impl ArchiveLocator {
    /// Create a locator for the latest version of an archive.
    pub fn new(key: ArchiveKey) -> Self {
        Self {
            host: Host::Key(key),
            version: None,
            path: None,
        }
    }

    /// Pin this locator to a version.
    pub fn with_version(mut self, version: impl Into<Option<u64>>) -> Self {
        self.version = version.into();
        self
    }

    /// The host of this locator.
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The archive key, if the host is not a name that still needs resolving.
    pub fn key(&self) -> Option<ArchiveKey> {
        match &self.host {
            Host::Key(key) => Some(*key),
            Host::Name(_) => None,
        }
    }

    /// The pinned version, if any.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// The path inside the archive, if the locator carried one.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// The `dat://<host>` origin, without version or path.
    pub fn origin(&self) -> String {
        format!("{DAT_SCHEME}://{}", self.host)
    }
}

impl FromStr for ArchiveLocator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let rest = match s.split_once("://") {
            Some((scheme, rest)) => {
                if !scheme.eq_ignore_ascii_case(DAT_SCHEME) {
                    return Err(LocatorError::Scheme(scheme.to_string()));
                }
                rest
            }
            None => s,
        };

        let (authority, mut tail) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        let (host, mut version) = match authority.split_once('+') {
            Some((host, version)) => (host, Some(version)),
            None => (authority, None),
        };
        // `dat://<key>/+<version>/path`
        if version.is_none() {
            if let Some(after) = tail.strip_prefix("/+") {
                let end = after.find('/').unwrap_or(after.len());
                version = Some(&after[..end]);
                tail = &after[end..];
            }
        }

        if host.is_empty() {
            return Err(LocatorError::MissingHost);
        }
        let host = match host.parse::<ArchiveKey>() {
            Ok(key) => Host::Key(key),
            Err(_) if is_domain_name(host) => Host::Name(host.to_ascii_lowercase()),
            Err(_) => return Err(LocatorError::InvalidHost(host.to_string())),
        };
        let version = version
            .map(|v| {
                v.parse::<u64>()
                    .map_err(|_| LocatorError::Version(v.to_string()))
            })
            .transpose()?;
        let path = match tail.trim_end_matches('/') {
            "" => None,
            p => Some(p.to_string()),
        };
        Ok(Self {
            host,
            version,
            path,
        })
    }
}

impl fmt::Display for ArchiveLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DAT_SCHEME}://{}", self.host)?;
        if let Some(version) = self.version {
            write!(f, "+{version}")?;
        }
        if let Some(path) = &self.path {
            f.write_str(path)?;
        }
        Ok(())
    }
}

fn is_domain_name(s: &str) -> bool {
    !s.starts_with(['.', '-'])
        && !s.ends_with(['.', '-'])
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ArchiveKey {
        ArchiveKey::from_bytes([0xab; 32])
    }

    #[test]
    fn parse_plain_key() {
        let hex = key().to_hex();
        for input in [
            format!("dat://{hex}"),
            format!("dat://{hex}/"),
            format!("DAT://{hex}"),
            hex.clone(),
        ] {
            let loc: ArchiveLocator = input.parse().unwrap();
            assert_eq!(loc.key(), Some(key()), "{input}");
            assert_eq!(loc.version(), None);
            assert_eq!(loc.path(), None);
        }
    }

    #[test]
    fn parse_version() {
        let hex = key().to_hex();
        let loc: ArchiveLocator = format!("dat://{hex}+4").parse().unwrap();
        assert_eq!(loc.version(), Some(4));
        let loc: ArchiveLocator = format!("dat://{hex}/+2").parse().unwrap();
        assert_eq!(loc.version(), Some(2));
        let loc: ArchiveLocator = format!("dat://{hex}+3/sub/file.txt").parse().unwrap();
        assert_eq!(loc.version(), Some(3));
        assert_eq!(loc.path(), Some("/sub/file.txt"));
        assert_eq!(loc.origin(), format!("dat://{hex}"));
    }

    #[test]
    fn parse_name() {
        let loc: ArchiveLocator = "dat://Example.com+1".parse().unwrap();
        assert_eq!(loc.host(), &Host::Name("example.com".into()));
        assert_eq!(loc.key(), None);
        assert_eq!(loc.version(), Some(1));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            "https://example.com".parse::<ArchiveLocator>(),
            Err(LocatorError::Scheme("https".into()))
        );
        assert_eq!(
            "dat://".parse::<ArchiveLocator>(),
            Err(LocatorError::MissingHost)
        );
        assert!(matches!(
            format!("dat://{}+x", key().to_hex()).parse::<ArchiveLocator>(),
            Err(LocatorError::Version(_))
        ));
        assert!(matches!(
            "dat://bad name".parse::<ArchiveLocator>(),
            Err(LocatorError::InvalidHost(_))
        ));
    }

    #[test]
    fn display_roundtrip() {
        let loc = ArchiveLocator::new(key()).with_version(7);
        let text = loc.to_string();
        assert_eq!(text, format!("dat://{}+7", key().to_hex()));
        assert_eq!(text.parse::<ArchiveLocator>().unwrap(), loc);
    }
}
