//! The archive manifest, `/dat.json`.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ArchiveError, Result};

/// Manifest fields which can be changed through `configure`.
pub const CONFIGURABLE_FIELDS: &[&str] = &[
    "author",
    "description",
    "fallback_page",
    "links",
    "title",
    "type",
    "web_root",
];

/// How `configure` writes the manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestMode {
    /// Write only the supplied fields, dropping everything else but the archive url.
    Replace,
    /// Overlay the supplied fields on the current manifest.
    #[default]
    Merge,
}

/// Contents of `/dat.json`.
///
/// Fields this crate does not know about are kept as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// The `dat://` url of the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// A type string, or a list of them.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<Value>,
    /// The author, a name or an object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Value>,
    /// Links to related resources, keyed by relation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
    /// Page to serve for missing paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_page: Option<String>,
    /// Folder which is served as the site root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_root: Option<String>,
    /// Everything else.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// Parses a manifest.
    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(bytes).context("parsing manifest")
    }

    /// Serializes the manifest as pretty printed JSON.
    pub fn to_vec(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).context("serializing manifest")
    }

    /// Applies the configurable fields of `settings`.
    ///
    /// A `null` value removes the field. Other keys are ignored.
    pub fn apply(&mut self, settings: &Map<String, Value>) -> Result<()> {
        let mut fields = match serde_json::to_value(&*self).context("serializing manifest")? {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        for key in CONFIGURABLE_FIELDS {
            if let Some(value) = settings.get(*key) {
                fields.insert(key.to_string(), value.clone());
            }
        }
        *self = serde_json::from_value(Value::Object(fields))
            .map_err(|err| ArchiveError::InvalidArgument(err.to_string().into()))?;
        Ok(())
    }

    /// Computes the manifest `configure` writes, given the current one.
    pub fn configured(
        current: Manifest,
        settings: &Map<String, Value>,
        mode: ManifestMode,
    ) -> Result<Manifest> {
        let mut next = match mode {
            ManifestMode::Merge => current,
            ManifestMode::Replace => Manifest {
                url: current.url,
                ..Default::default()
            },
        };
        next.apply(settings)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn settings(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn parse_preserves_unknown_fields() {
        let manifest = Manifest::from_slice(
            br#"{"title":"Site","type":["website"],"experimental":{"apis":["x"]}}"#,
        )
        .unwrap();
        assert_eq!(manifest.title.as_deref(), Some("Site"));
        assert_eq!(manifest.kind, Some(json!(["website"])));
        assert_eq!(manifest.extra.get("experimental"), Some(&json!({"apis": ["x"]})));

        let bytes = manifest.to_vec().unwrap();
        let back = Manifest::from_slice(&bytes).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn merge_overlays_fields() {
        let current = Manifest {
            url: Some("dat://abc".into()),
            title: Some("Old".into()),
            description: Some("Kept".into()),
            ..Default::default()
        };
        let next = Manifest::configured(
            current,
            &settings(json!({"title": "New", "web_root": "/public", "networked": false})),
            ManifestMode::Merge,
        )
        .unwrap();
        assert_eq!(next.title.as_deref(), Some("New"));
        assert_eq!(next.description.as_deref(), Some("Kept"));
        assert_eq!(next.web_root.as_deref(), Some("/public"));
        assert_eq!(next.url.as_deref(), Some("dat://abc"));
        assert!(next.extra.is_empty(), "non manifest settings are not written");
    }

    #[test]
    fn replace_drops_unsupplied_fields() {
        let current = Manifest {
            url: Some("dat://abc".into()),
            title: Some("Old".into()),
            description: Some("Dropped".into()),
            ..Default::default()
        };
        let next = Manifest::configured(
            current,
            &settings(json!({"title": "New"})),
            ManifestMode::Replace,
        )
        .unwrap();
        assert_eq!(next.title.as_deref(), Some("New"));
        assert_eq!(next.description, None);
        assert_eq!(next.url.as_deref(), Some("dat://abc"));
    }

    #[test]
    fn null_removes_and_bad_types_fail() {
        let mut manifest = Manifest {
            title: Some("Old".into()),
            ..Default::default()
        };
        manifest.apply(&settings(json!({"title": null}))).unwrap();
        assert_eq!(manifest.title, None);

        let err = manifest.apply(&settings(json!({"title": 5}))).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }
}
