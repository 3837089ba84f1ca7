//! Resource mapping exchanged with the calling pipeline.
//!
//! The caller hands over a [`ResourceMap`] (name → [`ResourceEntry`]). Entries
//! with a `contentsUrl` are downloadable: [`take_downloadable`] removes them
//! from the map and turns them into [`Resource`]s. Everything else is left in
//! place, untouched, for the caller to materialize itself.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

/// Mapping of resource name to entry, as supplied by the caller.
pub type ResourceMap = BTreeMap<String, ResourceEntry>;

/// One entry of the caller's resource mapping.
///
/// Unknown fields are carried through unchanged so entries left for the
/// caller round-trip exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntry {
    /// Remote source; entries without one are not download targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents_url: Option<String>,
    /// Unix permission bits, as a number (`420`) or an octal string (`"0644"`).
    #[serde(
        default,
        deserialize_with = "deserialize_mode",
        skip_serializing_if = "Option::is_none"
    )]
    pub mode: Option<u32>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResourceEntry {
    /// Creates a downloadable entry.
    #[must_use]
    pub fn remote(contents_url: impl Into<String>) -> Self {
        Self {
            contents_url: Some(contents_url.into()),
            ..Self::default()
        }
    }

    /// Sets the file mode.
    #[must_use]
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Source URL, if this entry is a download target.
    ///
    /// An empty string counts as no URL.
    #[must_use]
    pub fn source_url(&self) -> Option<&str> {
        self.contents_url.as_deref().filter(|url| !url.is_empty())
    }
}

/// One named remote file to fetch. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Unique name within the run; also the relative output path.
    pub name: String,
    /// Where the content comes from.
    pub source_url: String,
    /// Permission bits applied after a fresh fetch.
    pub mode: Option<u32>,
}

/// Removes every downloadable entry from `resources` and returns them.
///
/// Removal is unconditional: it happens before any fetch starts, so the
/// caller never sees a downloadable entry again whatever the outcome.
pub fn take_downloadable(resources: &mut ResourceMap) -> Vec<Resource> {
    let names: Vec<String> = resources
        .iter()
        .filter(|(_, entry)| entry.source_url().is_some())
        .map(|(name, _)| name.clone())
        .collect();

    names
        .into_iter()
        .filter_map(|name| {
            let entry = resources.remove(&name)?;
            let source_url = entry.source_url()?.to_string();
            Some(Resource {
                name,
                source_url,
                mode: entry.mode,
            })
        })
        .collect()
}

fn deserialize_mode<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ModeVisitor;

    impl<'de> Visitor<'de> for ModeVisitor {
        type Value = Option<u32>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a file mode as an integer or an octal string")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(self)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            checked_mode(value).map(Some).map_err(E::custom)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            let value = u64::try_from(value).map_err(|_| E::custom("file mode must be positive"))?;
            self.visit_u64(value)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            let digits = value
                .strip_prefix("0o")
                .unwrap_or(value)
                .trim_start_matches('0');
            let digits = if digits.is_empty() { "0" } else { digits };
            let parsed = u64::from_str_radix(digits, 8)
                .map_err(|_| E::custom(format!("invalid octal file mode '{value}'")))?;
            checked_mode(parsed).map(Some).map_err(E::custom)
        }
    }

    deserializer.deserialize_option(ModeVisitor)
}

fn checked_mode(value: u64) -> Result<u32, String> {
    if value > 0o7777 {
        return Err(format!("file mode {value:o} exceeds 7777"));
    }
    // Bounded above, cannot truncate.
    Ok(value as u32)
}
