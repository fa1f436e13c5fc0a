//! The config registry (component C): a tagged union of index descriptors
//! with JSON round-trip, re-expressed as a closed Rust enum rather than a
//! runtime type registry. Capability support is therefore a property of
//! the variant the compiler already knows about, not a lookup.

use crate::error::IndexError;
use crate::hashbucket::HashBucketConfig;
use crate::trigram::TrigramConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// The capability an index variant may or may not implement. Mirrors the
/// original's `SupportsKeyAddition` / `SupportsKeyLookup` / etc. protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    KeyAddition,
    KeyLookup,
    TextAddition,
    TextSearch,
}

impl Capability {
    fn as_str(self) -> &'static str {
        match self {
            Capability::KeyAddition => "KeyAddition",
            Capability::KeyLookup => "KeyLookup",
            Capability::TextAddition => "TextAddition",
            Capability::TextSearch => "TextSearch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Config {
    #[serde(rename = "hashbucket")]
    HashBucket(HashBucketConfig),
    #[serde(rename = "trigram")]
    Trigram(TrigramConfig),
}

impl Config {
    pub fn type_name(&self) -> &'static str {
        match self {
            Config::HashBucket(_) => "hashbucket",
            Config::Trigram(_) => "trigram",
        }
    }

    pub fn supports_protocol(&self, capability: Capability) -> bool {
        matches!(
            (self, capability),
            (Config::HashBucket(_), Capability::KeyAddition)
                | (Config::HashBucket(_), Capability::KeyLookup)
                | (Config::Trigram(_), Capability::TextAddition)
                | (Config::Trigram(_), Capability::TextSearch)
        )
    }

    pub fn require_protocol(&self, capability: Capability) -> Result<()> {
        if self.supports_protocol(capability) {
            Ok(())
        } else {
            Err(IndexError::UnsupportedProtocol {
                config_type: self.type_name(),
                capability: capability.as_str(),
            }
            .into())
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Config> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let config_type = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("config JSON must contain a 'type' field"))?;
        match config_type {
            "hashbucket" | "trigram" => {
                Ok(serde_json::from_value(value).context("decoding index config")?)
            }
            other => Err(IndexError::UnknownConfigType(other.to_string()).into()),
        }
    }
}

/// Reads the trailing JSON descriptor out of an index's bag file.
pub fn read_descriptor(bag: &dyn crate::bagfile::BagReader) -> Result<Config> {
    if bag.is_empty() {
        anyhow::bail!("bag file has no entries, cannot contain a descriptor");
    }
    let descriptor_bytes = bag.get(bag.len() - 1)?;
    let descriptor_json = String::from_utf8(descriptor_bytes).context("descriptor is not UTF-8")?;
    Config::from_json(&descriptor_json)
}

/// Merges one or more index files sharing an identical config into
/// `output_path`. This is the top-level entry point mirrored from the
/// original's `core.merge_indices`.
pub fn merge_indices(input_paths: &[std::path::PathBuf], output_path: &Path) -> Result<()> {
    if input_paths.is_empty() {
        anyhow::bail!("at least one input bag path must be provided");
    }

    let mut configs = Vec::with_capacity(input_paths.len());
    for path in input_paths {
        let reader = crate::bagfile::FileBagReader::open(path)?;
        configs.push(read_descriptor(&reader)?);
    }
    let config = &configs[0];
    if configs.iter().any(|c| c != config) {
        return Err(IndexError::ConfigMismatch(format!(
            "{configs:?}"
        ))
        .into());
    }

    info!(count = input_paths.len(), config_type = config.type_name(), "merging indices");

    match config {
        Config::HashBucket(cfg) => {
            crate::hashbucket::merge(cfg, input_paths, output_path)
        }
        Config::Trigram(cfg) => crate::trigram::merge(cfg, input_paths, output_path),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hashbucket::HashBucketConfig;
    use crate::key;

    #[test]
    fn json_round_trip_hashbucket() {
        let config = Config::HashBucket(HashBucketConfig {
            avg_bucket_size: 0.9,
            key_proto_name: key::STRING_KEY.to_string(),
        });
        let json = config.to_json().unwrap();
        assert!(json.contains("\"type\":\"hashbucket\""));
        let parsed = Config::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn unknown_type_is_a_clear_error() {
        let err = Config::from_json(r#"{"type":"not_a_real_type"}"#).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::UnknownConfigType(_))
        ));
    }

    #[test]
    fn missing_type_field_errors() {
        assert!(Config::from_json(r#"{"foo":"bar"}"#).is_err());
    }
}
