//! The build orchestrator (component H): wires the pattern engine, the
//! record model, and the sharded build driver together into a single
//! "index this bag file" operation.

use crate::bagfile::{BagReader, FileBagReader};
use crate::error::IndexError;
use crate::hashbucket::HashBucketConfig;
use crate::key::{self, KeyValue};
use crate::pattern::{self, InferredKeyType, Matcher, Pattern};
use crate::schema::{LeafValue, RecordType};
use crate::shard::{ShardedKeyIndexBuilder, ShardedTextIndexBuilder, DEFAULT_SHARD_LIMIT};
use crate::trigram::TrigramConfig;
use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

fn is_explicit(pattern: &Pattern) -> bool {
    pattern
        .matchers
        .iter()
        .all(|m| matches!(m, Matcher::Exact(_) | Matcher::Set(_)))
}

/// Parses `key_field_patterns`/`exclude_field_patterns`, expands them
/// against `schema`, and returns the selected path set. Fails with
/// [`IndexError::PathNotFound`] if any explicitly enumerable (non-wildcard)
/// key-field pattern resolved to zero paths, guarding against schema drift.
fn select_paths(
    schema: &crate::schema::SchemaNode,
    key_field_patterns: &[String],
    exclude_field_patterns: &[String],
) -> Result<HashSet<Vec<String>>> {
    let mut selected = HashSet::new();
    for raw in key_field_patterns {
        let pattern = pattern::parse_pattern(raw)?;
        let matches = pattern::expand_field_pattern(schema, &pattern);
        if matches.is_empty() && is_explicit(&pattern) {
            return Err(IndexError::PathNotFound(raw.clone()).into());
        }
        selected.extend(matches);
    }
    for raw in exclude_field_patterns {
        let pattern = pattern::parse_pattern(raw)?;
        let matches = pattern::expand_field_pattern(schema, &pattern);
        for path in matches {
            selected.remove(&path);
        }
    }
    Ok(selected)
}

fn leaf_text(value: &LeafValue) -> Option<&str> {
    match value {
        LeafValue::Str(s) => Some(s.as_str()),
        _ => None,
    }
}

/// Builds a HashBucket or Trigram index over `input_path`'s records into
/// `output_path`, selecting values via `key_field_patterns`/
/// `exclude_field_patterns` and `record_type`'s schema.
pub fn generate_index(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    record_type: &dyn RecordType,
    key_field_patterns: &[String],
    exclude_field_patterns: &[String],
    trigram: bool,
) -> Result<()> {
    let schema = record_type.schema();
    let selected_paths = select_paths(schema, key_field_patterns, exclude_field_patterns)?;

    let input = FileBagReader::open(input_path.as_ref())?;
    let record_count = input.len();

    if trigram {
        let key_type = pattern::infer_key_type(schema, &selected_paths)?;
        if key_type != InferredKeyType::Str {
            return Err(IndexError::KeyTypeConflict(
                "trigram indices can only be built over string-valued fields".to_string(),
            )
            .into());
        }
        let config = TrigramConfig::new("abcdefghijklmnopqrstuvwxyz0123456789", 3, true, true, true);
        let mut builder = ShardedTextIndexBuilder::new(config, output_path.as_ref(), DEFAULT_SHARD_LIMIT)?;

        for index in 0..record_count {
            let bytes = input.get(index)?;
            let record = record_type.parse(&bytes)?;
            for path in &selected_paths {
                for value in pattern::lookup_field_values(&record, path) {
                    if let Some(text) = leaf_text(&value) {
                        builder.add_text(text, index as i64)?;
                    }
                }
            }
            if index % 10_000 == 0 {
                info!(index, record_count, "generating trigram index");
            }
        }
        builder.close()?;
    } else {
        let key_type = pattern::infer_key_type(schema, &selected_paths)?;
        let key_proto_name = match key_type {
            InferredKeyType::Str => key::STRING_KEY,
            InferredKeyType::Int64 => key::INT64_KEY,
        };
        let config = HashBucketConfig {
            avg_bucket_size: 0.9,
            key_proto_name: key_proto_name.to_string(),
        };
        let mut builder = ShardedKeyIndexBuilder::new(config, output_path.as_ref(), DEFAULT_SHARD_LIMIT)?;

        for index in 0..record_count {
            let bytes = input.get(index)?;
            let record = record_type.parse(&bytes)?;
            for path in &selected_paths {
                for value in pattern::lookup_field_values(&record, path) {
                    let key = match value {
                        LeafValue::Str(s) => KeyValue::Str(s),
                        LeafValue::Int64(n) => KeyValue::Int64(n),
                        LeafValue::Other => continue,
                    };
                    builder.add(&key, &[index as i64])?;
                }
            }
            if index % 10_000 == 0 {
                info!(index, record_count, "generating hashbucket index");
            }
        }
        builder.close()?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bagfile::{BagWriter, FileBagWriter};
    use crate::hashbucket::HashBucketReader;
    use crate::schema::{FieldSpec, FieldType, JsonRecordType, LeafType, SchemaNode};
    use tempfile::tempdir;

    fn sample_schema() -> SchemaNode {
        SchemaNode {
            fields: vec![FieldSpec {
                name: "id".to_string(),
                field_type: FieldType::Leaf(LeafType::Str),
                repeated: false,
            }],
        }
    }

    #[test]
    fn generates_key_index_from_json_records() {
        let dir = tempdir().unwrap();
        let input_path = dir.path().join("in.bag");
        let output_path = dir.path().join("out.bag");

        let mut writer = FileBagWriter::create(&input_path).unwrap();
        writer.append(br#"{"id": "alpha"}"#).unwrap();
        writer.append(br#"{"id": "beta"}"#).unwrap();
        writer.close().unwrap();

        let record_type = JsonRecordType::new(sample_schema());
        generate_index(&input_path, &output_path, &record_type, &["id".to_string()], &[], false).unwrap();

        let reader = HashBucketReader::open(&output_path).unwrap();
        assert_eq!(
            reader.lookup(&KeyValue::Str("alpha".to_string())).unwrap(),
            Some(vec![0])
        );
        assert_eq!(
            reader.lookup(&KeyValue::Str("beta".to_string())).unwrap(),
            Some(vec![1])
        );
    }

    #[test]
    fn generates_key_index_over_a_repeated_scalar_field() {
        let dir = tempdir().unwrap();
        let input_path = dir.path().join("in.bag");
        let output_path = dir.path().join("out.bag");

        let schema = SchemaNode {
            fields: vec![FieldSpec {
                name: "tags".to_string(),
                field_type: FieldType::Leaf(LeafType::Str),
                repeated: true,
            }],
        };

        let mut writer = FileBagWriter::create(&input_path).unwrap();
        writer.append(br#"{"tags": ["tag1", "tag2"]}"#).unwrap();
        writer.close().unwrap();

        let record_type = JsonRecordType::new(schema);
        generate_index(&input_path, &output_path, &record_type, &["tags".to_string()], &[], false).unwrap();

        let reader = HashBucketReader::open(&output_path).unwrap();
        assert_eq!(
            reader.lookup(&KeyValue::Str("tag1".to_string())).unwrap(),
            Some(vec![0])
        );
        assert_eq!(
            reader.lookup(&KeyValue::Str("tag2".to_string())).unwrap(),
            Some(vec![0])
        );
    }

    #[test]
    fn missing_explicit_field_is_path_not_found() {
        let dir = tempdir().unwrap();
        let input_path = dir.path().join("in.bag");
        let output_path = dir.path().join("out.bag");
        FileBagWriter::create(&input_path).unwrap().close().unwrap();

        let record_type = JsonRecordType::new(sample_schema());
        let err = generate_index(
            &input_path,
            &output_path,
            &record_type,
            &["does_not_exist".to_string()],
            &[],
            false,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::PathNotFound(_))
        ));
    }
}
