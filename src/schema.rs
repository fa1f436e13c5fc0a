//! The structured-record model (component S): a schema tree, a matching
//! record tree carrying actual data, and the `RecordType` capability that
//! decouples the orchestrator from any particular wire format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LeafType {
    Str,
    Int64,
    Int32,
    Bool,
    Bytes,
    Double,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldType {
    Leaf(LeafType),
    Message(SchemaNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub repeated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SchemaNode {
    pub fields: Vec<FieldSpec>,
}

impl SchemaNode {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeafValue {
    Str(String),
    Int64(i64),
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Leaf(LeafValue),
    Message(Vec<Record>),
    /// A repeated leaf field's values. Kept distinct from `Message` so a
    /// pattern terminating exactly at a repeated scalar field (e.g. a
    /// `repeated string tags` field) still yields its values instead of
    /// silently projecting to nothing.
    Repeated(Vec<LeafValue>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub fields: std::collections::HashMap<String, RecordValue>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&RecordValue> {
        self.fields.get(name)
    }
}

/// The "thin parser capability": decouples the orchestrator from any
/// specific schema-compiler or wire format.
pub trait RecordType {
    fn schema(&self) -> &SchemaNode;
    fn parse(&self, bytes: &[u8]) -> Result<Record>;
}

/// A dependency-free stand-in `RecordType` that treats each record as a
/// JSON object validated against a caller-supplied [`SchemaNode`]. Enough
/// to exercise and test the orchestrator end to end; callers targeting a
/// real wire format implement their own `RecordType`.
pub struct JsonRecordType {
    schema: SchemaNode,
}

impl JsonRecordType {
    pub fn new(schema: SchemaNode) -> Self {
        Self { schema }
    }

    fn parse_leaf(leaf_type: &LeafType, value: &serde_json::Value) -> LeafValue {
        match leaf_type {
            LeafType::Str => value
                .as_str()
                .map(|s| LeafValue::Str(s.to_string()))
                .unwrap_or(LeafValue::Other),
            LeafType::Int64 => value.as_i64().map(LeafValue::Int64).unwrap_or(LeafValue::Other),
            _ => LeafValue::Other,
        }
    }

    fn parse_node(schema: &SchemaNode, value: &serde_json::Value) -> Record {
        let mut fields = std::collections::HashMap::new();
        let serde_json::Value::Object(obj) = value else {
            return Record { fields };
        };
        for field_spec in &schema.fields {
            let Some(raw) = obj.get(&field_spec.name) else {
                continue;
            };
            let record_value = match &field_spec.field_type {
                FieldType::Leaf(leaf_type) => {
                    if field_spec.repeated {
                        let items = raw.as_array().map(|a| a.as_slice()).unwrap_or(&[]);
                        RecordValue::Repeated(
                            items.iter().map(|item| Self::parse_leaf(leaf_type, item)).collect(),
                        )
                    } else {
                        RecordValue::Leaf(Self::parse_leaf(leaf_type, raw))
                    }
                }
                FieldType::Message(child_schema) => {
                    if field_spec.repeated {
                        let items = raw.as_array().map(|a| a.as_slice()).unwrap_or(&[]);
                        RecordValue::Message(
                            items.iter().map(|item| Self::parse_node(child_schema, item)).collect(),
                        )
                    } else {
                        RecordValue::Message(vec![Self::parse_node(child_schema, raw)])
                    }
                }
            };
            fields.insert(field_spec.name.clone(), record_value);
        }
        Record { fields }
    }
}

impl RecordType for JsonRecordType {
    fn schema(&self) -> &SchemaNode {
        &self.schema
    }

    fn parse(&self, bytes: &[u8]) -> Result<Record> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).context("parsing JSON record")?;
        Ok(Self::parse_node(&self.schema, &value))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_schema() -> SchemaNode {
        SchemaNode {
            fields: vec![
                FieldSpec {
                    name: "id".to_string(),
                    field_type: FieldType::Leaf(LeafType::Str),
                    repeated: false,
                },
                FieldSpec {
                    name: "tags".to_string(),
                    field_type: FieldType::Leaf(LeafType::Str),
                    repeated: true,
                },
                FieldSpec {
                    name: "sub".to_string(),
                    field_type: FieldType::Message(SchemaNode {
                        fields: vec![FieldSpec {
                            name: "sub_id".to_string(),
                            field_type: FieldType::Leaf(LeafType::Int64),
                            repeated: false,
                        }],
                    }),
                    repeated: true,
                },
            ],
        }
    }

    #[test]
    fn parses_repeated_scalar_field_as_repeated_leaf_values() {
        let record_type = JsonRecordType::new(sample_schema());
        let record = record_type
            .parse(br#"{"id": "x", "tags": ["tag1", "tag2"]}"#)
            .unwrap();
        let Some(RecordValue::Repeated(values)) = record.get("tags") else {
            panic!("expected tags to be a repeated leaf value list");
        };
        assert_eq!(
            values,
            &vec![LeafValue::Str("tag1".to_string()), LeafValue::Str("tag2".to_string())]
        );
    }

    #[test]
    fn parses_nested_repeated_messages() {
        let record_type = JsonRecordType::new(sample_schema());
        let record = record_type
            .parse(br#"{"id": "x", "sub": [{"sub_id": 1}, {"sub_id": 2}]}"#)
            .unwrap();
        let Some(RecordValue::Leaf(LeafValue::Str(id))) = record.get("id") else {
            panic!("expected id leaf");
        };
        assert_eq!(id, "x");
        let Some(RecordValue::Message(subs)) = record.get("sub") else {
            panic!("expected sub message list");
        };
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn missing_field_is_absent_not_an_error() {
        let record_type = JsonRecordType::new(sample_schema());
        let record = record_type.parse(br#"{"id": "x"}"#).unwrap();
        assert!(record.get("sub").is_none());
    }
}
