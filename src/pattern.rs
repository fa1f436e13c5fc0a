//! The field-path pattern engine (component G): a glob-like language over
//! a record-schema tree, used to select which fields feed a key or a
//! trigram index.

use crate::error::IndexError;
use crate::schema::{FieldType, LeafType, LeafValue, Record, RecordValue, SchemaNode};
use anyhow::Result;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Exact(String),
    Wildcard,
    DoubleWildcard,
    Set(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub matchers: Vec<Matcher>,
}

/// Splits `s` on `.` at brace-depth zero.
fn split_at_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            '.' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

pub fn parse_pattern(s: &str) -> Result<Pattern> {
    let mut matchers = Vec::new();
    for component in split_at_top_level(s) {
        let matcher = if component == "**" {
            Matcher::DoubleWildcard
        } else if component == "*" {
            Matcher::Wildcard
        } else if component.starts_with('{') && component.ends_with('}') {
            let inner = &component[1..component.len() - 1];
            let names = inner.split(',').map(|n| n.trim().to_string()).collect();
            Matcher::Set(names)
        } else {
            Matcher::Exact(component.to_string())
        };
        matchers.push(matcher);
    }
    Ok(Pattern { matchers })
}

impl Pattern {
    /// True if this pattern matches the full path `p`.
    pub fn matches(&self, p: &[String]) -> bool {
        matches_from(&self.matchers, p)
    }
}

fn matches_from(matchers: &[Matcher], path: &[String]) -> bool {
    match matchers.split_first() {
        None => path.is_empty(),
        Some((Matcher::DoubleWildcard, rest)) => {
            if matches_from(rest, path) {
                return true;
            }
            if path.is_empty() {
                return false;
            }
            matches_from(matchers, &path[1..])
        }
        Some((head, rest)) => {
            let Some((first, tail)) = path.split_first() else {
                return false;
            };
            let consumed = match head {
                Matcher::Exact(name) => first == name,
                Matcher::Wildcard => true,
                Matcher::Set(names) => names.contains(first),
                Matcher::DoubleWildcard => unreachable!(),
            };
            consumed && matches_from(rest, tail)
        }
    }
}

/// Enumerates every field path (including interior message fields) in
/// depth-first order, returning those matched by `pattern`.
pub fn expand_field_pattern(schema: &SchemaNode, pattern: &Pattern) -> HashSet<Vec<String>> {
    let mut all_paths = HashSet::new();
    collect_paths(schema, &mut Vec::new(), &mut all_paths);
    all_paths.retain(|path| pattern.matches(path));
    all_paths
}

fn collect_paths(schema: &SchemaNode, prefix: &mut Vec<String>, out: &mut HashSet<Vec<String>>) {
    for field in &schema.fields {
        prefix.push(field.name.clone());
        out.insert(prefix.clone());
        if let FieldType::Message(child) = &field.field_type {
            collect_paths(child, prefix, out);
        }
        prefix.pop();
    }
}

/// Descends `record` component by component along `path`, yielding every
/// leaf value reached; repeated fields expand cross-product, and an
/// absent field yields nothing.
pub fn lookup_field_values(record: &Record, path: &[String]) -> Vec<LeafValue> {
    let Some((head, rest)) = path.split_first() else {
        return Vec::new();
    };
    match record.get(head) {
        None => Vec::new(),
        Some(RecordValue::Leaf(value)) => {
            if rest.is_empty() {
                vec![value.clone()]
            } else {
                Vec::new()
            }
        }
        Some(RecordValue::Message(children)) => {
            if rest.is_empty() {
                Vec::new()
            } else {
                children.iter().flat_map(|child| lookup_field_values(child, rest)).collect()
            }
        }
        Some(RecordValue::Repeated(values)) => {
            if rest.is_empty() {
                values.clone()
            } else {
                Vec::new()
            }
        }
    }
}

/// The primitive key type a set of selected field paths resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredKeyType {
    Str,
    Int64,
}

fn leaf_type_at(schema: &SchemaNode, path: &[String]) -> Option<LeafType> {
    let (head, rest) = path.split_first()?;
    let field = schema.field(head)?;
    match &field.field_type {
        FieldType::Leaf(leaf_type) => {
            if rest.is_empty() {
                Some(leaf_type.clone())
            } else {
                None
            }
        }
        FieldType::Message(child) => leaf_type_at(child, rest),
    }
}

/// Resolves a set of selected paths to a single key type, requiring every
/// path to (a) exist in the schema and (b) resolve to the same supported
/// primitive leaf type.
pub fn infer_key_type(schema: &SchemaNode, paths: &HashSet<Vec<String>>) -> Result<InferredKeyType> {
    let mut inferred: Option<InferredKeyType> = None;
    for path in paths {
        let leaf_type = leaf_type_at(schema, path)
            .ok_or_else(|| IndexError::PathNotFound(path.join(".")))?;
        let key_type = match leaf_type {
            LeafType::Str => InferredKeyType::Str,
            LeafType::Int64 => InferredKeyType::Int64,
            other => {
                return Err(IndexError::KeyTypeConflict(format!(
                    "field {:?} has unsupported key leaf type {other:?}",
                    path.join(".")
                ))
                .into())
            }
        };
        match inferred {
            None => inferred = Some(key_type),
            Some(existing) if existing == key_type => {}
            Some(_) => {
                return Err(IndexError::KeyTypeConflict(format!(
                    "paths resolve to more than one primitive type (last conflict at {:?})",
                    path.join(".")
                ))
                .into())
            }
        }
    }
    inferred.ok_or_else(|| IndexError::PathNotFound("<empty pattern selection>".to_string()).into())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::FieldSpec;

    fn path(s: &str) -> Vec<String> {
        s.split('.').map(|p| p.to_string()).collect()
    }

    #[test]
    fn double_wildcard_matches_suffix() {
        let pattern = parse_pattern("**.sub_id").unwrap();
        assert!(pattern.matches(&path("a.b.sub_id")));
        assert!(pattern.matches(&path("sub_id")));
        assert!(!pattern.matches(&path("sub_id.extra")));
    }

    #[test]
    fn single_wildcard_matches_one_component() {
        let pattern = parse_pattern("sub.*").unwrap();
        assert!(pattern.matches(&path("sub.sub_id")));
        assert!(!pattern.matches(&path("sub.a.b")));
    }

    #[test]
    fn set_matches_named_alternatives() {
        let pattern = parse_pattern("{id,name}").unwrap();
        assert!(pattern.matches(&path("id")));
        assert!(pattern.matches(&path("name")));
        assert!(!pattern.matches(&path("other")));
    }

    fn sample_schema() -> SchemaNode {
        SchemaNode {
            fields: vec![
                FieldSpec {
                    name: "id".to_string(),
                    field_type: FieldType::Leaf(LeafType::Str),
                    repeated: false,
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
    fn expansion_finds_nested_field() {
        let schema = sample_schema();
        let pattern = parse_pattern("**.sub_id").unwrap();
        let matches = expand_field_pattern(&schema, &pattern);
        assert!(matches.contains(&path("sub.sub_id")));
    }

    #[test]
    fn key_type_conflict_is_reported() {
        let schema = sample_schema();
        let mut paths = HashSet::new();
        paths.insert(path("id"));
        paths.insert(path("sub.sub_id"));
        let err = infer_key_type(&schema, &paths).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::KeyTypeConflict(_))
        ));
    }
}
