//! The dump/inspect surface (component I): walks an index and returns a
//! structured sequence of entries, independent of how it is rendered.

use crate::bagfile::{BagReader, FileBagReader};
use crate::config::{self, Config};
use crate::hashbucket::HashBucketConfig;
use crate::key::KeyValue;
use crate::trigram::{self, TrigramConfig};
use crate::wire::{self, WireValue};
use anyhow::Result;
use std::io::Cursor;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum DumpEntry {
    HashBucketKey {
        key: KeyValue,
        record_ids: Vec<i64>,
    },
    TrigramSlot {
        slot: usize,
        record_ids: Vec<i64>,
        record_offsets: Option<Vec<i64>>,
    },
}

fn dump_hashbucket(bag: &dyn BagReader, config: &HashBucketConfig) -> Result<Vec<DumpEntry>> {
    let num_buckets = bag.len() - 1;
    let mut entries = Vec::new();
    for bucket_idx in 0..num_buckets {
        let bytes = bag.get(bucket_idx)?;
        if bytes.is_empty() {
            continue;
        }
        let mut cursor = Cursor::new(bytes);
        while let Some((field, value)) = wire::read_field(&mut cursor)? {
            if field != 1 {
                continue;
            }
            let WireValue::Bytes(record_bytes) = value else {
                continue;
            };
            let mut record_cursor = Cursor::new(record_bytes);
            let mut key_bytes = None;
            let mut record_ids = Vec::new();
            while let Some((f, v)) = wire::read_field(&mut record_cursor)? {
                match (f, v) {
                    (1, WireValue::Bytes(b)) => key_bytes = Some(b),
                    (2, WireValue::Bytes(b)) => record_ids = wire::decode_packed_i64(&b)?,
                    _ => {}
                }
            }
            let Some(key_bytes) = key_bytes else { continue };
            let key = KeyValue::deserialize(&config.key_proto_name, &key_bytes)?;
            entries.push(DumpEntry::HashBucketKey { key, record_ids });
        }
    }
    Ok(entries)
}

fn dump_trigram(bag: &dyn BagReader, config: &TrigramConfig) -> Result<Vec<DumpEntry>> {
    let num_slots = bag.len() - 1;
    let mut entries = Vec::new();
    for slot in 0..num_slots {
        let bytes = bag.get(slot)?;
        if bytes.is_empty() {
            continue;
        }
        let mut cursor = Cursor::new(bytes);
        let mut record_ids = Vec::new();
        let mut record_offsets = None;
        while let Some((field, value)) = wire::read_field(&mut cursor)? {
            let WireValue::Bytes(payload) = value else {
                continue;
            };
            match field {
                1 => record_ids = wire::decode_packed_i64(&payload)?,
                2 => record_offsets = Some(wire::decode_packed_i64(&payload)?),
                _ => {}
            }
        }
        if config.delta_encode_record_ids {
            record_ids = trigram::delta_decode(&record_ids);
        }
        entries.push(DumpEntry::TrigramSlot {
            slot,
            record_ids,
            record_offsets,
        });
    }
    Ok(entries)
}

pub fn dump(path: impl AsRef<Path>) -> Result<Vec<DumpEntry>> {
    let bag = FileBagReader::open(path.as_ref())?;
    let config = config::read_descriptor(&bag)?;
    match config {
        Config::HashBucket(cfg) => dump_hashbucket(&bag, &cfg),
        Config::Trigram(cfg) => dump_trigram(&bag, &cfg),
    }
}

/// Human-readable rendering of a dump sequence, as used by the CLI.
pub fn render(entries: &[DumpEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        match entry {
            DumpEntry::HashBucketKey { key, record_ids } => {
                out.push_str(&format!("{key:?} -> {record_ids:?}\n"));
            }
            DumpEntry::TrigramSlot {
                slot,
                record_ids,
                record_offsets,
            } => match record_offsets {
                Some(offsets) => out.push_str(&format!(
                    "slot {slot}: ids={record_ids:?} offsets={offsets:?}\n"
                )),
                None => out.push_str(&format!("slot {slot}: ids={record_ids:?}\n")),
            },
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hashbucket::HashBucketWriter;
    use tempfile::tempdir;

    #[test]
    fn dumps_hashbucket_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("h.bag");
        let mut writer = HashBucketWriter::new(HashBucketConfig {
            avg_bucket_size: 2.0,
            key_proto_name: crate::key::STRING_KEY.to_string(),
        });
        writer.add(&KeyValue::Str("alpha".to_string()), &[1, 2]);
        writer.write(&path).unwrap();

        let entries = dump(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(&entries[0], DumpEntry::HashBucketKey { key, record_ids }
            if *key == KeyValue::Str("alpha".to_string()) && record_ids == &vec![1, 2]));

        let rendered = render(&entries);
        assert!(rendered.contains("alpha"));
    }
}
