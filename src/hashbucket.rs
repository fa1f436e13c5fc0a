//! The HashBucket engine (component D): an in-memory build, a serialized
//! bucket layout, keyed lookup, and a multi-input merge.

use crate::bagfile::{BagReader, BagWriter, FileBagReader, FileBagWriter};
use crate::config::Config;
use crate::error::IndexError;
use crate::key::KeyValue;
use crate::wire::{self, WireValue};
use anyhow::{Context, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashBucketConfig {
    pub avg_bucket_size: f64,
    pub key_proto_name: String,
}

/// `hash(key_bytes) mod num_buckets`, where `hash` is the little-endian
/// integer interpretation of the full 256-bit BLAKE3 digest over the
/// canonical key bytes. Reducing only a truncated prefix of the digest
/// would make this crate's on-disk indices unreadable by any other
/// conformant implementation of the format, so the whole digest is run
/// through a byte-at-a-time modular reduction (most significant byte
/// first — the digest bytes are stored little-endian, so that's index 31
/// down to index 0).
pub fn hash_key(key_bytes: &[u8], num_buckets: u64) -> u64 {
    let digest = blake3::hash(key_bytes);
    let bytes = digest.as_bytes();
    let modulus = num_buckets as u128;
    let mut acc: u128 = 0;
    for &byte in bytes.iter().rev() {
        acc = (acc * 256 + byte as u128) % modulus;
    }
    acc as u64
}

pub fn num_buckets_for(key_count: usize, avg_bucket_size: f64) -> u64 {
    let computed = (key_count as f64 / avg_bucket_size).floor() as u64;
    computed.max(1)
}

struct HashRecord {
    key_bytes: Vec<u8>,
    record_ids: Vec<i64>,
}

fn write_hash_record<W: std::io::Write>(w: &mut W, record: &HashRecord) -> std::io::Result<()> {
    wire::write_bytes_field(w, 1, &record.key_bytes)?;
    wire::write_packed_i64_field(w, 2, &record.record_ids)?;
    Ok(())
}

fn read_hash_record(bytes: &[u8]) -> Result<HashRecord> {
    let mut cursor = Cursor::new(bytes);
    let mut key_bytes = None;
    let mut record_ids = Vec::new();
    while let Some((field, value)) = wire::read_field(&mut cursor)? {
        match (field, value) {
            (1, WireValue::Bytes(b)) => key_bytes = Some(b),
            (2, WireValue::Bytes(b)) => record_ids = wire::decode_packed_i64(&b)?,
            _ => {}
        }
    }
    Ok(HashRecord {
        key_bytes: key_bytes.context("HashRecord missing key field")?,
        record_ids,
    })
}

fn write_bucket<W: std::io::Write>(w: &mut W, records: &[HashRecord]) -> std::io::Result<()> {
    for record in records {
        let mut buf = Vec::new();
        write_hash_record(&mut buf, record)?;
        wire::write_bytes_field(w, 1, &buf)?;
    }
    Ok(())
}

fn read_bucket(bytes: &[u8]) -> Result<Vec<HashRecord>> {
    let mut cursor = Cursor::new(bytes);
    let mut records = Vec::new();
    while let Some((field, value)) = wire::read_field(&mut cursor)? {
        if field == 1 {
            let WireValue::Bytes(payload) = value else {
                anyhow::bail!("HashBucket.records field was not length-delimited");
            };
            records.push(read_hash_record(&payload)?);
        }
    }
    Ok(records)
}

/// Accumulates `key_bytes -> set<record_id>` in memory until [`write`] lays
/// the keys out into their final bucket structure.
pub struct HashBucketWriter {
    config: HashBucketConfig,
    entries: FxHashMap<Vec<u8>, FxHashSet<i64>>,
}

impl HashBucketWriter {
    pub fn new(config: HashBucketConfig) -> Self {
        Self {
            config,
            entries: FxHashMap::default(),
        }
    }

    pub fn add(&mut self, key: &KeyValue, record_ids: &[i64]) {
        let key_bytes = key.serialize();
        let set = self.entries.entry(key_bytes).or_default();
        set.extend(record_ids.iter().copied());
    }

    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let num_buckets = num_buckets_for(self.entries.len(), self.config.avg_bucket_size);
        info!(
            keys = self.entries.len(),
            num_buckets, "writing hashbucket index"
        );

        let mut by_bucket: Vec<Vec<HashRecord>> = (0..num_buckets).map(|_| Vec::new()).collect();
        for (key_bytes, ids) in self.entries {
            let bucket = hash_key(&key_bytes, num_buckets) as usize;
            let mut record_ids: Vec<i64> = ids.into_iter().collect();
            record_ids.sort_unstable();
            by_bucket[bucket].push(HashRecord {
                key_bytes,
                record_ids,
            });
        }

        let mut writer = FileBagWriter::create(path.as_ref())?;
        for mut records in by_bucket {
            if records.is_empty() {
                writer.append(b"")?;
                continue;
            }
            records.sort_by(|a, b| a.key_bytes.cmp(&b.key_bytes));
            let mut buf = Vec::new();
            write_bucket(&mut buf, &records)?;
            writer.append(&buf)?;
        }
        let descriptor = Config::HashBucket(self.config).to_json()?;
        writer.append(descriptor.as_bytes())?;
        writer.close()
    }
}

pub struct HashBucketReader {
    bag: Box<dyn BagReader>,
    num_buckets: u64,
}

impl HashBucketReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bag = FileBagReader::open(path)?;
        let num_buckets = (bag.len() - 1) as u64;
        Ok(Self {
            bag: Box::new(bag),
            num_buckets,
        })
    }

    pub fn lookup(&self, key: &KeyValue) -> Result<Option<Vec<i64>>> {
        let key_bytes = key.serialize();
        let bucket_idx = hash_key(&key_bytes, self.num_buckets) as usize;
        let bucket_bytes = self.bag.get(bucket_idx)?;
        if bucket_bytes.is_empty() {
            return Ok(None);
        }
        let records = read_bucket(&bucket_bytes)?;
        Ok(records
            .into_iter()
            .find(|r| r.key_bytes == key_bytes)
            .map(|r| r.record_ids))
    }
}

/// Merges multiple HashBucket indices sharing an identical config.
///
/// First pass: collect the union of distinct key bytes across all inputs
/// along with where each key's bucket lives in its source. Bucket count is
/// then recomputed from the merged key set (see the "bucket count drift on
/// merge" design decision), and every target bucket is rebuilt by
/// re-fetching and unioning the relevant source buckets.
pub fn merge(config: &HashBucketConfig, input_paths: &[std::path::PathBuf], output_path: &Path) -> Result<()> {
    let readers: Vec<FileBagReader> = input_paths
        .iter()
        .map(FileBagReader::open)
        .collect::<Result<_>>()?;

    // key_bytes -> list of (input_idx, source_bucket_idx)
    let mut locations: BTreeMap<Vec<u8>, Vec<(usize, usize)>> = BTreeMap::new();
    for (input_idx, reader) in readers.iter().enumerate() {
        let num_buckets = reader.len() - 1;
        for bucket_idx in 0..num_buckets {
            let bucket_bytes = reader.get(bucket_idx)?;
            if bucket_bytes.is_empty() {
                continue;
            }
            for record in read_bucket(&bucket_bytes)? {
                locations
                    .entry(record.key_bytes)
                    .or_default()
                    .push((input_idx, bucket_idx));
            }
        }
    }

    let num_buckets = num_buckets_for(locations.len(), config.avg_bucket_size);
    info!(
        keys = locations.len(),
        num_buckets,
        inputs = input_paths.len(),
        "merging hashbucket indices"
    );

    let mut by_bucket: Vec<Vec<Vec<u8>>> = (0..num_buckets).map(|_| Vec::new()).collect();
    for key_bytes in locations.keys() {
        let bucket = hash_key(key_bytes, num_buckets) as usize;
        by_bucket[bucket].push(key_bytes.clone());
    }

    let mut writer = FileBagWriter::create(output_path)?;
    for mut keys_in_bucket in by_bucket {
        if keys_in_bucket.is_empty() {
            writer.append(b"")?;
            continue;
        }
        keys_in_bucket.sort();
        let mut records = Vec::with_capacity(keys_in_bucket.len());
        for key_bytes in keys_in_bucket {
            let mut ids = FxHashSet::default();
            for &(input_idx, source_bucket_idx) in &locations[&key_bytes] {
                let bucket_bytes = readers[input_idx].get(source_bucket_idx)?;
                let source_records = read_bucket(&bucket_bytes)?;
                let found = source_records
                    .into_iter()
                    .find(|r| r.key_bytes == key_bytes)
                    .ok_or_else(|| IndexError::CorruptIndex(key_bytes.clone()))?;
                ids.extend(found.record_ids);
            }
            let mut record_ids: Vec<i64> = ids.into_iter().collect();
            record_ids.sort_unstable();
            debug!(key_len = key_bytes.len(), records = record_ids.len(), "merged key");
            records.push(HashRecord {
                key_bytes,
                record_ids,
            });
        }
        let mut buf = Vec::new();
        write_bucket(&mut buf, &records)?;
        writer.append(&buf)?;
    }

    let descriptor = Config::HashBucket(config.clone()).to_json()?;
    writer.append(descriptor.as_bytes())?;
    writer.close()
}
