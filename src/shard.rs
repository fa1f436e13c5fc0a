//! The sharded build driver (component F): bounds memory during a build by
//! periodically flushing an in-progress writer to a scratch directory and
//! merging all shards together once the driver is closed.

use crate::hashbucket::{HashBucketConfig, HashBucketWriter};
use crate::key::KeyValue;
use crate::trigram::{TrigramConfig, TrigramWriter};
use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

pub const DEFAULT_SHARD_LIMIT: usize = 200_000;

fn shard_path(tmpdir: &Path, output_path: &Path, shard_index: usize) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "shard".to_string());
    let suffix = output_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    tmpdir.join(format!("{stem}-{shard_index:05}{suffix}"))
}

pub struct ShardedKeyIndexBuilder {
    config: HashBucketConfig,
    shard_limit: usize,
    output_path: PathBuf,
    tmpdir: TempDir,
    shard_index: usize,
    count_since_flush: usize,
    current: HashBucketWriter,
    shard_paths: Vec<PathBuf>,
}

impl ShardedKeyIndexBuilder {
    pub fn new(config: HashBucketConfig, output_path: impl Into<PathBuf>, shard_limit: usize) -> Result<Self> {
        let tmpdir = tempfile::tempdir()?;
        Ok(Self {
            current: HashBucketWriter::new(config.clone()),
            config,
            shard_limit,
            output_path: output_path.into(),
            tmpdir,
            shard_index: 0,
            count_since_flush: 0,
            shard_paths: Vec::new(),
        })
    }

    pub fn add(&mut self, key: &KeyValue, record_ids: &[i64]) -> Result<()> {
        self.current.add(key, record_ids);
        self.count_since_flush += 1;
        if self.count_since_flush >= self.shard_limit {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let path = shard_path(self.tmpdir.path(), &self.output_path, self.shard_index);
        let writer = std::mem::replace(&mut self.current, HashBucketWriter::new(self.config.clone()));
        debug!(shard = self.shard_index, records = self.count_since_flush, "flushing shard");
        writer.write(&path)?;
        self.shard_paths.push(path);
        self.shard_index += 1;
        self.count_since_flush = 0;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        info!(shards = self.shard_paths.len(), "merging shards into final hashbucket index");
        crate::hashbucket::merge(&self.config, &self.shard_paths, &self.output_path)
    }
}

pub struct ShardedTextIndexBuilder {
    config: TrigramConfig,
    shard_limit: usize,
    output_path: PathBuf,
    tmpdir: TempDir,
    shard_index: usize,
    count_since_flush: usize,
    current: TrigramWriter,
    shard_paths: Vec<PathBuf>,
}

impl ShardedTextIndexBuilder {
    pub fn new(config: TrigramConfig, output_path: impl Into<PathBuf>, shard_limit: usize) -> Result<Self> {
        let tmpdir = tempfile::tempdir()?;
        Ok(Self {
            current: TrigramWriter::new(config.clone()),
            config,
            shard_limit,
            output_path: output_path.into(),
            tmpdir,
            shard_index: 0,
            count_since_flush: 0,
            shard_paths: Vec::new(),
        })
    }

    pub fn add_text(&mut self, text: &str, record_id: i64) -> Result<()> {
        self.current.add_text(text, record_id);
        self.count_since_flush += 1;
        if self.count_since_flush >= self.shard_limit {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let path = shard_path(self.tmpdir.path(), &self.output_path, self.shard_index);
        let writer = std::mem::replace(&mut self.current, TrigramWriter::new(self.config.clone()));
        debug!(shard = self.shard_index, records = self.count_since_flush, "flushing shard");
        writer.write(&path)?;
        self.shard_paths.push(path);
        self.shard_index += 1;
        self.count_since_flush = 0;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        info!(shards = self.shard_paths.len(), "merging shards into final trigram index");
        crate::trigram::merge(&self.config, &self.shard_paths, &self.output_path)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hashbucket::HashBucketReader;
    use crate::trigram::TrigramReader;
    use tempfile::tempdir;

    #[test]
    fn key_builder_flushes_shards_and_merges_on_close() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.bag");
        let config = HashBucketConfig {
            avg_bucket_size: 2.0,
            key_proto_name: crate::key::STRING_KEY.to_string(),
        };
        let mut builder = ShardedKeyIndexBuilder::new(config, &output, 2).unwrap();
        for (i, name) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            builder.add(&KeyValue::Str(name.to_string()), &[i as i64]).unwrap();
        }
        builder.close().unwrap();

        let reader = HashBucketReader::open(&output).unwrap();
        assert_eq!(reader.lookup(&KeyValue::Str("c".to_string())).unwrap(), Some(vec![2]));
    }

    #[test]
    fn empty_key_builder_produces_valid_empty_index() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.bag");
        let config = HashBucketConfig {
            avg_bucket_size: 2.0,
            key_proto_name: crate::key::STRING_KEY.to_string(),
        };
        ShardedKeyIndexBuilder::new(config, &output, 10).unwrap().close().unwrap();
        let reader = HashBucketReader::open(&output).unwrap();
        assert_eq!(reader.lookup(&KeyValue::Str("anything".to_string())).unwrap(), None);
    }

    #[test]
    fn text_builder_flushes_shards_and_merges_on_close() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.bag");
        let config = TrigramConfig::new("abcdefghijklmnopqrstuvwxyz ", 3, true, false, true);
        let mut builder = ShardedTextIndexBuilder::new(config, &output, 1).unwrap();
        builder.add_text("hello world", 0).unwrap();
        builder.add_text("goodbye world", 1).unwrap();
        builder.close().unwrap();

        let reader = TrigramReader::open(&output).unwrap();
        let mut results = reader.search("world").unwrap();
        results.sort_unstable();
        assert_eq!(results, vec![0, 1]);
    }
}
