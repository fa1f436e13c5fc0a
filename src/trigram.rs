//! The Trigram engine (component E): fixed-length n-gram posting lists
//! over a configurable character set, with optional positional storage
//! and delta encoding.

use crate::bagfile::{BagReader, BagWriter, FileBagReader, FileBagWriter};
use crate::config::Config;
use crate::wire::{self, WireValue};
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::Path;
use tracing::info;

fn default_ngram_size() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TrigramConfigRaw")]
pub struct TrigramConfig {
    pub character_set: String,
    pub ngram_size: usize,
    pub normalize: bool,
    pub store_positions: bool,
    pub delta_encode_record_ids: bool,
}

#[derive(Deserialize)]
struct TrigramConfigRaw {
    character_set: String,
    #[serde(default = "default_ngram_size")]
    ngram_size: usize,
    #[serde(default)]
    normalize: bool,
    #[serde(default)]
    store_positions: bool,
    #[serde(default)]
    delta_encode_record_ids: bool,
}

impl From<TrigramConfigRaw> for TrigramConfig {
    fn from(raw: TrigramConfigRaw) -> Self {
        TrigramConfig::new(
            raw.character_set,
            raw.ngram_size,
            raw.normalize,
            raw.store_positions,
            raw.delta_encode_record_ids,
        )
    }
}

impl TrigramConfig {
    pub fn new(
        character_set: impl AsRef<str>,
        ngram_size: usize,
        normalize: bool,
        store_positions: bool,
        delta_encode_record_ids: bool,
    ) -> Self {
        let mut chars: Vec<char> = character_set.as_ref().chars().collect();
        chars.sort_unstable();
        chars.dedup();
        Self {
            character_set: chars.into_iter().collect(),
            ngram_size,
            normalize,
            store_positions,
            delta_encode_record_ids,
        }
    }

    /// `character_set` widened by a trailing `" "` when `normalize` is
    /// set, since normalization can itself introduce spaces into the
    /// text being addressed and those spaces must be addressable too.
    pub fn effective_character_set(&self) -> String {
        if self.normalize {
            format!("{} ", self.character_set)
        } else {
            self.character_set.clone()
        }
    }

    pub fn char_to_index_map(&self) -> FxHashMap<char, usize> {
        self.effective_character_set()
            .chars()
            .enumerate()
            .map(|(i, c)| (c, i))
            .collect()
    }

    pub fn base(&self) -> usize {
        self.effective_character_set().chars().count()
    }

    pub fn num_slots(&self) -> usize {
        self.base().pow(self.ngram_size as u32)
    }

    /// Lowercases `text`, collapses runs of characters outside the
    /// character set to a single space, and trims the result.
    pub fn normalize_text(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let charset: BTreeSet<char> = self.character_set.chars().collect();
        let mut out = String::with_capacity(lowered.len());
        let mut prev_was_gap = false;
        for c in lowered.chars() {
            if charset.contains(&c) {
                out.push(c);
                prev_was_gap = false;
            } else if !prev_was_gap {
                out.push(' ');
                prev_was_gap = true;
            }
        }
        out.trim().to_string()
    }

    /// Maps an n-gram's characters to a slot index, or `None` if any
    /// character falls outside the effective character set.
    pub fn ngram_slot(&self, ngram: &str, char_map: &FxHashMap<char, usize>) -> Option<usize> {
        let base = self.base();
        let mut slot = 0usize;
        for c in ngram.chars() {
            let idx = *char_map.get(&c)?;
            slot = slot * base + idx;
        }
        Some(slot)
    }

    fn ngrams<'a>(&self, text: &'a str) -> Vec<(usize, &'a str)> {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let n = self.ngram_size;
        if chars.len() < n {
            return Vec::new();
        }
        let mut out = Vec::new();
        for start in 0..=(chars.len() - n) {
            let byte_start = chars[start].0;
            let byte_end = if start + n < chars.len() {
                chars[start + n].0
            } else {
                text.len()
            };
            out.push((start, &text[byte_start..byte_end]));
        }
        out
    }
}

/// Strictly-ascending-integer delta encoding: each element after the first
/// becomes its difference from its predecessor.
pub fn delta_encode(values: &[i64]) -> Vec<i64> {
    let mut out = Vec::with_capacity(values.len());
    let mut prev = 0i64;
    for (i, &v) in values.iter().enumerate() {
        out.push(if i == 0 { v } else { v - prev });
        prev = v;
    }
    out
}

pub fn delta_decode(deltas: &[i64]) -> Vec<i64> {
    let mut out = Vec::with_capacity(deltas.len());
    let mut running = 0i64;
    for (i, &d) in deltas.iter().enumerate() {
        running = if i == 0 { d } else { running + d };
        out.push(running);
    }
    out
}

struct PostingList {
    record_ids: Vec<i64>,
    record_offsets: Option<Vec<i64>>,
}

fn write_posting_list<W: std::io::Write>(w: &mut W, posting: &PostingList) -> std::io::Result<()> {
    wire::write_packed_i64_field(w, 1, &posting.record_ids)?;
    if let Some(offsets) = &posting.record_offsets {
        wire::write_packed_i64_field(w, 2, offsets)?;
    }
    Ok(())
}

fn read_posting_list(bytes: &[u8]) -> Result<PostingList> {
    let mut cursor = Cursor::new(bytes);
    let mut record_ids = Vec::new();
    let mut record_offsets = None;
    while let Some((field, value)) = wire::read_field(&mut cursor)? {
        let WireValue::Bytes(payload) = value else {
            anyhow::bail!("PostingList field was not length-delimited");
        };
        match field {
            1 => record_ids = wire::decode_packed_i64(&payload)?,
            2 => record_offsets = Some(wire::decode_packed_i64(&payload)?),
            _ => {}
        }
    }
    Ok(PostingList {
        record_ids,
        record_offsets,
    })
}

enum Accumulator {
    Simple(Vec<BTreeSet<i64>>),
    Positional(Vec<Vec<(i64, i64)>>),
}

pub struct TrigramWriter {
    config: TrigramConfig,
    char_map: FxHashMap<char, usize>,
    slots: Accumulator,
}

impl TrigramWriter {
    pub fn new(config: TrigramConfig) -> Self {
        let num_slots = config.num_slots();
        let char_map = config.char_to_index_map();
        let slots = if config.store_positions {
            Accumulator::Positional((0..num_slots).map(|_| Vec::new()).collect())
        } else {
            Accumulator::Simple((0..num_slots).map(|_| BTreeSet::new()).collect())
        };
        Self {
            config,
            char_map,
            slots,
        }
    }

    pub fn add_text(&mut self, text: &str, record_id: i64) {
        let normalized;
        let text = if self.config.normalize {
            normalized = self.config.normalize_text(text);
            normalized.as_str()
        } else {
            text
        };
        for (offset, ngram) in self.config.ngrams(text) {
            let Some(slot) = self.config.ngram_slot(ngram, &self.char_map) else {
                continue;
            };
            match &mut self.slots {
                Accumulator::Simple(postings) => {
                    postings[slot].insert(record_id);
                }
                Accumulator::Positional(postings) => {
                    postings[slot].push((record_id, offset as i64));
                }
            }
        }
    }

    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let mut writer = FileBagWriter::create(path.as_ref())?;
        match self.slots {
            Accumulator::Simple(postings) => {
                info!(slots = postings.len(), "writing simple trigram index");
                for set in postings {
                    if set.is_empty() {
                        writer.append(b"")?;
                        continue;
                    }
                    let mut record_ids: Vec<i64> = set.into_iter().collect();
                    if self.config.delta_encode_record_ids {
                        record_ids = delta_encode(&record_ids);
                    }
                    let mut buf = Vec::new();
                    write_posting_list(
                        &mut buf,
                        &PostingList {
                            record_ids,
                            record_offsets: None,
                        },
                    )?;
                    writer.append(&buf)?;
                }
            }
            Accumulator::Positional(postings) => {
                info!(slots = postings.len(), "writing positional trigram index");
                for mut pairs in postings {
                    if pairs.is_empty() {
                        writer.append(b"")?;
                        continue;
                    }
                    pairs.sort_unstable();
                    let mut record_ids: Vec<i64> = pairs.iter().map(|(rid, _)| *rid).collect();
                    let record_offsets: Vec<i64> = pairs.iter().map(|(_, off)| *off).collect();
                    if self.config.delta_encode_record_ids {
                        record_ids = delta_encode(&record_ids);
                    }
                    let mut buf = Vec::new();
                    write_posting_list(
                        &mut buf,
                        &PostingList {
                            record_ids,
                            record_offsets: Some(record_offsets),
                        },
                    )?;
                    writer.append(&buf)?;
                }
            }
        }
        let descriptor = Config::Trigram(self.config).to_json()?;
        writer.append(descriptor.as_bytes())?;
        writer.close()
    }
}

trait Matcher {
    fn feed(&mut self, offset: i64, posting: &PostingList) -> bool;
    fn record_ids(self: Box<Self>) -> Vec<i64>;
}

struct SimpleMatcher {
    running: Option<BTreeSet<i64>>,
}

impl Matcher for SimpleMatcher {
    fn feed(&mut self, _offset: i64, posting: &PostingList) -> bool {
        let ids: BTreeSet<i64> = posting.record_ids.iter().copied().collect();
        self.running = Some(match self.running.take() {
            None => ids,
            Some(running) => running.intersection(&ids).copied().collect(),
        });
        !self.running.as_ref().unwrap().is_empty()
    }

    fn record_ids(self: Box<Self>) -> Vec<i64> {
        self.running.map(|s| s.into_iter().collect()).unwrap_or_default()
    }
}

struct PositionMatcher {
    running: Option<BTreeSet<(i64, i64)>>,
}

impl Matcher for PositionMatcher {
    fn feed(&mut self, offset: i64, posting: &PostingList) -> bool {
        let empty = Vec::new();
        let offsets = posting.record_offsets.as_ref().unwrap_or(&empty);
        let pairs: BTreeSet<(i64, i64)> = posting
            .record_ids
            .iter()
            .zip(offsets.iter())
            .map(|(&rid, &pos)| (rid, pos - offset))
            .collect();
        self.running = Some(match self.running.take() {
            None => pairs,
            Some(running) => running.intersection(&pairs).copied().collect(),
        });
        !self.running.as_ref().unwrap().is_empty()
    }

    fn record_ids(self: Box<Self>) -> Vec<i64> {
        self.running
            .map(|pairs| pairs.into_iter().map(|(rid, _)| rid).collect::<BTreeSet<_>>())
            .unwrap_or_default()
            .into_iter()
            .collect()
    }
}

pub struct TrigramReader {
    bag: Box<dyn BagReader>,
    config: TrigramConfig,
    char_map: FxHashMap<char, usize>,
}

impl TrigramReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bag = FileBagReader::open(path.as_ref())?;
        let descriptor_bytes = bag.get(bag.len() - 1)?;
        let descriptor_json = String::from_utf8(descriptor_bytes)?;
        let Config::Trigram(config) = Config::from_json(&descriptor_json)? else {
            anyhow::bail!("{:?} is not a trigram index", path.as_ref());
        };
        let char_map = config.char_to_index_map();
        Ok(Self {
            bag: Box::new(bag),
            config,
            char_map,
        })
    }

    pub fn requires_post_filtering(&self) -> bool {
        !self.config.store_positions
    }

    pub fn search(&self, query: &str) -> Result<Vec<i64>> {
        let normalized;
        let query = if self.config.normalize {
            normalized = self.config.normalize_text(query);
            normalized.as_str()
        } else {
            query
        };
        if query.chars().count() < self.config.ngram_size {
            return Ok(Vec::new());
        }

        let mut matcher: Box<dyn Matcher> = if self.config.store_positions {
            Box::new(PositionMatcher { running: None })
        } else {
            Box::new(SimpleMatcher { running: None })
        };

        for (offset, ngram) in self.config.ngrams(query) {
            let Some(slot) = self.config.ngram_slot(ngram, &self.char_map) else {
                continue;
            };
            let slot_bytes = self.bag.get(slot)?;
            if slot_bytes.is_empty() {
                return Ok(Vec::new());
            }
            let mut posting = read_posting_list(&slot_bytes)?;
            if self.config.delta_encode_record_ids {
                posting.record_ids = delta_decode(&posting.record_ids);
            }
            if !matcher.feed(offset as i64, &posting) {
                return Ok(Vec::new());
            }
        }

        let mut ids = matcher.record_ids();
        ids.sort_unstable();
        Ok(ids)
    }
}

/// Merges multiple trigram indices sharing an identical config, slot by
/// slot. Slot count comes directly from `len(inputs[0]) - 1` since, unlike
/// HashBucket, the slot space is fixed by the config rather than the data.
pub fn merge(config: &TrigramConfig, input_paths: &[std::path::PathBuf], output_path: &Path) -> Result<()> {
    if input_paths.is_empty() {
        let mut writer = FileBagWriter::create(output_path)?;
        let descriptor = Config::Trigram(config.clone()).to_json()?;
        writer.append(descriptor.as_bytes())?;
        return writer.close();
    }

    let readers: Vec<FileBagReader> = input_paths
        .iter()
        .map(FileBagReader::open)
        .collect::<Result<_>>()?;
    let num_postings = readers[0].len() - 1;
    info!(slots = num_postings, inputs = input_paths.len(), "merging trigram indices");

    let mut writer = FileBagWriter::create(output_path)?;
    for slot in 0..num_postings {
        let mut postings = Vec::new();
        for reader in &readers {
            let bytes = reader.get(slot)?;
            if bytes.is_empty() {
                continue;
            }
            postings.push(read_posting_list(&bytes)?);
        }

        if postings.is_empty() {
            writer.append(b"")?;
            continue;
        }
        if postings.len() == 1 && !config.delta_encode_record_ids {
            let mut buf = Vec::new();
            write_posting_list(&mut buf, &postings[0])?;
            writer.append(&buf)?;
            continue;
        }

        if config.delta_encode_record_ids {
            for posting in &mut postings {
                posting.record_ids = delta_decode(&posting.record_ids);
            }
        }

        let merged = if config.store_positions {
            let mut pairs: BTreeSet<(i64, i64)> = BTreeSet::new();
            for posting in &postings {
                let offsets = posting.record_offsets.as_ref().context("positional posting missing offsets")?;
                pairs.extend(posting.record_ids.iter().copied().zip(offsets.iter().copied()));
            }
            let mut record_ids: Vec<i64> = pairs.iter().map(|(rid, _)| *rid).collect();
            let record_offsets: Vec<i64> = pairs.iter().map(|(_, off)| *off).collect();
            if config.delta_encode_record_ids {
                record_ids = delta_encode(&record_ids);
            }
            PostingList {
                record_ids,
                record_offsets: Some(record_offsets),
            }
        } else {
            let mut ids: BTreeSet<i64> = BTreeSet::new();
            for posting in &postings {
                ids.extend(posting.record_ids.iter().copied());
            }
            let mut record_ids: Vec<i64> = ids.into_iter().collect();
            if config.delta_encode_record_ids {
                record_ids = delta_encode(&record_ids);
            }
            PostingList {
                record_ids,
                record_offsets: None,
            }
        };

        let mut buf = Vec::new();
        write_posting_list(&mut buf, &merged)?;
        writer.append(&buf)?;
    }

    let descriptor = Config::Trigram(config.clone()).to_json()?;
    writer.append(descriptor.as_bytes())?;
    writer.close()
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";

    fn cfg(normalize: bool, store_positions: bool, delta: bool) -> TrigramConfig {
        TrigramConfig::new(LOWERCASE, 3, normalize, store_positions, delta)
    }

    const TEST_DOCS: [&str; 6] = [
        "hello world",
        "world of wonders",
        "hello there",
        "a whole new world",
        "ear sea archers",
        "search and rescue",
    ];

    fn build_index(path: &std::path::Path, config: TrigramConfig) {
        let mut writer = TrigramWriter::new(config);
        for (i, doc) in TEST_DOCS.iter().enumerate() {
            writer.add_text(doc, i as i64);
        }
        writer.write(path).unwrap();
    }

    fn assert_seed_searches(reader: &TrigramReader, normalize: bool) {
        let mut results = reader.search("search").unwrap();
        results.sort_unstable();
        if reader.config.store_positions {
            assert_eq!(results, vec![5]);
        } else {
            assert_eq!(results, vec![4, 5]);
        }

        let mut results = reader.search("world").unwrap();
        results.sort_unstable();
        assert_eq!(results, vec![0, 1, 3]);

        let mut results = reader.search("ld of w").unwrap();
        results.sort_unstable();
        if normalize {
            assert_eq!(results, vec![1]);
        } else {
            assert_eq!(results, Vec::<i64>::new());
        }

        assert_eq!(reader.search("xyzxyz").unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn delta_round_trips() {
        let values = vec![1i64, 4, 4, 10, 55];
        assert_eq!(delta_decode(&delta_encode(&values)), values);
    }

    #[test]
    fn effective_character_set_adds_space_only_when_normalizing() {
        assert_eq!(cfg(false, false, false).base(), 26);
        assert_eq!(cfg(true, false, false).base(), 27);
    }

    #[test]
    fn ngram_slot_accounts_for_the_addressable_space() {
        let config = cfg(true, false, false);
        let char_map = config.char_to_index_map();
        let base = 27;
        assert_eq!(config.ngram_slot("aaa", &char_map), Some(0));
        assert_eq!(config.ngram_slot("aa ", &char_map), Some(26));
        assert_eq!(config.ngram_slot("a a", &char_map), Some(26 * base));
    }

    #[test]
    fn simple_search_over_seed_documents_without_normalization() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bag");
        build_index(&path, cfg(false, false, false));
        let reader = TrigramReader::open(&path).unwrap();
        assert!(reader.requires_post_filtering());
        assert_seed_searches(&reader, false);
    }

    #[test]
    fn simple_search_over_seed_documents_with_normalization() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bag");
        build_index(&path, cfg(true, false, true));
        let reader = TrigramReader::open(&path).unwrap();
        assert_seed_searches(&reader, true);
    }

    #[test]
    fn positional_search_over_seed_documents_has_no_false_positives() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bag");
        build_index(&path, cfg(true, true, true));
        let reader = TrigramReader::open(&path).unwrap();
        assert!(!reader.requires_post_filtering());
        assert_seed_searches(&reader, true);
    }

    #[test]
    fn short_query_returns_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bag");
        build_index(&path, cfg(false, false, false));
        let reader = TrigramReader::open(&path).unwrap();
        assert_eq!(reader.search("ab").unwrap(), Vec::<i64>::new());
    }
}
