//! The bag-file adapter (component B): an interface over an external
//! append-only byte-string container, plus one concrete file-backed
//! implementation so the crate is self-contained.
//!
//! A bag file is a dense sequence of opaque byte-string entries. Readers
//! support O(1) random access by position; writers only ever append. Every
//! index this crate produces is itself a bag file whose last entry is a
//! JSON descriptor (see [`crate::config`]).

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Random-read access to a bag file's entries.
pub trait BagReader {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn get(&self, index: usize) -> Result<Vec<u8>>;
}

/// Append-only, insertion-ordered writing of a bag file's entries.
pub trait BagWriter {
    fn append(&mut self, entry: &[u8]) -> Result<()>;
    fn close(self) -> Result<()>;
}

/// File-backed [`BagReader`]/[`BagWriter`].
///
/// On-disk layout: entries are concatenated back to back, followed by a
/// footer of `count + 1` little-endian `u64` offsets (the start of each
/// entry, plus one trailing offset equal to the total data length), and
/// finally a single little-endian `u64` holding `count`. Opening seeks to
/// the last 8 bytes to learn `count`, then loads the offset table once.
pub struct FileBagReader {
    file: File,
    offsets: Vec<u64>,
}

impl FileBagReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path.as_ref())
            .with_context(|| format!("opening bag file {:?}", path.as_ref()))?;
        let file_len = file.metadata()?.len();
        if file_len < 8 {
            anyhow::bail!("bag file too short to contain a footer: {file_len} bytes");
        }

        file.seek(SeekFrom::End(-8))?;
        let count = file.read_u64::<LittleEndian>()?;

        let footer_len = (count + 1) * 8 + 8;
        if footer_len > file_len {
            anyhow::bail!("bag file footer claims {count} entries but file is too short");
        }
        file.seek(SeekFrom::End(-(footer_len as i64)))?;

        let mut offsets = Vec::with_capacity(count as usize + 1);
        for _ in 0..=count {
            offsets.push(file.read_u64::<LittleEndian>()?);
        }

        Ok(Self { file, offsets })
    }
}

impl BagReader for FileBagReader {
    fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    fn get(&self, index: usize) -> Result<Vec<u8>> {
        if index >= self.len() {
            anyhow::bail!("entry {index} out of range (len {})", self.len());
        }
        let start = self.offsets[index];
        let end = self.offsets[index + 1];
        let mut buf = vec![0u8; (end - start) as usize];
        // `read_exact_at`-style positional read without requiring a
        // persistent cursor: every call seeks explicitly, which keeps
        // `&self` reads safe to issue in any order.
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

pub struct FileBagWriter {
    writer: BufWriter<File>,
    offsets: Vec<u64>,
    position: u64,
}

impl FileBagWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("creating bag file {:?}", path.as_ref()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            offsets: vec![0],
            position: 0,
        })
    }
}

impl BagWriter for FileBagWriter {
    fn append(&mut self, entry: &[u8]) -> Result<()> {
        self.writer.write_all(entry)?;
        self.position += entry.len() as u64;
        self.offsets.push(self.position);
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        for offset in &self.offsets {
            self.writer.write_u64::<LittleEndian>(*offset)?;
        }
        let count = (self.offsets.len() - 1) as u64;
        self.writer.write_u64::<LittleEndian>(count)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_preserves_order_and_empty_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bag");

        let mut writer = FileBagWriter::create(&path).unwrap();
        writer.append(b"hello").unwrap();
        writer.append(b"").unwrap();
        writer.append(b"world").unwrap();
        writer.close().unwrap();

        let reader = FileBagReader::open(&path).unwrap();
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.get(0).unwrap(), b"hello");
        assert_eq!(reader.get(1).unwrap(), b"");
        assert_eq!(reader.get(2).unwrap(), b"world");
        assert!(reader.get(3).is_err());
    }

    #[test]
    fn empty_bag_has_zero_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bag");
        FileBagWriter::create(&path).unwrap().close().unwrap();

        let reader = FileBagReader::open(&path).unwrap();
        assert_eq!(reader.len(), 0);
        assert!(reader.is_empty());
    }
}
