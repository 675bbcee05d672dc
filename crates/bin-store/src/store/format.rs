//! Binary layout of bin store files.
//!
//! ```text
//! magic "L3BS" | version u32 | storage tag u8 | total_bins u64
//!              | items_per_bin u32 | record_count u64
//! record_count x ( bin index u64 | items_per_bin x f32 )
//! ```
//!
//! All integers and floats are little-endian. Records are sorted by bin index
//! and only bins with data are written, so both backends produce and accept
//! the same file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use grid_locator::BinIndex;

use crate::config::StorageType;
use crate::error::{BinStoreError, Result};

/// File magic.
pub const STORE_MAGIC: &[u8; 4] = b"L3BS";

/// Current format version.
pub const STORE_VERSION: u32 = 1;

/// Encoded header size in bytes.
pub const HEADER_LEN: usize = 4 + 4 + 1 + 8 + 4 + 8;

/// Header of a store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHeader {
    pub storage_type: StorageType,
    pub total_bins: BinIndex,
    pub items_per_bin: u32,
    pub record_count: u64,
}

impl StoreHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(STORE_MAGIC);
        buf.put_u32_le(STORE_VERSION);
        buf.put_u8(self.storage_type.tag());
        buf.put_u64_le(self.total_bins);
        buf.put_u32_le(self.items_per_bin);
        buf.put_u64_le(self.record_count);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(BinStoreError::invalid_format(format!(
                "header too short: {} bytes",
                buf.len()
            )));
        }
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != STORE_MAGIC {
            return Err(BinStoreError::invalid_format("bad magic"));
        }
        let version = buf.get_u32_le();
        if version != STORE_VERSION {
            return Err(BinStoreError::invalid_format(format!(
                "unsupported version {}",
                version
            )));
        }
        let tag = buf.get_u8();
        let storage_type = StorageType::from_tag(tag).ok_or_else(|| {
            BinStoreError::invalid_format(format!("unknown storage tag {}", tag))
        })?;

        Ok(Self {
            storage_type,
            total_bins: buf.get_u64_le(),
            items_per_bin: buf.get_u32_le(),
            record_count: buf.get_u64_le(),
        })
    }

    /// Encoded size of one record.
    pub fn record_len(&self) -> usize {
        8 + self.items_per_bin as usize * 4
    }
}

/// Streaming writer for a store file.
///
/// Writes to a sibling `.partial` file and renames it into place on
/// [`finish`](Self::finish), so a reader never sees a half-written store.
pub struct StoreWriter {
    out: BufWriter<File>,
    header: StoreHeader,
    partial_path: PathBuf,
    final_path: PathBuf,
    scratch: BytesMut,
    written: u64,
    last_index: Option<BinIndex>,
    bytes: u64,
}

impl StoreWriter {
    pub fn create(path: &Path, header: StoreHeader) -> Result<Self> {
        let partial_path = path.with_extension("partial");
        let mut out = BufWriter::new(File::create(&partial_path)?);

        let mut scratch = BytesMut::with_capacity(header.record_len().max(HEADER_LEN));
        header.encode(&mut scratch);
        out.write_all(&scratch)?;

        Ok(Self {
            out,
            header,
            partial_path,
            final_path: path.to_path_buf(),
            scratch,
            written: 0,
            last_index: None,
            bytes: HEADER_LEN as u64,
        })
    }

    /// Append one record. Indices must be strictly increasing.
    pub fn write_record(&mut self, index: BinIndex, values: &[f32]) -> Result<()> {
        if values.len() != self.header.items_per_bin as usize {
            return Err(BinStoreError::SizeMismatch {
                expected: self.header.items_per_bin as usize,
                actual: values.len(),
            });
        }
        if self.last_index.is_some_and(|last| index <= last) {
            return Err(BinStoreError::invalid_format(format!(
                "record {} written out of order",
                index
            )));
        }

        self.scratch.clear();
        self.scratch.put_u64_le(index);
        for &v in values {
            self.scratch.put_f32_le(v);
        }
        self.out.write_all(&self.scratch)?;

        self.last_index = Some(index);
        self.written += 1;
        self.bytes += self.scratch.len() as u64;
        Ok(())
    }

    /// Flush, verify the record count and move the file into place.
    ///
    /// Returns the file size in bytes.
    pub fn finish(mut self) -> Result<u64> {
        if self.written != self.header.record_count {
            return Err(BinStoreError::invalid_format(format!(
                "header announced {} records, {} written",
                self.header.record_count, self.written
            )));
        }
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        std::fs::rename(&self.partial_path, &self.final_path)?;
        Ok(self.bytes)
    }
}

/// Streaming reader for a store file.
pub struct StoreReader {
    input: BufReader<File>,
    header: StoreHeader,
    record: Vec<u8>,
    remaining: u64,
    last_index: Option<BinIndex>,
}

impl StoreReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                BinStoreError::not_found(format!("store file {}", path.display()))
            }
            _ => BinStoreError::Io(e),
        })?;
        let mut input = BufReader::new(file);

        let mut head = [0u8; HEADER_LEN];
        input.read_exact(&mut head).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                BinStoreError::invalid_format("truncated header")
            }
            _ => BinStoreError::Io(e),
        })?;
        let header = StoreHeader::decode(&head)?;

        Ok(Self {
            input,
            record: vec![0u8; header.record_len()],
            remaining: header.record_count,
            header,
            last_index: None,
        })
    }

    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    /// Read the next record into `dst`, returning its bin index, or `None`
    /// after the last record.
    pub fn next_record(&mut self, dst: &mut [f32]) -> Result<Option<BinIndex>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        if dst.len() != self.header.items_per_bin as usize {
            return Err(BinStoreError::SizeMismatch {
                expected: self.header.items_per_bin as usize,
                actual: dst.len(),
            });
        }

        self.input.read_exact(&mut self.record).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => BinStoreError::invalid_format(format!(
                "truncated store: {} records missing",
                self.remaining
            )),
            _ => BinStoreError::Io(e),
        })?;

        let mut buf = &self.record[..];
        let index = buf.get_u64_le();
        if index >= self.header.total_bins {
            return Err(BinStoreError::invalid_format(format!(
                "record index {} beyond grid of {} bins",
                index, self.header.total_bins
            )));
        }
        if self.last_index.is_some_and(|last| index <= last) {
            return Err(BinStoreError::invalid_format(format!(
                "record {} out of order",
                index
            )));
        }
        for slot in dst.iter_mut() {
            *slot = buf.get_f32_le();
        }

        self.last_index = Some(index);
        self.remaining -= 1;
        Ok(Some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(records: u64) -> StoreHeader {
        StoreHeader {
            storage_type: StorageType::Quad,
            total_bins: 128,
            items_per_bin: 3,
            record_count: records,
        }
    }

    #[test]
    fn test_header_encode_decode() {
        let h = header(5);
        let mut buf = BytesMut::new();
        h.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(StoreHeader::decode(&buf).unwrap(), h);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut buf = BytesMut::new();
        header(0).encode(&mut buf);
        buf[0] = b'X';
        assert!(matches!(
            StoreHeader::decode(&buf),
            Err(BinStoreError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_write_and_read_records() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("bins.l3bin");

        let mut writer = StoreWriter::create(&path, header(2)).unwrap();
        writer.write_record(3, &[1.0, 2.0, 3.0]).unwrap();
        writer.write_record(120, &[4.0, 5.0, 6.0]).unwrap();
        let bytes = writer.finish().unwrap();
        assert_eq!(bytes, std::fs::metadata(&path).unwrap().len());
        assert!(!path.with_extension("partial").exists());

        let mut reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.header().storage_type, StorageType::Quad);
        let mut values = [0.0f32; 3];
        assert_eq!(reader.next_record(&mut values).unwrap(), Some(3));
        assert_eq!(values, [1.0, 2.0, 3.0]);
        assert_eq!(reader.next_record(&mut values).unwrap(), Some(120));
        assert_eq!(values, [4.0, 5.0, 6.0]);
        assert_eq!(reader.next_record(&mut values).unwrap(), None);
    }

    #[test]
    fn test_writer_rejects_unsorted_and_short_counts() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("bins.l3tmp");

        let mut writer = StoreWriter::create(&path, header(2)).unwrap();
        writer.write_record(10, &[0.0; 3]).unwrap();
        assert!(writer.write_record(10, &[0.0; 3]).is_err());
        assert!(writer.write_record(11, &[0.0; 2]).is_err());
        assert!(writer.finish().is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_reader_detects_truncation() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("bins.l3bin");

        let mut writer = StoreWriter::create(&path, header(1)).unwrap();
        writer.write_record(0, &[1.0, 2.0, 3.0]).unwrap();
        writer.finish().unwrap();

        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 4]).unwrap();

        let mut reader = StoreReader::open(&path).unwrap();
        let mut values = [0.0f32; 3];
        assert!(matches!(
            reader.next_record(&mut values),
            Err(BinStoreError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        assert!(matches!(
            StoreReader::open(&dir.path().join("nope.l3bin")),
            Err(BinStoreError::NotFound(_))
        ));
    }
}
