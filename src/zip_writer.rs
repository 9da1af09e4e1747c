/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Minimal ZIP writer that controls every local header byte.
//!
//! `zip::ZipWriter` picks its own extra fields, so the padding written in
//! front of each entry's data could not be reproduced with it. This writer
//! emits local headers, raw entry data, the central directory and the end
//! record itself. ZIP64 is not supported.

use flate2::{write::DeflateEncoder, Compression};
use std::io::{self, Read, Write};
use zip::DateTime;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;
pub const LOCAL_HEADER_LEN: u64 = 30;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATED: u16 = 8;

const FLAG_UTF8: u16 = 0x0800;
const VERSION_NEEDED: u16 = 20;
/// Unix host, ZIP format version 2.0.
const VERSION_MADE_BY_UNIX: u16 = 0x0314;
const DOS_DIRECTORY_ATTR: u32 = 0x10;

/// How many zero bytes go into a local header's extra field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PaddingRule {
    /// `(offset + 30 + name_len) mod 4`, where `offset` counts only the
    /// uncompressed content of the entries written before. Headers are not
    /// counted, so the data is not actually aligned.
    #[default]
    Legacy,
    /// Pads so that entry data starts on a 4-byte boundary.
    Aligned,
}

impl PaddingRule {
    pub fn padding(&self, offset: u64, name_len: usize) -> usize {
        let header_end = offset + LOCAL_HEADER_LEN + name_len as u64;
        match self {
            PaddingRule::Legacy => (header_end % 4) as usize,
            PaddingRule::Aligned => ((4 - header_end % 4) % 4) as usize,
        }
    }
}

/// Everything a local and central header need to describe one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Name bytes exactly as they go into the headers.
    pub name: Vec<u8>,
    /// Whether `name` is UTF-8 (general purpose flag bit 11).
    pub utf8: bool,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub last_modified: DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

impl EntryHeader {
    fn flags(&self) -> u16 {
        if self.utf8 && !self.name.is_ascii() {
            FLAG_UTF8
        } else {
            0
        }
    }

    fn external_attributes(&self) -> u32 {
        match self.unix_mode {
            Some(mode) if self.is_dir => (mode << 16) | DOS_DIRECTORY_ATTR,
            Some(mode) => mode << 16,
            None if self.is_dir => DOS_DIRECTORY_ATTR,
            None => 0,
        }
    }

    fn version_made_by(&self) -> u16 {
        if self.unix_mode.is_some() {
            VERSION_MADE_BY_UNIX
        } else {
            VERSION_NEEDED
        }
    }
}

#[derive(Debug)]
struct CentralRecord {
    header: EntryHeader,
    local_offset: u32,
}

fn zip64_error(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} exceeds the ZIP32 limit (ZIP64 is not supported)", what),
    )
}

fn to_u32(value: u64, what: &str) -> io::Result<u32> {
    u32::try_from(value).map_err(|_| zip64_error(what))
}

/// Counts bytes written so the next local header offset is always known.
pub struct AlignedZipWriter<W: Write> {
    inner: W,
    offset: u64,
    /// Sum of the uncompressed sizes written so far; the `Legacy` basis.
    content_offset: u64,
    padding: PaddingRule,
    central: Vec<CentralRecord>,
}

impl<W: Write> AlignedZipWriter<W> {
    pub fn new(inner: W, padding: PaddingRule) -> Self {
        Self {
            inner,
            offset: 0,
            content_offset: 0,
            padding,
            central: Vec::new(),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The offset the padding rule is applied to for the next entry.
    fn padding_basis(&self) -> u64 {
        match self.padding {
            PaddingRule::Legacy => self.content_offset,
            PaddingRule::Aligned => self.offset,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.central.len()
    }

    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    fn start_entry(&mut self, header: EntryHeader) -> io::Result<()> {
        let name_len = u16::try_from(header.name.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "entry name too long"))?;
        let local_offset = to_u32(self.offset, "archive offset")?;
        let compressed = to_u32(header.compressed_size, "entry size")?;
        let uncompressed = to_u32(header.uncompressed_size, "entry size")?;
        let extra_len = self.padding.padding(self.padding_basis(), header.name.len());

        let mut buf = Vec::with_capacity(LOCAL_HEADER_LEN as usize + header.name.len() + extra_len);
        buf.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        buf.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
        buf.extend_from_slice(&header.flags().to_le_bytes());
        buf.extend_from_slice(&header.method.to_le_bytes());
        buf.extend_from_slice(&header.last_modified.timepart().to_le_bytes());
        buf.extend_from_slice(&header.last_modified.datepart().to_le_bytes());
        buf.extend_from_slice(&header.crc32.to_le_bytes());
        buf.extend_from_slice(&compressed.to_le_bytes());
        buf.extend_from_slice(&uncompressed.to_le_bytes());
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(&(extra_len as u16).to_le_bytes());
        buf.extend_from_slice(&header.name);
        buf.resize(buf.len() + extra_len, 0);
        self.put(&buf)?;
        self.content_offset += header.uncompressed_size;

        self.central.push(CentralRecord {
            header,
            local_offset,
        });
        Ok(())
    }

    /// Writes an entry whose data is already compressed; `data` must yield
    /// exactly `header.compressed_size` bytes.
    pub fn copy_raw<R: Read>(&mut self, header: EntryHeader, data: &mut R) -> io::Result<()> {
        let expected = header.compressed_size;
        self.start_entry(header)?;
        let copied = io::copy(&mut data.take(expected), &mut self.inner)?;
        self.offset += copied;
        if copied != expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("entry data ended after {} of {} bytes", copied, expected),
            ));
        }
        Ok(())
    }

    /// Compresses `data` with deflate and writes it as a new entry.
    pub fn add_deflated(&mut self, name: &str, data: &[u8], time: DateTime) -> io::Result<()> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        self.start_entry(EntryHeader {
            name: name.as_bytes().to_vec(),
            utf8: true,
            method: METHOD_DEFLATED,
            crc32: crc32fast::hash(data),
            compressed_size: compressed.len() as u64,
            uncompressed_size: data.len() as u64,
            last_modified: time,
            unix_mode: Some(0o100644),
            is_dir: false,
        })?;
        self.put(&compressed)
    }

    /// Writes the central directory and end record, returning the sink.
    pub fn finish(mut self) -> io::Result<W> {
        let entries = u16::try_from(self.central.len()).map_err(|_| zip64_error("entry count"))?;
        let cd_start = to_u32(self.offset, "central directory offset")?;

        let mut cd = Vec::with_capacity(self.central.len() * 64);
        for record in &self.central {
            let h = &record.header;
            cd.extend_from_slice(&CENTRAL_HEADER_SIG.to_le_bytes());
            cd.extend_from_slice(&h.version_made_by().to_le_bytes());
            cd.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
            cd.extend_from_slice(&h.flags().to_le_bytes());
            cd.extend_from_slice(&h.method.to_le_bytes());
            cd.extend_from_slice(&h.last_modified.timepart().to_le_bytes());
            cd.extend_from_slice(&h.last_modified.datepart().to_le_bytes());
            cd.extend_from_slice(&h.crc32.to_le_bytes());
            cd.extend_from_slice(&(h.compressed_size as u32).to_le_bytes());
            cd.extend_from_slice(&(h.uncompressed_size as u32).to_le_bytes());
            cd.extend_from_slice(&(h.name.len() as u16).to_le_bytes());
            cd.extend_from_slice(&0u16.to_le_bytes()); // extra
            cd.extend_from_slice(&0u16.to_le_bytes()); // comment
            cd.extend_from_slice(&0u16.to_le_bytes()); // disk
            cd.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
            cd.extend_from_slice(&h.external_attributes().to_le_bytes());
            cd.extend_from_slice(&record.local_offset.to_le_bytes());
            cd.extend_from_slice(&h.name);
        }
        let cd_size = to_u32(cd.len() as u64, "central directory size")?;
        to_u32(self.offset + cd.len() as u64, "archive size")?;
        self.put(&cd)?;

        let mut eocd = Vec::with_capacity(22);
        eocd.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes());
        eocd.extend_from_slice(&entries.to_le_bytes());
        eocd.extend_from_slice(&entries.to_le_bytes());
        eocd.extend_from_slice(&cd_size.to_le_bytes());
        eocd.extend_from_slice(&cd_start.to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes());
        self.put(&eocd)?;

        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;
    use zip::ZipArchive;

    fn epoch() -> DateTime {
        DateTime::from_date_and_time(2008, 2, 29, 0, 0, 0).unwrap()
    }

    #[rstest]
    #[case::zero_offset(0, 11, 1)]
    #[case::already_multiple(0, 10, 0)]
    #[case::shifted(7, 20, 1)]
    #[case::three(1, 0, 3)]
    fn legacy_rule_is_remainder(#[case] offset: u64, #[case] name_len: usize, #[case] pad: usize) {
        assert_eq!(PaddingRule::Legacy.padding(offset, name_len), pad);
    }

    #[rstest]
    #[case(0, 11)]
    #[case(3, 20)]
    #[case(1001, 7)]
    #[case(4096, 0)]
    fn aligned_rule_reaches_boundary(#[case] offset: u64, #[case] name_len: usize) {
        let pad = PaddingRule::Aligned.padding(offset, name_len);
        assert!(pad < 4);
        assert_eq!((offset + 30 + name_len as u64 + pad as u64) % 4, 0);
    }

    #[test]
    fn written_archive_reads_back() {
        let mut w = AlignedZipWriter::new(Cursor::new(Vec::new()), PaddingRule::Legacy);
        w.add_deflated("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\n\r\n", epoch())
            .unwrap();
        let stored = b"stored payload";
        w.copy_raw(
            EntryHeader {
                name: b"raw.bin".to_vec(),
                utf8: false,
                method: METHOD_STORED,
                crc32: crc32fast::hash(stored),
                compressed_size: stored.len() as u64,
                uncompressed_size: stored.len() as u64,
                last_modified: epoch(),
                unix_mode: None,
                is_dir: false,
            },
            &mut Cursor::new(stored),
        )
        .unwrap();
        let bytes = w.finish().unwrap().into_inner();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut out = String::new();
        archive.by_name("META-INF/MANIFEST.MF").unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "Manifest-Version: 1.0\r\n\r\n");
        let mut raw = Vec::new();
        archive.by_name("raw.bin").unwrap().read_to_end(&mut raw).unwrap();
        assert_eq!(raw, stored);
    }

    #[test]
    fn legacy_padding_lands_in_local_extra_field() {
        let mut w = AlignedZipWriter::new(Vec::new(), PaddingRule::Legacy);
        // 30 + 11 = 41, 41 % 4 = 1.
        w.add_deflated("abcdefghijk", b"x", epoch()).unwrap();
        let bytes = w.finish().unwrap();
        assert_eq!(u16::from_le_bytes([bytes[28], bytes[29]]), 1);
        assert_eq!(bytes[30 + 11], 0);
    }

    fn stored(name: &str, data: &[u8]) -> EntryHeader {
        EntryHeader {
            name: name.as_bytes().to_vec(),
            utf8: false,
            method: METHOD_STORED,
            crc32: crc32fast::hash(data),
            compressed_size: data.len() as u64,
            uncompressed_size: data.len() as u64,
            last_modified: epoch(),
            unix_mode: None,
            is_dir: false,
        }
    }

    #[test]
    fn legacy_offset_counts_content_bytes_only() {
        let mut w = AlignedZipWriter::new(Vec::new(), PaddingRule::Legacy);
        w.copy_raw(stored("a.txt", b"hello"), &mut Cursor::new(b"hello"))
            .unwrap();
        w.copy_raw(stored("bb.txt", b"world"), &mut Cursor::new(b"world"))
            .unwrap();
        let bytes = w.finish().unwrap();

        // (0 + 30 + 5) % 4 = 3
        assert_eq!(u16::from_le_bytes([bytes[28], bytes[29]]), 3);
        // The second header follows 30 + 5 + 3 + 5 bytes; (5 + 30 + 6) % 4 = 1.
        let second = 30 + 5 + 3 + 5;
        assert_eq!(&bytes[second..second + 4], &LOCAL_HEADER_SIG.to_le_bytes());
        assert_eq!(u16::from_le_bytes([bytes[second + 28], bytes[second + 29]]), 1);
    }

    #[test]
    fn aligned_offset_counts_every_written_byte() {
        let mut w = AlignedZipWriter::new(Vec::new(), PaddingRule::Aligned);
        w.copy_raw(stored("a.txt", b"hello"), &mut Cursor::new(b"hello"))
            .unwrap();
        let before_second = w.offset();
        w.copy_raw(stored("bb.txt", b"world"), &mut Cursor::new(b"world"))
            .unwrap();
        let bytes = w.finish().unwrap();

        let second = before_second as usize;
        let extra = u16::from_le_bytes([bytes[second + 28], bytes[second + 29]]) as usize;
        assert_eq!((second + 30 + 6 + extra) % 4, 0);
    }

    #[test]
    fn raw_name_bytes_and_flag_are_kept() {
        let mut w = AlignedZipWriter::new(Vec::new(), PaddingRule::Aligned);
        let mut cp437 = stored("x", b"");
        cp437.name = vec![b'n', 0x81, b'.', b't'];
        w.copy_raw(cp437, &mut Cursor::new(b"")).unwrap();
        let bytes = w.finish().unwrap();

        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]) & FLAG_UTF8, 0);
        assert_eq!(&bytes[30..34], &[b'n', 0x81, b'.', b't']);
    }

    #[test]
    fn short_raw_source_is_an_error() {
        let mut w = AlignedZipWriter::new(Vec::new(), PaddingRule::Aligned);
        let err = w
            .copy_raw(
                EntryHeader {
                    name: b"a".to_vec(),
                    utf8: false,
                    method: METHOD_STORED,
                    crc32: 0,
                    compressed_size: 10,
                    uncompressed_size: 10,
                    last_modified: epoch(),
                    unix_mode: None,
                    is_dir: false,
                },
                &mut Cursor::new(b"abc"),
            )
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
