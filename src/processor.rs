/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Archive repackaging: copies the source entries byte for byte into an
//! [`AlignedZipWriter`] and appends the signature files.

use crate::{
    config::SignOptions,
    error::SignerError,
    signing::SignedArtifacts,
    ui::Ui,
    zip_writer::{AlignedZipWriter, EntryHeader},
    BUFFER_SIZE, META_INF_PREFIX,
};
use crc32fast::Hasher as Crc32;
use std::{
    fs::File,
    io::{self, BufReader, Read, Seek, Write},
    path::Path,
};
use zip::{DateTime, ZipArchive};

/// Remembers whether an I/O error came from the source side of a copy.
struct SourceReader<R> {
    inner: R,
    failed: bool,
}

impl<R: Read> Read for SourceReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }
}

pub struct ArchiveRepackager;

impl ArchiveRepackager {
    /// Whether a source entry is carried into the signed archive.
    pub fn should_copy(name: &str, is_dir: bool, options: &SignOptions) -> bool {
        !name.starts_with(META_INF_PREFIX) && !(is_dir && options.strip_directories)
    }

    /// The reader decodes names without the UTF-8 flag as CP437, which never
    /// matches the UTF-8 reading of non-ASCII bytes.
    fn is_utf8_name(raw: &[u8], decoded: &str) -> bool {
        std::str::from_utf8(raw) == Ok(decoded)
    }

    /// Copies `source` into `writer`, then writes `MANIFEST.MF`, `CERT.SF` and
    /// `CERT.RSA` stamped with `timestamp`.
    pub fn repackage<R: Read + Seek, W: Write>(
        mut source: ZipArchive<R>,
        artifacts: &SignedArtifacts,
        timestamp: DateTime,
        options: &SignOptions,
        writer: W,
        ui: &Ui,
    ) -> Result<W, SignerError> {
        let mut out = AlignedZipWriter::new(writer, options.padding);
        let total = source.len();
        if ui.verbose {
            ui.show_progress_bar(total as u64, "Writing entries");
        }

        let mut skipped = 0usize;
        for i in 0..total {
            let entry = source
                .by_index_raw(i)
                .map_err(|e| SignerError::entry_read(format!("#{}", i), e))?;
            let name = entry.name().to_string();

            if !Self::should_copy(&name, entry.is_dir(), options) {
                ui.debug(&format!("Dropping: {}", name));
                skipped += 1;
                continue;
            }
            if entry.encrypted() {
                return Err(SignerError::ArchiveWrite(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Entry '{}' is encrypted", name),
                )));
            }

            #[allow(deprecated)]
            let method = entry.compression().to_u16();
            let header = EntryHeader {
                name: entry.name_raw().to_vec(),
                utf8: Self::is_utf8_name(entry.name_raw(), &name),
                method,
                crc32: entry.crc32(),
                compressed_size: entry.compressed_size(),
                uncompressed_size: entry.size(),
                last_modified: entry.last_modified().unwrap_or_default(),
                unix_mode: entry.unix_mode(),
                is_dir: entry.is_dir(),
            };
            ui.very_verbose(&format!("Copying: {} (method {})", name, method));

            let mut reader = SourceReader {
                inner: entry,
                failed: false,
            };
            if let Err(e) = out.copy_raw(header, &mut reader) {
                return Err(if reader.failed || e.kind() == io::ErrorKind::UnexpectedEof {
                    SignerError::entry_read(name, e)
                } else {
                    SignerError::ArchiveWrite(e)
                });
            }

            if ui.has_progress_bar() {
                ui.update_progress((i + 1) as u64);
            }
        }
        ui.finish_progress();

        for (name, data) in artifacts.entries() {
            ui.very_verbose(&format!("Adding: {} ({} bytes)", name, data.len()));
            out.add_deflated(name, data, timestamp)
                .map_err(SignerError::ArchiveWrite)?;
        }

        ui.verbose(&format!(
            "Wrote {} entries ({} dropped), {} bytes before central directory",
            out.entry_count(),
            skipped,
            out.offset()
        ));
        out.finish().map_err(SignerError::ArchiveWrite)
    }

    /// Re-reads a finished archive and recomputes every entry's CRC.
    pub fn verify_zip_integrity(path: &Path) -> Result<(), SignerError> {
        let file = File::open(path).map_err(|e| SignerError::archive_open(path, e.into()))?;
        let mut archive = ZipArchive::new(BufReader::new(file))
            .map_err(|e| SignerError::archive_open(path, e))?;
        let mut buf = vec![0u8; BUFFER_SIZE];
        for i in 0..archive.len() {
            let mut f = archive
                .by_index(i)
                .map_err(|e| SignerError::entry_read(format!("#{}", i), e))?;
            let mut hasher = Crc32::new();
            loop {
                let n = f.read(&mut buf).map_err(|e| SignerError::entry_read(f.name(), e))?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            let stored = f.crc32();
            let computed = hasher.finalize();
            if stored != computed {
                return Err(SignerError::Validation(format!(
                    "CRC mismatch for `{}`: stored={:#010x}, computed={:#010x}",
                    f.name(),
                    stored,
                    computed
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip_writer::PaddingRule;
    use std::io::Cursor;
    use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

    fn source() -> ZipArchive<Cursor<Vec<u8>>> {
        let mut w = ZipWriter::new(Cursor::new(Vec::new()));
        w.start_file(
            "stored.txt",
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        )
        .unwrap();
        w.write_all(b"plain").unwrap();
        w.add_directory("res/", SimpleFileOptions::default()).unwrap();
        w.start_file("res/deflated.xml", SimpleFileOptions::default())
            .unwrap();
        w.write_all(&b"<x/>".repeat(100)).unwrap();
        w.start_file("META-INF/OLD.SF", SimpleFileOptions::default())
            .unwrap();
        w.write_all(b"stale").unwrap();
        ZipArchive::new(w.finish().unwrap()).unwrap()
    }

    fn artifacts() -> SignedArtifacts {
        SignedArtifacts {
            manifest: b"Manifest-Version: 1.0\r\n\r\n".to_vec(),
            signature_file: b"Signature-Version: 1.0\r\n\r\n".to_vec(),
            signature_block: vec![0x30, 0x00],
        }
    }

    fn repack(options: SignOptions) -> ZipArchive<Cursor<Vec<u8>>> {
        let out = ArchiveRepackager::repackage(
            source(),
            &artifacts(),
            DateTime::default(),
            &options,
            Cursor::new(Vec::new()),
            &Ui::quiet(),
        )
        .unwrap();
        ZipArchive::new(Cursor::new(out.into_inner())).unwrap()
    }

    fn names(archive: &ZipArchive<Cursor<Vec<u8>>>) -> Vec<String> {
        archive.file_names().map(str::to_string).collect()
    }

    #[test]
    fn replaces_signature_directory_and_appends_artifacts_last() {
        let archive = repack(SignOptions::default());
        assert_eq!(
            names(&archive),
            [
                "stored.txt",
                "res/",
                "res/deflated.xml",
                "META-INF/MANIFEST.MF",
                "META-INF/CERT.SF",
                "META-INF/CERT.RSA"
            ]
        );
    }

    #[test]
    fn strip_directories_drops_directory_entries() {
        let archive = repack(SignOptions {
            padding: PaddingRule::Legacy,
            strip_directories: true,
        });
        assert!(!names(&archive).iter().any(|n| n.ends_with('/')));
    }

    #[test]
    fn compression_method_and_content_are_preserved() {
        let mut archive = repack(SignOptions::default());
        {
            let stored = archive.by_name("stored.txt").unwrap();
            assert_eq!(stored.compression(), CompressionMethod::Stored);
        }
        let mut deflated = archive.by_name("res/deflated.xml").unwrap();
        assert_eq!(deflated.compression(), CompressionMethod::Deflated);
        let mut content = Vec::new();
        deflated.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"<x/>".repeat(100));
    }

    #[test]
    fn aligned_padding_puts_data_on_four_byte_boundaries() {
        let mut archive = repack(SignOptions {
            padding: PaddingRule::Aligned,
            strip_directories: false,
        });
        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i).unwrap();
            assert_eq!(entry.data_start() % 4, 0, "{}", entry.name());
        }
    }

    #[test]
    fn name_encoding_follows_the_source() {
        assert!(ArchiveRepackager::is_utf8_name("é.txt".as_bytes(), "é.txt"));
        // 0x82 is 'é' in CP437.
        assert!(!ArchiveRepackager::is_utf8_name(&[0x82, b'.', b't'], "é.t"));
        assert!(ArchiveRepackager::is_utf8_name(b"plain.txt", "plain.txt"));
    }

    #[test]
    fn non_ascii_names_are_copied_verbatim() {
        let mut w = ZipWriter::new(Cursor::new(Vec::new()));
        w.start_file("res/café.txt", SimpleFileOptions::default())
            .unwrap();
        w.write_all(b"x").unwrap();
        let src = ZipArchive::new(w.finish().unwrap()).unwrap();

        let out = ArchiveRepackager::repackage(
            src,
            &artifacts(),
            DateTime::default(),
            &SignOptions::default(),
            Cursor::new(Vec::new()),
            &Ui::quiet(),
        )
        .unwrap();
        let mut archive = ZipArchive::new(Cursor::new(out.into_inner())).unwrap();
        let entry = archive.by_index_raw(0).unwrap();
        assert_eq!(entry.name(), "res/café.txt");
        assert_eq!(entry.name_raw(), "res/café.txt".as_bytes());
    }

    #[test]
    fn integrity_check_accepts_repackaged_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.apk");
        let out = ArchiveRepackager::repackage(
            source(),
            &artifacts(),
            DateTime::default(),
            &SignOptions::default(),
            File::create(&path).unwrap(),
            &Ui::quiet(),
        )
        .unwrap();
        drop(out);
        ArchiveRepackager::verify_zip_integrity(&path).unwrap();
    }
}
