/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! `META-INF/MANIFEST.MF` generation.

use crate::digest::DigestRecord;

/// Name lines longer than this many bytes get one continuation line.
pub const NAME_LINE_WRAP: usize = 70;

pub const MANIFEST_HEADER: &str = "Manifest-Version: 1.0\r\n\
     Built-By: Generated-by-ADT\r\n\
     Created-By: Android Gradle 3.2.0\r\n\
     \r\n";

pub const MANIFEST_DEX_HEADER: &str = "Manifest-Version: 1.0\r\n\
     Dex-Location: classes.dex\r\n\
     Built-By: Generated-by-ADT\r\n\
     Created-By: Android Gradle 3.2.0\r\n\
     \r\n";

/// The exact bytes written for one entry. CERT.SF digests these, not the
/// entry content, so they are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestBlock {
    /// `Name: ...` with its CRLF, wrapped if needed.
    pub name_line: Vec<u8>,
    /// `SHA1-Digest: ...` followed by CRLF CRLF.
    pub digest_line: Vec<u8>,
}

impl ManifestBlock {
    pub fn new(name: &str, digest: &str) -> Self {
        Self {
            name_line: Self::name_line(name),
            digest_line: format!("SHA1-Digest: {}\r\n\r\n", digest).into_bytes(),
        }
    }

    /// `Name: <name>` split after byte 70 into a single continuation line
    /// prefixed with one space. The split is byte based and never produces
    /// more than two lines.
    pub fn name_line(name: &str) -> Vec<u8> {
        let line = format!("Name: {}", name).into_bytes();
        let mut out = Vec::with_capacity(line.len() + 5);
        if line.len() <= NAME_LINE_WRAP {
            out.extend_from_slice(&line);
        } else {
            out.extend_from_slice(&line[..NAME_LINE_WRAP]);
            out.extend_from_slice(b"\r\n ");
            out.extend_from_slice(&line[NAME_LINE_WRAP..]);
        }
        out.extend_from_slice(b"\r\n");
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.name_line.len() + self.digest_line.len());
        out.extend_from_slice(&self.name_line);
        out.extend_from_slice(&self.digest_line);
        out
    }
}

/// A finalized manifest: `bytes` is the complete file, `blocks` the
/// per-entry pieces in the same order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub bytes: Vec<u8>,
    pub blocks: Vec<ManifestBlock>,
}

pub struct ManifestBuilder;

impl ManifestBuilder {
    pub fn header(has_dex: bool) -> &'static str {
        if has_dex {
            MANIFEST_DEX_HEADER
        } else {
            MANIFEST_HEADER
        }
    }

    pub fn build(has_dex: bool, records: &[DigestRecord]) -> Manifest {
        let header = Self::header(has_dex);
        let blocks: Vec<ManifestBlock> = records
            .iter()
            .map(|r| ManifestBlock::new(&r.name, &r.digest))
            .collect();

        let estimated_size = header.len()
            + blocks
                .iter()
                .map(|b| b.name_line.len() + b.digest_line.len())
                .sum::<usize>();
        let mut bytes = Vec::with_capacity(estimated_size);
        bytes.extend_from_slice(header.as_bytes());
        for block in &blocks {
            bytes.extend_from_slice(&block.name_line);
            bytes.extend_from_slice(&block.digest_line);
        }

        Manifest { bytes, blocks }
    }
}
