/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Per-entry content digests, the first stage of a signing run.

use crate::{crypto::CryptoEngine, error::SignerError, ui::Ui, DEX_ENTRY_NAME, META_INF_PREFIX};
use std::{
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
};
use zip::ZipArchive;

/// SHA-1 of one entry's decompressed content, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestRecord {
    pub name: String,
    pub digest: String,
}

/// Digests in source-archive order plus the dex hint for the manifest header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryIndex {
    pub has_dex: bool,
    pub records: Vec<DigestRecord>,
}

pub struct DigestIndex;

impl DigestIndex {
    /// Whether an entry takes part in the digest chain.
    pub fn is_signable(name: &str, is_dir: bool) -> bool {
        !is_dir && !name.starts_with(META_INF_PREFIX)
    }

    pub fn index_path(path: &Path, ui: &Ui) -> Result<EntryIndex, SignerError> {
        let file = File::open(path).map_err(|e| SignerError::archive_open(path, e.into()))?;
        let archive = ZipArchive::new(BufReader::new(file))
            .map_err(|e| SignerError::archive_open(path, e))?;
        Self::index(archive, ui)
    }

    /// Digest every signable entry of `archive`, in stored order.
    ///
    /// The first failing entry aborts the whole index.
    pub fn index<R: Read + Seek>(
        mut archive: ZipArchive<R>,
        ui: &Ui,
    ) -> Result<EntryIndex, SignerError> {
        let has_dex = archive.index_for_name(DEX_ENTRY_NAME).is_some();
        let mut records = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| SignerError::entry_read(format!("#{}", i), e))?;
            let name = entry.name().to_string();
            if !Self::is_signable(&name, entry.is_dir()) {
                ui.debug(&format!("Skipping: {}", name));
                continue;
            }
            let digest = CryptoEngine::compute_stream_sha1_with_ui(&mut entry, Some(ui), Some(&name))
                .map_err(|e| SignerError::entry_read(&name, e))?;
            records.push(DigestRecord { name, digest });
        }

        ui.verbose(&format!(
            "Digested {} entries (classes.dex {})",
            records.len(),
            if has_dex { "present" } else { "absent" }
        ));
        Ok(EntryIndex { has_dex, records })
    }
}
