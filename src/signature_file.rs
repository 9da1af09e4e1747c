/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

use crate::{crypto::CryptoEngine, manifest::Manifest};

pub const SIGNATURE_FILE_VERSION: &str = "Signature-Version: 1.0\r\n";
pub const SIGNATURE_FILE_CREATED_BY: &str = "Created-By: 1.0 (Android)\r\n";

pub struct SignatureFileBuilder;

impl SignatureFileBuilder {
    /// `CERT.SF`: the manifest digest, then one entry per manifest block whose
    /// digest covers that block's bytes.
    pub fn build(manifest: &Manifest) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + manifest.blocks.len() * 96);
        out.extend_from_slice(SIGNATURE_FILE_VERSION.as_bytes());
        out.extend_from_slice(SIGNATURE_FILE_CREATED_BY.as_bytes());
        out.extend_from_slice(
            format!(
                "SHA1-Digest-Manifest: {}\r\n\r\n",
                CryptoEngine::compute_sha1(&manifest.bytes)
            )
            .as_bytes(),
        );

        for block in &manifest.blocks {
            out.extend_from_slice(&block.name_line);
            out.extend_from_slice(
                format!(
                    "SHA1-Digest: {}\r\n\r\n",
                    CryptoEngine::compute_sha1(&block.to_bytes())
                )
                .as_bytes(),
            );
        }
        out
    }
}
