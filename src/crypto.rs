/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

use crate::{ui::Ui, BUFFER_SIZE};
use base64::{engine::general_purpose::STANDARD as base64_engine, Engine};
use ring::digest;
use std::io::{self, Read};

pub struct CryptoEngine;

impl CryptoEngine {
    /// Base64 SHA-1, the digest format used throughout MANIFEST.MF and CERT.SF.
    pub fn compute_sha1(data: &[u8]) -> String {
        base64_engine.encode(digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, data).as_ref())
    }

    /// Raw SHA-256, for the PKCS#7 `messageDigest` attribute.
    pub fn compute_sha256(data: &[u8]) -> Vec<u8> {
        digest::digest(&digest::SHA256, data).as_ref().to_vec()
    }

    pub fn compute_stream_sha1<R: Read>(reader: &mut R) -> io::Result<String> {
        Self::compute_stream_sha1_with_ui(reader, None, None)
    }

    pub fn compute_stream_sha1_with_ui<R: Read>(
        reader: &mut R,
        ui: Option<&Ui>,
        file_path: Option<&str>,
    ) -> io::Result<String> {
        let mut ctx = digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);

        if let (Some(ui), Some(path)) = (ui, file_path) {
            ui.very_verbose(&format!("SHA1: {}", path));
        }

        let mut buf = vec![0u8; BUFFER_SIZE];
        let mut processed = 0u64;
        loop {
            let count = reader.read(&mut buf)?;
            if count == 0 {
                break;
            }
            ctx.update(&buf[..count]);
            processed += count as u64;

            if let Some(ui) = ui {
                if ui.debug && processed % (BUFFER_SIZE as u64 * 10) == 0 {
                    ui.debug(&format!("SHA1: {} bytes", processed));
                }
            }
        }

        if let Some(ui) = ui {
            ui.debug(&format!("SHA1 complete: {} bytes", processed));
        }

        Ok(base64_engine.encode(ctx.finish().as_ref()))
    }

    pub fn base64(data: &[u8]) -> String {
        base64_engine.encode(data)
    }
}
