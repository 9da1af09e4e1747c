/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
};
use x509_parser::prelude::*;
use zip::ZipArchive;

use crate::{
    crypto::CryptoEngine, digest::DigestIndex, error::SignerError, pkcs7::SignatureBlock,
    ui::Ui, CERT_RSA_NAME, CERT_SF_NAME, MANIFEST_NAME,
};

/// Summary of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub entries: usize,
    pub signer: String,
}

/// Checks the v1 signature chain of a signed archive:
/// CERT.RSA over CERT.SF, CERT.SF over MANIFEST.MF, MANIFEST.MF over the entries.
pub struct ArtifactVerifier;

impl ArtifactVerifier {
    pub fn verify(
        path: &Path,
        expected_cert: Option<&[u8]>,
        ui: &Ui,
    ) -> Result<VerificationReport, SignerError> {
        let file = File::open(path).map_err(|e| SignerError::archive_open(path, e.into()))?;
        let archive = ZipArchive::new(BufReader::new(file))
            .map_err(|e| SignerError::archive_open(path, e))?;
        Self::verify_archive(archive, expected_cert, ui)
    }

    pub fn verify_archive<R: Read + Seek>(
        mut archive: ZipArchive<R>,
        expected_cert: Option<&[u8]>,
        ui: &Ui,
    ) -> Result<VerificationReport, SignerError> {
        let manifest = Self::read_entry(&mut archive, MANIFEST_NAME)?;
        let sf = Self::read_entry(&mut archive, CERT_SF_NAME)?;
        let rsa = Self::read_entry(&mut archive, CERT_RSA_NAME)?;

        let block = SignatureBlock::parse(&rsa)?;
        if let Some(expected) = expected_cert {
            if block.signer_certificate() != expected {
                return Err(SignerError::Validation(
                    "Archive is signed with a different certificate".into(),
                ));
            }
        }
        block.verify(&sf)?;
        ui.verbose("CERT.RSA signature over CERT.SF is valid");

        let sf_lines = Self::unfold_lines(&sf);
        let manifest_digest = sf_lines
            .iter()
            .take_while(|l| !l.is_empty())
            .find_map(|l| l.strip_prefix("SHA1-Digest-Manifest: "))
            .ok_or_else(|| SignerError::Validation("CERT.SF has no SHA1-Digest-Manifest".into()))?;
        if manifest_digest != CryptoEngine::compute_sha1(&manifest) {
            return Err(SignerError::Validation(
                "Manifest hash in SF file does not match".into(),
            ));
        }

        let sf_entries = Self::parse_entries(&sf_lines);
        let mut manifest_entries = BTreeMap::new();
        for section in Self::split_sections(&manifest).into_iter().skip(1) {
            let lines = Self::unfold_lines(section);
            let Some((name, digest)) = Self::parse_entries(&lines).into_iter().next() else {
                continue;
            };
            let sf_digest = sf_entries
                .get(&name)
                .ok_or_else(|| SignerError::Validation(format!("SF missing entry for {}", name)))?;
            if *sf_digest != CryptoEngine::compute_sha1(section) {
                return Err(SignerError::Validation(format!(
                    "SF digest mismatch for {}",
                    name
                )));
            }
            manifest_entries.insert(name, digest);
        }
        ui.verbose(&format!(
            "CERT.SF covers {} manifest sections",
            manifest_entries.len()
        ));

        let index = DigestIndex::index(archive, ui)?;
        for record in &index.records {
            let m_digest = manifest_entries.get(&record.name).ok_or_else(|| {
                SignerError::Validation(format!("Manifest missing entry for {}", record.name))
            })?;
            if *m_digest != record.digest {
                return Err(SignerError::Validation(format!(
                    "Manifest digest mismatch for {}",
                    record.name
                )));
            }
        }
        if manifest_entries.len() != index.records.len() {
            let present: std::collections::BTreeSet<_> =
                index.records.iter().map(|r| r.name.as_str()).collect();
            if let Some(extra) = manifest_entries
                .keys()
                .find(|n| !present.contains(n.as_str()))
            {
                return Err(SignerError::Validation(format!(
                    "Manifest references missing file {}",
                    extra
                )));
            }
        }

        Ok(VerificationReport {
            entries: index.records.len(),
            signer: Self::subject(block.signer_certificate()),
        })
    }

    fn read_entry<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        name: &str,
    ) -> Result<Vec<u8>, SignerError> {
        let mut entry = archive
            .by_name(name)
            .map_err(|e| SignerError::Validation(format!("No {} found: {}", name, e)))?;
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| SignerError::entry_read(name, e))?;
        Ok(bytes)
    }

    fn subject(cert_der: &[u8]) -> String {
        X509Certificate::from_der(cert_der)
            .map(|(_, c)| c.subject().to_string())
            .unwrap_or_else(|_| "<unparsable certificate>".into())
    }

    /// Splits at blank lines, keeping each section's trailing CRLF CRLF so
    /// the bytes are exactly what CERT.SF digested.
    fn split_sections(bytes: &[u8]) -> Vec<&[u8]> {
        let mut sections = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i + 4 <= bytes.len() {
            if &bytes[i..i + 4] == b"\r\n\r\n" {
                sections.push(&bytes[start..i + 4]);
                start = i + 4;
                i = start;
            } else {
                i += 1;
            }
        }
        if start < bytes.len() {
            sections.push(&bytes[start..]);
        }
        sections
    }

    /// Joins continuation lines on raw bytes, so a name wrapped inside a
    /// multi-byte character decodes intact.
    fn unfold_lines(bytes: &[u8]) -> Vec<String> {
        let mut out: Vec<Vec<u8>> = Vec::new();
        let mut rest = bytes;
        loop {
            let (line, tail) = match rest.windows(2).position(|w| w == b"\r\n") {
                Some(i) => (&rest[..i], Some(&rest[i + 2..])),
                None => (rest, None),
            };
            match (out.last_mut(), line.first()) {
                (Some(last), Some(b' ')) => last.extend_from_slice(&line[1..]),
                _ => out.push(line.to_vec()),
            }
            match tail {
                Some(t) => rest = t,
                None => break,
            }
        }
        out.into_iter()
            .map(|l| String::from_utf8_lossy(&l).into_owned())
            .collect()
    }

    fn parse_entries(lines: &[String]) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let mut cur_name: Option<String> = None;
        let mut cur_digest: Option<String> = None;
        for line in lines {
            if line.is_empty() {
                if let (Some(n), Some(d)) = (cur_name.take(), cur_digest.take()) {
                    map.insert(n, d);
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix("Name: ") {
                cur_name = Some(rest.to_string());
            } else if let Some(rest) = line.strip_prefix("SHA1-Digest: ") {
                cur_digest = Some(rest.to_string());
            }
        }
        if let (Some(n), Some(d)) = (cur_name.take(), cur_digest.take()) {
            map.insert(n, d);
        }
        map
    }
}
