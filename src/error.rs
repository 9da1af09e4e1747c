/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Error types and handling for the ApkSign library.
//! Every stage of a signing run fails with one of these; none are retried.

use std::{fmt, io, path::PathBuf};

/// Comprehensive error type for all signing operations.
#[derive(Debug)]
pub enum SignerError {
    /// Source archive could not be opened or is not a valid ZIP
    ArchiveOpen {
        path: PathBuf,
        source: zip::result::ZipError,
    },
    /// A single entry's content stream failed while reading
    EntryRead {
        name: String,
        source: zip::result::ZipError,
    },
    /// Signing key failed its consistency check or does not match the certificate
    InvalidKey(String),
    /// PKCS#7 envelope construction or RSA signing failed
    Signing(String),
    /// Destination archive could not be written or finalized
    ArchiveWrite(io::Error),
    /// Temporary staging file could not be created, persisted or removed
    Staging(io::Error),
    /// Keystore unreadable, wrong password, or alias missing
    Keystore(String),
    /// Validation failures during signature checking
    Validation(String),
    /// Configuration or setup errors
    Config(String),
}

impl SignerError {
    pub fn archive_open(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::ArchiveOpen {
            path: path.into(),
            source,
        }
    }

    pub fn entry_read(name: impl Into<String>, source: impl Into<zip::result::ZipError>) -> Self {
        Self::EntryRead {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// `ZipError::Io` displays as a bare "i/o error"; show the I/O error itself.
fn zip_cause(e: &zip::result::ZipError) -> &dyn fmt::Display {
    match e {
        zip::result::ZipError::Io(io) => io as &dyn fmt::Display,
        other => other,
    }
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerError::ArchiveOpen { path, source } => {
                write!(
                    f,
                    "Cannot open archive '{}': {}",
                    path.display(),
                    zip_cause(source)
                )
            }
            SignerError::EntryRead { name, source } => {
                write!(f, "Cannot read entry '{}': {}", name, zip_cause(source))
            }
            SignerError::InvalidKey(s) => write!(f, "Invalid Key: {}", s),
            SignerError::Signing(s) => write!(f, "Signing Error: {}", s),
            SignerError::ArchiveWrite(e) => write!(f, "Archive Write Error: {}", e),
            SignerError::Staging(e) => write!(f, "Staging Error: {}", e),
            SignerError::Keystore(s) => write!(f, "Keystore Error: {}", s),
            SignerError::Validation(s) => write!(f, "Validation Error: {}", s),
            SignerError::Config(s) => write!(f, "Configuration Error: {}", s),
        }
    }
}

impl std::error::Error for SignerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SignerError::ArchiveOpen { source, .. } | SignerError::EntryRead { source, .. } => {
                Some(source)
            }
            SignerError::ArchiveWrite(e) | SignerError::Staging(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ring::error::KeyRejected> for SignerError {
    fn from(e: ring::error::KeyRejected) -> Self {
        Self::InvalidKey(e.to_string())
    }
}

impl From<ring::error::Unspecified> for SignerError {
    fn from(e: ring::error::Unspecified) -> Self {
        Self::Signing(format!("RSA signing failed: {}", e))
    }
}

impl From<simple_asn1::ASN1EncodeErr> for SignerError {
    fn from(e: simple_asn1::ASN1EncodeErr) -> Self {
        Self::Signing(format!("ASN.1 encode error: {}", e))
    }
}

impl From<p12_keystore::error::Error> for SignerError {
    fn from(e: p12_keystore::error::Error) -> Self {
        Self::Keystore(format!("PKCS#12: {}", e))
    }
}
