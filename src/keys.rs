/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Signing identity: an RSA key pair plus the certificate that goes into
//! `CERT.RSA`.

use crate::{
    error::SignerError,
    keystore::{self, KeystoreKind},
    ui::Ui,
};
use ::pem as pem_crate;
use ring::signature::RsaKeyPair;
use std::{fmt, fs, path::Path};
use x509_parser::prelude::*;
use zip::DateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOrigin {
    Development,
    Files,
    Keystore { kind: KeystoreKind, alias: String },
}

impl fmt::Display for IdentityOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityOrigin::Development => write!(f, "development key"),
            IdentityOrigin::Files => write!(f, "key/certificate files"),
            IdentityOrigin::Keystore { kind, alias } => {
                write!(f, "{} keystore, alias '{}'", kind.label(), alias)
            }
        }
    }
}

#[derive(Debug)]
pub struct SigningIdentity {
    pub key_pair: RsaKeyPair,
    pub cert_der: Vec<u8>,
    /// Certificate notBefore, used as the timestamp of the generated entries.
    pub cert_not_before: DateTime,
    pub origin: IdentityOrigin,
}

impl SigningIdentity {
    /// Pairs a key with its certificate. ring checks the key's internal
    /// consistency when `key_pair` is built; this only parses the certificate.
    pub fn new(
        key_pair: RsaKeyPair,
        cert_der: Vec<u8>,
        origin: IdentityOrigin,
        ui: &Ui,
    ) -> Result<Self, SignerError> {
        let (_, cert) = X509Certificate::from_der(&cert_der)
            .map_err(|e| SignerError::Config(format!("Invalid certificate: {}", e)))?;
        let cert_not_before = Self::asn1_to_zip_datetime(cert.validity().not_before, ui);
        Ok(Self {
            key_pair,
            cert_der,
            cert_not_before,
            origin,
        })
    }

    /// The embedded debug identity.
    pub fn development(ui: &Ui) -> Result<Self, SignerError> {
        ui.warn("Using the development key. For production use --keystore or -k/-p.");
        let key_pair = Self::parse_private_key(crate::certificate::PRIVATE_KEY.as_bytes(), ui)?;
        let cert_der = Self::parse_certificate(crate::certificate::CERTIFICATE.as_bytes(), ui);
        Self::new(key_pair, cert_der, IdentityOrigin::Development, ui)
    }

    pub fn from_pem_files(key_path: &Path, cert_path: &Path, ui: &Ui) -> Result<Self, SignerError> {
        Self::check_key_permissions(key_path, ui)?;
        let key = fs::read(key_path).map_err(|e| {
            SignerError::Config(format!("Cannot read key '{}': {}", key_path.display(), e))
        })?;
        let key_pair = Self::parse_private_key(&key, ui)?;
        let cert_der = Self::load_certificate(cert_path, ui)?;
        Self::new(key_pair, cert_der, IdentityOrigin::Files, ui)
    }

    pub fn from_keystore(
        path: &Path,
        store_pass: &str,
        alias: Option<&str>,
        key_pass: Option<&str>,
        ui: &Ui,
    ) -> Result<Self, SignerError> {
        Self::check_key_permissions(path, ui)?;
        let data = fs::read(path).map_err(|e| {
            SignerError::Keystore(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        let (kind, key) = keystore::load_key(&data, store_pass, alias, key_pass)?;
        ui.verbose(&format!("Loaded {} entry '{}'", kind.label(), key.alias));
        let key_pair = RsaKeyPair::from_pkcs8(&key.pkcs8)?;
        Self::new(
            key_pair,
            key.cert_der,
            IdentityOrigin::Keystore {
                kind,
                alias: key.alias,
            },
            ui,
        )
    }

    /// Reads a PEM or DER certificate file and returns its DER bytes.
    pub fn load_certificate(path: &Path, ui: &Ui) -> Result<Vec<u8>, SignerError> {
        let content = fs::read(path).map_err(|e| {
            SignerError::Config(format!("Cannot read certificate '{}': {}", path.display(), e))
        })?;
        Ok(Self::parse_certificate(&content, ui))
    }

    fn parse_certificate(content: &[u8], ui: &Ui) -> Vec<u8> {
        match pem_crate::parse(content) {
            Ok(pem) => pem.contents().to_vec(),
            Err(_) => {
                ui.debug("Certificate is not PEM, treating it as DER");
                content.to_vec()
            }
        }
    }

    /// PEM `PRIVATE KEY` (PKCS#8) or `RSA PRIVATE KEY` (PKCS#1), or the same
    /// as raw DER.
    pub fn parse_private_key(content: &[u8], ui: &Ui) -> Result<RsaKeyPair, SignerError> {
        match pem_crate::parse(content) {
            Ok(pem) => match pem.tag() {
                "PRIVATE KEY" => Ok(RsaKeyPair::from_pkcs8(pem.contents())?),
                "RSA PRIVATE KEY" => Ok(RsaKeyPair::from_der(pem.contents())?),
                "ENCRYPTED PRIVATE KEY" => Err(SignerError::InvalidKey(
                    "Encrypted PEM keys are not supported; use a keystore".into(),
                )),
                other => Err(SignerError::InvalidKey(format!(
                    "Unexpected PEM block '{}'",
                    other
                ))),
            },
            Err(_) => {
                ui.debug("Key is not PEM, trying PKCS#8 then PKCS#1 DER");
                RsaKeyPair::from_pkcs8(content)
                    .or_else(|_| RsaKeyPair::from_der(content))
                    .map_err(SignerError::from)
            }
        }
    }

    /// Whether the key's public half is the certificate's subject key.
    pub fn matches_certificate(&self) -> Result<bool, SignerError> {
        let (_, cert) = X509Certificate::from_der(&self.cert_der)
            .map_err(|e| SignerError::Config(format!("Invalid certificate: {}", e)))?;
        Ok(self.key_pair.public().as_ref() == cert.public_key().subject_public_key.data.as_ref())
    }

    pub fn get_reproducible_timestamp(&self) -> DateTime {
        self.cert_not_before
    }

    #[cfg(unix)]
    fn check_key_permissions(path: &Path, ui: &Ui) -> Result<(), SignerError> {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(path).map_err(|e| {
            SignerError::Config(format!("Cannot access '{}': {}", path.display(), e))
        })?;
        let permissions = metadata.permissions().mode();
        if permissions & 0o077 != 0 {
            ui.warn(&format!(
                "Key material '{}' is accessible by others (mode {:o}).",
                path.display(),
                permissions & 0o777
            ));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn check_key_permissions(_path: &Path, _ui: &Ui) -> Result<(), SignerError> {
        Ok(())
    }

    fn asn1_to_zip_datetime(asn1: ASN1Time, ui: &Ui) -> DateTime {
        let dt = asn1.to_datetime();
        // ZIP timestamps cover 1980..=2107.
        let year = (dt.year().clamp(1980, 2107)) as u16;

        DateTime::from_date_and_time(
            year,
            dt.month() as u8,
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
        )
        .unwrap_or_else(|_| {
            ui.warn("Certificate notBefore is not a valid ZIP timestamp; using 1980-01-01.");
            DateTime::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn data(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
    }

    #[test]
    fn development_identity_is_consistent() {
        let id = SigningIdentity::development(&Ui::quiet()).unwrap();
        assert_eq!(id.origin, IdentityOrigin::Development);
        assert!(id.matches_certificate().unwrap());
        // Certificate notBefore is 2008-02-29.
        assert_eq!(id.cert_not_before.year(), 2008);
        assert_eq!(id.cert_not_before.month(), 2);
        assert_eq!(id.cert_not_before.day(), 29);
    }

    #[test]
    fn identity_debug_names_its_origin() {
        let id = SigningIdentity::development(&Ui::quiet()).unwrap();
        assert!(format!("{:?}", id).contains("Development"));
    }

    #[test]
    fn pkcs8_pem_files_load() {
        let id = SigningIdentity::from_pem_files(
            &data("other_key.pem"),
            &data("other_cert.pem"),
            &Ui::quiet(),
        )
        .unwrap();
        assert!(id.matches_certificate().unwrap());
    }

    #[test]
    fn mismatched_pair_is_detected() {
        let id = SigningIdentity::from_pem_files(
            &data("other_key.pem"),
            &PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("certs/dev_cert.pem"),
            &Ui::quiet(),
        )
        .unwrap();
        assert!(!id.matches_certificate().unwrap());
    }

    #[test]
    fn inconsistent_rsa_key_is_rejected() {
        let content = fs::read(data("inconsistent_key.pem")).unwrap();
        let err = SigningIdentity::parse_private_key(&content, &Ui::quiet()).unwrap_err();
        assert!(matches!(err, SignerError::InvalidKey(_)));
    }

    #[test]
    fn der_key_is_accepted() {
        let pem = pem_crate::parse(fs::read(data("other_key.pem")).unwrap()).unwrap();
        assert!(SigningIdentity::parse_private_key(pem.contents(), &Ui::quiet()).is_ok());
    }

    #[test]
    fn keystore_identity_records_origin() {
        let id = SigningIdentity::from_keystore(
            &data("release.jceks"),
            "storepass",
            None,
            Some("keypass"),
            &Ui::quiet(),
        )
        .unwrap();
        assert_eq!(
            id.origin,
            IdentityOrigin::Keystore {
                kind: KeystoreKind::Jceks,
                alias: "release".into()
            }
        );
        assert!(id.matches_certificate().unwrap());
    }
}
