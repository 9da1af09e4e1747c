/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

use crate::{
    digest::EntryIndex,
    error::SignerError,
    keys::SigningIdentity,
    manifest::{Manifest, ManifestBuilder},
    signature_file::SignatureFileBuilder,
};

/// Produces the signature block (`CERT.RSA`) for a signature file.
pub trait Signer {
    fn sign(&self, signature_file: &[u8], identity: &SigningIdentity)
        -> Result<Vec<u8>, SignerError>;
}

/// The three `META-INF/` files, in the order they are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedArtifacts {
    pub manifest: Vec<u8>,
    pub signature_file: Vec<u8>,
    pub signature_block: Vec<u8>,
}

impl SignedArtifacts {
    /// Runs the text stages and the signer in one go.
    pub fn create(
        index: &EntryIndex,
        signer: &dyn Signer,
        identity: &SigningIdentity,
    ) -> Result<Self, SignerError> {
        let manifest: Manifest = ManifestBuilder::build(index.has_dex, &index.records);
        let signature_file = SignatureFileBuilder::build(&manifest);
        let signature_block = signer.sign(&signature_file, identity)?;
        Ok(Self {
            manifest: manifest.bytes,
            signature_file,
            signature_block,
        })
    }

    pub fn entries(&self) -> [(&'static str, &[u8]); 3] {
        [
            (crate::MANIFEST_NAME, &self.manifest),
            (crate::CERT_SF_NAME, &self.signature_file),
            (crate::CERT_RSA_NAME, &self.signature_block),
        ]
    }
}
