/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Detached PKCS#7 `SignedData` for `CERT.RSA`: encoding with `simple_asn1`,
//! decoding with the DER reader bundled in `x509_parser`.

use crate::{crypto::CryptoEngine, error::SignerError, keys::SigningIdentity, signing::Signer};
use ring::{digest, rand::SystemRandom, signature};
use simple_asn1::{oid, ASN1Block, ASN1Class, BigInt, BigUint, OID};
use x509_parser::{
    der_parser::asn1_rs::{Any, Class, FromDer, Tag},
    prelude::X509Certificate,
};

fn oid_signed_data() -> OID {
    oid!(1, 2, 840, 113549, 1, 7, 2)
}
fn oid_data() -> OID {
    oid!(1, 2, 840, 113549, 1, 7, 1)
}
fn oid_sha1() -> OID {
    oid!(1, 3, 14, 3, 2, 26)
}
fn oid_sha256() -> OID {
    oid!(2, 16, 840, 1, 101, 3, 4, 2, 1)
}
fn oid_rsa_encryption() -> OID {
    oid!(1, 2, 840, 113549, 1, 1, 1)
}
fn oid_content_type() -> OID {
    oid!(1, 2, 840, 113549, 1, 9, 3)
}
fn oid_message_digest() -> OID {
    oid!(1, 2, 840, 113549, 1, 9, 4)
}

fn algorithm_identifier(oid: OID) -> ASN1Block {
    ASN1Block::Sequence(0, vec![ASN1Block::ObjectIdentifier(0, oid), ASN1Block::Null(0)])
}

fn attribute(oid: OID, value: ASN1Block) -> ASN1Block {
    ASN1Block::Sequence(
        0,
        vec![ASN1Block::ObjectIdentifier(0, oid), ASN1Block::Set(0, vec![value])],
    )
}

/// A constructed block whose content is already DER, e.g. `[0] IMPLICIT`.
fn raw_constructed(class: ASN1Class, tag: u32, content: Vec<u8>) -> ASN1Block {
    ASN1Block::Unknown(class, true, 0, BigUint::from(tag), content)
}

/// RSA PKCS#1 v1.5 with SHA-256 over authenticated attributes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pkcs7Signer;

impl Signer for Pkcs7Signer {
    fn sign(&self, sf: &[u8], identity: &SigningIdentity) -> Result<Vec<u8>, SignerError> {
        if !identity.matches_certificate()? {
            return Err(SignerError::InvalidKey(
                "Private key does not match the certificate's public key".into(),
            ));
        }

        let (_, cert) = X509Certificate::from_der(&identity.cert_der)
            .map_err(|e| SignerError::Signing(format!("Failed to parse certificate: {}", e)))?;

        let mut issuer_and_serial = cert.tbs_certificate.issuer.as_raw().to_vec();
        issuer_and_serial.extend(simple_asn1::to_der(&ASN1Block::Unknown(
            ASN1Class::Universal,
            false,
            0,
            BigUint::from(2u32),
            cert.raw_serial().to_vec(),
        ))?);

        // Already in DER SET OF order: contentType encodes shorter.
        let signed_attrs = vec![
            attribute(oid_content_type(), ASN1Block::ObjectIdentifier(0, oid_data())),
            attribute(
                oid_message_digest(),
                ASN1Block::OctetString(0, CryptoEngine::compute_sha256(sf)),
            ),
        ];
        let attrs_content = signed_attrs
            .iter()
            .map(simple_asn1::to_der)
            .collect::<Result<Vec<_>, _>>()?
            .concat();

        // The signature covers the attributes as a universal SET.
        let attrs_set = simple_asn1::to_der(&ASN1Block::Set(0, signed_attrs))?;
        let key_pair = &identity.key_pair;
        let mut signature_bytes = vec![0u8; key_pair.public().modulus_len()];
        key_pair.sign(
            &signature::RSA_PKCS1_SHA256,
            &SystemRandom::new(),
            &attrs_set,
            &mut signature_bytes,
        )?;

        let signer_info = ASN1Block::Sequence(
            0,
            vec![
                ASN1Block::Integer(0, BigInt::from(1u32)),
                raw_constructed(ASN1Class::Universal, 16, issuer_and_serial),
                algorithm_identifier(oid_sha256()),
                raw_constructed(ASN1Class::ContextSpecific, 0, attrs_content),
                algorithm_identifier(oid_rsa_encryption()),
                ASN1Block::OctetString(0, signature_bytes),
            ],
        );

        let signed_data = ASN1Block::Sequence(
            0,
            vec![
                ASN1Block::Integer(0, BigInt::from(1u32)),
                ASN1Block::Set(0, vec![algorithm_identifier(oid_sha256())]),
                // Detached: no eContent.
                ASN1Block::Sequence(0, vec![ASN1Block::ObjectIdentifier(0, oid_data())]),
                raw_constructed(ASN1Class::ContextSpecific, 0, identity.cert_der.clone()),
                ASN1Block::Set(0, vec![signer_info]),
            ],
        );

        let content_info = ASN1Block::Sequence(
            0,
            vec![
                ASN1Block::ObjectIdentifier(0, oid_signed_data()),
                ASN1Block::Explicit(
                    ASN1Class::ContextSpecific,
                    0,
                    BigUint::from(0u32),
                    Box::new(signed_data),
                ),
            ],
        );

        Ok(simple_asn1::to_der(&content_info)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    fn digest(&self, data: &[u8]) -> Vec<u8> {
        let alg = match self {
            DigestAlgorithm::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            DigestAlgorithm::Sha256 => &digest::SHA256,
        };
        digest::digest(alg, data).as_ref().to_vec()
    }

    fn verification(&self) -> &'static dyn signature::VerificationAlgorithm {
        match self {
            DigestAlgorithm::Sha1 => &signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
            DigestAlgorithm::Sha256 => &signature::RSA_PKCS1_2048_8192_SHA256,
        }
    }
}

/// The parts of a `CERT.RSA` needed to check it against `CERT.SF`.
#[derive(Debug, Clone)]
pub struct SignatureBlock {
    /// DER certificates in the order stored; the first is the signer's.
    pub certificates: Vec<Vec<u8>>,
    pub digest_algorithm: DigestAlgorithm,
    /// Authenticated attributes re-encoded as a universal SET, if present.
    pub signed_attributes: Option<Vec<u8>>,
    pub message_digest: Option<Vec<u8>>,
    pub signature: Vec<u8>,
}

fn malformed(what: &str) -> SignerError {
    SignerError::Validation(format!("Malformed signature block: {}", what))
}

/// Reads one TLV, returning it and its full encoding.
fn take<'a>(input: &mut &'a [u8], what: &str) -> Result<(Any<'a>, &'a [u8]), SignerError> {
    let start = *input;
    let (rest, any) = Any::from_der(start).map_err(|e| malformed(&format!("{}: {}", what, e)))?;
    *input = rest;
    Ok((any, &start[..start.len() - rest.len()]))
}

fn expect<'a>(
    input: &mut &'a [u8],
    class: Class,
    tag: Tag,
    what: &str,
) -> Result<(Any<'a>, &'a [u8]), SignerError> {
    let (any, raw) = take(input, what)?;
    if any.header.class() != class || any.header.tag() != tag {
        return Err(malformed(what));
    }
    Ok((any, raw))
}

fn is_oid(raw: &[u8], oid: OID) -> bool {
    simple_asn1::to_der(&ASN1Block::ObjectIdentifier(0, oid))
        .map(|der| der == raw)
        .unwrap_or(false)
}

fn universal(input: &mut &[u8], tag: Tag, what: &str) -> Result<Vec<u8>, SignerError> {
    expect(input, Class::Universal, tag, what).map(|(any, _)| any.data.to_vec())
}

impl SignatureBlock {
    pub fn parse(der: &[u8]) -> Result<Self, SignerError> {
        let mut input = der;
        let content_info = universal(&mut input, Tag::Sequence, "ContentInfo")?;
        let mut ci = content_info.as_slice();
        let (_, content_type) = expect(&mut ci, Class::Universal, Tag::Oid, "contentType")?;
        if !is_oid(content_type, oid_signed_data()) {
            return Err(malformed("content is not signedData"));
        }
        let (explicit, _) = expect(&mut ci, Class::ContextSpecific, Tag(0), "content")?;
        let mut wrapped = explicit.data;
        let signed_data = universal(&mut wrapped, Tag::Sequence, "SignedData")?;

        let mut sd = signed_data.as_slice();
        universal(&mut sd, Tag::Integer, "version")?;
        universal(&mut sd, Tag::Set, "digestAlgorithms")?;
        universal(&mut sd, Tag::Sequence, "encapContentInfo")?;

        let mut certificates = Vec::new();
        let signer_infos = loop {
            let (any, _) = take(&mut sd, "SignedData field")?;
            match (any.header.class(), any.header.tag()) {
                (Class::ContextSpecific, Tag(0)) => {
                    let mut certs = any.data;
                    while !certs.is_empty() {
                        let (_, raw) = take(&mut certs, "certificate")?;
                        certificates.push(raw.to_vec());
                    }
                }
                (Class::ContextSpecific, Tag(1)) => {}
                (Class::Universal, Tag::Set) => break any.data,
                _ => return Err(malformed("unexpected SignedData field")),
            }
        };

        let mut infos = signer_infos;
        let signer_info = universal(&mut infos, Tag::Sequence, "SignerInfo")?;
        let mut si = signer_info.as_slice();
        universal(&mut si, Tag::Integer, "SignerInfo version")?;
        universal(&mut si, Tag::Sequence, "issuerAndSerialNumber")?;
        let digest_alg = universal(&mut si, Tag::Sequence, "digestAlgorithm")?;
        let mut da = digest_alg.as_slice();
        let (_, alg_oid) = expect(&mut da, Class::Universal, Tag::Oid, "digest OID")?;
        let digest_algorithm = if is_oid(alg_oid, oid_sha256()) {
            DigestAlgorithm::Sha256
        } else if is_oid(alg_oid, oid_sha1()) {
            DigestAlgorithm::Sha1
        } else {
            return Err(malformed("unsupported digest algorithm"));
        };

        let (next, _) = take(&mut si, "SignerInfo field")?;
        let (signed_attributes, message_digest) =
            if next.header.class() == Class::ContextSpecific && next.header.tag() == Tag(0) {
                let attrs = simple_asn1::to_der(&raw_constructed(
                    ASN1Class::Universal,
                    17,
                    next.data.to_vec(),
                ))?;
                let digest = Self::find_message_digest(next.data)?;
                universal(&mut si, Tag::Sequence, "signatureAlgorithm")?;
                (Some(attrs), Some(digest))
            } else if next.header.tag() == Tag::Sequence {
                (None, None)
            } else {
                return Err(malformed("signatureAlgorithm"));
            };
        let signature = universal(&mut si, Tag::OctetString, "signature")?;

        if certificates.is_empty() {
            return Err(malformed("no certificate"));
        }
        Ok(Self {
            certificates,
            digest_algorithm,
            signed_attributes,
            message_digest,
            signature,
        })
    }

    fn find_message_digest(mut attrs: &[u8]) -> Result<Vec<u8>, SignerError> {
        while !attrs.is_empty() {
            let attr = universal(&mut attrs, Tag::Sequence, "attribute")?;
            let mut a = attr.as_slice();
            let (_, attr_type) = expect(&mut a, Class::Universal, Tag::Oid, "attribute type")?;
            if !is_oid(attr_type, oid_message_digest()) {
                continue;
            }
            let values = universal(&mut a, Tag::Set, "attribute values")?;
            return universal(&mut values.as_slice(), Tag::OctetString, "messageDigest");
        }
        Err(malformed("messageDigest attribute missing"))
    }

    pub fn signer_certificate(&self) -> &[u8] {
        &self.certificates[0]
    }

    /// Checks the signature (and the message digest, when attributes are
    /// present) against the detached content.
    pub fn verify(&self, content: &[u8]) -> Result<(), SignerError> {
        let (_, cert) = X509Certificate::from_der(self.signer_certificate())
            .map_err(|e| SignerError::Validation(format!("Invalid signer certificate: {}", e)))?;
        let public_key = signature::UnparsedPublicKey::new(
            self.digest_algorithm.verification(),
            cert.public_key().subject_public_key.data.as_ref(),
        );

        let signed = match (&self.signed_attributes, &self.message_digest) {
            (Some(attrs), Some(expected)) => {
                if *expected != self.digest_algorithm.digest(content) {
                    return Err(SignerError::Validation(
                        "messageDigest does not match CERT.SF".into(),
                    ));
                }
                attrs.as_slice()
            }
            _ => content,
        };
        public_key
            .verify(signed, &self.signature)
            .map_err(|_| SignerError::Validation("Signature verification failed".into()))
    }
}
