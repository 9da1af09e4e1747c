/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Java keystore containers.
//!
//! JKS and JCEKS are read natively: the store-level SHA-1 integrity check,
//! Sun's `KeyProtector` XOR scheme (JKS) and `PBEWithMD5AndTripleDES`
//! (JCEKS). Anything else is handed to `p12_keystore` as PKCS#12.

use crate::error::SignerError;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use md5::{Digest, Md5};
use ring::digest;
use simple_asn1::{ASN1Block, BigInt};

pub const JKS_MAGIC: u32 = 0xFEED_FEED;
pub const JCEKS_MAGIC: u32 = 0xCECE_CECE;

const INTEGRITY_SALT: &[u8] = b"Mighty Aphrodite";
const SHA1_LEN: usize = 20;

const TAG_PRIVATE_KEY: u32 = 1;
const TAG_TRUSTED_CERT: u32 = 2;
const TAG_SECRET_KEY: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeystoreKind {
    Jks,
    Jceks,
    Pkcs12,
}

impl KeystoreKind {
    pub fn detect(data: &[u8]) -> Self {
        match data.get(..4).map(|m| u32::from_be_bytes([m[0], m[1], m[2], m[3]])) {
            Some(JKS_MAGIC) => KeystoreKind::Jks,
            Some(JCEKS_MAGIC) => KeystoreKind::Jceks,
            _ => KeystoreKind::Pkcs12,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            KeystoreKind::Jks => "JKS",
            KeystoreKind::Jceks => "JCEKS",
            KeystoreKind::Pkcs12 => "PKCS#12",
        }
    }
}

/// A decrypted private key (PKCS#8 DER) and its leaf certificate (DER).
#[derive(Debug, Clone)]
pub struct KeystoreKey {
    pub alias: String,
    pub pkcs8: Vec<u8>,
    pub cert_der: Vec<u8>,
}

/// Opens any supported container and returns the selected key.
///
/// `alias` may be omitted when the store holds exactly one private key;
/// `key_pass` falls back to `store_pass`.
pub fn load_key(
    data: &[u8],
    store_pass: &str,
    alias: Option<&str>,
    key_pass: Option<&str>,
) -> Result<(KeystoreKind, KeystoreKey), SignerError> {
    let kind = KeystoreKind::detect(data);
    let key_pass = key_pass.unwrap_or(store_pass);
    let key = match kind {
        KeystoreKind::Jks | KeystoreKind::Jceks => {
            let store = JavaKeyStore::parse(data, store_pass)?;
            let entry = store.private_key(alias)?;
            KeystoreKey {
                alias: entry.alias.clone(),
                pkcs8: entry.recover(key_pass)?,
                cert_der: entry.leaf_certificate()?.to_vec(),
            }
        }
        KeystoreKind::Pkcs12 => load_pkcs12(data, store_pass, alias)?,
    };
    Ok((kind, key))
}

fn load_pkcs12(data: &[u8], password: &str, alias: Option<&str>) -> Result<KeystoreKey, SignerError> {
    use p12_keystore::{KeyStore, KeyStoreEntry};

    let store = KeyStore::from_pkcs12(data, password)?;
    let (alias, chain) = match alias {
        Some(wanted) => store
            .entries()
            .find_map(|(name, entry)| match entry {
                KeyStoreEntry::PrivateKeyChain(c) if name.eq_ignore_ascii_case(wanted) => {
                    Some((name.as_str(), c))
                }
                _ => None,
            })
            .ok_or_else(|| SignerError::Keystore(format!("Alias '{}' not found", wanted)))?,
        None => {
            let keys = store
                .entries()
                .filter(|(_, e)| matches!(e, KeyStoreEntry::PrivateKeyChain(_)))
                .count();
            if keys > 1 {
                return Err(SignerError::Keystore(format!(
                    "Keystore holds {} private keys; choose one with --alias",
                    keys
                )));
            }
            store
                .private_key_chain()
                .ok_or_else(|| SignerError::Keystore("No private key entry in keystore".into()))?
        }
    };
    let leaf = chain
        .chain()
        .first()
        .ok_or_else(|| SignerError::Keystore(format!("No certificate for alias '{}'", alias)))?;

    Ok(KeystoreKey {
        alias: alias.to_string(),
        pkcs8: chain.key().to_vec(),
        cert_der: leaf.as_der().to_vec(),
    })
}

#[derive(Debug, Clone)]
pub struct PrivateKeyEntry {
    pub alias: String,
    /// DER `EncryptedPrivateKeyInfo`.
    pub protected_key: Vec<u8>,
    /// DER certificates, leaf first.
    pub chain: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct JavaKeyStore {
    pub kind: KeystoreKind,
    pub keys: Vec<PrivateKeyEntry>,
    /// Aliases of trusted certificate entries. Kept for error messages.
    pub trusted: Vec<String>,
}

impl JavaKeyStore {
    pub fn parse(data: &[u8], store_pass: &str) -> Result<Self, SignerError> {
        if data.len() < 12 + SHA1_LEN {
            return Err(SignerError::Keystore("Keystore file is truncated".into()));
        }
        let (body, expected) = data.split_at(data.len() - SHA1_LEN);
        let mut ctx = digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);
        ctx.update(&utf16_be(store_pass));
        ctx.update(INTEGRITY_SALT);
        ctx.update(body);
        if ctx.finish().as_ref() != expected {
            return Err(SignerError::Keystore(
                "Keystore was tampered with, or password was incorrect".into(),
            ));
        }

        let mut r = StoreReader::new(body);
        let kind = match r.u32()? {
            JKS_MAGIC => KeystoreKind::Jks,
            JCEKS_MAGIC => KeystoreKind::Jceks,
            other => {
                return Err(SignerError::Keystore(format!(
                    "Unknown keystore magic {:08X}",
                    other
                )))
            }
        };
        let version = r.u32()?;
        if version != 1 && version != 2 {
            return Err(SignerError::Keystore(format!(
                "Unsupported keystore version {}",
                version
            )));
        }

        let count = r.u32()?;
        let mut keys = Vec::new();
        let mut trusted = Vec::new();
        for _ in 0..count {
            let tag = r.u32()?;
            let alias = r.utf()?;
            let _timestamp = r.u64()?;
            match tag {
                TAG_PRIVATE_KEY => {
                    let len = r.u32()? as usize;
                    let protected_key = r.bytes(len)?.to_vec();
                    let chain_len = r.u32()?;
                    let mut chain = Vec::new();
                    for _ in 0..chain_len {
                        chain.push(r.certificate(version)?);
                    }
                    keys.push(PrivateKeyEntry {
                        alias,
                        protected_key,
                        chain,
                    });
                }
                TAG_TRUSTED_CERT => {
                    r.certificate(version)?;
                    trusted.push(alias);
                }
                TAG_SECRET_KEY => {
                    return Err(SignerError::Keystore(format!(
                        "Entry '{}' is a secret key; only private key entries are supported",
                        alias
                    )))
                }
                other => {
                    return Err(SignerError::Keystore(format!(
                        "Unknown entry tag {} for '{}'",
                        other, alias
                    )))
                }
            }
        }

        Ok(Self {
            kind,
            keys,
            trusted,
        })
    }

    /// Alias lookup ignores case, as keytool stores aliases lowercased.
    pub fn private_key(&self, alias: Option<&str>) -> Result<&PrivateKeyEntry, SignerError> {
        match alias {
            Some(wanted) => self
                .keys
                .iter()
                .find(|k| k.alias.eq_ignore_ascii_case(wanted))
                .ok_or_else(|| {
                    if self.trusted.iter().any(|t| t.eq_ignore_ascii_case(wanted)) {
                        SignerError::Keystore(format!(
                            "Alias '{}' is a trusted certificate, not a private key",
                            wanted
                        ))
                    } else {
                        SignerError::Keystore(format!("Alias '{}' not found", wanted))
                    }
                }),
            None => match self.keys.as_slice() {
                [only] => Ok(only),
                [] => Err(SignerError::Keystore("No private key entry in keystore".into())),
                many => Err(SignerError::Keystore(format!(
                    "Keystore holds {} private keys ({}); choose one with --alias",
                    many.len(),
                    many.iter().map(|k| k.alias.as_str()).collect::<Vec<_>>().join(", ")
                ))),
            },
        }
    }
}

impl PrivateKeyEntry {
    pub fn leaf_certificate(&self) -> Result<&[u8], SignerError> {
        self.chain
            .first()
            .map(Vec::as_slice)
            .ok_or_else(|| SignerError::Keystore(format!("No certificate for alias '{}'", self.alias)))
    }

    /// Decrypts the protected key into PKCS#8 DER.
    pub fn recover(&self, key_pass: &str) -> Result<Vec<u8>, SignerError> {
        let (algorithm, params, encrypted) = parse_encrypted_key_info(&self.protected_key)?;
        if algorithm == simple_asn1::oid!(1, 3, 6, 1, 4, 1, 42, 2, 17, 1, 1) {
            recover_key_protector(&encrypted, key_pass)
        } else if algorithm == simple_asn1::oid!(1, 3, 6, 1, 4, 1, 42, 2, 19, 1) {
            let (salt, iterations) = match params {
                Some(ASN1Block::Sequence(_, items)) => match items.as_slice() {
                    [ASN1Block::OctetString(_, salt), ASN1Block::Integer(_, count)] => {
                        (salt.clone(), iteration_count(count)?)
                    }
                    _ => return Err(bad_key_info("PBE parameters")),
                },
                _ => return Err(bad_key_info("PBE parameters")),
            };
            recover_pbe_md5_des3(&encrypted, key_pass, &salt, iterations)
        } else {
            Err(SignerError::Keystore(format!(
                "Unsupported key protection algorithm {:?}",
                algorithm
            )))
        }
    }
}

fn bad_key_info(what: &str) -> SignerError {
    SignerError::Keystore(format!("Malformed EncryptedPrivateKeyInfo: {}", what))
}

fn iteration_count(count: &BigInt) -> Result<u32, SignerError> {
    u32::try_from(count).map_err(|_| bad_key_info("iteration count"))
}

type KeyInfoParts = (simple_asn1::OID, Option<ASN1Block>, Vec<u8>);

fn parse_encrypted_key_info(der: &[u8]) -> Result<KeyInfoParts, SignerError> {
    let blocks = simple_asn1::from_der(der).map_err(|e| bad_key_info(&e.to_string()))?;
    let Some(ASN1Block::Sequence(_, items)) = blocks.into_iter().next() else {
        return Err(bad_key_info("not a SEQUENCE"));
    };
    let mut items = items.into_iter();
    let Some(ASN1Block::Sequence(_, alg)) = items.next() else {
        return Err(bad_key_info("algorithm identifier"));
    };
    let Some(ASN1Block::OctetString(_, encrypted)) = items.next() else {
        return Err(bad_key_info("encrypted data"));
    };
    let mut alg = alg.into_iter();
    let Some(ASN1Block::ObjectIdentifier(_, oid)) = alg.next() else {
        return Err(bad_key_info("algorithm OID"));
    };
    Ok((oid, alg.next(), encrypted))
}

/// Sun `KeyProtector`: salt(20) || xor-encrypted key || SHA-1 check(20).
fn recover_key_protector(data: &[u8], key_pass: &str) -> Result<Vec<u8>, SignerError> {
    if data.len() < 2 * SHA1_LEN {
        return Err(bad_key_info("protected key too short"));
    }
    let pw = utf16_be(key_pass);
    let salt = &data[..SHA1_LEN];
    let encrypted = &data[SHA1_LEN..data.len() - SHA1_LEN];
    let check = &data[data.len() - SHA1_LEN..];

    let mut stream = salt.to_vec();
    let mut plain = Vec::with_capacity(encrypted.len());
    for chunk in encrypted.chunks(SHA1_LEN) {
        stream = sha1_concat(&pw, &stream);
        plain.extend(chunk.iter().zip(&stream).map(|(c, k)| c ^ k));
    }

    if sha1_concat(&pw, &plain) != check {
        return Err(SignerError::Keystore(
            "Cannot recover key: wrong key password".into(),
        ));
    }
    Ok(plain)
}

/// `PBEWithMD5AndTripleDES` as implemented by the SunJCE provider.
fn recover_pbe_md5_des3(
    data: &[u8],
    key_pass: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<Vec<u8>, SignerError> {
    if salt.len() != 8 {
        return Err(bad_key_info("salt must be 8 bytes"));
    }
    let mut salt = salt.to_vec();
    if salt[..4] == salt[4..] {
        salt[..4].reverse();
    }
    // Only the low byte of each char takes part.
    let pw: Vec<u8> = key_pass.chars().map(|c| c as u32 as u8).collect();

    let mut derived = Vec::with_capacity(32);
    for half in salt.chunks(4) {
        let mut t = half.to_vec();
        for _ in 0..iterations {
            let mut md = Md5::new();
            md.update(&t);
            md.update(&pw);
            t = md.finalize().to_vec();
        }
        derived.extend_from_slice(&t);
    }
    let (key, iv) = derived.split_at(24);

    let plain = cbc::Decryptor::<des::TdesEde3>::new_from_slices(key, iv)
        .map_err(|e| SignerError::Keystore(format!("3DES init failed: {}", e)))?
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| SignerError::Keystore("Cannot recover key: wrong key password".into()))?;

    // A wrong password occasionally unpads cleanly; the payload must still be DER.
    match simple_asn1::from_der(&plain) {
        Ok(blocks) if matches!(blocks.first(), Some(ASN1Block::Sequence(..))) => Ok(plain),
        _ => Err(SignerError::Keystore(
            "Cannot recover key: wrong key password".into(),
        )),
    }
}

fn sha1_concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut ctx = digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);
    ctx.update(a);
    ctx.update(b);
    ctx.finish().as_ref().to_vec()
}

fn utf16_be(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
}

struct StoreReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StoreReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], SignerError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| SignerError::Keystore("Keystore file is truncated".into()))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, SignerError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, SignerError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, SignerError> {
        let hi = self.u32()? as u64;
        let lo = self.u32()? as u64;
        Ok(hi << 32 | lo)
    }

    /// `DataOutput.writeUTF`: u16 length, then modified UTF-8.
    fn utf(&mut self) -> Result<String, SignerError> {
        let len = self.u16()? as usize;
        let raw = self.bytes(len)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    fn certificate(&mut self, version: u32) -> Result<Vec<u8>, SignerError> {
        if version == 2 {
            let cert_type = self.utf()?;
            if cert_type != "X.509" {
                return Err(SignerError::Keystore(format!(
                    "Unsupported certificate type '{}'",
                    cert_type
                )));
            }
        }
        let len = self.u32()? as usize;
        Ok(self.bytes(len)?.to_vec())
    }
}
