/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! # ApkSign Library
//!
//! Legacy v1 (signed JAR) signing for Android APK/JAR/ZIP packages: content
//! digests, `MANIFEST.MF`, `CERT.SF`, a detached PKCS#7 `CERT.RSA`, and an
//! archive repackager that pads local headers the way alignment tools do.

pub mod certificate;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod digest;
pub mod error;
pub mod keys;
pub mod keystore;
pub mod manifest;
pub mod pipeline;
pub mod pkcs7;
pub mod processor;
pub mod signature_file;
pub mod signing;
pub mod ui;
pub mod verification;
pub mod zip_writer;

pub const APP_NAME: &str = "ApkSign";
pub const APP_BIN_NAME: &str = "apksign";
pub const APP_VERSION: &str = "1.0.0";
pub const APP_AUTHOR: &str = "Tiash H Kabir / @MrCarb0n";
pub const APP_ABOUT: &str =
    "Legacy v1 (JAR signature) signing and verification for Android APK/JAR/ZIP packages.";
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Reserved signature directory. Nothing below it is digested or copied.
pub const META_INF_PREFIX: &str = "META-INF/";
pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";
pub const CERT_SF_NAME: &str = "META-INF/CERT.SF";
pub const CERT_RSA_NAME: &str = "META-INF/CERT.RSA";

/// Entry whose presence selects the dex-aware manifest header.
pub const DEX_ENTRY_NAME: &str = "classes.dex";

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;
