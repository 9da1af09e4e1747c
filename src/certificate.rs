/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Development signing identity, embedded from `certs/` at build time.
//! `PRIVATE_KEY` is PKCS#1 PEM, `CERTIFICATE` a self-signed X.509 PEM.

include!(concat!(env!("OUT_DIR"), "/dev_identity.rs"));
