/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

use apksign::{
    cli::{build_command, run_with_matches},
    config::{KeySource, SignOptions},
    crypto::CryptoEngine,
    digest::DigestIndex,
    error::SignerError,
    keys::SigningIdentity,
    pipeline::{SigningPipeline, Stage},
    pkcs7::{Pkcs7Signer, SignatureBlock},
    signing::SignedArtifacts,
    ui::Ui,
    verification::ArtifactVerifier,
    zip_writer::PaddingRule,
    CERT_RSA_NAME, CERT_SF_NAME, MANIFEST_NAME,
};
use rstest::rstest;
use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use zip::{write::SimpleFileOptions, ZipArchive, ZipWriter};

fn data(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

fn dev_cert() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("certs/dev_cert.pem")
}

fn write_archive(path: &Path, entries: &[(&str, &str)]) {
    let mut w = ZipWriter::new(File::create(path).unwrap());
    for (name, content) in entries {
        if name.ends_with('/') {
            w.add_directory(*name, SimpleFileOptions::default()).unwrap();
        } else {
            w.start_file(*name, SimpleFileOptions::default()).unwrap();
            w.write_all(content.as_bytes()).unwrap();
        }
    }
    w.finish().unwrap();
}

fn read_entry(path: &Path, name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut out = Vec::new();
    entry.read_to_end(&mut out).unwrap();
    out
}

fn entry_names(path: &Path) -> Vec<String> {
    let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    archive.file_names().map(str::to_string).collect()
}

fn sign(input: &Path, output: &Path, identity: &SigningIdentity) -> Result<PathBuf, SignerError> {
    let ui = Ui::quiet();
    SigningPipeline::new(
        input,
        output,
        identity,
        &Pkcs7Signer,
        SignOptions::default(),
        &ui,
    )
    .run()
}

fn dev_identity() -> SigningIdentity {
    SigningIdentity::development(&Ui::quiet()).unwrap()
}

#[test]
fn dex_archive_gets_dex_manifest_and_verifies() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("app.apk");
    let output = dir.path().join("app_signed.apk");
    write_archive(&input, &[("classes.dex", "ABC")]);

    sign(&input, &output, &dev_identity()).unwrap();

    let manifest = read_entry(&output, MANIFEST_NAME);
    let expected = format!(
        "Manifest-Version: 1.0\r\n\
         Dex-Location: classes.dex\r\n\
         Built-By: Generated-by-ADT\r\n\
         Created-By: Android Gradle 3.2.0\r\n\
         \r\n\
         Name: classes.dex\r\n\
         SHA1-Digest: {}\r\n\
         \r\n",
        CryptoEngine::compute_sha1(b"ABC")
    );
    assert_eq!(String::from_utf8(manifest.clone()).unwrap(), expected);

    let sf = String::from_utf8(read_entry(&output, CERT_SF_NAME)).unwrap();
    assert!(sf.starts_with("Signature-Version: 1.0\r\nCreated-By: 1.0 (Android)\r\n"));
    assert!(sf.contains(&format!(
        "SHA1-Digest-Manifest: {}\r\n",
        CryptoEngine::compute_sha1(&manifest)
    )));

    let report = ArtifactVerifier::verify(&output, None, &Ui::quiet()).unwrap();
    assert_eq!(report.entries, 1);
}

#[test]
fn empty_archive_signs_with_header_only_manifest() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("empty.zip");
    let output = dir.path().join("empty_signed.zip");
    write_archive(&input, &[]);

    sign(&input, &output, &dev_identity()).unwrap();

    let manifest = String::from_utf8(read_entry(&output, MANIFEST_NAME)).unwrap();
    assert!(manifest.starts_with("Manifest-Version: 1.0\r\nBuilt-By: Generated-by-ADT\r\n"));
    assert!(!manifest.contains("Name: "));
    assert_eq!(
        entry_names(&output),
        [MANIFEST_NAME, CERT_SF_NAME, CERT_RSA_NAME]
    );
    ArtifactVerifier::verify(&output, None, &Ui::quiet()).unwrap();
}

#[test]
fn stale_signature_files_are_replaced() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("resigned.jar");
    let output = dir.path().join("out.jar");
    write_archive(
        &input,
        &[
            ("META-INF/MANIFEST.MF", "Manifest-Version: 1.0\r\n\r\n"),
            ("META-INF/OLD.SF", "stale"),
            ("META-INF/OLD.RSA", "stale"),
            ("a.txt", "hello"),
        ],
    );

    sign(&input, &output, &dev_identity()).unwrap();

    let names = entry_names(&output);
    assert_eq!(names, ["a.txt", MANIFEST_NAME, CERT_SF_NAME, CERT_RSA_NAME]);
    let meta_inf = names.iter().filter(|n| n.starts_with("META-INF/")).count();
    assert_eq!(meta_inf, 3);
    let manifest = String::from_utf8(read_entry(&output, MANIFEST_NAME)).unwrap();
    assert!(!manifest.contains("OLD.SF"));
}

#[test]
fn long_names_wrap_once_in_manifest() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("long.apk");
    let output = dir.path().join("long_signed.apk");
    let name = format!("assets/{}.bin", "x".repeat(80));
    write_archive(&input, &[(name.as_str(), "payload")]);

    sign(&input, &output, &dev_identity()).unwrap();

    let manifest = String::from_utf8(read_entry(&output, MANIFEST_NAME)).unwrap();
    let full_line = format!("Name: {}", name);
    let wrapped = format!("{}\r\n {}\r\n", &full_line[..70], &full_line[70..]);
    assert!(manifest.contains(&wrapped));
    ArtifactVerifier::verify(&output, None, &Ui::quiet()).unwrap();
}

#[test]
fn signing_text_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("app.apk");
    write_archive(
        &input,
        &[("classes.dex", "ABC"), ("res/", ""), ("res/a.xml", "<a/>")],
    );
    let identity = dev_identity();
    let first = dir.path().join("one.apk");
    let second = dir.path().join("two.apk");
    sign(&input, &first, &identity).unwrap();
    sign(&input, &second, &identity).unwrap();

    for name in [MANIFEST_NAME, CERT_SF_NAME, CERT_RSA_NAME] {
        assert_eq!(read_entry(&first, name), read_entry(&second, name), "{}", name);
    }
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}

#[test]
fn artifacts_can_be_built_without_repackaging() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("app.apk");
    write_archive(&input, &[("classes.dex", "ABC"), ("lib/x.so", "\x7fELF")]);

    let ui = Ui::quiet();
    let identity = dev_identity();
    let index = DigestIndex::index_path(&input, &ui).unwrap();
    let artifacts = SignedArtifacts::create(&index, &Pkcs7Signer, &identity).unwrap();

    let block = SignatureBlock::parse(&artifacts.signature_block).unwrap();
    assert_eq!(block.signer_certificate(), identity.cert_der.as_slice());
    block.verify(&artifacts.signature_file).unwrap();
    let names: Vec<_> = artifacts.entries().iter().map(|(n, _)| *n).collect();
    assert_eq!(names, [MANIFEST_NAME, CERT_SF_NAME, CERT_RSA_NAME]);
}

#[test]
fn mismatched_key_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("app.apk");
    let output = dir.path().join("app_signed.apk");
    write_archive(&input, &[("classes.dex", "ABC")]);

    let ui = Ui::quiet();
    let identity = SigningIdentity::from_pem_files(&data("other_key.pem"), &dev_cert(), &ui).unwrap();
    let mut pipeline = SigningPipeline::new(
        &input,
        &output,
        &identity,
        &Pkcs7Signer,
        SignOptions::default(),
        &ui,
    );
    let err = pipeline.run().unwrap_err();
    assert!(matches!(err, SignerError::InvalidKey(_)));
    assert_eq!(pipeline.failed_at(), Some(Stage::SignatureFileBuilt));
    assert!(!output.exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn inconsistent_key_is_rejected_before_signing() {
    let err = KeySource::Files {
        key: data("inconsistent_key.pem"),
        cert: dev_cert(),
    }
    .load(&Ui::quiet())
    .unwrap_err();
    assert!(matches!(err, SignerError::InvalidKey(_)));
}

#[rstest]
#[case::jks("release.jks", Some("keypass"))]
#[case::jceks("release.jceks", Some("keypass"))]
#[case::pkcs12("release.p12", None)]
fn keystore_identities_sign_and_verify(#[case] store: &str, #[case] key_pass: Option<&str>) {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("app.apk");
    let output = dir.path().join("app_signed.apk");
    write_archive(&input, &[("classes.dex", "ABC"), ("assets/a.txt", "a")]);

    let ui = Ui::quiet();
    let identity = KeySource::Keystore {
        path: data(store),
        store_pass: "storepass".into(),
        alias: Some("release".into()),
        key_pass: key_pass.map(str::to_string),
    }
    .load(&ui)
    .unwrap();
    sign(&input, &output, &identity).unwrap();

    let report =
        ArtifactVerifier::verify(&output, Some(identity.cert_der.as_slice()), &ui).unwrap();
    assert_eq!(report.entries, 2);
    assert!(report.signer.contains("Release"), "{}", report.signer);
}

#[test]
fn verification_rejects_unexpected_certificate() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("app.apk");
    let output = dir.path().join("app_signed.apk");
    write_archive(&input, &[("a.txt", "a")]);
    sign(&input, &output, &dev_identity()).unwrap();

    let ui = Ui::quiet();
    let other = SigningIdentity::load_certificate(&data("other_cert.pem"), &ui).unwrap();
    let err = ArtifactVerifier::verify(&output, Some(other.as_slice()), &ui).unwrap_err();
    assert!(matches!(err, SignerError::Validation(_)));
}

#[test]
fn wrong_keystore_password_fails() {
    let err = KeySource::Keystore {
        path: data("release.jks"),
        store_pass: "wrong".into(),
        alias: None,
        key_pass: None,
    }
    .load(&Ui::quiet())
    .unwrap_err();
    assert!(matches!(err, SignerError::Keystore(_)));
}

#[test]
fn aligned_output_verifies() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("app.apk");
    let output = dir.path().join("app_signed.apk");
    write_archive(&input, &[("classes.dex", "ABC"), ("res/", ""), ("r.bin", "1")]);

    let ui = Ui::quiet();
    let identity = dev_identity();
    let options = SignOptions {
        padding: PaddingRule::Aligned,
        strip_directories: true,
    };
    SigningPipeline::new(&input, &output, &identity, &Pkcs7Signer, options, &ui)
        .run()
        .unwrap();

    assert!(!entry_names(&output).iter().any(|n| n == "res/"));
    let mut archive = ZipArchive::new(File::open(&output).unwrap()).unwrap();
    for i in 0..archive.len() {
        assert_eq!(archive.by_index_raw(i).unwrap().data_start() % 4, 0);
    }
    ArtifactVerifier::verify(&output, None, &ui).unwrap();
}

#[test]
fn cli_signs_then_verifies() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("app.apk");
    let output = dir.path().join("cli_signed.apk");
    write_archive(&input, &[("classes.dex", "ABC")]);

    let sign = build_command()
        .try_get_matches_from([
            "apksign",
            "-q",
            "sign",
            input.to_str().unwrap(),
            output.to_str().unwrap(),
        ])
        .unwrap();
    run_with_matches(&sign).unwrap();
    assert!(output.exists());

    // Existing output is refused without --overwrite.
    let again = build_command()
        .try_get_matches_from([
            "apksign",
            "-q",
            "sign",
            input.to_str().unwrap(),
            output.to_str().unwrap(),
        ])
        .unwrap();
    assert!(matches!(
        run_with_matches(&again),
        Err(SignerError::Config(_))
    ));

    let verify = build_command()
        .try_get_matches_from([
            "apksign",
            "-q",
            "verify",
            output.to_str().unwrap(),
            "-p",
            dev_cert().to_str().unwrap(),
        ])
        .unwrap();
    run_with_matches(&verify).unwrap();
}

#[test]
fn cli_inplace_signing_removes_backup() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("app.apk");
    write_archive(&input, &[("a.txt", "a")]);

    let matches = build_command()
        .try_get_matches_from(["apksign", "-q", "sign", "-i", input.to_str().unwrap()])
        .unwrap();
    run_with_matches(&matches).unwrap();

    assert!(!dir.path().join("app.bak").exists());
    ArtifactVerifier::verify(&input, None, &Ui::quiet()).unwrap();
}
