/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

use crate::{
    config::{Config, Mode},
    error::SignerError,
    keys::SigningIdentity,
    pipeline::SigningPipeline,
    pkcs7::Pkcs7Signer,
    ui::Ui,
    verification::ArtifactVerifier,
    *,
};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

pub fn build_command() -> Command {
    Command::new(APP_NAME)
        .bin_name(APP_BIN_NAME)
        .version(APP_VERSION)
        .author(APP_AUTHOR)
        .about(APP_ABOUT)
        .disable_version_flag(true)
        .help_template("{about-with-newline}{usage-heading} {usage}\n\n{all-args}\n")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("sign")
                .about("Sign an APK/JAR/ZIP archive (v1 scheme)")
                .arg_required_else_help(true)
                .arg(
                    Arg::new("input")
                        .required(true)
                        .help("Path to the input archive (- for stdin)")
                        .index(1),
                )
                .arg(
                    Arg::new("output")
                        .help("Path to save the signed archive (- for stdout, optional)")
                        .index(2),
                )
                .arg(
                    Arg::new("keystore")
                        .short('s')
                        .long("keystore")
                        .conflicts_with_all(["private_key", "public_key"])
                        .help("JKS, JCEKS or PKCS#12 keystore"),
                )
                .arg(
                    Arg::new("store_pass")
                        .long("store-pass")
                        .requires("keystore")
                        .help("Keystore password"),
                )
                .arg(
                    Arg::new("alias")
                        .short('a')
                        .long("alias")
                        .requires("keystore")
                        .help("Key alias (optional if the keystore holds one key)"),
                )
                .arg(
                    Arg::new("key_pass")
                        .long("key-pass")
                        .requires("keystore")
                        .help("Key password (defaults to the keystore password)"),
                )
                .arg(
                    Arg::new("private_key")
                        .short('k')
                        .long("private-key")
                        .help("Private key (PEM or DER, PKCS#8 or PKCS#1)"),
                )
                .arg(
                    Arg::new("public_key")
                        .short('p')
                        .long("cert")
                        .visible_alias("public-key")
                        .help("Certificate matching the private key (PEM or DER)"),
                )
                .arg(
                    Arg::new("align")
                        .long("align")
                        .action(ArgAction::SetTrue)
                        .help("Pad entries so their data starts on a 4-byte boundary"),
                )
                .arg(
                    Arg::new("strip_directories")
                        .long("strip-directories")
                        .action(ArgAction::SetTrue)
                        .help("Leave directory entries out of the signed archive"),
                )
                .arg(
                    Arg::new("overwrite")
                        .short('f')
                        .long("overwrite")
                        .action(ArgAction::SetTrue)
                        .help("Force overwrite if output exists"),
                )
                .arg(
                    Arg::new("inplace")
                        .short('i')
                        .long("inplace")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("output")
                        .help("Sign input file directly (creates backup)"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify the v1 signature of an archive")
                .arg_required_else_help(true)
                .arg(
                    Arg::new("input")
                        .required(true)
                        .help("Path to the archive to verify")
                        .index(1),
                )
                .arg(
                    Arg::new("public_key")
                        .short('p')
                        .long("cert")
                        .visible_alias("public-key")
                        .help("Require the archive to be signed with this certificate"),
                ),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Set verbosity level (-v for verbose, -vv for more verbose, -vvv for debug)"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Suppress all output except errors"),
        )
        .arg(
            Arg::new("version_custom")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print version information"),
        )
}

pub fn run() -> Result<(), SignerError> {
    let matches = build_command().get_matches();
    run_with_matches(&matches)
}

pub fn run_with_matches(matches: &ArgMatches) -> Result<(), SignerError> {
    if matches.get_flag("version_custom") {
        let mut ui = Ui::new(false, false, false, false, true);
        ui.enable_colors_if_supported();
        ui.print_version_info();
        return Ok(());
    }

    let verbosity_level = matches.get_count("verbose");
    let quiet = matches.get_flag("quiet");
    let mut ui = Ui::from_verbosity_level(verbosity_level, quiet, true);
    ui.enable_colors_if_supported();
    ui.print_banner();

    if matches.subcommand().is_none() {
        return Err(SignerError::Config("No command provided".into()));
    }

    let config = Config::from_matches(matches, &ui)?;
    match config.mode {
        Mode::Verify => run_verify(&config, &ui),
        Mode::Sign { inplace } => run_sign(&config, inplace, &ui),
    }
}

fn run_verify(config: &Config, ui: &Ui) -> Result<(), SignerError> {
    ui.print_mode_header("VERIFICATION MODE");
    let expected = config
        .cert_path
        .as_deref()
        .map(|p| SigningIdentity::load_certificate(p, ui))
        .transpose()?;
    ui.info(&format!("Verifying: {}", config.input_path.display()));

    let report = ArtifactVerifier::verify(&config.input_path, expected.as_deref(), ui)?;
    ui.success("Signature valid. Artifact authentic.");
    ui.print_summary(
        "Verification Report",
        &[
            ("Entries", report.entries.to_string()),
            ("Signer", report.signer),
        ],
    );
    Ok(())
}

fn sign_to(
    input: &Path,
    output: &Path,
    identity: &SigningIdentity,
    config: &Config,
    ui: &Ui,
) -> Result<PathBuf, SignerError> {
    SigningPipeline::new(input, output, identity, &Pkcs7Signer, config.sign_options, ui).run()
}

fn run_sign(config: &Config, inplace: bool, ui: &Ui) -> Result<(), SignerError> {
    ui.info("Loading keys...");
    let identity = config.key_source.load(ui)?;
    ui.verbose(&format!("Signing identity: {}", identity.origin));

    ui.print_mode_header("SIGNING MODE");
    if config.input_temp_file.is_some() {
        ui.info("Source: <stdin pipe>");
    } else {
        ui.info(&format!("Source: {}", config.input_path.display()));
    }

    let Some(output_path) = config.output_path.as_deref() else {
        return sign_to_stdout(config, &identity, ui);
    };

    if inplace {
        return sign_in_place(config, &identity, ui);
    }

    if output_path.exists() && !config.overwrite {
        return Err(SignerError::Config(format!(
            "Output exists: {}. Use --overwrite.",
            output_path.display()
        )));
    }

    let written = sign_to(&config.input_path, output_path, &identity, config, ui)?;
    ui.success("Archive successfully signed.");
    ui.print_summary(
        "Signing Report",
        &[
            ("Status", "Success".to_string()),
            ("Mode", "Standard".to_string()),
            ("Input", config.input_path.display().to_string()),
            ("Output", written.display().to_string()),
            ("Key Used", config.key_source.describe()),
        ],
    );
    Ok(())
}

fn sign_to_stdout(config: &Config, identity: &SigningIdentity, ui: &Ui) -> Result<(), SignerError> {
    let dir = tempfile::tempdir().map_err(SignerError::Staging)?;
    let staged = dir.path().join("signed.apk");
    sign_to(&config.input_path, &staged, identity, config, ui)?;

    ui.verbose("Copying final output to stdout...");
    let mut file = fs::File::open(&staged).map_err(SignerError::Staging)?;
    let mut stdout = io::stdout().lock();
    io::copy(&mut file, &mut stdout).map_err(SignerError::ArchiveWrite)?;
    Ok(())
}

fn sign_in_place(config: &Config, identity: &SigningIdentity, ui: &Ui) -> Result<(), SignerError> {
    let original = &config.input_path;
    let backup = original.with_extension("bak");
    if backup.exists() {
        return Err(SignerError::Config(format!(
            "Backup path already exists: {}. Move it away before signing in place.",
            backup.display()
        )));
    }
    ui.verbose(&format!(
        "Creating backup: {} -> {}",
        original.display(),
        backup.display()
    ));
    fs::rename(original, &backup).map_err(SignerError::Staging)?;

    match sign_to(&backup, original, identity, config, ui) {
        Ok(_) => {
            fs::remove_file(&backup).map_err(SignerError::Staging)?;
            ui.success("In-place signing complete.");
            ui.print_summary(
                "Signing Report",
                &[
                    ("Status", "Success".to_string()),
                    ("Mode", "In-Place".to_string()),
                    ("File", original.display().to_string()),
                    ("Key Used", config.key_source.describe()),
                ],
            );
            Ok(())
        }
        Err(e) => match fs::rename(&backup, original) {
            Ok(_) => {
                ui.error("Original file restored from backup.");
                Err(e)
            }
            Err(restore_err) => {
                ui.error(&format!("CRITICAL: Backup restore failed: {}", restore_err));
                Err(SignerError::Staging(io::Error::new(
                    restore_err.kind(),
                    format!(
                        "Signing failed ({}) and restore failed ({}). Backup: {}",
                        e,
                        restore_err,
                        backup.display()
                    ),
                )))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        build_command().debug_assert();
    }

    #[test]
    fn keystore_conflicts_with_key_files() {
        let res = build_command().try_get_matches_from([
            "apksign", "sign", "in.apk", "-s", "release.jks", "-k", "key.pem",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn inplace_refuses_to_clobber_existing_backup() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("app.apk");
        let backup = dir.path().join("app.bak");
        fs::write(&input, b"not touched").unwrap();
        fs::write(&backup, b"user data").unwrap();

        let matches = build_command()
            .try_get_matches_from(["apksign", "-q", "sign", "-i", input.to_str().unwrap()])
            .unwrap();
        let err = run_with_matches(&matches).unwrap_err();

        assert!(matches!(err, SignerError::Config(_)));
        assert_eq!(fs::read(&backup).unwrap(), b"user data");
        assert_eq!(fs::read(&input).unwrap(), b"not touched");
    }

    #[test]
    fn verbosity_is_global() {
        let m = build_command()
            .try_get_matches_from(["apksign", "sign", "in.apk", "-vv"])
            .unwrap();
        assert_eq!(m.get_count("verbose"), 2);
    }
}
