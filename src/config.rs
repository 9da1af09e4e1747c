/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Configuration parsing and validation for the ApkSign CLI.

use crate::{error::SignerError, keys::SigningIdentity, ui::Ui, zip_writer::PaddingRule};
use clap::ArgMatches;
use std::{
    io,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

/// Execution mode for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Sign an archive with optional in-place modification
    Sign { inplace: bool },
    /// Verify an archive's signature
    Verify,
}

/// Knobs that change the bytes of the signed archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignOptions {
    pub padding: PaddingRule,
    /// Drop directory entries instead of copying them.
    pub strip_directories: bool,
}

/// Where the signing key and certificate come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Development,
    Files {
        key: PathBuf,
        cert: PathBuf,
    },
    Keystore {
        path: PathBuf,
        store_pass: String,
        alias: Option<String>,
        key_pass: Option<String>,
    },
}

impl KeySource {
    pub fn load(&self, ui: &Ui) -> Result<SigningIdentity, SignerError> {
        match self {
            KeySource::Development => SigningIdentity::development(ui),
            KeySource::Files { key, cert } => SigningIdentity::from_pem_files(key, cert, ui),
            KeySource::Keystore {
                path,
                store_pass,
                alias,
                key_pass,
            } => SigningIdentity::from_keystore(
                path,
                store_pass,
                alias.as_deref(),
                key_pass.as_deref(),
                ui,
            ),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            KeySource::Development => "Development key".into(),
            KeySource::Files { key, .. } => format!("Key file {}", key.display()),
            KeySource::Keystore { path, alias, .. } => match alias {
                Some(a) => format!("Keystore {} ({})", path.display(), a),
                None => format!("Keystore {}", path.display()),
            },
        }
    }
}

/// Application configuration parsed from command-line arguments.
/// Built once; nothing mutates it afterwards.
#[derive(Debug)]
pub struct Config {
    pub input_path: PathBuf,
    /// Where the signed archive goes. For stdout this is `None`.
    pub output_path: Option<PathBuf>,
    pub mode: Mode,
    pub key_source: KeySource,
    /// Certificate the verified archive must be signed with.
    pub cert_path: Option<PathBuf>,
    pub overwrite: bool,
    pub quiet: bool,
    pub verbose: bool,
    /// Verbosity level (0 = off, 1 = verbose, 2 = very verbose, 3+ = debug)
    pub verbosity_level: u8,
    pub sign_options: SignOptions,
    /// Holds stdin input on disk for the duration of the run.
    pub input_temp_file: Option<NamedTempFile>,
}

impl Config {
    pub fn from_matches(matches: &ArgMatches, ui: &Ui) -> Result<Self, SignerError> {
        let quiet = matches.get_flag("quiet");
        let verbosity_level = matches.get_count("verbose");

        match matches.subcommand() {
            Some(("sign", sub)) => Self::parse_sign(sub, quiet, verbosity_level, ui),
            Some(("verify", sub)) => Self::parse_verify(sub, quiet, verbosity_level, ui),
            _ => Err(SignerError::Config(
                "No subcommand provided. Use 'sign' or 'verify'.".into(),
            )),
        }
    }

    fn existing_file(value: &str, what: &str) -> Result<PathBuf, SignerError> {
        let path = PathBuf::from(value);
        std::fs::metadata(&path).map_err(|e| {
            SignerError::Config(format!("Cannot access {} {}: {}", what, path.display(), e))
        })?;
        Ok(path)
    }

    /// `app.apk` becomes `app_signed.apk` in the same directory.
    pub fn default_output_path(input: &Path) -> Result<PathBuf, SignerError> {
        let stem = input.file_stem().and_then(|s| s.to_str()).ok_or_else(|| {
            SignerError::Config(format!(
                "Invalid input filename (no stem or non-UTF8): {}",
                input.display()
            ))
        })?;
        let name = match input.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}_signed.{}", stem, ext),
            None => format!("{}_signed", stem),
        };
        Ok(input.with_file_name(name))
    }

    fn read_stdin(ui: &Ui) -> Result<NamedTempFile, SignerError> {
        let mut temp = NamedTempFile::new().map_err(SignerError::Staging)?;
        io::copy(&mut io::stdin().lock(), &mut temp)
            .map_err(|e| SignerError::Config(format!("Failed to read stdin: {}", e)))?;
        ui.debug(&format!("Copied stdin to {}", temp.path().display()));
        Ok(temp)
    }

    fn parse_key_source(matches: &ArgMatches, ui: &Ui) -> Result<KeySource, SignerError> {
        if let Some(store) = matches.get_one::<String>("keystore") {
            let path = Self::existing_file(store, "keystore")?;
            let store_pass = matches
                .get_one::<String>("store_pass")
                .cloned()
                .ok_or_else(|| SignerError::Config("--store-pass is required with --keystore".into()))?;
            return Ok(KeySource::Keystore {
                path,
                store_pass,
                alias: matches.get_one::<String>("alias").cloned(),
                key_pass: matches.get_one::<String>("key_pass").cloned(),
            });
        }

        match (
            matches.get_one::<String>("private_key"),
            matches.get_one::<String>("public_key"),
        ) {
            (Some(key), Some(cert)) => Ok(KeySource::Files {
                key: Self::existing_file(key, "private key")?,
                cert: Self::existing_file(cert, "certificate")?,
            }),
            (None, None) => {
                ui.debug("No key material given; using the development identity");
                Ok(KeySource::Development)
            }
            _ => Err(SignerError::Config(
                "A private key (-k) and its certificate (-p) must be given together".into(),
            )),
        }
    }

    fn parse_sign(
        matches: &ArgMatches,
        quiet: bool,
        verbosity_level: u8,
        ui: &Ui,
    ) -> Result<Self, SignerError> {
        let verbose = verbosity_level > 0;
        let input_str = matches
            .get_one::<String>("input")
            .ok_or_else(|| SignerError::Config("No input file specified".into()))?;

        let inplace = matches.get_flag("inplace");
        let (input_path, input_temp_file) = if input_str == "-" {
            if inplace {
                return Err(SignerError::Config(
                    "Cannot use --inplace with stdin input.".into(),
                ));
            }
            let temp = Self::read_stdin(ui)?;
            (temp.path().to_path_buf(), Some(temp))
        } else {
            (Self::existing_file(input_str, "input file")?, None)
        };

        let output_path = if inplace {
            Some(input_path.clone())
        } else {
            match matches.get_one::<String>("output").map(String::as_str) {
                Some("-") => None,
                Some(out) => Some(PathBuf::from(out)),
                // stdin in, stdout out
                None if input_temp_file.is_some() => None,
                None => Some(Self::default_output_path(&input_path)?),
            }
        };

        let key_source = Self::parse_key_source(matches, ui)?;
        let sign_options = SignOptions {
            padding: if matches.get_flag("align") {
                PaddingRule::Aligned
            } else {
                PaddingRule::Legacy
            },
            strip_directories: matches.get_flag("strip_directories"),
        };

        if verbose {
            ui.info(&format!("Input: {}", input_str));
            match &output_path {
                Some(p) => ui.info(&format!("Output: {}", p.display())),
                None => ui.info("Output: <stdout>"),
            }
        }

        Ok(Self {
            input_path,
            output_path,
            mode: Mode::Sign { inplace },
            key_source,
            cert_path: None,
            overwrite: matches.get_flag("overwrite"),
            quiet,
            verbose,
            verbosity_level,
            sign_options,
            input_temp_file,
        })
    }

    fn parse_verify(
        matches: &ArgMatches,
        quiet: bool,
        verbosity_level: u8,
        ui: &Ui,
    ) -> Result<Self, SignerError> {
        let input = matches.get_one::<String>("input").ok_or_else(|| {
            SignerError::Config("No input file specified for verification".into())
        })?;
        let input_path = Self::existing_file(input, "input file")?;
        let cert_path = matches
            .get_one::<String>("public_key")
            .map(|c| Self::existing_file(c, "certificate"))
            .transpose()?;

        ui.debug(&format!("Verifying: {}", input_path.display()));

        Ok(Self {
            input_path,
            output_path: None,
            mode: Mode::Verify,
            key_source: KeySource::Development,
            cert_path,
            overwrite: false,
            quiet,
            verbose: verbosity_level > 0,
            verbosity_level,
            sign_options: SignOptions::default(),
            input_temp_file: None,
        })
    }
}
