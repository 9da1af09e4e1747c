/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! One signing run as an explicit state machine.
//!
//! ```text
//! Idle -> Indexed -> ManifestBuilt -> SignatureFileBuilt -> Signed -> Repackaged -> Done
//! ```
//!
//! Each [`SigningPipeline::advance`] performs one transition. A failed step
//! leaves the pipeline in `Failed` for good; a new run starts from a new
//! pipeline. The output is written to a temporary file beside the
//! destination and only renamed into place by the final step, so a failed
//! run never leaves a file at the output path.

use crate::{
    config::SignOptions,
    digest::{DigestIndex, EntryIndex},
    error::SignerError,
    keys::SigningIdentity,
    manifest::{Manifest, ManifestBuilder},
    processor::ArchiveRepackager,
    signature_file::SignatureFileBuilder,
    signing::{SignedArtifacts, Signer},
    ui::Ui,
    BUFFER_SIZE,
};
use std::{
    fmt,
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Indexed,
    ManifestBuilt,
    SignatureFileBuilt,
    Signed,
    Repackaged,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::Indexed => "indexed",
            Stage::ManifestBuilt => "manifest built",
            Stage::SignatureFileBuilt => "signature file built",
            Stage::Signed => "signed",
            Stage::Repackaged => "repackaged",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

enum State {
    Idle,
    Indexed(EntryIndex),
    ManifestBuilt(Manifest),
    SignatureFileBuilt {
        manifest: Manifest,
        signature_file: Vec<u8>,
    },
    Signed(SignedArtifacts),
    Repackaged(NamedTempFile),
    Done(PathBuf),
    /// Stage the run was leaving when it failed.
    Failed(Stage),
}

impl State {
    fn stage(&self) -> Stage {
        match self {
            State::Idle => Stage::Idle,
            State::Indexed(_) => Stage::Indexed,
            State::ManifestBuilt(_) => Stage::ManifestBuilt,
            State::SignatureFileBuilt { .. } => Stage::SignatureFileBuilt,
            State::Signed(_) => Stage::Signed,
            State::Repackaged(_) => Stage::Repackaged,
            State::Done(_) => Stage::Done,
            State::Failed(_) => Stage::Failed,
        }
    }
}

pub struct SigningPipeline<'a> {
    input: PathBuf,
    output: PathBuf,
    identity: &'a SigningIdentity,
    signer: &'a dyn Signer,
    options: SignOptions,
    ui: &'a Ui,
    state: State,
}

impl<'a> SigningPipeline<'a> {
    pub fn new(
        input: &Path,
        output: &Path,
        identity: &'a SigningIdentity,
        signer: &'a dyn Signer,
        options: SignOptions,
        ui: &'a Ui,
    ) -> Self {
        Self {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            identity,
            signer,
            options,
            ui,
            state: State::Idle,
        }
    }

    pub fn stage(&self) -> Stage {
        self.state.stage()
    }

    /// The stage a failed run was leaving, if the run failed.
    pub fn failed_at(&self) -> Option<Stage> {
        match self.state {
            State::Failed(stage) => Some(stage),
            _ => None,
        }
    }

    /// Performs exactly one transition and returns the new stage.
    pub fn advance(&mut self) -> Result<Stage, SignerError> {
        let from = self.state.stage();
        // A step that errors leaves `Failed` behind; dropping its state
        // removes any staging file.
        let state = std::mem::replace(&mut self.state, State::Failed(from));
        let next = match state {
            State::Idle => {
                self.ui.info("Computing digests...");
                State::Indexed(DigestIndex::index_path(&self.input, self.ui)?)
            }
            State::Indexed(index) => {
                State::ManifestBuilt(ManifestBuilder::build(index.has_dex, &index.records))
            }
            State::ManifestBuilt(manifest) => {
                let signature_file = SignatureFileBuilder::build(&manifest);
                State::SignatureFileBuilt {
                    manifest,
                    signature_file,
                }
            }
            State::SignatureFileBuilt {
                manifest,
                signature_file,
            } => {
                self.ui.info("Signing...");
                let signature_block = self.signer.sign(&signature_file, self.identity)?;
                State::Signed(SignedArtifacts {
                    manifest: manifest.bytes,
                    signature_file,
                    signature_block,
                })
            }
            State::Signed(artifacts) => {
                self.ui.info("Writing signed archive...");
                State::Repackaged(self.stage_output(&artifacts)?)
            }
            State::Repackaged(staged) => {
                staged
                    .persist(&self.output)
                    .map_err(|e| SignerError::Staging(e.error))?;
                State::Done(self.output.clone())
            }
            State::Done(path) => {
                self.state = State::Done(path);
                return Ok(Stage::Done);
            }
            State::Failed(at) => {
                self.state = State::Failed(at);
                return Err(SignerError::Config(format!(
                    "Signing run already failed while {}; start a new run",
                    at
                )));
            }
        };

        self.state = next;
        self.ui.debug(&format!("Pipeline: {} -> {}", from, self.state.stage()));
        Ok(self.state.stage())
    }

    /// Advances until `Done` and returns the output path.
    pub fn run(&mut self) -> Result<PathBuf, SignerError> {
        while self.advance()? != Stage::Done {}
        match &self.state {
            State::Done(path) => Ok(path.clone()),
            _ => Ok(self.output.clone()),
        }
    }

    fn stage_output(&self, artifacts: &SignedArtifacts) -> Result<NamedTempFile, SignerError> {
        let dir = match self.output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let staged = tempfile::Builder::new()
            .prefix(".apksign-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(SignerError::Staging)?;
        self.ui
            .debug(&format!("Staging output in {}", staged.path().display()));

        let source = File::open(&self.input)
            .map_err(|e| SignerError::archive_open(&self.input, e.into()))?;
        let archive = ZipArchive::new(BufReader::new(source))
            .map_err(|e| SignerError::archive_open(&self.input, e))?;

        let writer = BufWriter::with_capacity(BUFFER_SIZE, staged);
        let writer = ArchiveRepackager::repackage(
            archive,
            artifacts,
            self.identity.get_reproducible_timestamp(),
            &self.options,
            writer,
            self.ui,
        )?;
        let staged = writer
            .into_inner()
            .map_err(|e| SignerError::ArchiveWrite(e.into_error()))?;
        staged.as_file().sync_all().map_err(SignerError::ArchiveWrite)?;

        ArchiveRepackager::verify_zip_integrity(staged.path())?;
        Ok(staged)
    }
}
