//! High-level [`Archive`] API — the primary embedding surface.
//!
//! An archive lives in a directory holding two artifacts that only make
//! sense together: `bundle.fmod` (the blob) and `keys.json` (the metadata).
//!
//! ```no_run
//! use fmodpack::archive::{Archive, PackOptions};
//!
//! // Pack
//! let manifest = Archive::pack("site/", "out/", &PackOptions::default())?;
//! println!("{} files", manifest.files.len());
//!
//! // Read
//! let mut ar = Archive::open("out/")?;
//! let data = ar.read_file("index.html")?;
//! let report = ar.extract_all("restored/")?;
//! assert!(report.is_complete());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::{NamedTempFile, TempPath};
use thiserror::Error;
use tracing::info;
use walkdir::WalkDir;

use crate::classify::Classifier;
use crate::index::Manifest;
use crate::io_stream::{BundleReader, BundleWriter, ExtractError, ExtractReport, WriteError};
use crate::table::{IndexWidth, LabelGenerator, LabelPolicy, TableError};

pub const BUNDLE_FILE: &str = "bundle.fmod";
pub const KEYS_FILE:   &str = "keys.json";

// ── PackOptions ───────────────────────────────────────────────────────────────

/// Configuration for [`Archive::pack`].
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// Extensions treated as text in addition to the built-in list.
    pub text_extensions: Vec<String>,
    pub index_width:     IndexWidth,
    pub label_policy:    LabelPolicy,
    /// Fixed RNG seed; `None` draws fresh labels every run.
    pub seed:            Option<u64>,
}

impl PackOptions {
    fn classifier(&self) -> Classifier {
        let mut c = Classifier::default();
        c.extend(&self.text_extensions);
        c
    }

    fn label_generator(&self) -> Result<LabelGenerator, TableError> {
        match self.seed {
            Some(seed) => LabelGenerator::with_seed(self.label_policy, seed),
            None       => LabelGenerator::new(self.label_policy),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum PackError {
    #[error("Missing input: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("{}: path is not valid UTF-8", .0.display())]
    NonUtf8Path(PathBuf),
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("Invalid metadata: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── FileInfo ──────────────────────────────────────────────────────────────────

/// Lightweight descriptor returned by [`Archive::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path:       String,
    pub offset:     u64,
    pub length:     u64,
    pub binary:     bool,
    /// Character count of a text file (`length / width`).
    pub characters: Option<u64>,
}

// ── StagedPack ────────────────────────────────────────────────────────────────

/// A fully encoded archive waiting to be moved into place.
pub struct StagedPack {
    out_dir:  PathBuf,
    blob:     NamedTempFile,
    keys:     NamedTempFile,
    manifest: Manifest,
}

impl StagedPack {
    pub fn manifest(&self) -> &Manifest { &self.manifest }

    /// Rename the staged artifacts to `keys.json` and `bundle.fmod`.
    ///
    /// `keys.json` goes first and the blob last.  A previous `keys.json` is
    /// parked in a temporary file and restored if either rename fails, so on
    /// error the directory holds whatever archive it held before.
    pub fn commit(self) -> Result<Manifest, PackError> {
        let keys_path = self.out_dir.join(KEYS_FILE);
        let bundle_path = self.out_dir.join(BUNDLE_FILE);

        let backup = if keys_path.exists() {
            let parked = NamedTempFile::new_in(&self.out_dir)?.into_temp_path();
            fs::rename(&keys_path, &parked)?;
            Some(parked)
        } else {
            None
        };
        if let Err(e) = self.keys.persist(&keys_path) {
            if let Some(parked) = &backup {
                fs::rename(parked, &keys_path)?;
            }
            return Err(e.error.into());
        }
        if let Err(e) = self.blob.persist(&bundle_path) {
            restore_keys(&keys_path, backup.as_ref())?;
            return Err(e.error.into());
        }

        info!(
            files = self.manifest.files.len(),
            characters = self.manifest.table.len(),
            bytes = self.manifest.payload_len(),
            "packed into {}", bundle_path.display()
        );
        Ok(self.manifest)
    }
}

/// Put the parked `keys.json` back, or remove the new one if there was none.
fn restore_keys(keys_path: &Path, backup: Option<&TempPath>) -> io::Result<()> {
    match backup {
        Some(parked) => fs::rename(parked, keys_path),
        None         => fs::remove_file(keys_path),
    }
}

// ── Directory walking ────────────────────────────────────────────────────────

/// Every regular file under `src` as (absolute path, forward-slash relative
/// path), in lexical directory-then-name order.
pub fn collect_files(src: &Path) -> Result<Vec<(PathBuf, String)>, PackError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let rel = to_forward_slash(rel)
            .ok_or_else(|| PackError::NonUtf8Path(entry.path().to_path_buf()))?;
        files.push((entry.path().to_path_buf(), rel));
    }
    Ok(files)
}

fn to_forward_slash(rel: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_str()?);
        }
    }
    Some(parts.join("/"))
}

// ── Archive ───────────────────────────────────────────────────────────────────

pub struct Archive {
    dir:    PathBuf,
    reader: BundleReader<BufReader<File>>,
}

impl Archive {
    // ── Write ─────────────────────────────────────────────────────────────────

    /// Pack every file under `src` into `out_dir/bundle.fmod` and
    /// `out_dir/keys.json`.  Equivalent to [`stage`](Self::stage) followed by
    /// [`StagedPack::commit`].
    pub fn pack<P: AsRef<Path>, Q: AsRef<Path>>(
        src:     P,
        out_dir: Q,
        opts:    &PackOptions,
    ) -> Result<Manifest, PackError> {
        Self::stage(src, out_dir, opts)?.commit()
    }

    /// Encode every file under `src` into temporary files in `out_dir`.
    ///
    /// Nothing named `bundle.fmod` or `keys.json` is touched until
    /// [`StagedPack::commit`]; dropping the staged pack discards it.
    pub fn stage<P: AsRef<Path>, Q: AsRef<Path>>(
        src:     P,
        out_dir: Q,
        opts:    &PackOptions,
    ) -> Result<StagedPack, PackError> {
        let src = src.as_ref();
        let out_dir = out_dir.as_ref();
        if !src.is_dir() {
            return Err(PackError::MissingInput(src.to_path_buf()));
        }

        let files = collect_files(src)?;
        let total = files.len();
        info!("Files total: {}", total);

        let mut batch = Vec::with_capacity(total);
        for (i, (abs, rel)) in files.into_iter().enumerate() {
            info!("{}/{}: reading {}", i + 1, total, rel);
            batch.push((rel, fs::read(&abs)?));
        }

        fs::create_dir_all(out_dir)?;
        let staged_blob = NamedTempFile::new_in(out_dir)?;
        let mut writer = BundleWriter::with_options(
            BufWriter::new(staged_blob),
            opts.classifier(),
            opts.index_width,
            opts.label_generator()?,
        );
        writer.add_batch(&batch)?;
        let (sink, manifest) = writer.finish()?;
        let blob = sink.into_inner().map_err(|e| e.into_error())?;

        let mut keys = NamedTempFile::new_in(out_dir)?;
        keys.write_all(&manifest.to_bytes()?)?;
        keys.flush()?;

        Ok(StagedPack { out_dir: out_dir.to_path_buf(), blob, keys, manifest })
    }

    // ── Read ──────────────────────────────────────────────────────────────────

    /// Open `dir/bundle.fmod` with `dir/keys.json`.  Fails with
    /// [`PackError::MissingInput`] when either is absent.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, PackError> {
        let dir = dir.as_ref().to_path_buf();
        let bundle_path = dir.join(BUNDLE_FILE);
        let keys_path = dir.join(KEYS_FILE);
        for required in [&bundle_path, &keys_path] {
            if !required.is_file() {
                return Err(PackError::MissingInput(required.clone()));
            }
        }

        let manifest = Manifest::from_bytes(&fs::read(&keys_path)?)?;
        let reader = BundleReader::new(BufReader::new(File::open(&bundle_path)?), manifest)?;
        Ok(Self { dir, reader })
    }

    pub fn manifest(&self) -> &Manifest { &self.reader.manifest }

    pub fn list(&self) -> Vec<FileInfo> {
        let width = self.manifest().table.width().bytes() as u64;
        self.manifest().files.iter().map(|r| FileInfo {
            path:       r.path.clone(),
            offset:     r.offset,
            length:     r.length,
            binary:     r.binary,
            characters: (!r.binary).then(|| r.length / width),
        }).collect()
    }

    pub fn stat(&self, path: &str) -> Option<FileInfo> {
        self.list().into_iter().find(|f| f.path == path)
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>, ExtractError> {
        self.reader.read_path(path)
    }

    /// Extract all files into `dest`.  Per-file failures are collected in the
    /// report; the remaining files are still written.
    pub fn extract_all<P: AsRef<Path>>(&mut self, dest: P) -> Result<ExtractReport, PackError> {
        Ok(self.reader.extract_all(dest)?)
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path { &self.dir }

    pub fn blob_len(&self) -> u64 { self.reader.blob_len() }

    pub fn archive_id(&self) -> Option<&str> { self.manifest().archive_id.as_deref() }

    /// BLAKE3 of `bundle.fmod`, hex-encoded.
    pub fn blob_hash_hex(&self) -> Result<String, PackError> {
        let blob = fs::read(self.dir.join(BUNDLE_FILE))?;
        Ok(hex::encode(blake3::hash(&blob).as_bytes()))
    }
}
