//! Streaming bundle engine — writer and reader.
//!
//! # Writer
//! [`BundleWriter`] accepts files one at a time (or as a batch), classifies
//! each one, runs text files through the character codec and appends the
//! payload to its sink.  The blob is a bare concatenation: no header, no
//! padding, no checksum.  Record `i + 1` always starts where record `i`
//! ends.  `finish()` hands back the sink together with the [`Manifest`].
//!
//! # Reader
//! [`BundleReader`] slices each record out of the blob and reverses the
//! codec for text records.  Failures are per file: a bad record is reported
//! and the remaining records are still extracted.

use std::borrow::Cow;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::classify::Classifier;
use crate::codec::{decode_text, encode_text, CodecError};
use crate::index::{FileRecord, Manifest};
use crate::perf::{encode_batch, BatchError};
use crate::table::{CharTable, IndexWidth, LabelGenerator, LabelPolicy, TableError};

// ── Errors ───────────────────────────────────────────────────────────────────

/// Fatal writer errors.  Encoding failures here come from the character
/// table (index or label space exhausted) and abort the whole run.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Cannot encode {path}: {source}")]
    Encode {
        path:   String,
        #[source]
        source: CodecError,
    },
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Per-file reader errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("{path}: range {offset}..{end} lies outside the {blob_len}-byte blob")]
    OutOfBounds { path: String, offset: u64, end: u64, blob_len: u64 },
    #[error("{path}: {source}")]
    Decode {
        path:   String,
        #[source]
        source: CodecError,
    },
    #[error("{0}: refusing to write outside the output directory")]
    UnsafePath(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct BundleWriter<W: Write> {
    sink:       W,
    table:      CharTable,
    labels:     LabelGenerator,
    classifier: Classifier,
    files:      Vec<FileRecord>,
    offset:     u64,
}

impl<W: Write> BundleWriter<W> {
    /// Writer with the default extensions, a 16-bit index and OS-seeded labels.
    pub fn new(sink: W) -> Result<Self, WriteError> {
        let labels = LabelGenerator::new(LabelPolicy::default())?;
        Ok(Self::with_options(sink, Classifier::default(), IndexWidth::default(), labels))
    }

    pub fn with_options(
        sink:       W,
        classifier: Classifier,
        width:      IndexWidth,
        labels:     LabelGenerator,
    ) -> Self {
        Self {
            sink,
            table: CharTable::new(width),
            labels,
            classifier,
            files: Vec::new(),
            offset: 0,
        }
    }

    pub fn table(&self) -> &CharTable { &self.table }

    pub fn files(&self) -> &[FileRecord] { &self.files }

    /// Bytes written to the blob so far.
    pub fn offset(&self) -> u64 { self.offset }

    /// The text view of `data` if it should go through the codec.  Invalid
    /// UTF-8 in an allow-listed file falls back to binary with a warning.
    fn text_of<'a>(&self, path: &str, data: &'a [u8]) -> Option<&'a str> {
        if self.classifier.classify(path).is_binary() {
            return None;
        }
        match std::str::from_utf8(data) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(path, error = %e, "failed to decode as text, falling back to binary");
                None
            }
        }
    }

    fn append(&mut self, path: String, payload: &[u8], binary: bool) -> io::Result<&FileRecord> {
        self.sink.write_all(payload)?;
        let length = payload.len() as u64;
        self.files.push(FileRecord { path, offset: self.offset, length, binary });
        self.offset += length;
        Ok(&self.files[self.files.len() - 1])
    }

    // ── File ingestion ───────────────────────────────────────────────────────

    /// Add one file under the forward-slash relative `path`.
    pub fn add_file(&mut self, path: impl Into<String>, data: &[u8]) -> Result<&FileRecord, WriteError> {
        let path = path.into();
        let payload = match self.text_of(&path, data) {
            Some(text) => Cow::Owned(
                encode_text(text, &mut self.table, &mut self.labels)
                    .map_err(|source| WriteError::Encode { path: path.clone(), source })?,
            ),
            None => Cow::Borrowed(data),
        };
        let binary = matches!(payload, Cow::Borrowed(_));
        Ok(self.append(path, &payload, binary)?)
    }

    /// Add many files at once.  Produces the same blob and table as calling
    /// [`add_file`](Self::add_file) for each entry in order.
    pub fn add_batch(&mut self, files: &[(String, Vec<u8>)]) -> Result<(), WriteError> {
        let texts: Vec<Option<&str>> = files
            .iter()
            .map(|(path, data)| self.text_of(path, data))
            .collect();
        let text_paths: Vec<&str> = files
            .iter()
            .zip(&texts)
            .filter(|(_, t)| t.is_some())
            .map(|((path, _), _)| path.as_str())
            .collect();
        let wanted: Vec<&str> = texts.iter().flatten().copied().collect();

        let encoded = encode_batch(&wanted, &mut self.table, &mut self.labels)
            .map_err(|BatchError { position, source }| WriteError::Encode {
                path: text_paths.get(position).copied().unwrap_or_default().to_owned(),
                source,
            })?;

        let mut encoded = encoded.into_iter();
        for ((path, data), text) in files.iter().zip(texts) {
            match text.and_then(|_| encoded.next()) {
                Some(payload) => self.append(path.clone(), &payload, false)?,
                None          => self.append(path.clone(), data, true)?,
            };
        }
        Ok(())
    }

    // ── Finalization ─────────────────────────────────────────────────────────

    /// Flush the sink and return it with the completed metadata.
    pub fn finish(mut self) -> Result<(W, Manifest), WriteError> {
        self.sink.flush()?;
        let manifest = Manifest::new(self.table, self.files);
        Ok((self.sink, manifest))
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Outcome of [`BundleReader::extract_all`].
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub extracted: Vec<String>,
    pub failed:    Vec<(String, ExtractError)>,
}

impl ExtractReport {
    pub fn is_complete(&self) -> bool { self.failed.is_empty() }
}

pub struct BundleReader<R: Read + Seek> {
    reader:       R,
    pub manifest: Manifest,
    blob_len:     u64,
}

impl<R: Read + Seek> BundleReader<R> {
    /// Open a blob against its metadata.  Layout problems are logged, not
    /// fatal: records that still fit in the blob remain extractable.
    pub fn new(mut reader: R, manifest: Manifest) -> io::Result<Self> {
        let blob_len = reader.seek(SeekFrom::End(0))?;
        if let Err(e) = manifest.validate_layout(blob_len) {
            warn!(error = %e, "archive layout is inconsistent");
        }
        Ok(Self { reader, manifest, blob_len })
    }

    pub fn blob_len(&self) -> u64 { self.blob_len }

    /// The raw payload bytes of `record`.
    pub fn read_payload(&mut self, record: &FileRecord) -> Result<Vec<u8>, ExtractError> {
        let end = record.offset.checked_add(record.length);
        let end = match end {
            Some(end) if end <= self.blob_len => end,
            _ => {
                return Err(ExtractError::OutOfBounds {
                    path:     record.path.clone(),
                    offset:   record.offset,
                    end:      end.unwrap_or(u64::MAX),
                    blob_len: self.blob_len,
                })
            }
        };
        self.reader.seek(SeekFrom::Start(record.offset))?;
        let mut payload = vec![0u8; (end - record.offset) as usize];
        self.reader.read_exact(&mut payload)?;
        Ok(payload)
    }

    /// The original bytes of `record`.
    pub fn read_file(&mut self, record: &FileRecord) -> Result<Vec<u8>, ExtractError> {
        let payload = self.read_payload(record)?;
        if record.classification().is_binary() {
            return Ok(payload);
        }
        decode_text(&payload, &self.manifest.table)
            .map(String::into_bytes)
            .map_err(|source| ExtractError::Decode { path: record.path.clone(), source })
    }

    pub fn read_path(&mut self, path: &str) -> Result<Vec<u8>, ExtractError> {
        let record = self.manifest.find(path)
            .cloned()
            .ok_or_else(|| ExtractError::NotFound(path.to_owned()))?;
        self.read_file(&record)
    }

    fn extract_one(&mut self, record: &FileRecord, dest: &Path) -> Result<(), ExtractError> {
        let out = safe_join(dest, &record.path)?;
        let data = self.read_file(record)?;
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&out, data)?;
        Ok(())
    }

    /// Extract every record into `dest`, creating it if necessary.  Only a
    /// failure to create `dest` itself is returned as an error.
    pub fn extract_all<P: AsRef<Path>>(&mut self, dest: P) -> io::Result<ExtractReport> {
        let dest = dest.as_ref();
        fs::create_dir_all(dest)?;

        let records = self.manifest.files.clone();
        let total = records.len();
        let mut report = ExtractReport::default();
        for (i, record) in records.into_iter().enumerate() {
            match self.extract_one(&record, dest) {
                Ok(()) => {
                    info!("{}/{}: extracted {}", i + 1, total, record.path);
                    report.extracted.push(record.path);
                }
                Err(e) => {
                    warn!(path = %record.path, error = %e, "skipping file");
                    report.failed.push((record.path, e));
                }
            }
        }
        Ok(report)
    }
}

/// Join a record path onto `dest`, rejecting anything that could escape it.
fn safe_join(dest: &Path, rel: &str) -> Result<PathBuf, ExtractError> {
    let mut out = dest.to_path_buf();
    let mut named = false;
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                named = true;
            }
            Component::CurDir => {}
            _ => return Err(ExtractError::UnsafePath(rel.to_owned())),
        }
    }
    if !named {
        return Err(ExtractError::UnsafePath(rel.to_owned()));
    }
    Ok(out)
}
