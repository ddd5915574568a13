//! Atomic JSON document store.
//!
//! # Guarantees
//!
//! - **Atomic writes**: documents are serialized into a temp file in the
//!   destination directory, flushed, fsynced and renamed over the target.
//!   A reader never observes a partially written document.
//! - **No silent repair**: a document that fails to parse or fails its schema
//!   is reported as [`ReadOutcome::Corrupt`]; the caller decides whether to
//!   skip, quarantine or abort.
//! - **No deletion**: the store only creates and replaces files.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

use super::lock::{DEFAULT_LOCK_TIMEOUT, DocumentLock};
use super::schema::{self, DocumentKind, ValidationIssue};
use crate::models::{CategoryPatternFile, MonthlyAggregate, PatternFile, RuleMetadata, SessionIndex};
use crate::{Error, Result};

/// Maximum accepted document size (64 MiB).
const MAX_DOCUMENT_SIZE: u64 = 64 * 1024 * 1024;

/// A typed persisted document.
pub trait Document: Serialize + DeserializeOwned {
    /// Schema the raw JSON is checked against before deserializing.
    const KIND: DocumentKind;
}

impl Document for MonthlyAggregate {
    const KIND: DocumentKind = DocumentKind::MonthlyAggregate;
}

impl Document for SessionIndex {
    const KIND: DocumentKind = DocumentKind::SessionIndex;
}

impl Document for PatternFile {
    const KIND: DocumentKind = DocumentKind::PatternFile;
}

impl Document for CategoryPatternFile {
    const KIND: DocumentKind = DocumentKind::CategoryPatternFile;
}

impl Document for RuleMetadata {
    const KIND: DocumentKind = DocumentKind::RuleMetadata;
}

/// Result of reading a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome<T> {
    /// The file does not exist.
    Missing,
    /// The file parsed and passed its schema.
    Loaded(T),
    /// The file exists but cannot be used.
    Corrupt(String),
}

impl<T> ReadOutcome<T> {
    /// Returns the document, treating a missing file as `T::default()`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptDocument`] for a corrupt file.
    pub fn or_default(self, path: &Path) -> Result<T>
    where
        T: Default,
    {
        match self {
            Self::Missing => Ok(T::default()),
            Self::Loaded(doc) => Ok(doc),
            Self::Corrupt(reason) => Err(Error::CorruptDocument {
                path: path.to_path_buf(),
                reason,
            }),
        }
    }

    /// Returns the document if it was loaded.
    #[must_use]
    pub fn loaded(self) -> Option<T> {
        match self {
            Self::Loaded(doc) => Some(doc),
            Self::Missing | Self::Corrupt(_) => None,
        }
    }
}

/// Every issue found in one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Validated file.
    pub path: PathBuf,
    /// Schema the file was checked against.
    pub kind: DocumentKind,
    /// Issues in document order.
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Whether the document has no error-severity issues.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(ValidationIssue::is_error)
    }

    /// Error-severity issues.
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    /// Warning-severity issues.
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| !i.is_error())
    }
}

/// A serialized document waiting to be renamed into place.
///
/// Dropping it without calling [`commit`](Self::commit) removes the temp
/// file and leaves the destination untouched.
#[derive(Debug)]
pub struct StagedDocument {
    temp: NamedTempFile,
    destination: PathBuf,
}

impl StagedDocument {
    /// Destination path.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Atomically renames the staged file over the destination.
    ///
    /// A failed rename is retried up to [`COMMIT_ATTEMPTS`] times with a
    /// linearly growing pause.
    ///
    /// # Errors
    ///
    /// Returns an error if every rename attempt fails; the destination is
    /// unchanged.
    pub fn commit(self) -> Result<PathBuf> {
        let Self {
            mut temp,
            destination,
        } = self;
        let mut attempt = 1;
        loop {
            match temp.persist(&destination) {
                Ok(_) => break,
                Err(e) if attempt < COMMIT_ATTEMPTS => {
                    tracing::warn!(
                        path = %destination.display(),
                        attempt,
                        error = %e.error,
                        "Commit failed, retrying"
                    );
                    std::thread::sleep(COMMIT_RETRY_DELAY * attempt);
                    temp = e.file;
                    attempt += 1;
                },
                Err(e) => {
                    return Err(Error::operation(
                        "commit_document",
                        format!(
                            "{}: {} (after {attempt} attempts)",
                            destination.display(),
                            e.error
                        ),
                    ));
                },
            }
        }
        tracing::debug!(path = %destination.display(), attempts = attempt, "Committed document");
        Ok(destination)
    }
}

/// Prior contents of a destination, kept until a batch commit succeeds.
enum Snapshot {
    /// The destination did not exist.
    Absent,
    /// Copy of the destination's previous bytes.
    Saved(NamedTempFile),
}

impl Snapshot {
    fn take(destination: &Path) -> Result<Self> {
        if !destination.is_file() {
            return Ok(Self::Absent);
        }
        let dir = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(dir).map_err(|e| Error::operation("snapshot_document", e))?;
        fs::copy(destination, temp.path())
            .map_err(|e| Error::operation("snapshot_document", format!("{}: {e}", destination.display())))?;
        Ok(Self::Saved(temp))
    }

    fn restore(self, destination: &Path) -> std::result::Result<(), String> {
        match self {
            Self::Absent => match fs::remove_file(destination) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.to_string()),
                _ => Ok(()),
            },
            Self::Saved(temp) => temp.persist(destination).map(drop).map_err(|e| e.error.to_string()),
        }
    }
}

/// Rename attempts per commit.
pub const COMMIT_ATTEMPTS: u32 = 3;

/// Pause before the second rename attempt; later attempts wait longer.
const COMMIT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Reads, validates and atomically writes pipeline documents.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    lock_timeout: Duration,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore {
    /// Creates a store with the default lock timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long locked updates wait for a contended lock.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Reads a document.
    ///
    /// The raw JSON is schema-checked before deserializing, so a
    /// [`ReadOutcome::Corrupt`] reason names the first offending location.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures other than "not found".
    pub fn read<T: Document>(&self, path: &Path) -> Result<ReadOutcome<T>> {
        let Some(contents) = read_text(path)? else {
            return Ok(ReadOutcome::Missing);
        };

        let value: Value = match serde_json::from_str(&contents) {
            Ok(value) => value,
            Err(e) => return Ok(ReadOutcome::Corrupt(format!("invalid JSON: {e}"))),
        };

        if let Some(issue) = schema::check(T::KIND, &value)
            .into_iter()
            .find(ValidationIssue::is_error)
        {
            return Ok(ReadOutcome::Corrupt(issue.to_string()));
        }

        match serde_json::from_value(value) {
            Ok(doc) => Ok(ReadOutcome::Loaded(doc)),
            Err(e) => Ok(ReadOutcome::Corrupt(format!("{} schema: {e}", T::KIND))),
        }
    }

    /// Validates a document against the schema of `kind`.
    ///
    /// Reports every issue found. A missing file yields a single error.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures other than "not found".
    pub fn validate(&self, path: &Path, kind: DocumentKind) -> Result<ValidationReport> {
        let mut report = ValidationReport {
            path: path.to_path_buf(),
            kind,
            issues: Vec::new(),
        };

        let Some(contents) = read_text(path)? else {
            report
                .issues
                .push(ValidationIssue::error("", "file does not exist"));
            return Ok(report);
        };

        let value: Value = match serde_json::from_str(&contents) {
            Ok(value) => value,
            Err(e) => {
                report
                    .issues
                    .push(ValidationIssue::error("", format!("invalid JSON: {e}")));
                return Ok(report);
            },
        };

        report.issues = schema::check(kind, &value);
        if report.is_valid() {
            if let Err(e) = deserialize_as(kind, value) {
                report.issues.push(ValidationIssue::error("", e));
            }
        }
        Ok(report)
    }

    /// Serializes a document into a temp file next to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the temp-file write fails. The
    /// destination is never touched.
    pub fn stage<T: Serialize + ?Sized>(&self, path: &Path, document: &T) -> Result<StagedDocument> {
        let mut json = serde_json::to_string_pretty(document)
            .map_err(|e| Error::operation("serialize_document", e))?;
        json.push('\n');
        self.stage_text(path, &json)
    }

    /// Writes raw text into a temp file next to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the write fails.
    pub fn stage_text(&self, path: &Path, contents: &str) -> Result<StagedDocument> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .map_err(|e| Error::operation("create_document_dir", format!("{}: {e}", dir.display())))?;

        let mut temp = NamedTempFile::new_in(dir)
            .map_err(|e| Error::operation("create_temp_file", e))?;
        temp.write_all(contents.as_bytes())
            .map_err(|e| Error::operation("write_temp_file", e))?;
        temp.flush()
            .map_err(|e| Error::operation("flush_temp_file", e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Error::operation("sync_temp_file", e))?;

        Ok(StagedDocument {
            temp,
            destination: path.to_path_buf(),
        })
    }

    /// Atomically writes a document.
    ///
    /// # Errors
    ///
    /// Returns an error if staging or the rename fails.
    pub fn write<T: Serialize + ?Sized>(&self, path: &Path, document: &T) -> Result<()> {
        self.stage(path, document)?.commit().map(|_| ())
    }

    /// Atomically writes raw text.
    ///
    /// # Errors
    ///
    /// Returns an error if staging or the rename fails.
    pub fn write_text(&self, path: &Path, contents: &str) -> Result<()> {
        self.stage_text(path, contents)?.commit().map(|_| ())
    }

    /// Commits staged documents in order, all or nothing.
    ///
    /// Every destination is snapshotted before the first rename. If any
    /// commit fails, the destinations already replaced are restored from
    /// their snapshots (or removed when they did not exist before).
    ///
    /// # Errors
    ///
    /// Returns an error naming the failed destination, plus any destination
    /// that could not be restored.
    pub fn commit_all(&self, staged: Vec<StagedDocument>) -> Result<Vec<PathBuf>> {
        let snapshots = staged
            .iter()
            .map(|doc| Snapshot::take(doc.destination()))
            .collect::<Result<Vec<_>>>()?;

        let mut committed = Vec::with_capacity(staged.len());
        let mut failure = None;
        for doc in staged {
            match doc.commit() {
                Ok(path) => committed.push(path),
                Err(e) => {
                    failure = Some(e);
                    break;
                },
            }
        }
        let Some(failure) = failure else {
            return Ok(committed);
        };

        let mut unrestored = Vec::new();
        for (path, snapshot) in committed.iter().zip(snapshots) {
            if let Err(reason) = snapshot.restore(path) {
                tracing::error!(path = %path.display(), reason = %reason, "Failed to roll back document");
                unrestored.push(path.display().to_string());
            }
        }
        tracing::warn!(
            rolled_back = committed.len() - unrestored.len(),
            error = %failure,
            "Batch commit failed"
        );
        if unrestored.is_empty() {
            Err(failure)
        } else {
            Err(Error::operation(
                "commit_documents",
                format!("{failure}; not restored: {}", unrestored.join(", ")),
            ))
        }
    }

    /// Acquires the advisory lock guarding `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken within the store's lock
    /// timeout.
    pub fn lock(&self, path: &Path) -> Result<DocumentLock> {
        DocumentLock::acquire(path, self.lock_timeout)
    }

    /// Locked read-modify-write.
    ///
    /// Holds the document's advisory lock while reading, applying `update`
    /// and writing back. A missing document starts from `T::default()`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptDocument`] if the existing document is corrupt
    /// (nothing is written), or any lock, I/O or `update` error.
    pub fn update<T, R>(&self, path: &Path, update: impl FnOnce(&mut T) -> Result<R>) -> Result<R>
    where
        T: Document + Default,
    {
        let _lock = self.lock(path)?;
        let mut document = self.read::<T>(path)?.or_default(path)?;
        let result = update(&mut document)?;
        self.write(path, &document)?;
        Ok(result)
    }
}

fn read_text(path: &Path) -> Result<Option<String>> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::operation(
                "read_document_metadata",
                format!("{}: {e}", path.display()),
            ));
        },
    };

    if metadata.len() > MAX_DOCUMENT_SIZE {
        return Err(Error::InvalidInput(format!(
            "document exceeds maximum size of {MAX_DOCUMENT_SIZE} bytes: {}",
            path.display()
        )));
    }

    match fs::read(path) {
        Ok(bytes) => Ok(Some(
            String::from_utf8(bytes)
                .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::operation(
            "read_document",
            format!("{}: {e}", path.display()),
        )),
    }
}

fn deserialize_as(kind: DocumentKind, value: Value) -> std::result::Result<(), String> {
    let result = match kind {
        DocumentKind::MonthlyAggregate => serde_json::from_value::<MonthlyAggregate>(value).map(drop),
        DocumentKind::SessionIndex => serde_json::from_value::<SessionIndex>(value).map(drop),
        DocumentKind::PatternFile => serde_json::from_value::<PatternFile>(value).map(drop),
        DocumentKind::CategoryPatternFile => {
            serde_json::from_value::<CategoryPatternFile>(value).map(drop)
        },
        DocumentKind::RuleMetadata => serde_json::from_value::<RuleMetadata>(value).map(drop),
    };
    result.map_err(|e| format!("{kind} schema: {e}"))
}
