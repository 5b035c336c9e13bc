//! Ingestion of analysis output directories
//!
//! An analysis run leaves two kinds of artifacts behind:
//!
//! ```text
//! output/
//! ├── Alice.pdf          report document with an embedded snapshot token
//! ├── Carol.pdf
//! └── Bob/               raw results of one run
//!     ├── activity.csv
//!     ├── sleep.csv
//!     └── qc.csv         (unrecognised schema, ignored)
//! ```
//!
//! [`ResultIngestor::ingest`] turns both into [`AnalysisSnapshot`]s. Report
//! documents are decoded through the envelope codec; subdirectories are
//! rebuilt by classifying and parsing their CSV files.
//!
//! ## Failure boundaries
//!
//! - A document that cannot be decoded is recorded as failed; the other
//!   documents are still decoded.
//! - A CSV file that fails to parse abandons its whole subdirectory. When
//!   `delete_corrupt_files` is set, that file is deleted first.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use actilyze_core::ingest::ResultIngestor;
//!
//! let ingestor = ResultIngestor::new(&config.ingest);
//! let report = ingestor.ingest(Path::new("output")).await?;
//! println!("{} snapshots, {} failures", report.snapshots.len(), report.failures.len());
//! ```

pub mod classify;

pub use classify::{classify, parse_artifact, Classification, ParsedArtifact};

use crate::codec;
use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::types::AnalysisSnapshot;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extracts the text of a report document.
///
/// Rendering reports is someone else's job; the ingestor only needs their
/// text so it can find the envelope.
pub trait DocumentReader: Send + Sync {
    fn read_text(&self, path: &Path) -> Result<String>;
}

/// Reads the document bytes as (lossy) UTF-8 text.
///
/// Works for text reports and for PDFs whose content streams keep the
/// envelope lines uncompressed. Flate-compressed PDFs never show the
/// envelope; pass a text-extracting [`DocumentReader`] to
/// [`ResultIngestor::with_reader`] for those.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextReader;

impl DocumentReader for PlainTextReader {
    fn read_text(&self, path: &Path) -> Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Outcome of ingesting one output directory.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Reconstructed snapshots, documents first
    pub snapshots: Vec<AnalysisSnapshot>,
    pub documents_succeeded: usize,
    pub documents_failed: usize,
    pub runs_succeeded: usize,
    pub runs_failed: usize,
    /// Failed document or subdirectory → error message
    pub failures: Vec<(PathBuf, String)>,
}

impl IngestReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Rebuilds snapshots from an analysis output directory.
pub struct ResultIngestor {
    reader: Arc<dyn DocumentReader>,
    delete_corrupt_files: bool,
    sort_by_name: bool,
}

impl ResultIngestor {
    pub fn new(config: &IngestConfig) -> Self {
        Self::with_reader(config, Arc::new(PlainTextReader))
    }

    /// Ingestor with a custom document text extractor.
    pub fn with_reader(config: &IngestConfig, reader: Arc<dyn DocumentReader>) -> Self {
        Self {
            reader,
            delete_corrupt_files: config.delete_corrupt_files,
            sort_by_name: config.sort_by_name,
        }
    }

    /// Ingest every report document and run subdirectory directly under `dir`.
    ///
    /// A missing directory yields an empty report.
    pub async fn ingest(&self, dir: &Path) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
            tracing::info!(dir = %dir.display(), "Output directory does not exist");
            return Ok(report);
        }

        let (documents, run_dirs) = list_artifacts(dir).await?;
        tracing::info!(
            dir = %dir.display(),
            documents = documents.len(),
            runs = run_dirs.len(),
            "Discovered analysis artifacts"
        );

        for (path, outcome) in self.decode_documents(documents).await? {
            match outcome {
                Ok(snapshot) => {
                    report.documents_succeeded += 1;
                    report.snapshots.push(snapshot);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to decode report");
                    report.documents_failed += 1;
                    report.failures.push((path, e.to_string()));
                }
            }
        }

        for run_dir in run_dirs {
            match self.rebuild_run(&run_dir).await {
                Ok(snapshot) => {
                    report.runs_succeeded += 1;
                    report.snapshots.push(snapshot);
                }
                Err(e) => {
                    tracing::warn!(dir = %run_dir.display(), error = %e, "Failed to rebuild run");
                    report.runs_failed += 1;
                    report.failures.push((run_dir, e.to_string()));
                }
            }
        }

        if self.sort_by_name {
            report.snapshots.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        }

        for snapshot in &mut report.snapshots {
            snapshot.apply_content_tags();
        }

        tracing::info!(
            snapshots = report.snapshots.len(),
            documents_failed = report.documents_failed,
            runs_failed = report.runs_failed,
            "Ingestion finished"
        );
        Ok(report)
    }

    /// Decode all documents as one blocking unit, one after another.
    async fn decode_documents(
        &self,
        documents: Vec<PathBuf>,
    ) -> Result<Vec<(PathBuf, Result<AnalysisSnapshot>)>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let reader = self.reader.clone();
        tokio::task::spawn_blocking(move || {
            documents
                .into_iter()
                .map(|path| {
                    let outcome = decode_document(reader.as_ref(), &path);
                    (path, outcome)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))
    }

    /// Rebuild a snapshot from one run subdirectory's CSV files.
    async fn rebuild_run(&self, run_dir: &Path) -> Result<AnalysisSnapshot> {
        let name = file_label(run_dir, false);
        let mut snapshot = AnalysisSnapshot::new(name, run_dir);

        for csv_path in list_files(run_dir, "csv").await? {
            let content = tokio::fs::read(&csv_path).await?;
            match parse_artifact(&csv_path, &content) {
                Ok(ParsedArtifact::Sleep(records)) => snapshot.set_sleep_records(records),
                Ok(ParsedArtifact::Activity(records)) => snapshot.set_activity_records(records),
                Ok(ParsedArtifact::Unknown) => {
                    tracing::debug!(path = %csv_path.display(), "Skipping unrecognised CSV");
                }
                Err(e) => {
                    if self.delete_corrupt_files {
                        self.delete_corrupt(&csv_path).await;
                    }
                    return Err(e);
                }
            }
        }

        tracing::debug!(
            run = %snapshot.file_name,
            sleep = snapshot.sleep_records.len(),
            activity = snapshot.activity_records.len(),
            "Rebuilt run"
        );
        Ok(snapshot)
    }

    async fn delete_corrupt(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::warn!(path = %path.display(), "Deleted unparseable CSV file"),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to delete unparseable CSV file"
            ),
        }
    }
}

fn decode_document(reader: &dyn DocumentReader, path: &Path) -> Result<AnalysisSnapshot> {
    let text = reader.read_text(path)?;
    let mut snapshot = codec::extract_and_decode(&text)?;
    snapshot.exported = true;
    snapshot.file_name = file_label(path, true);
    snapshot.file_path = path.to_path_buf();
    Ok(snapshot)
}

/// Display name for a document (file stem) or run directory (dir name).
fn file_label(path: &Path, strip_extension: bool) -> String {
    let name = if strip_extension {
        path.file_stem()
    } else {
        path.file_name()
    };
    name.map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Report documents and run subdirectories directly under `dir`, in
/// enumeration order.
async fn list_artifacts(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut documents = Vec::new();
    let mut run_dirs = Vec::new();

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            run_dirs.push(path);
        } else if file_type.is_file() && has_extension(&path, "pdf") {
            documents.push(path);
        }
    }

    Ok((documents, run_dirs))
}

/// Regular files with extension `ext` directly under `dir`, in enumeration order.
async fn list_files(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && has_extension(&path, ext) {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_label() {
        assert_eq!(file_label(Path::new("/out/Alice.pdf"), true), "Alice");
        assert_eq!(file_label(Path::new("/out/Bob"), false), "Bob");
        assert_eq!(file_label(Path::new("/out/v1.2"), false), "v1.2");
    }

    #[test]
    fn test_has_extension_case_insensitive() {
        assert!(has_extension(Path::new("a/Report.PDF"), "pdf"));
        assert!(has_extension(Path::new("a/sleep.csv"), "csv"));
        assert!(!has_extension(Path::new("a/sleep.csv.bak"), "csv"));
        assert!(!has_extension(Path::new("a/pdf"), "pdf"));
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let ingestor = ResultIngestor::new(&IngestConfig::default());
        let report = ingestor
            .ingest(Path::new("/definitely/not/a/real/output"))
            .await
            .unwrap();
        assert!(report.snapshots.is_empty());
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_custom_reader_is_used() {
        struct Fixed(String);
        impl DocumentReader for Fixed {
            fn read_text(&self, _path: &Path) -> Result<String> {
                Ok(self.0.clone())
            }
        }

        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("Dana.pdf"), b"%PDF-1.7 binary").unwrap();
        let mut inner = AnalysisSnapshot::new("ignored", "/elsewhere");
        inner.set_activity_records(vec![Default::default()]);

        let ingestor = ResultIngestor::with_reader(
            &IngestConfig::default(),
            Arc::new(Fixed(codec::embed("", &inner))),
        );
        let report = ingestor.ingest(dir.path()).await.unwrap();

        assert_eq!(report.documents_succeeded, 1);
        let snapshot = &report.snapshots[0];
        assert_eq!(snapshot.file_name, "Dana");
        assert!(snapshot.exported);
        assert_eq!(snapshot.tags.len(), 1);
        assert_eq!(snapshot.tags[0].name, "Activity");
    }
}
