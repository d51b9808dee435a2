//! Batch orchestration for both audit pipelines and the index command.
//!
//! Documents are processed strictly one after another. A failure local to
//! one document is recorded in the report's `document_errors` and the batch
//! moves on; only an authentication failure stops the batch.

use anyhow::{bail, Context, Result};
use std::borrow::Cow;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::analyzer::ModelAnalyzer;
use crate::chunk::chunk_segments;
use crate::config::Config;
use crate::embedding::{embed_batched, Embedder};
use crate::extract::{check_readable, extract_segments};
use crate::index::{FlatIndex, VectorIndex};
use crate::models::{Chunk, DocumentFindings, EntryMetadata, Rule};
use crate::progress::{AuditProgressEvent, AuditProgressReporter};
use crate::report::{aggregate, ComplianceReport, DocumentError};
use crate::scoring::RetrievalScorer;

/// A PDF to audit, read lazily from disk or held in memory.
#[derive(Debug, Clone)]
pub enum SourceDocument {
    File(PathBuf),
    Memory { name: String, bytes: Vec<u8> },
}

impl SourceDocument {
    pub fn memory(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        SourceDocument::Memory {
            name: name.into(),
            bytes,
        }
    }

    /// File name used to label findings.
    pub fn name(&self) -> String {
        match self {
            SourceDocument::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            SourceDocument::Memory { name, .. } => name.clone(),
        }
    }

    pub async fn bytes(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            SourceDocument::File(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Ok(Cow::Owned(bytes))
            }
            SourceDocument::Memory { bytes, .. } => Ok(Cow::Borrowed(bytes)),
        }
    }
}

/// Expand files and directories into a sorted list of PDFs.
///
/// Directories are walked recursively for `*.pdf` (any case). Files named
/// explicitly are kept whatever their extension.
pub fn collect_pdfs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for path in paths {
        if path.is_file() {
            out.push(path.clone());
        } else if path.is_dir() {
            let mut found = Vec::new();
            for entry in WalkDir::new(path) {
                let entry = entry?;
                if entry.file_type().is_file() && is_pdf(entry.path()) {
                    found.push(entry.into_path());
                }
            }
            found.sort();
            out.extend(found);
        } else {
            bail!("Path does not exist: {}", path.display());
        }
    }
    Ok(out)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Run the model pipeline over `documents`.
pub async fn run_model_audit(
    analyzer: &ModelAnalyzer,
    documents: &[SourceDocument],
    rules: &[Rule],
    progress: &dyn AuditProgressReporter,
) -> ComplianceReport {
    let total = documents.len() as u64;
    let mut results = Vec::new();
    let mut errors = Vec::new();
    let mut aborted = None;

    for (i, doc) in documents.iter().enumerate() {
        let name = doc.name();
        progress.report(AuditProgressEvent::Document {
            name: name.clone(),
            n: i as u64 + 1,
            total,
        });

        let bytes = match doc.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                record_error(&mut errors, &name, format!("{:#}", e));
                continue;
            }
        };
        if let Err(e) = check_readable(&name, &bytes) {
            record_error(&mut errors, &name, e.to_string());
            continue;
        }

        match analyzer.analyze(&name, &bytes, rules, progress).await {
            Ok(analysis) => results.push(DocumentFindings {
                document_name: name,
                findings: analysis.findings,
            }),
            Err(e) if e.is_authentication() => {
                let remaining = documents.len() - i - 1;
                error!(document = %name, error = %e, remaining, "aborting audit");
                errors.push(DocumentError {
                    document_name: name,
                    error: e.to_string(),
                });
                aborted = Some(format!(
                    "{}; {} remaining document(s) not analyzed",
                    e, remaining
                ));
                break;
            }
            Err(e) => record_error(&mut errors, &name, e.to_string()),
        }
    }

    aggregate(results).with_errors(errors, aborted)
}

fn record_error(errors: &mut Vec<DocumentError>, name: &str, error: String) {
    warn!(document = %name, error = %error, "document skipped");
    errors.push(DocumentError {
        document_name: name.to_string(),
        error,
    });
}

/// One document after extraction, chunking and indexing.
pub struct IngestedDocument {
    pub name: String,
    pub chunks: Vec<Chunk>,
    pub index: Box<dyn VectorIndex>,
}

type IndexFactory<'a> = Box<dyn Fn() -> Box<dyn VectorIndex> + Send + Sync + 'a>;

/// The retrieval pipeline: extract → chunk → embed → index → score.
pub struct RetrievalPipeline<'a> {
    embedder: &'a dyn Embedder,
    config: &'a Config,
    new_index: IndexFactory<'a>,
}

impl<'a> RetrievalPipeline<'a> {
    /// A pipeline building a [`FlatIndex`] per document.
    pub fn new(embedder: &'a dyn Embedder, config: &'a Config) -> Self {
        Self {
            embedder,
            config,
            new_index: Box::new(|| Box::new(FlatIndex::new()) as Box<dyn VectorIndex>),
        }
    }

    /// Substitute the index backend.
    pub fn with_index_factory(
        mut self,
        factory: impl Fn() -> Box<dyn VectorIndex> + Send + Sync + 'a,
    ) -> Self {
        self.new_index = Box::new(factory);
        self
    }

    /// Extract, chunk, embed and index one document.
    ///
    /// Returns `Ok(None)` when the document has no extractable text.
    pub async fn ingest(
        &self,
        name: &str,
        bytes: &[u8],
        progress: &dyn AuditProgressReporter,
    ) -> Result<Option<IngestedDocument>> {
        let segments = extract_segments(name, bytes)?;
        let chunks = chunk_segments(
            &segments,
            self.config.chunking.chunk_size,
            self.config.chunking.chunk_overlap,
        );
        if chunks.is_empty() {
            info!(document = name, "no extractable text, no chunks created");
            return Ok(None);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(
            self.embedder,
            &texts,
            self.config.embedding.batch_size,
            name,
            progress,
        )
        .await
        .with_context(|| format!("embedding {}", name))?;

        let mut index = (self.new_index)();
        index
            .add(vectors, chunks.iter().map(EntryMetadata::from_chunk).collect())
            .await?;

        info!(
            document = name,
            pages = segments.len(),
            chunks = chunks.len(),
            "indexed document"
        );

        Ok(Some(IngestedDocument {
            name: name.to_string(),
            chunks,
            index,
        }))
    }

    /// Run the retrieval pipeline over `documents`.
    pub async fn audit(
        &self,
        documents: &[SourceDocument],
        rules: &[Rule],
        progress: &dyn AuditProgressReporter,
    ) -> ComplianceReport {
        let total = documents.len() as u64;
        let mut results = Vec::new();
        let mut errors = Vec::new();
        let mut artifacts = ArtifactNames::default();

        for (i, doc) in documents.iter().enumerate() {
            let name = doc.name();
            progress.report(AuditProgressEvent::Document {
                name: name.clone(),
                n: i as u64 + 1,
                total,
            });

            let ingested = match self.ingest_source(doc, progress).await {
                Ok(Some(ingested)) => ingested,
                Ok(None) => {
                    results.push(DocumentFindings {
                        document_name: name,
                        findings: Vec::new(),
                    });
                    continue;
                }
                Err(e) => {
                    record_error(&mut errors, &name, format!("{:#}", e));
                    continue;
                }
            };

            if let Some(dir) = &self.config.retrieval.index_dir {
                let stem = artifacts.claim(&ingested.name);
                if let Err(e) = write_artifacts(dir, &stem, &ingested).await {
                    warn!(document = %name, error = %format!("{:#}", e), "failed to persist index");
                }
            }

            let scorer = RetrievalScorer::new(
                self.embedder,
                ingested.index.as_ref(),
                &ingested.chunks,
                &self.config.retrieval,
            );
            let findings = scorer.score_rules(rules).await;
            results.push(DocumentFindings {
                document_name: name,
                findings,
            });
        }

        aggregate(results).with_errors(errors, None)
    }

    /// Build and persist an index for every document into `out_dir`.
    ///
    /// Returns the index paths written. Failing documents are logged and
    /// skipped.
    pub async fn index_documents(
        &self,
        documents: &[SourceDocument],
        out_dir: &Path,
        progress: &dyn AuditProgressReporter,
    ) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;

        let total = documents.len() as u64;
        let mut written = Vec::new();
        let mut artifacts = ArtifactNames::default();
        for (i, doc) in documents.iter().enumerate() {
            let name = doc.name();
            progress.report(AuditProgressEvent::Document {
                name: name.clone(),
                n: i as u64 + 1,
                total,
            });
            let result = match self.ingest_source(doc, progress).await {
                Ok(Some(ingested)) => {
                    let stem = artifacts.claim(&ingested.name);
                    write_artifacts(out_dir, &stem, &ingested).await.map(Some)
                }
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };
            match result {
                Ok(Some(path)) => written.push(path),
                Ok(None) => {}
                Err(e) => warn!(document = %name, error = %format!("{:#}", e), "document skipped"),
            }
        }
        Ok(written)
    }

    async fn ingest_source(
        &self,
        doc: &SourceDocument,
        progress: &dyn AuditProgressReporter,
    ) -> Result<Option<IngestedDocument>> {
        let bytes = doc.bytes().await?;
        self.ingest(&doc.name(), &bytes, progress).await
    }
}

/// Write `<stem>.index`, its metadata sidecar and `<stem>.chunks.json`.
pub async fn persist_artifacts(dir: &Path, doc: &IngestedDocument) -> Result<PathBuf> {
    write_artifacts(dir, &artifact_stem(&doc.name), doc).await
}

fn artifact_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Artifact stems handed out during one batch.
///
/// Directories are walked recursively, so two documents can share a file
/// stem. Later ones get a numeric suffix instead of overwriting.
#[derive(Debug, Default)]
struct ArtifactNames {
    used: HashSet<String>,
}

impl ArtifactNames {
    fn claim(&mut self, name: &str) -> String {
        let stem = artifact_stem(name);
        if self.used.insert(stem.clone()) {
            return stem;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", stem, n);
            if self.used.insert(candidate.clone()) {
                warn!(document = %name, artifact = %candidate, "artifact name already used in this run");
                return candidate;
            }
            n += 1;
        }
    }
}

async fn write_artifacts(dir: &Path, stem: &str, doc: &IngestedDocument) -> Result<PathBuf> {
    let index_path = dir.join(format!("{}.index", stem));
    doc.index
        .persist(&index_path)
        .await
        .with_context(|| format!("Failed to persist {}", index_path.display()))?;

    let chunks_path = dir.join(format!("{}.chunks.json", stem));
    let json = serde_json::to_vec_pretty(&doc.chunks)?;
    tokio::fs::write(&chunks_path, json)
        .await
        .with_context(|| format!("Failed to write {}", chunks_path.display()))?;

    info!(document = %doc.name, path = %index_path.display(), "persisted index");
    Ok(index_path)
}
