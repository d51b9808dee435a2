//! Shared test doubles: PDF builders, a scripted model client, a manual
//! clock, a deterministic embedder and a collecting progress reporter.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use compliance_checker::analyzer::{Clock, FileState, ModelClient, RemoteFile, ServiceError};
use compliance_checker::embedding::Embedder;
use compliance_checker::models::{Rule, Severity};
use compliance_checker::progress::{AuditProgressEvent, AuditProgressReporter};

pub fn ccheck_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("ccheck");
    path
}

// ============ PDFs ============

/// Single-page PDF showing `phrase`, written object by object with a
/// correct xref table.
pub fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Multi-page PDF built with lopdf; `None` gives a blank page.
pub fn pdf(pages: &[Option<&str>]) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let operations = match text {
            Some(text) => vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 10.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
            None => Vec::new(),
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

// ============ Rules ============

pub fn rule(id: &str, name: &str, description: &str) -> Rule {
    Rule {
        id: id.to_string(),
        category: "Test".to_string(),
        name: name.to_string(),
        description: description.to_string(),
        severity: Severity::High,
    }
}

pub fn two_rules() -> Vec<Rule> {
    vec![
        rule("REG_001", "Data Privacy", "GDPR and data protection compliance"),
        rule(
            "REG_002",
            "Financial Reporting",
            "SOX and financial disclosure requirements",
        ),
    ]
}

pub const TWO_FINDINGS: &str = r#"{"findings":[{"rule":"Data Privacy","status":"PASS","details":"ok"},{"rule":"Financial Reporting","status":"FAIL","details":"missing disclosure"}]}"#;

// ============ Clock ============

/// Only advances when slept on; records every sleep.
pub struct ManualClock {
    start: Instant,
    state: Mutex<(Duration, Vec<Duration>)>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            state: Mutex::new((Duration::ZERO, Vec::new())),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap().1.clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.state.lock().unwrap().0
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        state.0 += duration;
        state.1.push(duration);
    }
}

// ============ Model client ============

/// A [`ModelClient`] that replays queued outcomes and records every call.
///
/// When a queue runs dry: uploads succeed, file state is `default_state`
/// (initially `ACTIVE`), and generation fails with a transient error.
pub struct ScriptedClient {
    uploads: Mutex<VecDeque<Result<(), ServiceError>>>,
    states: Mutex<VecDeque<Result<FileState, ServiceError>>>,
    generations: Mutex<VecDeque<Result<String, ServiceError>>>,
    default_state: Mutex<FileState>,
    hang_on_state: Mutex<bool>,
    calls: Mutex<Vec<String>>,
    staged_paths: Mutex<Vec<PathBuf>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            uploads: Mutex::new(VecDeque::new()),
            states: Mutex::new(VecDeque::new()),
            generations: Mutex::new(VecDeque::new()),
            default_state: Mutex::new(FileState::Active),
            hang_on_state: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
            staged_paths: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_upload(&self, err: ServiceError) -> &Self {
        self.uploads.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn state(&self, state: FileState) -> &Self {
        self.states.lock().unwrap().push_back(Ok(state));
        self
    }

    pub fn state_error(&self, err: ServiceError) -> &Self {
        self.states.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn default_state(&self, state: FileState) -> &Self {
        *self.default_state.lock().unwrap() = state;
        self
    }

    /// Status polls never complete.
    pub fn hang_on_state(&self) -> &Self {
        *self.hang_on_state.lock().unwrap() = true;
        self
    }

    pub fn respond(&self, text: &str) -> &Self {
        self.generations.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail_generate(&self, err: ServiceError) -> &Self {
        self.generations.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn staged_paths(&self) -> Vec<PathBuf> {
        self.staged_paths.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn upload(
        &self,
        path: &Path,
        mime_type: &str,
        _display_name: &str,
    ) -> Result<RemoteFile, ServiceError> {
        assert!(path.exists(), "staged file should exist during upload");
        assert_eq!(mime_type, "application/pdf");
        self.staged_paths.lock().unwrap().push(path.to_path_buf());

        let n = self.count("upload") + 1;
        self.record("upload".to_string());
        let outcome = self.uploads.lock().unwrap().pop_front().unwrap_or(Ok(()));
        outcome.map(|_| RemoteFile {
            name: format!("files/{}", n),
            uri: format!("https://files.test/{}", n),
            mime_type: mime_type.to_string(),
        })
    }

    async fn file_state(&self, name: &str) -> Result<FileState, ServiceError> {
        self.record(format!("state {}", name));
        let hang = *self.hang_on_state.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
        let next = self.states.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.default_state.lock().unwrap().clone()))
    }

    async fn delete(&self, name: &str) -> Result<(), ServiceError> {
        self.record(format!("delete {}", name));
        Ok(())
    }

    async fn generate(&self, prompt: &str, file: &RemoteFile) -> Result<String, ServiceError> {
        assert!(prompt.contains("JSON"));
        self.record(format!("generate {}", file.name));
        let next = self.generations.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(ServiceError::transient("script exhausted")))
    }
}

// ============ Embedder ============

/// Deterministic bag-of-words embedder: each lowercased word adds 1.0 to
/// one of `dims` buckets chosen by hash.
pub struct HashingEmbedder {
    pub dims: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self { dims: 64 }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text.split_whitespace() {
            let word: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            v[(hasher.finish() % self.dims as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

// ============ Progress ============

#[derive(Default)]
pub struct Collect(pub Mutex<Vec<AuditProgressEvent>>);

impl Collect {
    pub fn events(&self) -> Vec<AuditProgressEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl AuditProgressReporter for Collect {
    fn report(&self, event: AuditProgressEvent) {
        self.0.lock().unwrap().push(event);
    }
}
