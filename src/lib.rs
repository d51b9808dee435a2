//! # Compliance Checker
//!
//! Checks PDF policy documents against a catalog of compliance rules and
//! produces a per-document, per-rule report.
//!
//! Two pipelines share the rule catalog and the report format:
//!
//! - **Retrieval audit**: pages are extracted, chunked, embedded into a
//!   per-document vector index, and each rule is scored by how many of its
//!   nearest chunks mention the rule's keywords.
//! - **Model audit**: each PDF is uploaded to a hosted model together with
//!   a prompt listing the rules, and the model's JSON answer becomes the
//!   findings. Calls are paced by a shared rate limiter and retried with
//!   backoff.
//!
//! ## Architecture
//!
//! ```text
//!                   ┌──────────┐   ┌────────┐   ┌───────┐   ┌─────────┐
//!   retrieval  ───▶ │ extract  │──▶│ chunk  │──▶│ embed │──▶│  index  │──▶ scoring ─┐
//!                   └──────────┘   └────────┘   └───────┘   └─────────┘             │
//!                                                                                    ├──▶ report
//!   model      ───▶ analyzer: upload → wait active → generate → parse ───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ccheck rules --catalog security
//! ccheck audit retrieval policies/ --catalog security --out report.json
//! GOOGLE_API_KEY=... ccheck audit model policy.pdf --rule "Data Privacy"
//! ccheck index policies/ --out ./indexes
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`rules`] | Built-in and custom rule catalogs |
//! | [`extract`] | Per-page PDF text extraction |
//! | [`chunk`] | Overlapping text windows |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index trait and flat implementation |
//! | [`scoring`] | Keyword-evidence rule scoring |
//! | [`analyzer`] | Hosted model client, rate limiting, retries |
//! | [`report`] | Report aggregation |
//! | [`audit`] | Batch orchestration |
//! | [`progress`] | Progress reporting on stderr |

pub mod analyzer;
pub mod audit;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod models;
pub mod progress;
pub mod report;
pub mod rules;
pub mod scoring;
