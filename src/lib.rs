//! # ragline
//!
//! A retrieval-augmented generation pipeline for document question
//! answering.
//!
//! ragline ingests raw documents (PDF, DOCX, HTML, Markdown, plain text,
//! images via a pluggable OCR backend), splits them into overlapping
//! chunks with deterministic identifiers, embeds them, and indexes both
//! lexical postings and vectors in SQLite. Queries run hybrid retrieval
//! (keyword + vector, fused with configurable weights), assemble a
//! bounded prompt with inline provenance markers, and call a generative
//! backend with retry, deadline, and streaming semantics.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────────┐   ┌─────────────┐
//! │ Documents │──▶│ Parse→Chunk→Embed │──▶│   SQLite    │
//! │ pdf/docx… │   │   (ingest path)   │   │ FTS5 + Vec  │
//! └───────────┘   └──────────────────┘   └──────┬──────┘
//!                                               │
//!               ┌───────────┐   ┌───────────┐   │
//!   query ────▶ │ Retriever │──▶│  Prompt   │──▶│ LLM backend
//!               │  (hybrid) │   │  Engine   │   │ (retry/stream)
//!               └───────────┘   └───────────┘   ▼
//!                                    answer + citations
//! ```
//!
//! Pure pipeline logic (models, chunker, fusion, prompt assembly, backend
//! traits) lives in the `ragline-core` crate; this crate provides the
//! concrete backends, configuration, and the `rgl` CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration + atomic reload |
//! | [`extract`] | Multi-format text extraction |
//! | [`ocr`] | Pluggable OCR backend |
//! | [`ingest`] | Ingestion pipeline orchestration |
//! | [`embedding`] | HTTP embedding backend |
//! | [`retrieve`] | Concurrent hybrid retrieval |
//! | [`llm`] | HTTP generation backend (SSE streaming) |
//! | [`generate`] | Retry/backoff/deadline orchestration |
//! | [`answer`] | Query path + audit log |
//! | [`sqlite_store`] | SQLite index store |
//! | [`db`], [`migrate`] | Connection pool + schema |

pub mod answer;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generate;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod ocr;
pub mod retrieve;
pub mod sqlite_store;
