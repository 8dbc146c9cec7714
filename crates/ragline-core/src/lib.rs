//! # ragline-core
//!
//! Shared, dependency-light logic for ragline: data models, the error
//! taxonomy, chunking, score fusion, prompt assembly, and the pluggable
//! backend traits (index store, embedding, generation).
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem IO. Concrete
//! backends (SQLite store, OpenAI-compatible embedding/generation clients,
//! OCR) live in the `ragline` application crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod fuse;
pub mod generate;
pub mod models;
pub mod prompt;
pub mod store;

pub use error::{ErrorKind, PipelineError, Result};
