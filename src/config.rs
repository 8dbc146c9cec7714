//! TOML configuration parsing and the atomic-reload handle.
//!
//! Configuration is read once at startup, validated, and treated as
//! read-only for the process lifetime. Reload is an explicit atomic swap
//! through [`ConfigHandle`]; in-flight requests keep the snapshot they
//! started with.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use ragline_core::chunk::{BoundaryPolicy, ChunkerConfig};
use ragline_core::fuse::FusionWeights;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    /// `sentence`, `paragraph`, or `fixed`.
    #[serde(default = "default_boundary")]
    pub boundary_policy: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            min_tokens: default_min_tokens(),
            boundary_policy: default_boundary(),
        }
    }
}

impl ChunkingConfig {
    pub fn to_chunker_config(&self) -> Result<ChunkerConfig> {
        let boundary = match self.boundary_policy.as_str() {
            "sentence" => BoundaryPolicy::Sentence,
            "paragraph" => BoundaryPolicy::Paragraph,
            "fixed" => BoundaryPolicy::Fixed,
            other => anyhow::bail!(
                "Unknown chunking.boundary_policy: '{}'. Use sentence, paragraph, or fixed.",
                other
            ),
        };
        let cfg = ChunkerConfig {
            max_tokens: self.max_tokens,
            overlap_tokens: self.overlap_tokens,
            min_tokens: self.min_tokens,
            boundary,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

fn default_max_tokens() -> usize {
    512
}
fn default_overlap() -> usize {
    48
}
fn default_min_tokens() -> usize {
    32
}
fn default_boundary() -> String {
    "paragraph".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_lexical: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: usize,
    #[serde(default = "default_final_k")]
    pub final_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_weight: default_weight(),
            semantic_weight: default_weight(),
            candidate_k_lexical: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_k: default_final_k(),
        }
    }
}

impl RetrievalConfig {
    pub fn weights(&self) -> FusionWeights {
        FusionWeights {
            lexical: self.lexical_weight,
            semantic: self.semantic_weight,
        }
    }
}

fn default_weight() -> f64 {
    0.5
}
fn default_candidate_k() -> usize {
    80
}
fn default_final_k() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled` or `openai-compat`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: None,
            dims: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ParserConfig {
    /// HTTP extraction service used for image OCR. Images are rejected
    /// when unset.
    #[serde(default)]
    pub ocr_endpoint: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub ocr_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    /// Template file with `{query}`/`{context}`/`{history}` slots. The
    /// built-in template is used when unset.
    #[serde(default)]
    pub template_path: Option<PathBuf>,
    #[serde(default = "default_context_budget")]
    pub context_budget_tokens: usize,
    /// Number of prior turns substituted into `{history}`. Zero disables
    /// history.
    #[serde(default)]
    pub history_turns: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template_path: None,
            context_budget_tokens: default_context_budget(),
            history_turns: 0,
        }
    }
}

fn default_context_budget() -> usize {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `disabled` or `openai-compat`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_gen_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Overall deadline for one generate call, retries included.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    /// Per-attempt HTTP timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: None,
            api_key_env: default_api_key_env(),
            max_retries: default_gen_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            deadline_secs: default_deadline_secs(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_gen_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    8000
}
fn default_deadline_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_output_tokens() -> u32 {
    1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Chunking limits are validated by the core config.
    config.chunking.to_chunker_config()?;

    if config.retrieval.final_k < 1 {
        anyhow::bail!("retrieval.final_k must be >= 1");
    }
    if config.retrieval.lexical_weight < 0.0 || config.retrieval.semantic_weight < 0.0 {
        anyhow::bail!("retrieval weights must be >= 0");
    }
    if config.retrieval.lexical_weight + config.retrieval.semantic_weight <= 0.0 {
        anyhow::bail!("at least one retrieval weight must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.provider != "openai-compat" {
            anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled or openai-compat.",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!("embedding.model must be specified when provider is enabled");
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0 when provider is enabled");
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
    }

    if config.generation.is_enabled() {
        if config.generation.provider != "openai-compat" {
            anyhow::bail!(
                "Unknown generation provider: '{}'. Must be disabled or openai-compat.",
                config.generation.provider
            );
        }
        if config.generation.model.is_none() {
            anyhow::bail!("generation.model must be specified when provider is enabled");
        }
        if config.generation.deadline_secs == 0 {
            anyhow::bail!("generation.deadline_secs must be > 0");
        }
    }

    if config.prompt.context_budget_tokens == 0 {
        anyhow::bail!("prompt.context_budget_tokens must be > 0");
    }

    Ok(config)
}

/// Process-wide configuration holder with an explicit atomic-swap reload.
///
/// Readers take a cheap [`Arc`] snapshot; a reload replaces the pointer in
/// one write, never mutating a snapshot an in-flight request already holds.
pub struct ConfigHandle {
    inner: RwLock<Arc<Config>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.inner.read().unwrap().clone()
    }

    /// Re-read and validate the file, then swap. On any error the current
    /// configuration stays in place.
    pub fn reload_from(&self, path: &Path) -> Result<()> {
        let config = load_config(path)?;
        *self.inner.write().unwrap() = Arc::new(config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("ragline.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[db]\npath = \"data/ragline.sqlite\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.max_tokens, 512);
        assert_eq!(config.chunking.overlap_tokens, 48);
        assert_eq!(config.retrieval.final_k, 8);
        assert!(!config.embedding.is_enabled());
        assert!(!config.generation.is_enabled());
    }

    #[test]
    fn overlap_ge_max_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "[db]\npath = \"x.sqlite\"\n[chunking]\nmax_tokens = 10\noverlap_tokens = 10\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn enabled_embedding_requires_model_and_dims() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"openai-compat\"\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn config_handle_swaps_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[db]\npath = \"a.sqlite\"\n");
        let handle = ConfigHandle::new(load_config(&path).unwrap());

        let before = handle.snapshot();
        std::fs::write(&path, "[db]\npath = \"b.sqlite\"\n[chunking]\nmax_tokens = 99\n")
            .unwrap();
        handle.reload_from(&path).unwrap();

        // The old snapshot is untouched; new snapshots see the new values.
        assert_eq!(before.chunking.max_tokens, 512);
        assert_eq!(handle.snapshot().chunking.max_tokens, 99);
    }

    #[test]
    fn failed_reload_keeps_current_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[db]\npath = \"a.sqlite\"\n");
        let handle = ConfigHandle::new(load_config(&path).unwrap());

        std::fs::write(&path, "not valid toml [").unwrap();
        assert!(handle.reload_from(&path).is_err());
        assert_eq!(handle.snapshot().db.path, PathBuf::from("a.sqlite"));
    }
}
