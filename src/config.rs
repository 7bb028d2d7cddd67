//! TOML configuration.
//!
//! Every section except `[[sources]]` is optional and falls back to the
//! defaults below. [`load_config`] parses and validates in one step.
//!
//! ```toml
//! [llm]
//! provider = "openai"
//! model = "gpt-4"
//!
//! [knowledge]
//! path = "./data/knowledge.sqlite"
//!
//! [[sources]]
//! id = 1
//! name = "sales"
//! path = "./data/sales.sqlite"
//! database = "SALES"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use nl_query_core::models::DataSourceId;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub introspection: IntrospectionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_temperature")]
    pub temperature: f32,
    #[serde(default = "default_reasoning_temperature")]
    pub reasoning_temperature: f32,
    #[serde(default)]
    pub reasoning_model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            temperature: default_generation_temperature(),
            reasoning_temperature: default_reasoning_temperature(),
            reasoning_model: None,
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn reasoning_model(&self) -> &str {
        self.reasoning_model.as_deref().unwrap_or(&self.model)
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_llm_model() -> String {
    "gpt-4".to_string()
}
fn default_generation_temperature() -> f32 {
    0.1
}
fn default_reasoning_temperature() -> f32 {
    0.3
}
fn default_max_retries() -> u32 {
    5
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    /// SQLite file backing the knowledge store. In-memory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
    /// Value of the `source` payload field written and read by this repo.
    #[serde(default = "default_source_label")]
    pub source_label: String,
    #[serde(default = "default_table_limit")]
    pub table_limit: usize,
    #[serde(default = "default_column_limit")]
    pub column_limit: usize,
    /// Length of the constant probe used for filter-only listing.
    #[serde(default = "default_probe_dims")]
    pub probe_dims: usize,
    #[serde(default = "default_rag_limit")]
    pub rag_limit: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: None,
            collection_prefix: default_collection_prefix(),
            source_label: default_source_label(),
            table_limit: default_table_limit(),
            column_limit: default_column_limit(),
            probe_dims: default_probe_dims(),
            rag_limit: default_rag_limit(),
        }
    }
}

fn default_collection_prefix() -> String {
    "datasource_".to_string()
}
fn default_source_label() -> String {
    "sqlite".to_string()
}
fn default_table_limit() -> usize {
    100
}
fn default_column_limit() -> usize {
    500
}
fn default_probe_dims() -> usize {
    1536
}
fn default_rag_limit() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntrospectionConfig {
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Fill missing table and column descriptions from their names.
    #[serde(default = "default_true")]
    pub infer_descriptions: bool,
}

impl Default for IntrospectionConfig {
    fn default() -> Self {
        Self {
            sample_rows: default_sample_rows(),
            max_concurrency: default_max_concurrency(),
            infer_descriptions: true,
        }
    }
}

fn default_sample_rows() -> usize {
    5
}
fn default_max_concurrency() -> usize {
    8
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default)]
    pub include_reasoning: bool,
    /// `heuristic` or `model`.
    #[serde(default = "default_classifier")]
    pub classifier: String,
    /// Organization scope for status events.
    #[serde(default)]
    pub organization_id: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            include_reasoning: false,
            classifier: default_classifier(),
            organization_id: 0,
        }
    }
}

fn default_classifier() -> String {
    "heuristic".to_string()
}

/// A registered SQLite data source.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub id: i64,
    pub name: String,
    /// Database file. Required; an empty path is rejected when connecting.
    #[serde(default)]
    pub path: PathBuf,
    /// Logical database name reported in table identities.
    #[serde(default = "default_database_name")]
    pub database: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub read_only: bool,
    /// Extra database files attached as additional schemas.
    #[serde(default)]
    pub attach: Vec<AttachConfig>,
}

impl SourceConfig {
    pub fn data_source_id(&self) -> DataSourceId {
        DataSourceId(self.id)
    }
}

fn default_database_name() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AttachConfig {
    pub schema: String,
    pub path: PathBuf,
}

impl Config {
    /// A config with every section at its default and no sources.
    pub fn minimal() -> Self {
        Self {
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            knowledge: KnowledgeConfig::default(),
            introspection: IntrospectionConfig::default(),
            pipeline: PipelineConfig::default(),
            sources: Vec::new(),
        }
    }

    pub fn source(&self, id: DataSourceId) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id.0)
    }

    /// Look a source up by numeric id or by name.
    pub fn find_source(&self, key: &str) -> Option<&SourceConfig> {
        match key.parse::<i64>() {
            Ok(id) => self.source(DataSourceId(id)),
            Err(_) => self.sources.iter().find(|s| s.name == key),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    for (name, t) in [
        ("llm.temperature", config.llm.temperature),
        ("llm.reasoning_temperature", config.llm.reasoning_temperature),
    ] {
        if !(0.0..=2.0).contains(&t) {
            bail!("{} must be in [0.0, 2.0]", name);
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    if config.knowledge.table_limit == 0 {
        bail!("knowledge.table_limit must be >= 1");
    }
    if config.knowledge.column_limit == 0 {
        bail!("knowledge.column_limit must be >= 1");
    }
    if config.introspection.max_concurrency == 0 {
        bail!("introspection.max_concurrency must be >= 1");
    }

    match config.pipeline.classifier.as_str() {
        "heuristic" | "model" => {}
        other => bail!(
            "Unknown pipeline.classifier: '{}'. Must be heuristic or model.",
            other
        ),
    }

    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for source in &config.sources {
        if !ids.insert(source.id) {
            bail!("Duplicate source id: {}", source.id);
        }
        if source.name.is_empty() {
            bail!("sources[id = {}].name must not be empty", source.id);
        }
        if !names.insert(source.name.as_str()) {
            bail!("Duplicate source name: '{}'", source.name);
        }
        for attach in &source.attach {
            if attach.schema.is_empty() || attach.schema.eq_ignore_ascii_case("main") {
                bail!(
                    "sources[{}].attach schema must be a non-empty name other than 'main'",
                    source.name
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.llm.model, "gpt-4");
        assert!((config.llm.temperature - 0.1).abs() < f32::EPSILON);
        assert!((config.llm.reasoning_temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.knowledge.table_limit, 100);
        assert_eq!(config.knowledge.column_limit, 500);
        assert_eq!(config.introspection.sample_rows, 5);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn sources_parse_with_attachments() {
        let config = parse(
            r#"
[[sources]]
id = 1
name = "sales"
path = "/tmp/sales.sqlite"
database = "SALES"

[[sources.attach]]
schema = "archive"
path = "/tmp/archive.sqlite"
"#,
        )
        .unwrap();
        let s = config.find_source("sales").unwrap();
        assert_eq!(s.database, "SALES");
        assert_eq!(s.attach[0].schema, "archive");
        assert!(s.read_only);
        assert_eq!(config.find_source("1").unwrap().name, "sales");
        assert!(config.find_source("2").is_none());
    }

    #[test]
    fn rejects_duplicate_source_ids() {
        let err = parse(
            r#"
[[sources]]
id = 1
name = "a"
path = "a.sqlite"

[[sources]]
id = 1
name = "b"
path = "b.sqlite"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate source id"));
    }

    #[test]
    fn rejects_unknown_providers_and_bounds() {
        assert!(parse("[llm]\nprovider = \"bard\"").is_err());
        assert!(parse("[embedding]\nprovider = \"openai\"").is_err());
        assert!(parse("[knowledge]\ntable_limit = 0").is_err());
        assert!(parse("[pipeline]\nclassifier = \"coin\"").is_err());
        assert!(parse("[llm]\ntemperature = 3.5").is_err());
    }
}
