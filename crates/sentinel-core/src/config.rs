use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SentinelError};

/// Top-level configuration for the Sentinel application.
///
/// Loaded from `~/.sentinel/config.toml` by default. Each section maps to
/// one stage of the ingest-and-detect pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

impl SentinelConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SentinelConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SentinelError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite metadata mirror.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.sentinel/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Sentence-based chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Estimated token ceiling per chunk.
    pub max_tokens: usize,
    /// Estimated tokens carried over from the previous chunk.
    pub overlap_tokens: usize,
    /// Word-to-token multiplier used for estimation.
    pub tokens_per_word: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            overlap_tokens: 50,
            tokens_per_word: 1.3,
        }
    }
}

/// Embedding model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Sentence-transformer model name.
    pub model: String,
    /// Directory containing `model.onnx` and `tokenizer.json`.
    /// When unset or unloadable the embedder runs in degraded hash mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<String>,
    /// Output dimension for models not in the known list.
    pub dimensions: usize,
    /// Maximum model context in tokens.
    pub max_length: usize,
}

impl EmbeddingConfig {
    /// Dimension for the configured model name.
    pub fn resolved_dimensions(&self) -> usize {
        match self.model.as_str() {
            "all-MiniLM-L6-v2" | "minilm" => 384,
            "all-mpnet-base-v2" | "mpnet" => 768,
            _ => self.dimensions,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            model_dir: None,
            dimensions: 384,
            max_length: 512,
        }
    }
}

/// Hybrid index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Candidate multiplier applied to `k` before filtering.
    pub overfetch_factor: usize,
    /// Upper bound on query embedding time.
    pub query_timeout_ms: u64,
    /// Mirror chunk metadata into SQLite.
    pub persist_metadata: bool,
}

impl IndexConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: 5,
            query_timeout_ms: 2_000,
            persist_metadata: true,
        }
    }
}

/// Ingestion pipeline observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of recent latencies kept for percentile calculation.
    pub latency_window: usize,
    /// Capacity of the ingestion event ring buffer.
    pub event_log_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            latency_window: 100,
            event_log_capacity: 100,
        }
    }
}

/// Detection loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Tickers to monitor.
    pub watch_list: Vec<String>,
    /// Only chunks newer than this are considered per cycle.
    pub recency_window_secs: u64,
    /// Candidates fetched from the index per cycle.
    pub candidate_count: usize,
    /// Minimum salience for escalation.
    pub salience_threshold: f64,
    /// Seconds between cycles when driven by the scheduler.
    pub cadence_secs: u64,
    /// Runaway safety valve. Unset means run indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u64>,
    /// Seen ids older than this (and older than the recency window) may be
    /// evicted. Unset keeps every id for the process lifetime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seen_retention_secs: Option<u64>,
}

impl WatchdogConfig {
    pub fn recency_window(&self) -> Duration {
        Duration::from_secs(self.recency_window_secs)
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_secs.max(1))
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            watch_list: vec!["NVDA".to_string(), "TSLA".to_string(), "AAPL".to_string()],
            recency_window_secs: 300,
            candidate_count: 20,
            salience_threshold: 0.3,
            cadence_secs: 5,
            max_cycles: None,
            seen_retention_secs: None,
        }
    }
}

/// Analysis layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// How far back historical context is retrieved.
    pub context_window_days: u64,
    /// Number of context chunks passed to the analyzer.
    pub context_k: usize,
    /// Number of alerts retained, newest first.
    pub alert_capacity: usize,
}

impl AnalyzerConfig {
    pub fn context_window(&self) -> Duration {
        Duration::from_secs(self.context_window_days * 86_400)
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            context_window_days: 30,
            context_k: 10,
            alert_capacity: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = SentinelConfig::default();
        assert_eq!(config.general.data_dir, "~/.sentinel/data");
        assert_eq!(config.general.log_level, "info");

        assert_eq!(config.chunking.max_tokens, 400);
        assert_eq!(config.chunking.overlap_tokens, 50);
        assert!((config.chunking.tokens_per_word - 1.3).abs() < f64::EPSILON);

        assert_eq!(config.embedding.model, "all-MiniLM-L6-v2");
        assert!(config.embedding.model_dir.is_none());
        assert_eq!(config.embedding.max_length, 512);

        assert_eq!(config.index.overfetch_factor, 5);
        assert!(config.index.persist_metadata);

        assert_eq!(config.pipeline.latency_window, 100);
        assert_eq!(config.pipeline.event_log_capacity, 100);

        assert_eq!(config.watchdog.watch_list, vec!["NVDA", "TSLA", "AAPL"]);
        assert_eq!(config.watchdog.recency_window_secs, 300);
        assert_eq!(config.watchdog.candidate_count, 20);
        assert!((config.watchdog.salience_threshold - 0.3).abs() < f64::EPSILON);
        assert!(config.watchdog.max_cycles.is_none());

        assert_eq!(config.analyzer.context_window_days, 30);
        assert_eq!(config.analyzer.context_k, 10);
        assert_eq!(config.analyzer.alert_capacity, 100);
    }

    #[test]
    fn test_load_valid_config() {
        let toml_content = r#"
[general]
data_dir = "/tmp/sentinel"
log_level = "debug"

[chunking]
max_tokens = 200
overlap_tokens = 20

[embedding]
model = "all-mpnet-base-v2"
model_dir = "/opt/models/mpnet"

[watchdog]
watch_list = ["MSFT", "AMZN"]
salience_threshold = 0.5
max_cycles = 100
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = SentinelConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/tmp/sentinel");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.chunking.max_tokens, 200);
        assert_eq!(config.chunking.overlap_tokens, 20);
        // Unspecified field keeps its default.
        assert!((config.chunking.tokens_per_word - 1.3).abs() < f64::EPSILON);
        assert_eq!(config.embedding.resolved_dimensions(), 768);
        assert_eq!(config.embedding.model_dir.as_deref(), Some("/opt/models/mpnet"));
        assert_eq!(config.watchdog.watch_list, vec!["MSFT", "AMZN"]);
        assert_eq!(config.watchdog.max_cycles, Some(100));
        assert_eq!(config.watchdog.candidate_count, 20);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[index]\noverfetch_factor = 8\n").unwrap();

        let config = SentinelConfig::load(file.path()).unwrap();
        assert_eq!(config.index.overfetch_factor, 8);
        assert_eq!(config.index.query_timeout_ms, 2_000);
        assert_eq!(config.watchdog.recency_window_secs, 300);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = SentinelConfig::load_or_default(Path::new("/does/not/exist/config.toml"));
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.chunking.max_tokens, 400);
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"this is not [valid toml").unwrap();
        let result = SentinelConfig::load(file.path());
        assert!(matches!(result, Err(SentinelError::Config(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = SentinelConfig::default();
        config.watchdog.watch_list = vec!["INTC".to_string()];
        config.watchdog.seen_retention_secs = Some(3_600);
        config.index.persist_metadata = false;
        config.save(&path).unwrap();
        assert!(path.exists());

        let reloaded = SentinelConfig::load(&path).unwrap();
        assert_eq!(reloaded.watchdog.watch_list, vec!["INTC"]);
        assert_eq!(reloaded.watchdog.seen_retention_secs, Some(3_600));
        assert!(reloaded.watchdog.max_cycles.is_none());
        assert!(!reloaded.index.persist_metadata);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let config: SentinelConfig = toml::from_str("").unwrap();
        assert_eq!(config.general.data_dir, "~/.sentinel/data");
        assert_eq!(config.pipeline.latency_window, 100);
    }

    #[test]
    fn test_resolved_dimensions() {
        let mut embedding = EmbeddingConfig::default();
        assert_eq!(embedding.resolved_dimensions(), 384);

        embedding.model = "mpnet".to_string();
        assert_eq!(embedding.resolved_dimensions(), 768);

        embedding.model = "custom-encoder".to_string();
        embedding.dimensions = 256;
        assert_eq!(embedding.resolved_dimensions(), 256);
    }

    #[test]
    fn test_duration_helpers() {
        let config = SentinelConfig::default();
        assert_eq!(config.watchdog.recency_window(), Duration::from_secs(300));
        assert_eq!(config.watchdog.cadence(), Duration::from_secs(5));
        assert_eq!(config.index.query_timeout(), Duration::from_millis(2_000));
        assert_eq!(
            config.analyzer.context_window(),
            Duration::from_secs(30 * 86_400)
        );

        let zero = WatchdogConfig {
            cadence_secs: 0,
            ..WatchdogConfig::default()
        };
        assert_eq!(zero.cadence(), Duration::from_secs(1));
    }
}
