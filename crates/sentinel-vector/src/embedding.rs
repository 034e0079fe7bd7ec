//! Embedding service trait, backends, and the `Embedder` facade.
//!
//! - `OnnxEmbeddingService` loads a sentence-transformer ONNX model (e.g.
//!   all-MiniLM-L6-v2) via ort and tokenizes with the HuggingFace tokenizers
//!   crate.
//! - `HashEmbedding` produces deterministic hash-derived unit vectors. It is
//!   the degraded fallback when no model can be loaded, and the test backend.
//! - `Embedder` resolves the backend once at startup and reports whether it
//!   is running degraded.

use std::path::Path;
use std::sync::{Arc, Mutex};

use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use sentinel_core::config::EmbeddingConfig;
use sentinel_core::error::SentinelError;

/// Service for generating text embeddings.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, SentinelError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService::embed` returns `impl Future`, which is not
/// object-safe; this trait boxes the future instead. Every
/// `EmbeddingService` implements it through the blanket impl below.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, SentinelError>> + Send + 'a>>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, SentinelError>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left alone.
pub fn l2_normalize(values: &mut [f32]) {
    let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in values.iter_mut() {
            *val /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService - real ONNX Runtime inference
// ---------------------------------------------------------------------------

/// ONNX Runtime-backed embedding service using a sentence-transformer model.
///
/// Expects a model directory containing `model.onnx` and `tokenizer.json`.
/// Inputs longer than `max_length` tokens are truncated. Mean pooling
/// (masked) produces a single vector per input.
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
    max_length: usize,
}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("dimensions", &self.dimensions)
            .field("max_length", &self.max_length)
            .finish()
    }
}

impl OnnxEmbeddingService {
    /// Load a sentence-transformer model from the given directory.
    pub fn from_directory(model_dir: &Path, max_length: usize) -> Result<Self, SentinelError> {
        Self::from_files(
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
            max_length,
        )
    }

    /// Load from explicit model and tokenizer file paths.
    pub fn from_files(
        model_path: &Path,
        tokenizer_path: &Path,
        max_length: usize,
    ) -> Result<Self, SentinelError> {
        if !model_path.exists() {
            return Err(SentinelError::Embedding(format!(
                "ONNX model not found at {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(SentinelError::Embedding(format!(
                "Tokenizer not found at {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| SentinelError::Embedding(format!("ONNX session builder: {}", e)))?
            .with_intra_threads(1)
            .map_err(|e| SentinelError::Embedding(format!("ONNX set threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| SentinelError::Embedding(format!("ONNX load model: {}", e)))?;

        // Sentence-transformer output is [batch, seq_len, hidden_dim].
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .map(|d| if d > 0 { d as usize } else { 384 })
            .unwrap_or(384);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| SentinelError::Embedding(format!("Failed to load tokenizer: {}", e)))?;

        info!(
            model = %model_path.display(),
            dimensions,
            max_length,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions,
            max_length: max_length.max(2),
        })
    }

    /// Tokenize, run inference, and mean-pool the output.
    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, SentinelError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| SentinelError::Embedding(format!("Tokenization failed: {}", e)))?;

        let seq_len = encoding.get_ids().len().min(self.max_length);
        let input_ids: Vec<i64> = encoding.get_ids()[..seq_len]
            .iter()
            .map(|&id| id as i64)
            .collect();
        let attention_mask: Vec<i64> = encoding.get_attention_mask()[..seq_len]
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding.get_type_ids()[..seq_len]
            .iter()
            .map(|&t| t as i64)
            .collect();

        let ids_array = ndarray::Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| SentinelError::Embedding(format!("input_ids array: {}", e)))?;
        let mask_array = ndarray::Array2::from_shape_vec((1, seq_len), attention_mask.clone())
            .map_err(|e| SentinelError::Embedding(format!("attention_mask array: {}", e)))?;
        let type_array = ndarray::Array2::from_shape_vec((1, seq_len), token_type_ids)
            .map_err(|e| SentinelError::Embedding(format!("token_type_ids array: {}", e)))?;

        let ids_ref = TensorRef::from_array_view(&ids_array)
            .map_err(|e| SentinelError::Embedding(format!("TensorRef input_ids: {}", e)))?;
        let mask_ref = TensorRef::from_array_view(&mask_array)
            .map_err(|e| SentinelError::Embedding(format!("TensorRef attention_mask: {}", e)))?;
        let type_ref = TensorRef::from_array_view(&type_array)
            .map_err(|e| SentinelError::Embedding(format!("TensorRef token_type_ids: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| SentinelError::Embedding(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| SentinelError::Embedding(format!("ONNX inference failed: {}", e)))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| SentinelError::Embedding(format!("Extract embeddings: {}", e)))?;

        let hidden_dim = match shape.iter().copied().collect::<Vec<i64>>().as_slice() {
            [.., _, last] => *last as usize,
            dims => {
                return Err(SentinelError::Embedding(format!(
                    "Unexpected output shape: {:?}",
                    dims
                )))
            }
        };

        let mut pooled = vec![0.0f32; hidden_dim];
        let mut count = 0.0f32;
        for (tok_idx, &mask_val) in attention_mask.iter().enumerate() {
            if mask_val > 0 {
                let offset = tok_idx * hidden_dim;
                for (dim, slot) in pooled.iter_mut().enumerate() {
                    *slot += data[offset + dim];
                }
                count += 1.0;
            }
        }
        if count > 0.0 {
            for val in &mut pooled {
                *val /= count;
            }
        }

        l2_normalize(&mut pooled);
        Ok(pooled)
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SentinelError> {
        // Inference is CPU-bound; run on a blocking thread.
        let svc = OnnxEmbeddingService {
            session: Arc::clone(&self.session),
            tokenizer: Arc::clone(&self.tokenizer),
            dimensions: self.dimensions,
            max_length: self.max_length,
        };
        let text_owned = text.to_string();

        tokio::task::spawn_blocking(move || svc.embed_sync(&text_owned))
            .await
            .map_err(|e| SentinelError::Embedding(format!("Embedding task panicked: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// HashEmbedding - deterministic hash-derived vectors
// ---------------------------------------------------------------------------

/// Deterministic pseudo-embedding seeded by the text.
///
/// Identical inputs always produce identical unit vectors, on every platform
/// and toolchain, but similarity between different texts carries no semantic
/// meaning. Each SHA-256 digest of the text and a block counter yields four
/// components.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimensions: usize,
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(384)
    }
}

impl HashEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        let mut block = 0u64;
        while result.len() < self.dimensions {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(block.to_le_bytes());
            let digest = hasher.finalize();
            for word in digest.chunks_exact(8) {
                if result.len() == self.dimensions {
                    break;
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(word);
                let h = u64::from_le_bytes(bytes);
                let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
                result.push(val as f32);
            }
            block += 1;
        }
        l2_normalize(&mut result);
        result
    }
}

impl EmbeddingService for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SentinelError> {
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// Embedder facade
// ---------------------------------------------------------------------------

/// Which backend an `Embedder` resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    Onnx,
    Hash,
    Custom,
}

/// Capability report, resolved once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedderStatus {
    pub model: String,
    pub backend: EmbeddingBackend,
    pub dimensions: usize,
    pub loaded: bool,
    /// True when vectors are hash-derived rather than semantic.
    pub degraded: bool,
    pub reason: Option<String>,
}

/// Text-to-vector encoder shared by the pipeline and the index.
pub struct Embedder {
    backend: Box<dyn DynEmbeddingService>,
    status: EmbedderStatus,
    max_chars: usize,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder").field("status", &self.status).finish()
    }
}

impl Embedder {
    /// Resolve the backend from configuration. Falls back to hash vectors
    /// when no model directory is configured or the model fails to load.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let dimensions = config.resolved_dimensions();
        let max_chars = config.max_length.saturating_mul(4);

        let reason = match config.model_dir.as_deref() {
            None => "no model directory configured".to_string(),
            Some(dir) => match OnnxEmbeddingService::from_directory(Path::new(dir), config.max_length) {
                Ok(service) => {
                    let status = EmbedderStatus {
                        model: config.model.clone(),
                        backend: EmbeddingBackend::Onnx,
                        dimensions: EmbeddingService::dimensions(&service),
                        loaded: true,
                        degraded: false,
                        reason: None,
                    };
                    return Self {
                        backend: Box::new(service),
                        status,
                        max_chars,
                    };
                }
                Err(e) => e.to_string(),
            },
        };

        let err = SentinelError::EmbeddingDegraded(reason.clone());
        warn!(model = %config.model, error = %err, "Embedding model unavailable, using hash vectors");

        Self {
            backend: Box::new(HashEmbedding::new(dimensions)),
            status: EmbedderStatus {
                model: config.model.clone(),
                backend: EmbeddingBackend::Hash,
                dimensions,
                loaded: false,
                degraded: true,
                reason: Some(reason),
            },
            max_chars,
        }
    }

    /// Degraded embedder with the given dimension.
    pub fn hashed(dimensions: usize) -> Self {
        Self {
            backend: Box::new(HashEmbedding::new(dimensions)),
            status: EmbedderStatus {
                model: "hash".to_string(),
                backend: EmbeddingBackend::Hash,
                dimensions: dimensions.max(1),
                loaded: false,
                degraded: true,
                reason: Some("hash embedding requested".to_string()),
            },
            max_chars: EmbeddingConfig::default().max_length * 4,
        }
    }

    /// Wrap an arbitrary service, reported as non-degraded.
    pub fn with_service(service: impl EmbeddingService + 'static, model: &str) -> Self {
        let dimensions = EmbeddingService::dimensions(&service);
        Self {
            backend: Box::new(service),
            status: EmbedderStatus {
                model: model.to_string(),
                backend: EmbeddingBackend::Custom,
                dimensions,
                loaded: true,
                degraded: false,
                reason: None,
            },
            max_chars: EmbeddingConfig::default().max_length * 4,
        }
    }

    pub fn status(&self) -> &EmbedderStatus {
        &self.status
    }

    pub fn dimensions(&self) -> usize {
        self.status.dimensions
    }

    pub fn is_degraded(&self) -> bool {
        self.status.degraded
    }

    /// The degradation as a typed error, for callers that surface it.
    pub fn degradation(&self) -> Option<SentinelError> {
        self.status.degraded.then(|| {
            SentinelError::EmbeddingDegraded(
                self.status
                    .reason
                    .clone()
                    .unwrap_or_else(|| "hash embedding".to_string()),
            )
        })
    }

    /// Embed one text, truncated to the model's context.
    pub async fn encode_one(&self, text: &str) -> Result<Vec<f32>, SentinelError> {
        let text = truncate_chars(text, self.max_chars);
        let vector = self.backend.embed_boxed(text).await?;
        if vector.len() != self.status.dimensions {
            return Err(SentinelError::DimensionMismatch {
                expected: self.status.dimensions,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    /// Embed a batch, preserving order.
    pub async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SentinelError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.encode_one(text).await?);
        }
        Ok(vectors)
    }
}

/// Longest prefix of at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
