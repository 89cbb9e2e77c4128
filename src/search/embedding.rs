//! Embedding backends
//!
//! The store only depends on the [`EmbeddingBackend`] capability. The
//! built-in backend is Harmonic Token Projection (HTP), a deterministic,
//! training-free embedding based on:
//! "Harmonic Token Projection: A Vocabulary-Free, Training-Free,
//!  Deterministic, and Reversible Embedding Methodology"
//! https://arxiv.org/html/2511.20665
//!
//! [`EmbeddingHandle`] wraps a shared backend and memoizes its one-time
//! initialization: concurrent first callers all wait on the same load.

use std::f64::consts::PI;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{MemoryError, Result};

pub const HTP_MODEL_ID: &str = "htp-384";

/// Embedding dimension (2 * number of coprime moduli)
pub const EMBEDDING_DIM: usize = 384;

/// Number of coprime moduli for harmonic projection
const NUM_MODULI: usize = EMBEDDING_DIM / 2;

/// Maximum token length (Unicode code points)
const MAX_TOKEN_LENGTH: usize = 64;

/// Longest input, in chars, a backend call receives
const MAX_INPUT_CHARS: usize = 2048;

/// Coprime moduli for modular decomposition
/// Using first NUM_MODULI primes for guaranteed coprimality
static COPRIME_MODULI: &[u64] = &[
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71,
    73, 79, 83, 89, 97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151,
    157, 163, 167, 173, 179, 181, 191, 193, 197, 199, 211, 223, 227, 229, 233,
    239, 241, 251, 257, 263, 269, 271, 277, 281, 283, 293, 307, 311, 313, 317,
    331, 337, 347, 349, 353, 359, 367, 373, 379, 383, 389, 397, 401, 409, 419,
    421, 431, 433, 439, 443, 449, 457, 461, 463, 467, 479, 487, 491, 499, 503,
    509, 521, 523, 541, 547, 557, 563, 569, 571, 577, 587, 593, 599, 601, 607,
    613, 617, 619, 631, 641, 643, 647, 653, 659, 661, 673, 677, 683, 691, 701,
    709, 719, 727, 733, 739, 743, 751, 757, 761, 769, 773, 787, 797, 809, 811,
    821, 823, 827, 829, 839, 853, 857, 859, 863, 877, 881, 883, 887, 907, 911,
    919, 929, 937, 941, 947, 953, 967, 971, 977, 983, 991, 997, 1009, 1013,
    1019, 1021, 1031, 1033, 1039, 1049, 1051, 1061, 1063, 1069, 1087, 1091,
    1093, 1097, 1103, 1109, 1117, 1123, 1129, 1151, 1153, 1163, 1171, 1181,
];

/// Identity and shape of an embedding model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub dimensions: usize,
    pub max_input_length: usize,
}

/// Capability interface for anything that turns text into vectors
pub trait EmbeddingBackend: Send + Sync {
    /// Load the model. May be expensive; callers go through [`EmbeddingHandle`].
    fn initialize(&self) -> Result<()>;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn model_info(&self) -> ModelInfo;

    fn is_ready(&self) -> bool;
}

pub fn is_known_model(model_id: &str) -> bool {
    model_id == HTP_MODEL_ID
}

/// Build the backend for a configured model id.
///
/// Unknown ids fall back to the built-in HTP model.
pub fn create_backend(model_id: &str) -> Arc<dyn EmbeddingBackend> {
    if !is_known_model(model_id) {
        warn!(
            model = %model_id,
            fallback = HTP_MODEL_ID,
            "unknown embedding model, falling back"
        );
    }
    Arc::new(HtpEmbedder::new())
}

/// HTP Embedding Model
pub struct HtpEmbedder {
    moduli: OnceCell<Vec<u64>>,
}

impl HtpEmbedder {
    pub fn new() -> Self {
        Self {
            moduli: OnceCell::new(),
        }
    }

    /// Embed a single token using Harmonic Token Projection
    ///
    /// Steps:
    /// 1. Convert token to Unicode code points
    /// 2. Encode as base-2^16 integer N
    /// 3. For each modulus m_i, compute r_i = N mod m_i
    /// 4. Project to unit circle: E_i = [sin(2πr_i/m_i), cos(2πr_i/m_i)]
    fn embed_token(moduli: &[u64], token: &str) -> Vec<f64> {
        let n = token_to_integer(token);
        let mut embedding = Vec::with_capacity(EMBEDDING_DIM);

        for &m in moduli {
            let r = n % m;
            let theta = 2.0 * PI * (r as f64) / (m as f64);
            embedding.push(theta.sin());
            embedding.push(theta.cos());
        }

        embedding
    }
}

impl Default for HtpEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingBackend for HtpEmbedder {
    fn initialize(&self) -> Result<()> {
        self.moduli
            .get_or_init(|| COPRIME_MODULI[..NUM_MODULI].to_vec());
        Ok(())
    }

    /// Tokenize, embed each token, mean-pool, then L2 normalize.
    /// Text without tokens maps to the zero vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let moduli = self
            .moduli
            .get()
            .ok_or_else(|| MemoryError::BackendUnavailable("HTP model not initialized".to_string()))?;

        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Ok(vec![0.0; EMBEDDING_DIM]);
        }

        let mut sum_embedding = vec![0.0f64; EMBEDDING_DIM];
        for token in &tokens {
            for (i, val) in Self::embed_token(moduli, token).iter().enumerate() {
                sum_embedding[i] += val;
            }
        }
        for val in &mut sum_embedding {
            *val /= tokens.len() as f64;
        }

        let norm: f64 = sum_embedding.iter().map(|x| x * x).sum::<f64>().sqrt();
        let embedding = if norm > 0.0 {
            sum_embedding.iter().map(|x| (*x / norm) as f32).collect()
        } else {
            sum_embedding.iter().map(|x| *x as f32).collect()
        };

        Ok(embedding)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            id: HTP_MODEL_ID.to_string(),
            dimensions: EMBEDDING_DIM,
            max_input_length: MAX_INPUT_CHARS,
        }
    }

    fn is_ready(&self) -> bool {
        self.moduli.get().is_some()
    }
}

/// Convert token to integer using Unicode encoding
///
/// N = Σ u_j * B^(L-j) where B = 2^16
fn token_to_integer(token: &str) -> u64 {
    token
        .chars()
        .take(MAX_TOKEN_LENGTH)
        .fold(0u64, |n, c| n.wrapping_mul(65536).wrapping_add(c as u64))
}

/// Splits text into words, normalizes to lowercase
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// Shared, lazily initialized embedding backend
pub struct EmbeddingHandle {
    backend: Arc<dyn EmbeddingBackend>,
    ready: OnceCell<ModelInfo>,
}

impl EmbeddingHandle {
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            backend,
            ready: OnceCell::new(),
        }
    }

    /// Initialize the backend once. Concurrent callers block on the same
    /// in-flight initialization; a failure leaves the handle uninitialized.
    pub fn ensure_ready(&self) -> Result<&ModelInfo> {
        self.ready.get_or_try_init(|| {
            let model = self.backend.model_info();
            info!(model = %model.id, dimensions = model.dimensions, "initializing embedding model");
            self.backend.initialize().map_err(unavailable)?;
            info!(model = %model.id, "embedding model ready");
            Ok(model)
        })
    }

    pub fn model_info(&self) -> ModelInfo {
        self.backend.model_info()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get().is_some() && self.backend.is_ready()
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.ensure_ready()?;
        let vector = self
            .backend
            .embed(truncate_chars(text, model.max_input_length))
            .map_err(unavailable)?;
        check_dimensions(model, &vector)?;
        Ok(vector)
    }

    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let model = self.ensure_ready()?;
        let inputs: Vec<&str> = texts
            .iter()
            .map(|t| truncate_chars(t, model.max_input_length))
            .collect();
        let vectors = self.backend.embed_batch(&inputs).map_err(unavailable)?;

        if vectors.len() != texts.len() {
            return Err(MemoryError::BackendUnavailable(format!(
                "backend returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        for vector in &vectors {
            check_dimensions(model, vector)?;
        }
        Ok(vectors)
    }
}

fn unavailable(e: MemoryError) -> MemoryError {
    match e {
        MemoryError::BackendUnavailable(_) | MemoryError::Validation(_) => e,
        other => MemoryError::BackendUnavailable(other.to_string()),
    }
}

fn check_dimensions(model: &ModelInfo, vector: &[f32]) -> Result<()> {
    if vector.len() != model.dimensions {
        return Err(MemoryError::Validation(format!(
            "model {} declares {} dimensions, got a vector of {}",
            model.id,
            model.dimensions,
            vector.len()
        )));
    }
    Ok(())
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Cosine similarity between two embeddings.
///
/// Zero-norm or mismatched inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a > 0.0 && norm_b > 0.0 {
        (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn ready_model() -> HtpEmbedder {
        let model = HtpEmbedder::new();
        model.initialize().unwrap();
        model
    }

    #[test]
    fn test_htp_basic() {
        let model = ready_model();

        let emb1 = model.embed("hello world").unwrap();
        let emb2 = model.embed("hello world").unwrap();
        let emb3 = model.embed("goodbye moon").unwrap();

        assert_eq!(emb1, emb2);
        assert_ne!(emb1, emb3);
        assert_eq!(emb1.len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_htp_requires_initialize() {
        let model = HtpEmbedder::new();
        assert!(!model.is_ready());
        let err = model.embed("hello").unwrap_err();
        assert_eq!(err.code(), "backend_unavailable");
    }

    #[test]
    fn test_shared_tokens_rank_higher() {
        let model = ready_model();

        let doc = model.embed("alpha beta gamma").unwrap();
        let paraphrase = model.embed("gamma and beta with alpha").unwrap();
        let unrelated = model.embed("cooking pasta recipes tomato").unwrap();

        assert!(cosine_similarity(&doc, &paraphrase) > cosine_similarity(&doc, &unrelated));
    }

    #[test]
    fn test_korean_support() {
        let model = ready_model();

        let emb_ko = model.embed("한국어 테스트").unwrap();
        let norm_ko: f32 = emb_ko.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert_eq!(emb_ko.len(), EMBEDDING_DIM);
        assert!((norm_ko - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let model = ready_model();
        let emb = model.embed("  ,,, ").unwrap();
        assert!(emb.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&emb, &model.embed("hello").unwrap()), 0.0);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);

        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], &a), 0.0);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    struct SlowBackend {
        inits: AtomicUsize,
    }

    impl EmbeddingBackend for SlowBackend {
        fn initialize(&self) -> Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            Ok(())
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                id: "slow".to_string(),
                dimensions: 2,
                max_input_length: 16,
            }
        }

        fn is_ready(&self) -> bool {
            self.inits.load(Ordering::SeqCst) > 0
        }
    }

    #[test]
    fn test_initialization_is_memoized_across_threads() {
        let backend = Arc::new(SlowBackend {
            inits: AtomicUsize::new(0),
        });
        let handle = Arc::new(EmbeddingHandle::new(backend.clone()));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || handle.embed("text").map(|v| v.len()))
            })
            .collect();
        for worker in workers {
            assert_eq!(worker.join().unwrap().unwrap(), 2);
        }

        assert_eq!(backend.inits.load(Ordering::SeqCst), 1);
        assert!(handle.is_ready());
    }

    struct WrongShape;

    impl EmbeddingBackend for WrongShape {
        fn initialize(&self) -> Result<()> {
            Ok(())
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.5; 3])
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                id: "wrong".to_string(),
                dimensions: 4,
                max_input_length: 16,
            }
        }

        fn is_ready(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let handle = EmbeddingHandle::new(Arc::new(WrongShape));
        assert_eq!(handle.embed("x").unwrap_err().code(), "validation");
        assert_eq!(handle.embed_batch(&["x", "y"]).unwrap_err().code(), "validation");
    }
}
