//! Text encoders and the process-wide lazy model handle.
//!
//! The default backend is Harmonic Token Projection (HTP), a deterministic,
//! training-free embedding:
//! "Harmonic Token Projection: A Vocabulary-Free, Training-Free,
//!  Deterministic, and Reversible Embedding Methodology"
//! https://arxiv.org/html/2511.20665
//!
//! - No neural network or weight files
//! - Same input, bit-identical output
//! - Unicode-based tokens (multilingual)
//!
//! With the `fastembed` feature, ONNX sentence-transformer models can be used
//! instead. Whatever the backend, it is loaded once per process behind
//! [`LazyEncoder`].

use std::f64::consts::PI;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::core::config::{EmbeddingBackend, EmbeddingSettings};
use crate::core::error::{Error, Result};

/// Largest dimension the harmonic backend will build a modulus table for.
pub const MAX_HARMONIC_DIMENSIONS: usize = 4096;

/// Maximum token length (Unicode code points)
const MAX_TOKEN_LENGTH: usize = 64;

/// Maps text to a fixed-length vector.
pub trait Encoder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Encode `text`. The result always has `dimensions()` entries.
    fn encode(&self, text: &str) -> Result<Vec<f32>>;
}

/// HTP encoder
///
/// Each token is read as a base-2^16 integer N, reduced modulo a set of
/// coprime moduli, and every residue is projected onto the unit circle.
#[derive(Debug)]
pub struct HarmonicEncoder {
    moduli: Vec<u64>,
}

impl HarmonicEncoder {
    /// Build the modulus table for `dimensions` (2 components per modulus).
    pub fn load(dimensions: usize) -> Result<Self> {
        if dimensions == 0 || dimensions % 2 != 0 {
            return Err(Error::ModelUnavailable(format!(
                "harmonic encoder needs a positive even dimension, got {}",
                dimensions
            )));
        }
        if dimensions > MAX_HARMONIC_DIMENSIONS {
            return Err(Error::ModelUnavailable(format!(
                "harmonic encoder supports at most {} dimensions, got {}",
                MAX_HARMONIC_DIMENSIONS, dimensions
            )));
        }

        Ok(Self {
            moduli: first_primes(dimensions / 2),
        })
    }

    /// Embed a single token
    ///
    /// For each modulus m_i: r_i = N mod m_i, E_i = [sin(2πr_i/m_i), cos(2πr_i/m_i)]
    fn embed_token(&self, token: &str, out: &mut [f64]) {
        let n = token_to_integer(token);

        for (i, &m) in self.moduli.iter().enumerate() {
            let r = n % m;
            let theta = 2.0 * PI * (r as f64) / (m as f64);
            out[2 * i] += theta.sin();
            out[2 * i + 1] += theta.cos();
        }
    }
}

impl Encoder for HarmonicEncoder {
    fn dimensions(&self) -> usize {
        self.moduli.len() * 2
    }

    /// Tokenize, sum token projections, mean-pool, L2 normalize.
    ///
    /// Text without tokens (including "") encodes to the zero vector.
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = tokenize(text);
        let dim = self.dimensions();

        if tokens.is_empty() {
            return Ok(vec![0.0; dim]);
        }

        let mut sum = vec![0.0f64; dim];
        for token in &tokens {
            self.embed_token(token, &mut sum);
        }

        let count = tokens.len() as f64;
        for val in &mut sum {
            *val /= count;
        }

        let norm: f64 = sum.iter().map(|x| x * x).sum::<f64>().sqrt();
        let embedding = if norm > 0.0 {
            sum.iter().map(|x| (*x / norm) as f32).collect()
        } else {
            sum.iter().map(|x| *x as f32).collect()
        };

        Ok(embedding)
    }
}

/// N = Σ u_j * B^(L-j) where B = 2^16, wrapping on overflow
fn token_to_integer(token: &str) -> u64 {
    token
        .chars()
        .take(MAX_TOKEN_LENGTH)
        .fold(0u64, |n, c| n.wrapping_mul(65536).wrapping_add(c as u64))
}

/// Split on whitespace and ASCII punctuation, lowercase.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// First `count` primes, used as pairwise-coprime moduli.
fn first_primes(count: usize) -> Vec<u64> {
    let mut primes: Vec<u64> = Vec::with_capacity(count);
    let mut candidate = 2u64;
    while primes.len() < count {
        if primes
            .iter()
            .take_while(|&&p| p * p <= candidate)
            .all(|&p| candidate % p != 0)
        {
            primes.push(candidate);
        }
        candidate += 1;
    }
    primes
}

#[cfg(feature = "fastembed")]
mod onnx {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use fastembed::{InitOptions, TextEmbedding};

    use super::Encoder;
    use crate::core::error::{Error, Result};

    /// fastembed's `embed` needs `&mut self`, hence the mutex.
    pub struct FastEmbedEncoder {
        model: Mutex<TextEmbedding>,
        dimensions: usize,
    }

    impl FastEmbedEncoder {
        pub fn load(model_name: &str, cache_dir: PathBuf, dimensions: usize) -> Result<Self> {
            let model_enum = parse_model_name(model_name)?;
            std::fs::create_dir_all(&cache_dir)?;

            let options = InitOptions::new(model_enum)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(false);
            let model = TextEmbedding::try_new(options)
                .map_err(|e| Error::ModelUnavailable(e.to_string()))?;

            Ok(Self {
                model: Mutex::new(model),
                dimensions,
            })
        }
    }

    impl Encoder for FastEmbedEncoder {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn encode(&self, text: &str) -> Result<Vec<f32>> {
            if text.trim().is_empty() {
                return Ok(vec![0.0; self.dimensions]);
            }

            let mut model = self
                .model
                .lock()
                .map_err(|e| Error::ModelUnavailable(format!("model lock poisoned: {}", e)))?;
            let embedding = model
                .embed(vec![text], None)
                .map_err(|e| Error::ModelUnavailable(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| Error::ModelUnavailable("model returned no embedding".to_string()))?;

            if embedding.len() != self.dimensions {
                return Err(Error::DimensionMismatch {
                    expected: self.dimensions,
                    got: embedding.len(),
                });
            }
            Ok(embedding)
        }
    }

    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            _ => Err(Error::ModelUnavailable(format!("unknown model: {}", name))),
        }
    }
}

type Loader = Box<dyn Fn() -> Result<Box<dyn Encoder>> + Send + Sync>;

/// Encoder whose model is loaded on first use.
///
/// Concurrent first callers block on the same initialization; the loader runs
/// at most once. A failed load is cached, so every later call reports the
/// same `ModelUnavailable` reason instead of retrying.
pub struct LazyEncoder {
    dimensions: usize,
    loader: Loader,
    cell: OnceCell<std::result::Result<Box<dyn Encoder>, String>>,
}

impl LazyEncoder {
    pub fn new<F>(dimensions: usize, loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Encoder>> + Send + Sync + 'static,
    {
        Self {
            dimensions,
            loader: Box::new(loader),
            cell: OnceCell::new(),
        }
    }

    pub fn from_settings(settings: &EmbeddingSettings) -> Self {
        let settings = settings.clone();
        Self::new(settings.dimensions, move || load_backend(&settings))
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }

    fn model(&self) -> Result<&dyn Encoder> {
        let loaded = self.cell.get_or_init(|| {
            info!(dimensions = self.dimensions, "loading embedding model");
            match (self.loader)() {
                Ok(model) if model.dimensions() != self.dimensions => Err(format!(
                    "model produces {} dimensions, expected {}",
                    model.dimensions(),
                    self.dimensions
                )),
                Ok(model) => Ok(model),
                Err(e) => {
                    warn!(error = %e, "embedding model failed to load");
                    Err(match e {
                        Error::ModelUnavailable(reason) => reason,
                        other => other.to_string(),
                    })
                }
            }
        });

        match loaded {
            Ok(model) => Ok(&**model),
            Err(reason) => Err(Error::ModelUnavailable(reason.clone())),
        }
    }
}

impl Encoder for LazyEncoder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self.model()?.encode(text)?;
        debug!(chars = text.len(), "encoded text");
        Ok(embedding)
    }
}

fn load_backend(settings: &EmbeddingSettings) -> Result<Box<dyn Encoder>> {
    match settings.backend {
        EmbeddingBackend::Harmonic => Ok(Box::new(HarmonicEncoder::load(settings.dimensions)?)),
        #[cfg(feature = "fastembed")]
        EmbeddingBackend::Fastembed => {
            let cache_dir = settings
                .cache_dir
                .clone()
                .unwrap_or_else(|| std::path::PathBuf::from("models"));
            Ok(Box::new(onnx::FastEmbedEncoder::load(
                &settings.model,
                cache_dir,
                settings.dimensions,
            )?))
        }
        #[cfg(not(feature = "fastembed"))]
        EmbeddingBackend::Fastembed => Err(Error::ModelUnavailable(
            "built without the `fastembed` feature".to_string(),
        )),
    }
}

static GLOBAL_ENCODER: OnceCell<Arc<LazyEncoder>> = OnceCell::new();

/// Process-wide encoder. The settings of the first caller win.
pub fn global(settings: &EmbeddingSettings) -> Arc<LazyEncoder> {
    GLOBAL_ENCODER
        .get_or_init(|| Arc::new(LazyEncoder::from_settings(settings)))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::rank::cosine_similarity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn htp() -> HarmonicEncoder {
        HarmonicEncoder::load(384).unwrap()
    }

    #[test]
    fn test_htp_basic() {
        let model = htp();

        let emb1 = model.encode("hello world").unwrap();
        let emb2 = model.encode("hello world").unwrap();
        let emb3 = model.encode("goodbye moon").unwrap();

        assert_eq!(emb1, emb2);
        assert_ne!(emb1, emb3);
        assert_eq!(emb1.len(), 384);
    }

    #[test]
    fn test_htp_deterministic_across_instances() {
        let text = "This is a test sentence for HTP";
        let emb1 = htp().encode(text).unwrap();
        let emb2 = htp().encode(text).unwrap();
        assert_eq!(emb1, emb2);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let model = htp();
        let empty = model.encode("").unwrap();
        assert_eq!(empty.len(), 384);
        assert!(empty.iter().all(|x| *x == 0.0));

        let punct = model.encode("?!, ...").unwrap();
        assert_eq!(punct, empty);
    }

    #[test]
    fn test_shared_tokens_raise_similarity() {
        let model = htp();
        let a = model.encode("GPU memory sharing").unwrap();
        let b = model.encode("GPU memory pooling").unwrap();
        let c = model.encode("cooking recipes").unwrap();

        let near = cosine_similarity(&a, &b).unwrap();
        let far = cosine_similarity(&a, &c).unwrap();
        assert!(near > far);
    }

    #[test]
    fn test_unicode_text_is_normalized() {
        let model = htp();
        for text in ["한국어 테스트", "Korean test"] {
            let emb = model.encode(text).unwrap();
            assert_eq!(emb.len(), 384);
            let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_first_primes() {
        assert_eq!(first_primes(6), vec![2, 3, 5, 7, 11, 13]);
        assert_eq!(first_primes(192).len(), 192);
    }

    #[test]
    fn test_bad_dimensions_unavailable() {
        assert!(HarmonicEncoder::load(0).unwrap_err().is_model_unavailable());
        assert!(HarmonicEncoder::load(7).unwrap_err().is_model_unavailable());
        assert!(HarmonicEncoder::load(MAX_HARMONIC_DIMENSIONS + 2)
            .unwrap_err()
            .is_model_unavailable());
    }

    #[test]
    fn test_lazy_encoder_loads_once_under_contention() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let encoder = Arc::new(LazyEncoder::new(8, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Box::new(HarmonicEncoder::load(8)?) as Box<dyn Encoder>)
        }));
        assert!(!encoder.is_loaded());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let encoder = encoder.clone();
                std::thread::spawn(move || encoder.encode("same text").unwrap())
            })
            .collect();
        let results: Vec<Vec<f32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(encoder.is_loaded());
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_lazy_encoder_caches_failure() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let encoder = LazyEncoder::new(384, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::ModelUnavailable("weights missing".to_string()))
        });

        for _ in 0..3 {
            let err = encoder.encode("anything").unwrap_err();
            assert!(matches!(err, Error::ModelUnavailable(ref r) if r == "weights missing"));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(encoder.dimensions(), 384);
    }

    #[test]
    fn test_lazy_encoder_rejects_wrong_model_dimension() {
        let encoder = LazyEncoder::new(16, || Ok(Box::new(HarmonicEncoder::load(8)?) as Box<dyn Encoder>));
        assert!(encoder.encode("x").unwrap_err().is_model_unavailable());
    }

    #[cfg(not(feature = "fastembed"))]
    #[test]
    fn test_fastembed_backend_unavailable_without_feature() {
        let settings = EmbeddingSettings {
            backend: EmbeddingBackend::Fastembed,
            ..EmbeddingSettings::default()
        };
        let encoder = LazyEncoder::from_settings(&settings);
        assert!(encoder.encode("hello").unwrap_err().is_model_unavailable());
    }
}
