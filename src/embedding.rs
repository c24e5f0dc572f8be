use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Turns text into a vector comparable by cosine similarity.
///
/// Vectors are only ever compared against vectors from the same instance.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &'static str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().map(str::to_lowercase)
}

fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

/// Bag-of-words embedder with a vocabulary that grows as text is seen.
///
/// Vectors get longer as the vocabulary grows; older vectors stay comparable
/// because similarity runs over the overlapping prefix.
#[derive(Debug, Default)]
pub struct BagOfWordsEmbedder {
    vocab: Mutex<HashMap<String, usize>>,
}

impl BagOfWordsEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct tokens seen so far
    pub async fn vocabulary_size(&self) -> usize {
        self.vocab.lock().await.len()
    }
}

#[async_trait]
impl Embedder for BagOfWordsEmbedder {
    fn name(&self) -> &'static str {
        "bag_of_words"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens: Vec<String> = tokenize(text).collect();

        let mut vocab = self.vocab.lock().await;
        for token in &tokens {
            let next = vocab.len();
            vocab.entry(token.clone()).or_insert(next);
        }

        let mut vec = vec![0.0f32; vocab.len()];
        for token in &tokens {
            if let Some(&idx) = vocab.get(token) {
                vec[idx] += 1.0;
            }
        }
        drop(vocab);

        l2_normalize(&mut vec);
        Ok(vec)
    }
}

/// Fixed-dimension embedder hashing tokens into buckets.
///
/// Deterministic and stateless (no network, no model downloads); suited to
/// backends that need a constant dimension. Not a substitute for a learned model.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let mut hash = 1469598103934665603u64;
            for b in token.as_bytes() {
                hash ^= *b as u64;
                hash = hash.wrapping_mul(1099511628211u64);
            }

            let idx = (hash as usize) % self.dimension;
            vec[idx] += 1.0;
        }

        l2_normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &'static str {
        "hash"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }
}
