//! Embedding providers
//!
//! The recommendation service only sees [`EmbeddingProvider`]. Two
//! implementations ship with the crate: a deterministic local
//! [`HashingEmbedder`] and [`AzureOpenAiEmbedder`], which calls an Azure
//! OpenAI embeddings deployment over REST.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use storefront_core::{bounded, Error, Result, Vector};
use thiserror::Error as ThisError;
use tracing::{debug, warn};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short name used in logs and degraded-result reasons.
    fn name(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vector>;
}

// Fixed seeds keep hashed embeddings stable across processes.
const HASH_SEEDS: [u64; 4] = [
    0x5851_f42d_4c95_7f2d,
    0x1405_7b7e_f767_814f,
    0x9e37_79b9_7f4a_7c15,
    0xbf58_476d_1ce4_e5b9,
];

/// Feature-hashing embedder: word and character-trigram counts hashed into
/// a fixed number of buckets, then L2-normalised.
///
/// Texts sharing words or fragments land close together, which is enough
/// for development, tests and offline demos.
#[derive(Clone)]
pub struct HashingEmbedder {
    dim: usize,
    state: ahash::RandomState,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            state: ahash::RandomState::with_seeds(
                HASH_SEEDS[0],
                HASH_SEEDS[1],
                HASH_SEEDS[2],
                HASH_SEEDS[3],
            ),
        }
    }

    fn bucket<T: std::hash::Hash>(&self, feature: T) -> usize {
        (self.state.hash_one(feature) % self.dim as u64) as usize
    }

    pub fn embed_sync(&self, text: &str) -> Vector {
        let mut data = vec![0.0f32; self.dim];
        if self.dim == 0 {
            return Vector::new(data);
        }
        let normalized = text.to_lowercase();

        for word in normalized.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            data[self.bucket(word)] += 2.0;

            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for trigram in padded.windows(3) {
                data[self.bucket(trigram)] += 1.0;
            }
        }

        let mut vector = Vector::new(data);
        vector.normalize();
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vector> {
        Ok(self.embed_sync(text))
    }
}

#[derive(ThisError, Debug)]
pub enum EmbeddingError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("response contained no embedding")]
    Empty,
}

impl EmbeddingError {
    fn into_error(self, service: &str, timeout: Duration) -> Error {
        match &self {
            EmbeddingError::Request(e) if e.is_timeout() => Error::Timeout {
                operation: format!("{service}.embed"),
                timeout_ms: timeout.as_millis() as u64,
            },
            _ => Error::unavailable(service, self.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AzureOpenAiSettings {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub dimension: usize,
    pub timeout: Duration,
}

#[derive(Serialize, Debug)]
struct EmbeddingRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Azure OpenAI embeddings deployment
pub struct AzureOpenAiEmbedder {
    client: Client,
    url: String,
    api_key: String,
    dimension: usize,
    timeout: Duration,
}

impl AzureOpenAiEmbedder {
    pub fn new(settings: AzureOpenAiSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::unavailable("azure-openai", e.to_string()))?;
        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            settings.endpoint.trim_end_matches('/'),
            settings.deployment,
            settings.api_version
        );
        Ok(Self {
            client,
            url,
            api_key: settings.api_key,
            dimension: settings.dimension,
            timeout: settings.timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        debug!(url = %self.url, chars = text.len(), "--> requesting embedding");
        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&EmbeddingRequest { input: text })
            .send()
            .await
            .map_err(EmbeddingError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(status = status.as_u16(), error = %e, "failed to read embedding error body");
                    String::new()
                }
            };
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(EmbeddingError::Decode)?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(EmbeddingError::Empty)
    }
}

#[async_trait]
impl EmbeddingProvider for AzureOpenAiEmbedder {
    fn name(&self) -> &str {
        "azure-openai"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vector> {
        let embedding = bounded("azure-openai.embed", self.timeout, async {
            self.request(text)
                .await
                .map_err(|e| e.into_error(self.name(), self.timeout))
        })
        .await?;

        if embedding.len() != self.dimension {
            return Err(Error::Dimension {
                id: "azure-openai.embed".to_string(),
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(Vector::new(embedding))
    }
}
