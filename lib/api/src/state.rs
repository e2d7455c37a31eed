use std::sync::Arc;
use storefront_core::{Error, Result, Vector};
use storefront_recommend::{EmbeddingProvider, RecommendationService, RecommendationSettings};
use storefront_store::StorageManager;

/// Shared handles behind every handler and capability.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<StorageManager>,
    pub recommender: Arc<RecommendationService>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

impl AppState {
    /// Wire a recommendation service over the storage's `products` index.
    pub fn new(
        storage: Arc<StorageManager>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: RecommendationSettings,
    ) -> Result<Self> {
        let index = storage.products_index()?;
        if embedder.dimension() != index.vector_dim() {
            return Err(Error::Dimension {
                id: embedder.name().to_string(),
                expected: index.vector_dim(),
                actual: embedder.dimension(),
            });
        }
        let recommender = Arc::new(RecommendationService::new(
            storage.store().clone(),
            index,
            embedder.clone(),
            settings,
        ));
        Ok(Self {
            storage,
            recommender,
            embedder,
        })
    }

    /// Use the supplied vector, or embed `text` within the request deadline.
    pub async fn vector_or_embed(&self, vector: Option<Vec<f32>>, text: &str) -> Result<Vector> {
        match vector {
            Some(data) => Ok(Vector::new(data)),
            None => {
                let timeout = self.recommender.settings().timeout;
                let operation = format!("{}.embed", self.embedder.name());
                storefront_core::bounded(&operation, timeout, self.embedder.embed(text)).await
            }
        }
    }
}
