use async_trait::async_trait;
use storefront_core::{Distance, Filter, FilterCondition, QueryHit, Result, Vector, VectorIndex};

/// Where recommendation candidates come from.
///
/// The in-process [`VectorIndex`] is the default source; remote vector
/// stores implement the same seam.
#[async_trait]
pub trait CandidateIndex: Send + Sync {
    fn name(&self) -> &str;

    fn distance(&self) -> Distance;

    async fn count(&self) -> Result<usize>;

    /// Nearest documents to `query` that pass `filter`, closest first.
    async fn candidates(
        &self,
        query: &Vector,
        n: usize,
        filter: &FilterCondition,
        max_distance: Option<f32>,
    ) -> Result<Vec<QueryHit>>;

    /// Nearest documents to a stored document, excluding it.
    async fn neighbours(&self, id: &str, n: usize, filter: &FilterCondition) -> Result<Vec<QueryHit>>;
}

#[async_trait]
impl CandidateIndex for VectorIndex {
    fn name(&self) -> &str {
        VectorIndex::name(self)
    }

    fn distance(&self) -> Distance {
        VectorIndex::distance(self)
    }

    async fn count(&self) -> Result<usize> {
        Ok(VectorIndex::count(self))
    }

    async fn candidates(
        &self,
        query: &Vector,
        n: usize,
        filter: &FilterCondition,
        max_distance: Option<f32>,
    ) -> Result<Vec<QueryHit>> {
        self.query_within(query, n, Some(filter as &dyn Filter), max_distance)
    }

    async fn neighbours(&self, id: &str, n: usize, filter: &FilterCondition) -> Result<Vec<QueryHit>> {
        self.similar_to(id, n, Some(filter as &dyn Filter))
    }
}
