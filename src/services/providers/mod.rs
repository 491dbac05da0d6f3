/// Catalog provider abstraction
///
/// The pipeline asks a provider for candidate movies and never sees the
/// upstream wire format. Retries, paging, and upstream caching are the
/// provider's concern.
use futures::future::join_all;
use std::time::Duration;

use crate::{
    error::{AppError, AppResult},
    models::{Candidate, CatalogQuery},
};

pub mod tmdb;

pub use tmdb::TmdbProvider;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Fetch candidates matching the query
    ///
    /// Unknown fields (runtime, release date) stay `None` rather than being
    /// defaulted, so scoring can leave them out.
    async fn search_candidates(&self, query: &CatalogQuery) -> AppResult<Vec<Candidate>>;

    /// Full record for one movie, including runtime; `None` when the id is unknown
    async fn movie_details(&self, id: u64) -> AppResult<Option<Candidate>>;

    /// Whether the upstream catalog answers at all
    async fn health_check(&self) -> bool;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}

/// Runs several catalog queries concurrently, each bounded by `timeout`.
///
/// Partial failures are logged and skipped. Results keep query order, so
/// the first query's candidates come first. Fails only when every query failed.
pub async fn search_all(
    provider: &dyn CatalogProvider,
    queries: &[CatalogQuery],
    timeout: Duration,
) -> AppResult<Vec<Candidate>> {
    let tasks = queries.iter().map(|query| async move {
        match tokio::time::timeout(timeout, provider.search_candidates(query)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::UpstreamUnavailable(format!(
                "{} query timed out after {}s",
                provider.name(),
                timeout.as_secs()
            ))),
        }
    });

    let mut results = Vec::new();
    let mut errors = Vec::new();

    for outcome in join_all(tasks).await {
        match outcome {
            Ok(candidates) => results.extend(candidates),
            Err(e) => {
                tracing::error!(provider = provider.name(), error = %e, "Catalog query failed");
                errors.push(e);
            }
        }
    }

    if !errors.is_empty() {
        tracing::warn!(
            query_count = queries.len(),
            error_count = errors.len(),
            "Partial catalog fetch failure"
        );
    }

    if !queries.is_empty() && errors.len() == queries.len() {
        return Err(AppError::UpstreamUnavailable(
            "Failed to fetch any catalog candidates".to_string(),
        ));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u64) -> Candidate {
        Candidate {
            id,
            title: format!("Movie {}", id),
            original_title: None,
            overview: String::new(),
            genres: vec![],
            runtime: None,
            vote_average: 7.0,
            vote_count: 100,
            popularity: 10.0,
            release_date: None,
            language: "en".to_string(),
            poster_path: None,
            streaming_services: vec![],
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_tolerated() {
        let mut provider = MockCatalogProvider::new();
        provider.expect_name().return_const("mock");
        provider.expect_search_candidates().returning(|query| {
            if query.is_popular() {
                Ok(vec![candidate(1), candidate(2)])
            } else {
                Err(AppError::UpstreamUnavailable("boom".to_string()))
            }
        });

        let queries = vec![CatalogQuery::text("heist"), CatalogQuery::popular()];
        let results = search_all(&provider, &queries, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_total_failure_is_upstream_unavailable() {
        let mut provider = MockCatalogProvider::new();
        provider.expect_name().return_const("mock");
        provider
            .expect_search_candidates()
            .returning(|_| Err(AppError::UpstreamUnavailable("boom".to_string())));

        let queries = vec![CatalogQuery::popular()];
        let result = search_all(&provider, &queries, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_results_keep_query_order() {
        let mut provider = MockCatalogProvider::new();
        provider.expect_name().return_const("mock");
        provider.expect_search_candidates().returning(|query| {
            let id = if query.is_popular() { 2 } else { 1 };
            Ok(vec![candidate(id)])
        });

        let queries = vec![CatalogQuery::text("heist"), CatalogQuery::popular()];
        let results = search_all(&provider, &queries, Duration::from_secs(1))
            .await
            .unwrap();
        let ids: Vec<u64> = results.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
