use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    db::StoreKey,
    error::{AppError, AppResult},
    models::{
        AiUsage, AnalysisResult, Candidate, CatalogQuery, Mode, RecommendationResponse,
        ResponseMetadata, ScoredRecommendation, SearchCriteria,
    },
    services::{
        analyzers::EmotionAnalyzer,
        cache::ResponseCache,
        clock::Clock,
        criteria::parse_criteria,
        fingerprint::Fingerprint,
        governor::{Decision, RequestGovernor, Scope},
        providers::{search_all, CatalogProvider},
        ranker::{clamp_limit, Ranker},
        scoring::{tables, ScoringConfig, ScoringEngine, Signal},
    },
};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mood_ttl: Duration,
    pub search_ttl: Duration,
    /// Bound on each collaborator call
    pub upstream_timeout: Duration,
    /// Below this many candidates, popular titles are added to the pool
    pub min_candidates: usize,
    pub max_text_len: usize,
    /// How many of the strongest moods drive catalog queries
    pub mood_queries: usize,
    pub mood_query_min_weight: f64,
    /// A genre is queried for a mood when its table strength reaches this
    pub genre_min_strength: f64,
    pub scoring: ScoringConfig,
    /// Ranked entries scoring below this are dropped
    pub min_score: u8,
}

/// Highest page the popular listing serves
pub const MAX_POPULAR_PAGE: u32 = 10;

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mood_ttl: Duration::from_secs(24 * 3600),
            search_ttl: Duration::from_secs(6 * 3600),
            upstream_timeout: Duration::from_secs(15),
            min_candidates: 20,
            max_text_len: 1000,
            mood_queries: 3,
            mood_query_min_weight: 0.3,
            genre_min_strength: 0.7,
            scoring: ScoringConfig::default(),
            min_score: Ranker::default().min_score,
        }
    }
}

/// Reachability of each collaborator, for the health endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHealth {
    pub catalog: bool,
    pub analyzer: bool,
    pub store: bool,
}

impl ServiceHealth {
    pub fn all_healthy(&self) -> bool {
        self.catalog && self.analyzer && self.store
    }
}

/// Governed recommendation pipeline
///
/// governor check → cache lookup → (miss) collaborators → scoring → ranking
/// → cache store → usage recording. Cache hits and requests that joined an
/// in-flight computation never reach the collaborators and hand their rate
/// window slots back.
pub struct RecommendationPipeline {
    governor: Arc<RequestGovernor>,
    cache: ResponseCache,
    recommender: Arc<Recommender>,
}

/// The part of the pipeline that runs on a cache miss. Shared with the
/// cache's computation task so the work outlives the request that started it.
struct Recommender {
    governor: Arc<RequestGovernor>,
    analyzer: Arc<dyn EmotionAnalyzer>,
    catalog: Arc<dyn CatalogProvider>,
    scoring: ScoringEngine,
    ranker: Ranker,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl RecommendationPipeline {
    pub fn new(
        governor: Arc<RequestGovernor>,
        cache: ResponseCache,
        analyzer: Arc<dyn EmotionAnalyzer>,
        catalog: Arc<dyn CatalogProvider>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        let recommender = Recommender {
            governor: governor.clone(),
            analyzer,
            catalog,
            scoring: ScoringEngine::new(config.scoring.clone()),
            ranker: Ranker::new(config.min_score),
            clock,
            config,
        };
        Self {
            governor,
            cache,
            recommender: Arc::new(recommender),
        }
    }

    pub fn governor(&self) -> &RequestGovernor {
        &self.governor
    }

    pub async fn recommend(
        &self,
        mode: Mode,
        text: &str,
        num_recommendations: Option<i64>,
        scope: &Scope,
    ) -> AppResult<RecommendationResponse> {
        let config = &self.recommender.config;
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("Text cannot be empty".to_string()));
        }
        if text.chars().count() > config.max_text_len {
            return Err(AppError::Validation(format!(
                "Text must be at most {} characters",
                config.max_text_len
            )));
        }
        let limit = clamp_limit(num_recommendations);

        let reservation = match self.governor.allow(scope).await? {
            Decision::Allowed(reservation) => reservation,
            Decision::Denied(denial) => return Err(denial.into()),
        };

        let key = StoreKey::Recommendation(mode, Fingerprint::new(mode, text, limit));
        let ttl = match mode {
            Mode::Mood => config.mood_ttl,
            Mode::Search => config.search_ttl,
        };

        let ran = Arc::new(AtomicBool::new(false));
        let compute = {
            let recommender = self.recommender.clone();
            let text = text.to_string();
            let scope = scope.clone();
            let ran = ran.clone();
            move || async move {
                ran.store(true, Ordering::SeqCst);
                recommender.compute(mode, &text, limit, &scope).await
            }
        };
        let result = self.cache.get_or_compute(&key, ttl, compute).await;

        if !ran.load(Ordering::SeqCst) {
            if let Err(e) = self.governor.release(&reservation).await {
                tracing::warn!(error = %e, scope = %scope, "Failed to release rate window slots");
            }
        }

        result
    }

    /// Full details for one movie, straight from the catalog
    pub async fn movie(&self, id: u64) -> AppResult<Candidate> {
        let catalog = &self.recommender.catalog;
        let timeout = self.recommender.config.upstream_timeout;
        match tokio::time::timeout(timeout, catalog.movie_details(id)).await {
            Ok(Ok(Some(movie))) => Ok(movie),
            Ok(Ok(None)) => Err(AppError::NotFound),
            Ok(Err(e)) => {
                tracing::error!(movie_id = id, error = %e, "Failed to fetch movie details");
                Err(upstream(e))
            }
            Err(_) => Err(AppError::UpstreamUnavailable(format!(
                "{} details timed out",
                catalog.name()
            ))),
        }
    }

    /// One page of currently popular titles; `page` is clamped to `1..=MAX_POPULAR_PAGE`
    pub async fn popular(&self, page: u32) -> AppResult<(u32, Vec<Candidate>)> {
        let page = page.clamp(1, MAX_POPULAR_PAGE);
        let query = CatalogQuery {
            page,
            ..CatalogQuery::popular()
        };
        let movies = search_all(
            self.recommender.catalog.as_ref(),
            &[query],
            self.recommender.config.upstream_timeout,
        )
        .await?;
        Ok((page, movies))
    }

    /// Checks every collaborator concurrently; a check that times out counts as down
    pub async fn health(&self) -> ServiceHealth {
        let timeout = self.recommender.config.upstream_timeout;
        let (catalog, analyzer, store) = tokio::join!(
            tokio::time::timeout(timeout, self.recommender.catalog.health_check()),
            tokio::time::timeout(timeout, self.recommender.analyzer.health_check()),
            tokio::time::timeout(timeout, self.cache.ping()),
        );
        ServiceHealth {
            catalog: matches!(catalog, Ok(true)),
            analyzer: matches!(analyzer, Ok(true)),
            store: matches!(store, Ok(Ok(()))),
        }
    }
}

impl Recommender {
    async fn compute(
        &self,
        mode: Mode,
        text: &str,
        limit: usize,
        scope: &Scope,
    ) -> AppResult<RecommendationResponse> {
        let (usage, outcome) = match mode {
            Mode::Mood => self.compute_mood(text, limit).await,
            Mode::Search => self.compute_search(text, limit).await,
        };

        // Collaborators ran, so the request counts even if it failed afterwards
        if let Err(e) = self
            .governor
            .record_usage(scope, usage.cost_usd, usage.tokens)
            .await
        {
            tracing::error!(error = %e, scope = %scope, "Failed to record usage");
        }

        match &outcome {
            Ok(response) => tracing::info!(
                mode = %mode,
                total_found = response.metadata.total_found,
                cost_usd = usage.cost_usd,
                "Recommendations computed"
            ),
            Err(e) => tracing::error!(mode = %mode, error = %e, "Recommendation failed"),
        }

        outcome
    }

    async fn compute_mood(
        &self,
        text: &str,
        limit: usize,
    ) -> (AiUsage, AppResult<RecommendationResponse>) {
        let analysis = match tokio::time::timeout(
            self.config.upstream_timeout,
            self.analyzer.analyze(text),
        )
        .await
        {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(e)) => {
                tracing::error!(analyzer = self.analyzer.name(), error = %e, "Emotion analysis failed");
                return (AiUsage::default(), Err(upstream(e)));
            }
            Err(_) => {
                return (
                    AiUsage::default(),
                    Err(AppError::UpstreamUnavailable(format!(
                        "{} analyzer timed out",
                        self.analyzer.name()
                    ))),
                )
            }
        };
        let usage = analysis.usage;
        let analysis = analysis.analysis;

        let candidates = match self.gather(self.mood_queries(&analysis)).await {
            Ok(candidates) => candidates,
            Err(e) => return (usage, Err(e)),
        };

        let scored = self.scoring.score_all(&candidates, Signal::Mood(&analysis));
        let recommendations = self.ranker.rank(scored, limit);

        (
            usage,
            Ok(self.respond(Mode::Mood, Some(analysis), None, recommendations)),
        )
    }

    async fn compute_search(
        &self,
        text: &str,
        limit: usize,
    ) -> (AiUsage, AppResult<RecommendationResponse>) {
        let criteria = parse_criteria(text);
        tracing::debug!(?criteria, "Parsed search criteria");

        let candidates = match self.gather(self.search_queries(&criteria)).await {
            Ok(candidates) => candidates,
            Err(e) => return (AiUsage::default(), Err(e)),
        };

        let scored = self.scoring.score_all(&candidates, Signal::Search(&criteria));
        let recommendations = self.ranker.rank(scored, limit);

        (
            AiUsage::default(),
            Ok(self.respond(Mode::Search, None, Some(criteria), recommendations)),
        )
    }

    /// One genre-filtered query per strong mood
    fn mood_queries(&self, analysis: &AnalysisResult) -> Vec<CatalogQuery> {
        let mut queries: Vec<CatalogQuery> = Vec::new();
        for (mood, _) in analysis.top_moods(self.config.mood_queries, self.config.mood_query_min_weight) {
            let genres = tables::genres_for_mood(mood, self.config.genre_min_strength);
            if genres.is_empty() {
                continue;
            }
            let query = CatalogQuery::genres(genres.into_iter().map(str::to_string).collect());
            if !queries.contains(&query) {
                queries.push(query);
            }
        }
        queries
    }

    /// A filtered discover query from the structured criteria, plus a text
    /// query when leftover keywords exist
    fn search_queries(&self, criteria: &SearchCriteria) -> Vec<CatalogQuery> {
        let mut queries = Vec::new();
        let tolerance = self.scoring.config().runtime_tolerance_minutes;

        let mut genres = criteria.genres.clone();
        if genres.is_empty() {
            for tone in &criteria.tones {
                for genre in tables::genres_for_mood(tone, self.config.genre_min_strength) {
                    if !genres.iter().any(|g| g == genre) {
                        genres.push(genre.to_string());
                    }
                }
            }
        }

        let filtered = CatalogQuery {
            text: None,
            genres,
            runtime_min: criteria.runtime_target.map(|t| t.saturating_sub(tolerance)),
            runtime_max: criteria.runtime_target.map(|t| t + tolerance),
            era: criteria.era,
            language: criteria.language.clone(),
            page: 1,
        };
        if !filtered.is_popular() {
            queries.push(filtered);
        }

        if !criteria.keywords.is_empty() {
            queries.push(CatalogQuery {
                era: criteria.era,
                ..CatalogQuery::text(criteria.keywords.join(" "))
            });
        }

        queries
    }

    /// Runs the catalog queries, topping up with popular titles when the pool
    /// is thin. Fails only when nothing at all could be fetched.
    async fn gather(&self, queries: Vec<CatalogQuery>) -> AppResult<Vec<Candidate>> {
        let timeout = self.config.upstream_timeout;

        let mut candidates = if queries.is_empty() {
            Vec::new()
        } else {
            match search_all(self.catalog.as_ref(), &queries, timeout).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::warn!(error = %e, "Targeted catalog queries failed, trying popular titles");
                    Vec::new()
                }
            }
        };
        dedupe(&mut candidates);

        if candidates.len() < self.config.min_candidates {
            match search_all(self.catalog.as_ref(), &[CatalogQuery::popular()], timeout).await {
                Ok(popular) => {
                    candidates.extend(popular);
                    dedupe(&mut candidates);
                }
                Err(e) if candidates.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Popular fallback failed, using targeted results only")
                }
            }
        }

        tracing::debug!(
            catalog = self.catalog.name(),
            candidates = candidates.len(),
            "Candidates gathered"
        );
        Ok(candidates)
    }

    fn respond(
        &self,
        mode: Mode,
        analysis: Option<AnalysisResult>,
        criteria: Option<SearchCriteria>,
        recommendations: Vec<ScoredRecommendation>,
    ) -> RecommendationResponse {
        RecommendationResponse {
            analysis,
            criteria,
            metadata: ResponseMetadata {
                total_found: recommendations.len(),
                method: mode.method().to_string(),
                timestamp: self.clock.now(),
            },
            recommendations,
        }
    }
}

/// Keeps the first occurrence of each movie id
fn dedupe(candidates: &mut Vec<Candidate>) {
    let mut seen = HashSet::new();
    candidates.retain(|candidate| seen.insert(candidate.id));
}

/// Collaborator failures surface as upstream failures, whatever their cause
fn upstream(error: AppError) -> AppError {
    match error {
        AppError::UpstreamUnavailable(_) => error,
        other => AppError::UpstreamUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::MemoryStore,
        models::EmotionAnalysis,
        services::{
            analyzers::MockEmotionAnalyzer,
            clock::ManualClock,
            governor::{DenialReason, GovernorConfig},
            providers::MockCatalogProvider,
        },
    };
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn movie(id: u64, genres: &[&str], language: &str, runtime: Option<u32>) -> Candidate {
        Candidate {
            id,
            title: format!("Movie {}", id),
            original_title: None,
            overview: String::new(),
            genres: genres.iter().map(|g| g.to_string()).collect(),
            runtime,
            vote_average: 7.8,
            vote_count: 1000 + id,
            popularity: 40.0,
            release_date: Some("2010-05-01".to_string()),
            language: language.to_string(),
            poster_path: None,
            streaming_services: vec![],
        }
    }

    fn action_analysis(cost_usd: f64) -> EmotionAnalysis {
        EmotionAnalysis {
            analysis: AnalysisResult {
                moods: BTreeMap::from([("action".to_string(), 0.9)]),
                emotions: BTreeMap::from([("excitement".to_string(), 0.8)]),
                confidence: 0.9,
                analysis_method: "mock".to_string(),
                ..AnalysisResult::default()
            },
            usage: AiUsage {
                tokens: 420,
                cost_usd,
            },
        }
    }

    fn build(
        analyzer: impl EmotionAnalyzer + 'static,
        catalog: impl CatalogProvider + 'static,
        governor_config: GovernorConfig,
        config: PipelineConfig,
    ) -> RecommendationPipeline {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
        ));
        let governor = Arc::new(RequestGovernor::new(
            store.clone(),
            clock.clone(),
            governor_config,
        ));
        let cache = ResponseCache::new(store, clock.clone());
        RecommendationPipeline::new(
            governor,
            cache,
            Arc::new(analyzer),
            Arc::new(catalog),
            clock,
            config,
        )
    }

    fn scope() -> Scope {
        Scope::Client("203.0.113.9".to_string())
    }

    fn named_analyzer() -> MockEmotionAnalyzer {
        let mut analyzer = MockEmotionAnalyzer::new();
        analyzer.expect_name().return_const("mock");
        analyzer
    }

    fn named_catalog() -> MockCatalogProvider {
        let mut catalog = MockCatalogProvider::new();
        catalog.expect_name().return_const("mock");
        catalog
    }

    #[tokio::test]
    async fn test_mood_request_ranks_fitting_genre_first() {
        let mut analyzer = named_analyzer();
        analyzer
            .expect_analyze()
            .times(1)
            .returning(|_| Ok(action_analysis(0.002)));
        let mut catalog = named_catalog();
        catalog.expect_search_candidates().returning(|_| {
            Ok(vec![
                movie(1, &["Romance"], "en", Some(110)),
                movie(2, &["Action", "Thriller"], "en", Some(120)),
            ])
        });

        let pipeline = build(
            analyzer,
            catalog,
            GovernorConfig::default(),
            PipelineConfig::default(),
        );
        let response = pipeline
            .recommend(Mode::Mood, "I'm excited, want action", None, &scope())
            .await
            .unwrap();

        assert_eq!(response.recommendations[0].movie.id, 2);
        assert_eq!(response.metadata.method, "mood_analysis");
        assert_eq!(response.metadata.total_found, 2);
        assert!(response.analysis.is_some());
        assert!(response.criteria.is_none());

        let status = pipeline.governor().status().await.unwrap();
        assert_eq!(status.requests_this_month, 1);
        assert_eq!(status.tokens_this_month, 420);
        assert!((status.monthly_cost - 0.002).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_repeat_request_is_served_from_cache() {
        let mut analyzer = named_analyzer();
        analyzer
            .expect_analyze()
            .times(1)
            .returning(|_| Ok(action_analysis(0.01)));
        let mut catalog = named_catalog();
        // One genre query for "action" plus the popular top-up
        catalog
            .expect_search_candidates()
            .times(2)
            .returning(|_| Ok(vec![movie(2, &["Action"], "en", None)]));

        let pipeline = build(
            analyzer,
            catalog,
            GovernorConfig::default(),
            PipelineConfig::default(),
        );
        let first = pipeline
            .recommend(Mode::Mood, "Want ACTION", Some(5), &scope())
            .await
            .unwrap();
        let second = pipeline
            .recommend(Mode::Mood, "  want   action ", Some(5), &scope())
            .await
            .unwrap();

        assert_eq!(first, second);
        let status = pipeline.governor().status().await.unwrap();
        assert_eq!(status.requests_this_month, 1);
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected_before_collaborators() {
        let pipeline = build(
            named_analyzer(),
            named_catalog(),
            GovernorConfig::default(),
            PipelineConfig::default(),
        );
        let result = pipeline.recommend(Mode::Mood, "   ", None, &scope()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let long = "a".repeat(1001);
        let result = pipeline.recommend(Mode::Search, &long, None, &scope()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_denial_short_circuits() {
        let pipeline = build(
            named_analyzer(),
            named_catalog(),
            GovernorConfig {
                emergency_stop: true,
                ..GovernorConfig::default()
            },
            PipelineConfig::default(),
        );
        let result = pipeline.recommend(Mode::Mood, "anything", None, &scope()).await;
        match result {
            Err(AppError::Denied(denial)) => {
                assert_eq!(denial.reason, DenialReason::EmergencyStopped)
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_catalog_failure_still_records_analyzer_cost() {
        let mut analyzer = named_analyzer();
        analyzer
            .expect_analyze()
            .times(1)
            .returning(|_| Ok(action_analysis(0.5)));
        let mut catalog = named_catalog();
        catalog
            .expect_search_candidates()
            .returning(|_| Err(AppError::UpstreamUnavailable("catalog down".to_string())));

        let pipeline = build(
            analyzer,
            catalog,
            GovernorConfig::default(),
            PipelineConfig::default(),
        );
        let result = pipeline.recommend(Mode::Mood, "action", None, &scope()).await;
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));

        let status = pipeline.governor().status().await.unwrap();
        assert!((status.monthly_cost - 0.5).abs() < 1e-12);

        let key = StoreKey::Recommendation(Mode::Mood, Fingerprint::new(Mode::Mood, "action", 8));
        let cached: Option<RecommendationResponse> = pipeline.cache.get(&key).await.unwrap();
        assert!(cached.is_none());
    }

    struct StalledAnalyzer;

    #[async_trait::async_trait]
    impl EmotionAnalyzer for StalledAnalyzer {
        async fn analyze(&self, _text: &str) -> AppResult<EmotionAnalysis> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(action_analysis(0.0))
        }

        async fn health_check(&self) -> bool {
            false
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_analyzer_timeout_is_upstream_unavailable() {
        let pipeline = build(
            StalledAnalyzer,
            named_catalog(),
            GovernorConfig::default(),
            PipelineConfig {
                upstream_timeout: Duration::from_millis(20),
                ..PipelineConfig::default()
            },
        );
        let result = pipeline.recommend(Mode::Mood, "action", None, &scope()).await;
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_search_mode_skips_analyzer() {
        let mut analyzer = named_analyzer();
        analyzer.expect_analyze().never();
        let mut catalog = named_catalog();
        catalog.expect_search_candidates().returning(|_| {
            Ok(vec![
                movie(1, &["Drama"], "fr", Some(140)),
                movie(2, &["Comedy", "Mystery"], "ja", Some(100)),
            ])
        });

        let pipeline = build(
            analyzer,
            catalog,
            GovernorConfig::default(),
            PipelineConfig::default(),
        );
        let response = pipeline
            .recommend(Mode::Search, "japanese comedy around 90 minutes", None, &scope())
            .await
            .unwrap();

        assert_eq!(response.metadata.method, "text_search");
        assert_eq!(response.recommendations[0].movie.id, 2);
        let reasons = &response.recommendations[0].match_reasons;
        assert!(reasons.iter().any(|r| r.contains("Comedy")));
        assert!(reasons.iter().any(|r| r.contains("90 minutes")));
        assert!(reasons.iter().any(|r| r.contains("ja")));

        let criteria = response.criteria.unwrap();
        assert_eq!(criteria.language.as_deref(), Some("ja"));

        let status = pipeline.governor().status().await.unwrap();
        assert_eq!(status.requests_this_month, 1);
        assert_eq!(status.monthly_cost, 0.0);
    }

    #[tokio::test]
    async fn test_no_candidates_is_an_empty_success() {
        let mut analyzer = named_analyzer();
        analyzer
            .expect_analyze()
            .returning(|_| Ok(action_analysis(0.0)));
        let mut catalog = named_catalog();
        catalog.expect_search_candidates().returning(|_| Ok(vec![]));

        let pipeline = build(
            analyzer,
            catalog,
            GovernorConfig::default(),
            PipelineConfig::default(),
        );
        let response = pipeline
            .recommend(Mode::Mood, "action", None, &scope())
            .await
            .unwrap();
        assert!(response.recommendations.is_empty());
        assert_eq!(response.metadata.total_found, 0);
    }

    fn two_genre_catalog() -> MockCatalogProvider {
        let mut catalog = named_catalog();
        catalog.expect_search_candidates().returning(|_| {
            Ok(vec![
                movie(1, &["Romance"], "en", Some(110)),
                movie(2, &["Action", "Thriller"], "en", Some(120)),
            ])
        });
        catalog
    }

    fn action_analyzer() -> MockEmotionAnalyzer {
        let mut analyzer = named_analyzer();
        analyzer
            .expect_analyze()
            .returning(|_| Ok(action_analysis(0.0)));
        analyzer
    }

    #[tokio::test]
    async fn test_configured_score_floor_and_reason_cap_apply() {
        let baseline = build(
            action_analyzer(),
            two_genre_catalog(),
            GovernorConfig::default(),
            PipelineConfig::default(),
        )
        .recommend(Mode::Mood, "action", None, &scope())
        .await
        .unwrap();
        assert_eq!(baseline.recommendations.len(), 2);
        let top_score = baseline.recommendations[0].score;
        assert!(baseline.recommendations[1].score < top_score);

        let strict = build(
            action_analyzer(),
            two_genre_catalog(),
            GovernorConfig::default(),
            PipelineConfig {
                min_score: top_score,
                scoring: ScoringConfig {
                    max_reasons: 1,
                    ..ScoringConfig::default()
                },
                ..PipelineConfig::default()
            },
        )
        .recommend(Mode::Mood, "action", None, &scope())
        .await
        .unwrap();

        assert_eq!(strict.recommendations.len(), 1);
        assert_eq!(strict.recommendations[0].movie.id, 2);
        assert!(strict.recommendations[0].match_reasons.len() <= 1);
    }

    #[tokio::test]
    async fn test_cache_hit_hands_back_its_rate_slot() {
        let pipeline = build(
            action_analyzer(),
            two_genre_catalog(),
            GovernorConfig {
                per_minute_limit: 2,
                ..GovernorConfig::default()
            },
            PipelineConfig::default(),
        );

        for _ in 0..4 {
            pipeline
                .recommend(Mode::Mood, "action", None, &scope())
                .await
                .unwrap();
        }
        // Three hits gave their slots back, so one more computation fits
        pipeline
            .recommend(Mode::Mood, "romance", None, &scope())
            .await
            .unwrap();

        let result = pipeline.recommend(Mode::Mood, "drama", None, &scope()).await;
        match result {
            Err(AppError::Denied(denial)) => {
                assert_eq!(denial.reason, DenialReason::MinuteRateExceeded)
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    struct SlowAnalyzer;

    #[async_trait::async_trait]
    impl EmotionAnalyzer for SlowAnalyzer {
        async fn analyze(&self, _text: &str) -> AppResult<EmotionAnalysis> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(action_analysis(0.0))
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_concurrent_distinct_requests_respect_minute_limit() {
        let pipeline = Arc::new(build(
            SlowAnalyzer,
            two_genre_catalog(),
            GovernorConfig {
                per_minute_limit: 2,
                ..GovernorConfig::default()
            },
            PipelineConfig::default(),
        ));

        let mut tasks = Vec::new();
        for n in 0..6 {
            let pipeline = pipeline.clone();
            tasks.push(tokio::spawn(async move {
                pipeline
                    .recommend(Mode::Mood, &format!("action night {}", n), None, &scope())
                    .await
            }));
        }

        let mut served = 0;
        let mut denied = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => served += 1,
                Err(AppError::Denied(_)) => denied += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(served, 2);
        assert_eq!(denied, 4);
    }

    #[tokio::test]
    async fn test_movie_details_passthrough() {
        let mut catalog = named_catalog();
        catalog
            .expect_movie_details()
            .returning(|id| Ok((id == 2).then(|| movie(2, &["Action"], "en", Some(120)))));
        let pipeline = build(
            named_analyzer(),
            catalog,
            GovernorConfig::default(),
            PipelineConfig::default(),
        );

        let found = pipeline.movie(2).await.unwrap();
        assert_eq!(found.runtime, Some(120));
        assert!(matches!(pipeline.movie(99).await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_popular_page_is_clamped() {
        let mut catalog = named_catalog();
        catalog
            .expect_search_candidates()
            .withf(|query| query.is_popular() && query.page == MAX_POPULAR_PAGE)
            .times(1)
            .returning(|_| Ok(vec![movie(5, &["Comedy"], "en", None)]));
        let pipeline = build(
            named_analyzer(),
            catalog,
            GovernorConfig::default(),
            PipelineConfig::default(),
        );

        let (page, movies) = pipeline.popular(250).await.unwrap();
        assert_eq!(page, MAX_POPULAR_PAGE);
        assert_eq!(movies.len(), 1);
    }

    #[tokio::test]
    async fn test_health_reports_each_collaborator() {
        let mut analyzer = named_analyzer();
        analyzer.expect_health_check().returning(|| true);
        let mut catalog = named_catalog();
        catalog.expect_health_check().returning(|| false);
        let pipeline = build(
            analyzer,
            catalog,
            GovernorConfig::default(),
            PipelineConfig::default(),
        );

        let health = pipeline.health().await;
        assert!(health.analyzer);
        assert!(health.store);
        assert!(!health.catalog);
        assert!(!health.all_healthy());
    }

    #[test]
    fn test_mood_queries_follow_strong_moods() {
        let pipeline = build(
            named_analyzer(),
            named_catalog(),
            GovernorConfig::default(),
            PipelineConfig::default(),
        );
        let analysis = AnalysisResult {
            moods: BTreeMap::from([
                ("action".to_string(), 0.9),
                ("romance".to_string(), 0.5),
                ("drama".to_string(), 0.1),
            ]),
            ..AnalysisResult::default()
        };
        let queries = pipeline.recommender.mood_queries(&analysis);
        assert_eq!(
            queries,
            vec![
                CatalogQuery::genres(vec!["Action".to_string(), "Western".to_string()]),
                CatalogQuery::genres(vec!["Romance".to_string()]),
            ]
        );
    }

    #[test]
    fn test_search_queries_from_criteria() {
        let pipeline = build(
            named_analyzer(),
            named_catalog(),
            GovernorConfig::default(),
            PipelineConfig::default(),
        );
        let criteria = parse_criteria("scary heist from the 90s");
        let queries = pipeline.recommender.search_queries(&criteria);

        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].genres, vec!["Horror".to_string()]);
        assert_eq!(queries[0].era, Some(crate::models::Era::Decade(1990)));
        assert_eq!(queries[1].text.as_deref(), Some("heist"));
    }
}
