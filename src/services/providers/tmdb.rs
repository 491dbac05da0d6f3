/// TMDb catalog provider
///
/// API Flow:
/// 1. Free-text query: /search/movie
/// 2. Filters only (genres, runtime, era, language): /discover/movie, popularity-sorted
/// 3. Nothing at all: /movie/popular
/// 4. One movie by id: /movie/{id}
///
/// List endpoints return genre ids, which are mapped to names with the static
/// TMDb movie genre table. List endpoints do not report runtime, so it stays
/// unknown; the details endpoint carries runtime and named genres.
use reqwest::{Client as HttpClient, Response, StatusCode};
use serde::Deserialize;

use crate::{
    error::{AppError, AppResult},
    models::{Candidate, CatalogQuery, Era},
    services::providers::CatalogProvider,
};

/// TMDb movie genre ids
const GENRES: &[(u32, &str)] = &[
    (28, "Action"),
    (12, "Adventure"),
    (16, "Animation"),
    (35, "Comedy"),
    (80, "Crime"),
    (99, "Documentary"),
    (18, "Drama"),
    (10751, "Family"),
    (14, "Fantasy"),
    (36, "History"),
    (27, "Horror"),
    (10402, "Music"),
    (9648, "Mystery"),
    (10749, "Romance"),
    (878, "Science Fiction"),
    (10770, "TV Movie"),
    (53, "Thriller"),
    (10752, "War"),
    (37, "Western"),
];

/// Discover results need a few votes to be worth scoring
const MIN_DISCOVER_VOTES: u32 = 20;

pub fn genre_name(id: u32) -> Option<&'static str> {
    GENRES.iter().find(|(gid, _)| *gid == id).map(|(_, name)| *name)
}

pub fn genre_id(name: &str) -> Option<u32> {
    GENRES
        .iter()
        .find(|(_, gname)| gname.eq_ignore_ascii_case(name))
        .map(|(id, _)| *id)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbGenre {
    pub id: u32,
    pub name: String,
}

/// Movie as returned by TMDb list endpoints (`genre_ids`) and the details
/// endpoint (`genres`)
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbMovie {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub genre_ids: Vec<u32>,
    #[serde(default)]
    pub genres: Vec<TmdbGenre>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub vote_count: u64,
    #[serde(default)]
    pub popularity: f64,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub original_language: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbPage {
    #[serde(default)]
    results: Vec<TmdbMovie>,
}

impl From<TmdbMovie> for Candidate {
    fn from(movie: TmdbMovie) -> Self {
        let genres = if movie.genres.is_empty() {
            movie
                .genre_ids
                .iter()
                .filter_map(|id| {
                    let name = genre_name(*id);
                    if name.is_none() {
                        tracing::debug!(genre_id = id, "Unknown TMDb genre id");
                    }
                    name
                })
                .map(str::to_string)
                .collect()
        } else {
            movie.genres.into_iter().map(|genre| genre.name).collect()
        };

        Candidate {
            id: movie.id,
            title: movie.title,
            original_title: movie.original_title,
            overview: movie.overview.unwrap_or_default(),
            genres,
            // TMDb reports 0 for unknown runtimes
            runtime: movie.runtime.filter(|minutes| *minutes > 0),
            vote_average: movie.vote_average,
            vote_count: movie.vote_count,
            popularity: movie.popularity,
            release_date: movie.release_date.filter(|date| !date.is_empty()),
            language: movie.original_language.unwrap_or_default(),
            poster_path: movie.poster_path,
            streaming_services: Vec::new(),
        }
    }
}

/// Query parameters for /discover/movie, without credentials
pub fn discover_params(query: &CatalogQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("sort_by", "popularity.desc".to_string()),
        ("include_adult", "false".to_string()),
        ("vote_count.gte", MIN_DISCOVER_VOTES.to_string()),
        ("page", query.page.max(1).to_string()),
    ];

    let genre_ids: Vec<String> = query
        .genres
        .iter()
        .filter_map(|name| genre_id(name))
        .map(|id| id.to_string())
        .collect();
    if !genre_ids.is_empty() {
        // `|` is OR in TMDb filters
        params.push(("with_genres", genre_ids.join("|")));
    }

    if let Some(min) = query.runtime_min {
        params.push(("with_runtime.gte", min.to_string()));
    }
    if let Some(max) = query.runtime_max {
        params.push(("with_runtime.lte", max.to_string()));
    }

    if let Some(era) = query.era {
        let (first, last) = era.year_range();
        params.push(("primary_release_date.gte", format!("{}-01-01", first)));
        params.push(("primary_release_date.lte", format!("{}-12-31", last)));
    }

    if let Some(language) = &query.language {
        params.push(("with_original_language", language.clone()));
    }

    params
}

#[derive(Clone)]
pub struct TmdbProvider {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    language: String,
}

impl TmdbProvider {
    pub fn new(api_key: String, api_url: String, language: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url,
            language,
        }
    }

    /// GET with credentials and language attached; the status is left to the caller
    async fn send(&self, endpoint: &str, params: Vec<(&'static str, String)>) -> AppResult<Response> {
        let url = format!("{}/{}", self.api_url, endpoint);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("language", self.language.as_str()),
            ])
            .query(&params)
            .send()
            .await?;
        Ok(response)
    }

    async fn fetch_page(
        &self,
        endpoint: &str,
        params: Vec<(&'static str, String)>,
    ) -> AppResult<Vec<TmdbMovie>> {
        let response = ensure_success(self.send(endpoint, params).await?).await?;
        let page: TmdbPage = response.json().await?;
        Ok(page.results)
    }
}

async fn ensure_success(response: Response) -> AppResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(AppError::UpstreamUnavailable(format!(
        "TMDb API returned status {}: {}",
        status, body
    )))
}

#[async_trait::async_trait]
impl CatalogProvider for TmdbProvider {
    async fn search_candidates(&self, query: &CatalogQuery) -> AppResult<Vec<Candidate>> {
        let page = query.page.max(1).to_string();

        let (endpoint, movies) = match &query.text {
            Some(text) if !text.trim().is_empty() => {
                let mut params = vec![
                    ("query", text.trim().to_string()),
                    ("include_adult", "false".to_string()),
                    ("page", page),
                ];
                if let Some(Era::Year(year)) = query.era {
                    params.push(("primary_release_year", year.to_string()));
                }
                ("search/movie", self.fetch_page("search/movie", params).await?)
            }
            _ if query.is_popular() => (
                "movie/popular",
                self.fetch_page("movie/popular", vec![("page", page)]).await?,
            ),
            _ => (
                "discover/movie",
                self.fetch_page("discover/movie", discover_params(query)).await?,
            ),
        };

        let candidates: Vec<Candidate> = movies.into_iter().map(Candidate::from).collect();

        tracing::info!(
            endpoint,
            results = candidates.len(),
            "Fetched candidates from TMDb"
        );

        Ok(candidates)
    }

    async fn movie_details(&self, id: u64) -> AppResult<Option<Candidate>> {
        let response = self.send(&format!("movie/{}", id), Vec::new()).await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(movie_id = id, "Movie not found on TMDb");
            return Ok(None);
        }
        let movie: TmdbMovie = ensure_success(response).await?.json().await?;
        Ok(Some(Candidate::from(movie)))
    }

    async fn health_check(&self) -> bool {
        match self.send("configuration", Vec::new()).await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(error = %e, "TMDb health check failed");
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "tmdb"
    }
}
