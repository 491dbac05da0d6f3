use serde::Deserialize;
use std::time::Duration;

use crate::services::{
    analyzers::openai::TokenPrices,
    cache::CacheSettings,
    governor::{GovernorConfig, ScopePolicy},
    pipeline::PipelineConfig,
    scoring::ScoringConfig,
};

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Redis connection URL. Without it, counters and cache live in process memory.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// TMDb API key
    pub tmdb_api_key: String,

    /// TMDb API base URL
    #[serde(default = "default_tmdb_api_url")]
    pub tmdb_api_url: String,

    /// Language passed to TMDb for localized titles and overviews
    #[serde(default = "default_tmdb_language")]
    pub tmdb_language: String,

    /// OpenAI API key. Without it, the keyword analyzer is used.
    #[serde(default)]
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL
    #[serde(default = "default_openai_api_url")]
    pub openai_api_url: String,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    /// USD per million prompt tokens
    #[serde(default = "default_openai_input_price")]
    pub openai_input_price_per_mtok: f64,

    /// USD per million completion tokens
    #[serde(default = "default_openai_output_price")]
    pub openai_output_price_per_mtok: f64,

    #[serde(default = "default_true")]
    pub rate_limit_enabled: bool,

    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u64,

    #[serde(default = "default_rate_limit_per_day")]
    pub rate_limit_per_day: u64,

    /// `client` keys counters by caller address, `global` shares one set of counters
    #[serde(default)]
    pub rate_limit_scope: ScopePolicy,

    /// Take the caller address from `X-Forwarded-For`. Only safe behind a
    /// proxy that appends the real peer to that header.
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Monthly AI spending ceiling in USD
    #[serde(default = "default_openai_monthly_limit")]
    pub openai_monthly_limit: f64,

    #[serde(default)]
    pub emergency_stop: bool,

    /// Token required by the emergency-stop admin endpoint. Unset disables the endpoint.
    #[serde(default)]
    pub admin_token: Option<String>,

    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u64,

    #[serde(default = "default_search_cache_ttl_hours")]
    pub search_cache_ttl_hours: u64,

    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    /// How long one instance may hold a computation before others take over
    #[serde(default = "default_cache_claim_lease_secs")]
    pub cache_claim_lease_secs: u64,

    /// Recommendations scoring below this (0-100) are dropped
    #[serde(default = "default_min_score")]
    pub min_score: u8,

    /// Upper bound on match reasons per recommendation
    #[serde(default = "default_max_match_reasons")]
    pub max_match_reasons: usize,

    /// Comma-separated list of allowed CORS origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_tmdb_api_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_tmdb_language() -> String {
    "en-US".to_string()
}

fn default_openai_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4.1-mini".to_string()
}

fn default_openai_input_price() -> f64 {
    0.40
}

fn default_openai_output_price() -> f64 {
    1.60
}

fn default_true() -> bool {
    true
}

fn default_rate_limit_per_minute() -> u64 {
    3
}

fn default_rate_limit_per_day() -> u64 {
    100
}

fn default_openai_monthly_limit() -> f64 {
    7.0
}

fn default_cache_ttl_hours() -> u64 {
    24
}

fn default_search_cache_ttl_hours() -> u64 {
    6
}

fn default_upstream_timeout_secs() -> u64 {
    15
}

fn default_cache_claim_lease_secs() -> u64 {
    45
}

fn default_min_score() -> u8 {
    1
}

fn default_max_match_reasons() -> usize {
    3
}

fn default_cors_origins() -> String {
    "http://localhost:3000,http://localhost:8080".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn governor(&self) -> GovernorConfig {
        GovernorConfig {
            rate_limits_enabled: self.rate_limit_enabled,
            per_minute_limit: self.rate_limit_per_minute,
            per_day_limit: self.rate_limit_per_day,
            monthly_limit_usd: self.openai_monthly_limit,
            emergency_stop: self.emergency_stop,
            ..GovernorConfig::default()
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            mood_ttl: Duration::from_secs(self.cache_ttl_hours * 3600),
            search_ttl: Duration::from_secs(self.search_cache_ttl_hours * 3600),
            upstream_timeout: Duration::from_secs(self.upstream_timeout_secs),
            scoring: ScoringConfig {
                max_reasons: self.max_match_reasons,
                ..ScoringConfig::default()
            },
            min_score: self.min_score,
            ..PipelineConfig::default()
        }
    }

    pub fn cache(&self) -> CacheSettings {
        CacheSettings {
            claim_lease: Duration::from_secs(self.cache_claim_lease_secs.max(1)),
            ..CacheSettings::default()
        }
    }

    pub fn token_prices(&self) -> TokenPrices {
        TokenPrices {
            input_per_mtok: self.openai_input_price_per_mtok,
            output_per_mtok: self.openai_output_price_per_mtok,
        }
    }

    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }
}
