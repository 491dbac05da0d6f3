use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Display, str::FromStr};

pub mod criteria;

pub use criteria::{Era, SearchCriteria};

use crate::error::AppError;

/// How a recommendation request expresses what the caller wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Free text describing a mood, interpreted by the emotion analyzer
    Mood,
    /// Free text describing concrete criteria (runtime, era, genre, language, tone)
    Search,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Mood => "mood",
            Mode::Search => "search",
        }
    }

    /// Value reported in `metadata.method`
    pub fn method(&self) -> &'static str {
        match self {
            Mode::Mood => "mood_analysis",
            Mode::Search => "text_search",
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Mode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mood" => Ok(Mode::Mood),
            "search" => Ok(Mode::Search),
            other => Err(AppError::Validation(format!("Unknown mode: {}", other))),
        }
    }
}

/// A movie handed to the core by the catalog provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub genres: Vec<String>,
    /// Minutes; `None` when the catalog did not report it
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub vote_count: u64,
    #[serde(default)]
    pub popularity: f64,
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub streaming_services: Vec<String>,
}

impl Candidate {
    pub fn release_year(&self) -> Option<i32> {
        self.release_date
            .as_deref()
            .and_then(|date| date.get(..4))
            .and_then(|year| year.parse().ok())
    }

    pub fn has_genre(&self, genre: &str) -> bool {
        self.genres.iter().any(|g| g.eq_ignore_ascii_case(genre))
    }
}

/// Structured output of the emotion analyzer for a single request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AnalysisResult {
    #[serde(default)]
    pub emotions: BTreeMap<String, f64>,
    #[serde(default)]
    pub moods: BTreeMap<String, f64>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Inferred hints such as energy level or preferred length
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    #[serde(default)]
    pub analysis_method: String,
}

impl AnalysisResult {
    /// Mood labels ordered by descending weight, ties by name
    pub fn top_moods(&self, count: usize, min_weight: f64) -> Vec<(&str, f64)> {
        let mut moods: Vec<(&str, f64)> = self
            .moods
            .iter()
            .filter(|(_, weight)| **weight > min_weight)
            .map(|(mood, weight)| (mood.as_str(), *weight))
            .collect();
        moods.sort_by(|a, b| b.1.total_cmp(&a.1));
        moods.truncate(count);
        moods
    }
}

/// AI spend reported by the emotion analyzer
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AiUsage {
    pub tokens: u64,
    pub cost_usd: f64,
}

/// Analyzer output: the analysis plus what it cost to produce
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionAnalysis {
    pub analysis: AnalysisResult,
    pub usage: AiUsage,
}

/// Parameters for one catalog lookup
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CatalogQuery {
    /// Free-text title/keyword search
    pub text: Option<String>,
    /// Candidate must carry any of these genres
    pub genres: Vec<String>,
    pub runtime_min: Option<u32>,
    pub runtime_max: Option<u32>,
    pub era: Option<Era>,
    /// ISO-639-1 original language
    pub language: Option<String>,
    pub page: u32,
}

impl CatalogQuery {
    /// Query for currently popular titles
    pub fn popular() -> Self {
        Self {
            page: 1,
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            page: 1,
            ..Self::default()
        }
    }

    pub fn genres(genres: Vec<String>) -> Self {
        Self {
            genres,
            page: 1,
            ..Self::default()
        }
    }

    pub fn is_popular(&self) -> bool {
        self.text.is_none()
            && self.genres.is_empty()
            && self.runtime_min.is_none()
            && self.runtime_max.is_none()
            && self.era.is_none()
            && self.language.is_none()
    }
}

/// A candidate with its match score and explanation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredRecommendation {
    pub movie: Candidate,
    /// 0–100
    pub score: u8,
    /// Most salient first
    pub match_reasons: Vec<String>,
    pub mood_matches: BTreeMap<String, f64>,
    pub emotion_matches: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMetadata {
    pub total_found: usize,
    pub method: String,
    pub timestamp: DateTime<Utc>,
}

/// Complete payload returned to the caller and stored in the response cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationResponse {
    /// Echo of the analysis (mood mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    /// Echo of the parsed criteria (search mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<SearchCriteria>,
    pub recommendations: Vec<ScoredRecommendation>,
    pub metadata: ResponseMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(release_date: Option<&str>) -> Candidate {
        Candidate {
            id: 1,
            title: "Inception".to_string(),
            original_title: None,
            overview: String::new(),
            genres: vec!["Action".to_string(), "Science Fiction".to_string()],
            runtime: Some(148),
            vote_average: 8.4,
            vote_count: 36000,
            popularity: 80.0,
            release_date: release_date.map(str::to_string),
            language: "en".to_string(),
            poster_path: None,
            streaming_services: vec![],
        }
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("mood".parse::<Mode>().unwrap(), Mode::Mood);
        assert_eq!(" Search ".parse::<Mode>().unwrap(), Mode::Search);
        assert!(matches!(
            "vibes".parse::<Mode>(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_mode_serialization() {
        assert_eq!(serde_json::to_string(&Mode::Mood).unwrap(), "\"mood\"");
        assert_eq!(Mode::Search.method(), "text_search");
    }

    #[test]
    fn test_release_year() {
        assert_eq!(candidate(Some("2010-07-16")).release_year(), Some(2010));
        assert_eq!(candidate(Some("")).release_year(), None);
        assert_eq!(candidate(None).release_year(), None);
    }

    #[test]
    fn test_has_genre_ignores_case() {
        assert!(candidate(None).has_genre("action"));
        assert!(!candidate(None).has_genre("Romance"));
    }

    #[test]
    fn test_top_moods_ordering() {
        let analysis = AnalysisResult {
            moods: BTreeMap::from([
                ("comedy".to_string(), 0.6),
                ("action".to_string(), 0.9),
                ("drama".to_string(), 0.2),
                ("adventure".to_string(), 0.6),
            ]),
            ..AnalysisResult::default()
        };
        let top = analysis.top_moods(3, 0.3);
        assert_eq!(top, vec![("action", 0.9), ("adventure", 0.6), ("comedy", 0.6)]);
    }

    #[test]
    fn test_popular_query() {
        assert!(CatalogQuery::popular().is_popular());
        assert!(!CatalogQuery::text("heist").is_popular());
    }

    #[test]
    fn test_candidate_missing_optional_fields() {
        let json = r#"{"id": 7, "title": "Tampopo"}"#;
        let candidate: Candidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.runtime, None);
        assert!(candidate.streaming_services.is_empty());
        assert!(candidate.genres.is_empty());
    }
}
