/// Emotion analyzers
///
/// An analyzer turns the caller's free text into emotion and mood weights.
/// The pipeline only depends on the trait, so the language model can be
/// swapped for the keyword fallback (or a test double) without touching
/// scoring.
use crate::{error::AppResult, models::EmotionAnalysis};

pub mod keyword;
pub mod openai;

pub use keyword::KeywordAnalyzer;
pub use openai::{OpenAiAnalyzer, TokenPrices};

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EmotionAnalyzer: Send + Sync {
    /// Analyzes free text, reporting what the analysis cost
    async fn analyze(&self, text: &str) -> AppResult<EmotionAnalysis>;

    /// Whether the analyzer can currently serve requests
    async fn health_check(&self) -> bool;

    /// Analyzer name for logging
    fn name(&self) -> &'static str;
}
