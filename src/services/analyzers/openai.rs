/// OpenAI chat-completions analyzer
///
/// Sends the caller's text with a fixed JSON-only prompt and maps the reply
/// onto [`AnalysisResult`]. Token usage reported by the API is priced with
/// the configured per-million-token rates so the governor can account for it.
///
/// A reply that does not parse is still billed; in that case the keyword
/// analyzer's result is returned alongside the real usage.
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;

use crate::{
    error::{AppError, AppResult},
    models::{AiUsage, AnalysisResult, EmotionAnalysis},
    services::analyzers::{EmotionAnalyzer, KeywordAnalyzer},
};

const SYSTEM_PROMPT: &str =
    "You are an expert emotion analyst and movie recommendation specialist.";

const ANALYSIS_PROMPT: &str = r#"Analyze the emotional state and movie preferences in the user's message.

Respond with JSON only, in exactly this shape (all weights between 0.0 and 1.0):
{
  "primary_emotions": {"joy": 0.0, "sadness": 0.0, "anger": 0.0, "fear": 0.0,
                       "surprise": 0.0, "excitement": 0.0, "calmness": 0.0, "nostalgia": 0.0},
  "movie_moods": {"action": 0.0, "adventure": 0.0, "comedy": 0.0, "drama": 0.0, "horror": 0.0,
                  "romance": 0.0, "thriller": 0.0, "sci-fi": 0.0, "fantasy": 0.0, "feel-good": 0.0,
                  "uplifting": 0.0, "calming": 0.0, "energetic": 0.0, "nostalgic": 0.0},
  "context_analysis": {"energy_level": "low|medium|high",
                       "social_preference": "alone|with_others|either",
                       "time_preference": "short|medium|long",
                       "complexity_preference": "simple|moderate|complex"},
  "reasoning": "one sentence"
}"#;

/// USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenPrices {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Default for TokenPrices {
    fn default() -> Self {
        Self {
            input_per_mtok: 0.40,
            output_per_mtok: 1.60,
        }
    }
}

impl TokenPrices {
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 * self.input_per_mtok
            + completion_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

/// The JSON object the prompt asks the model for
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    primary_emotions: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    movie_moods: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    context_analysis: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Clone)]
pub struct OpenAiAnalyzer {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    model: String,
    prices: TokenPrices,
}

impl OpenAiAnalyzer {
    pub fn new(api_key: String, api_url: String, model: String, prices: TokenPrices) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url,
            model,
            prices,
        }
    }
}

#[async_trait::async_trait]
impl EmotionAnalyzer for OpenAiAnalyzer {
    async fn analyze(&self, text: &str) -> AppResult<EmotionAnalysis> {
        let url = format!("{}/chat/completions", self.api_url);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": format!("{}\n\nUser message: \"{}\"", ANALYSIS_PROMPT, text)},
                ],
                "temperature": 0.3,
                "max_tokens": 500,
                "response_format": {"type": "json_object"},
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamUnavailable(format!(
                "OpenAI API returned status {}: {}",
                status, body
            )));
        }

        let chat: ChatResponse = response.json().await?;
        let usage = chat.usage.unwrap_or_default();
        let tokens = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens + usage.completion_tokens
        };
        let usage = AiUsage {
            tokens,
            cost_usd: self.prices.cost(usage.prompt_tokens, usage.completion_tokens),
        };

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        let analysis = match parse_analysis(&content) {
            Ok(mut analysis) => {
                analysis.confidence = confidence(text, &analysis);
                analysis.analysis_method = self.model.clone();
                analysis
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable OpenAI reply, using keyword analysis");
                let mut analysis = KeywordAnalyzer::new().analyze_text(text);
                analysis.analysis_method = "fallback".to_string();
                analysis
            }
        };

        tracing::info!(
            model = %self.model,
            tokens = usage.tokens,
            cost_usd = usage.cost_usd,
            method = %analysis.analysis_method,
            "Emotion analysis completed"
        );

        Ok(EmotionAnalysis { analysis, usage })
    }

    /// Lists models with the configured key, which fails fast on a bad key
    async fn health_check(&self) -> bool {
        if self.api_key.is_empty() {
            return false;
        }
        let url = format!("{}/models", self.api_url);
        match self.http_client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(status = %response.status(), "OpenAI health check rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "OpenAI health check failed");
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Parses the model's JSON reply, tolerating a surrounding code fence.
///
/// Weights are clamped into [0, 1]; non-numeric weights are dropped.
pub fn parse_analysis(content: &str) -> AppResult<AnalysisResult> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let body = body.strip_suffix("```").unwrap_or(body).trim();

    let raw: RawAnalysis = serde_json::from_str(body)
        .map_err(|e| AppError::UpstreamUnavailable(format!("Invalid analysis JSON: {}", e)))?;

    let context = raw
        .context_analysis
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => (key, s),
            other => (key, other.to_string()),
        })
        .collect();

    Ok(AnalysisResult {
        emotions: weights(raw.primary_emotions),
        moods: weights(raw.movie_moods),
        confidence: 0.0,
        reasoning: raw.reasoning,
        context,
        analysis_method: String::new(),
    })
}

fn weights(raw: BTreeMap<String, serde_json::Value>) -> BTreeMap<String, f64> {
    raw.into_iter()
        .filter_map(|(label, value)| {
            let weight = value.as_f64().filter(|w| w.is_finite())?;
            Some((label.to_lowercase(), weight.clamp(0.0, 1.0)))
        })
        .collect()
}

/// 0.85 base, +0.10 for descriptive text, +0.05 for a multi-mood reading, capped at 0.95
fn confidence(text: &str, analysis: &AnalysisResult) -> f64 {
    let mut confidence: f64 = 0.85;
    if text.split_whitespace().count() > 5 {
        confidence += 0.10;
    }
    if analysis.moods.values().filter(|weight| **weight > 0.3).count() >= 2 {
        confidence += 0.05;
    }
    confidence.min(0.95)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"```json
{
  "primary_emotions": {"excitement": 0.8, "joy": 1.4, "fear": "high"},
  "movie_moods": {"Action": 0.9, "adventure": 0.6, "drama": -0.2},
  "context_analysis": {"energy_level": "high", "group_size": 2},
  "reasoning": "Wants something energetic"
}
```"#;

    #[test]
    fn test_parse_fenced_reply() {
        let analysis = parse_analysis(REPLY).unwrap();
        assert_eq!(analysis.emotions["excitement"], 0.8);
        assert_eq!(analysis.emotions["joy"], 1.0);
        assert!(!analysis.emotions.contains_key("fear"));
        assert_eq!(analysis.moods["action"], 0.9);
        assert_eq!(analysis.moods["drama"], 0.0);
        assert_eq!(analysis.context["energy_level"], "high");
        assert_eq!(analysis.context["group_size"], "2");
        assert_eq!(analysis.reasoning.as_deref(), Some("Wants something energetic"));
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(matches!(
            parse_analysis("Sure! Here is the analysis."),
            Err(AppError::UpstreamUnavailable(_))
        ));
    }

    #[test]
    fn test_confidence_heuristic() {
        let analysis = parse_analysis(REPLY).unwrap();
        assert_eq!(confidence("action please", &analysis), 0.85 + 0.05);

        let single_mood = AnalysisResult::default();
        assert_eq!(
            confidence("I am feeling excited tonight, want action", &single_mood),
            0.85 + 0.10
        );
        assert_eq!(
            confidence("I am feeling excited tonight, want action", &analysis),
            0.95
        );
    }

    #[test]
    fn test_token_cost() {
        let prices = TokenPrices::default();
        let cost = prices.cost(1_000_000, 500_000);
        assert!((cost - (0.40 + 0.80)).abs() < 1e-9);
        assert_eq!(prices.cost(0, 0), 0.0);
    }
}
