use std::collections::BTreeMap;

use crate::{
    error::AppResult,
    models::{AiUsage, AnalysisResult, EmotionAnalysis},
    services::analyzers::EmotionAnalyzer,
};

struct KeywordRule {
    words: &'static [&'static str],
    moods: &'static [(&'static str, f64)],
    emotions: &'static [(&'static str, f64)],
}

const RULES: &[KeywordRule] = &[
    KeywordRule {
        words: &["excited", "action", "adventure", "thrilling", "pumped"],
        moods: &[("action", 0.8), ("adventure", 0.7)],
        emotions: &[("excitement", 0.8)],
    },
    KeywordRule {
        words: &["romantic", "love", "romance", "date"],
        moods: &[("romance", 0.9)],
        emotions: &[("joy", 0.6)],
    },
    KeywordRule {
        words: &["funny", "comedy", "laugh", "humor", "hilarious"],
        moods: &[("comedy", 0.8)],
        emotions: &[("joy", 0.7)],
    },
    KeywordRule {
        words: &["sad", "depressed", "down", "upset", "lonely"],
        moods: &[("drama", 0.6), ("uplifting", 0.8)],
        emotions: &[("sadness", 0.7)],
    },
    KeywordRule {
        words: &["stressed", "tired", "calm", "relax", "relaxing", "peaceful"],
        moods: &[("calming", 0.8), ("feel-good", 0.6)],
        emotions: &[("calmness", 0.7)],
    },
    KeywordRule {
        words: &["scared", "scary", "spooky", "horror"],
        moods: &[("horror", 0.8), ("thriller", 0.6)],
        emotions: &[("fear", 0.7)],
    },
    KeywordRule {
        words: &["nostalgic", "childhood", "classic", "remember"],
        moods: &[("nostalgic", 0.8)],
        emotions: &[("nostalgia", 0.8)],
    },
];

/// Deterministic analyzer used when no language model is configured
///
/// Costs nothing, so requests served with it never move the monthly
/// accumulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze_text(&self, text: &str) -> AnalysisResult {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let mut moods = BTreeMap::new();
        let mut emotions = BTreeMap::new();
        for rule in RULES {
            if !rule.words.iter().any(|word| words.contains(word)) {
                continue;
            }
            for (mood, weight) in rule.moods {
                merge_max(&mut moods, mood, *weight);
            }
            for (emotion, weight) in rule.emotions {
                merge_max(&mut emotions, emotion, *weight);
            }
        }

        let matched = !moods.is_empty();
        if !matched {
            moods.insert("feel-good".to_string(), 0.7);
            moods.insert("comedy".to_string(), 0.6);
            emotions.insert("joy".to_string(), 0.5);
        }

        AnalysisResult {
            emotions,
            moods,
            confidence: if matched { 0.6 } else { 0.5 },
            reasoning: Some(if matched {
                "Keyword-based analysis".to_string()
            } else {
                "No mood keywords found; defaulting to feel-good picks".to_string()
            }),
            context: BTreeMap::from([
                ("energy_level".to_string(), "medium".to_string()),
                ("time_preference".to_string(), "medium".to_string()),
            ]),
            analysis_method: "keyword".to_string(),
        }
    }
}

fn merge_max(map: &mut BTreeMap<String, f64>, key: &str, weight: f64) {
    let entry = map.entry(key.to_string()).or_insert(0.0);
    if weight > *entry {
        *entry = weight;
    }
}

#[async_trait::async_trait]
impl EmotionAnalyzer for KeywordAnalyzer {
    async fn analyze(&self, text: &str) -> AppResult<EmotionAnalysis> {
        Ok(EmotionAnalysis {
            analysis: self.analyze_text(text),
            usage: AiUsage::default(),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excited_maps_to_action() {
        let analysis = KeywordAnalyzer::new().analyze_text("I'm so excited, give me action!");
        assert_eq!(analysis.moods["action"], 0.8);
        assert_eq!(analysis.moods["adventure"], 0.7);
        assert_eq!(analysis.emotions["excitement"], 0.8);
        assert_eq!(analysis.confidence, 0.6);
        assert_eq!(analysis.analysis_method, "keyword");
    }

    #[test]
    fn test_rules_combine_with_max() {
        let analysis = KeywordAnalyzer::new().analyze_text("a funny romantic date night");
        assert_eq!(analysis.moods["romance"], 0.9);
        assert_eq!(analysis.moods["comedy"], 0.8);
        assert_eq!(analysis.emotions["joy"], 0.7);
    }

    #[test]
    fn test_sad_recommends_uplifting() {
        let analysis = KeywordAnalyzer::new().analyze_text("feeling sad today");
        assert_eq!(analysis.moods["uplifting"], 0.8);
        assert_eq!(analysis.emotions["sadness"], 0.7);
    }

    #[test]
    fn test_no_keywords_defaults_to_feel_good() {
        let analysis = KeywordAnalyzer::new().analyze_text("hmm");
        assert_eq!(analysis.moods["feel-good"], 0.7);
        assert_eq!(analysis.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_analyze_is_free() {
        let result = KeywordAnalyzer::new().analyze("lonely").await.unwrap();
        assert_eq!(result.usage, AiUsage::default());
    }
}
