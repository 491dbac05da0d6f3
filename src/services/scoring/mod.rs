use std::collections::BTreeMap;

use crate::models::{AnalysisResult, Candidate, Era, ScoredRecommendation, SearchCriteria};

pub mod tables;

/// Mood-mode component weights; must sum to 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub mood: f64,
    pub emotion: f64,
    pub quality: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    /// Search mode: share of the score driven by criteria, the rest is quality
    pub search_criteria_weight: f64,
    pub runtime_tolerance_minutes: u32,
    pub year_tolerance: i32,
    /// A tone matches when the film carries its mood at least this strongly
    pub tone_min_strength: f64,
    /// Minimum share of the total score a component needs to earn a reason
    pub reason_threshold: f64,
    pub max_reasons: usize,
    pub highly_rated: f64,
    pub well_reviewed: f64,
    pub popular_above: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights {
                mood: 0.45,
                emotion: 0.35,
                quality: 0.20,
            },
            search_criteria_weight: 0.9,
            runtime_tolerance_minutes: 15,
            year_tolerance: 2,
            tone_min_strength: 0.5,
            reason_threshold: 0.15,
            max_reasons: 3,
            highly_rated: 7.5,
            well_reviewed: 6.5,
            popular_above: 50.0,
        }
    }
}

/// What a candidate is scored against
#[derive(Debug, Clone, Copy)]
pub enum Signal<'a> {
    Mood(&'a AnalysisResult),
    Search(&'a SearchCriteria),
}

/// One scored component and the reason it would contribute
struct Contribution {
    value: f64,
    reason: Option<String>,
}

/// Turns a signal and a candidate into a 0–100 score with reasons.
///
/// Pure: no clock, no randomness, iteration over ordered maps only.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score_all(&self, candidates: &[Candidate], signal: Signal<'_>) -> Vec<ScoredRecommendation> {
        candidates
            .iter()
            .map(|candidate| self.score(candidate, signal))
            .collect()
    }

    pub fn score(&self, candidate: &Candidate, signal: Signal<'_>) -> ScoredRecommendation {
        match signal {
            Signal::Mood(analysis) => self.score_mood(candidate, analysis),
            Signal::Search(criteria) => self.score_search(candidate, criteria),
        }
    }

    /// Rating-driven prior in [0, 1]; popularity only nudges it
    pub fn quality_prior(&self, candidate: &Candidate) -> f64 {
        0.75 * unit(candidate.vote_average / 10.0) + 0.25 * unit(candidate.popularity / 100.0)
    }

    fn score_mood(&self, candidate: &Candidate, analysis: &AnalysisResult) -> ScoredRecommendation {
        let weights = self.config.weights;
        let profile = tables::mood_profile(&candidate.genres);

        let mut mood_matches = BTreeMap::new();
        let mut considered = 0usize;
        let mut mood_sum = 0.0;
        for (mood, weight) in &analysis.moods {
            let weight = unit(*weight);
            if weight <= 0.0 {
                continue;
            }
            considered += 1;
            let matched = weight.min(profile.get(mood.as_str()).copied().unwrap_or(0.0));
            if matched > 0.0 {
                mood_matches.insert(mood.clone(), matched);
            }
            mood_sum += matched;
        }
        let mood_score = ratio(mood_sum, considered);

        let mut emotion_matches = BTreeMap::new();
        let mut considered = 0usize;
        let mut emotion_sum = 0.0;
        for (emotion, weight) in &analysis.emotions {
            let weight = unit(*weight);
            if weight <= 0.0 {
                continue;
            }
            considered += 1;
            let affinity = tables::emotion_moods(emotion)
                .iter()
                .map(|(mood, strength)| strength * profile.get(mood).copied().unwrap_or(0.0))
                .fold(0.0, f64::max);
            let matched = weight.min(affinity);
            if matched > 0.0 {
                emotion_matches.insert(emotion.clone(), matched);
            }
            emotion_sum += matched;
        }
        let emotion_score = ratio(emotion_sum, considered);

        let contributions = vec![
            Contribution {
                value: weights.mood * mood_score,
                reason: strongest(&mood_matches)
                    .map(|mood| format!("Matches your {} mood", mood.replace('-', " "))),
            },
            Contribution {
                value: weights.emotion * emotion_score,
                reason: strongest(&emotion_matches)
                    .map(|emotion| format!("Suits your {} feeling", emotion)),
            },
            Contribution {
                value: weights.quality * self.quality_prior(candidate),
                reason: self.quality_reason(candidate),
            },
        ];

        self.finish(
            candidate,
            contributions,
            "Recommended for you",
            mood_matches,
            emotion_matches,
        )
    }

    fn score_search(&self, candidate: &Candidate, criteria: &SearchCriteria) -> ScoredRecommendation {
        let mut met: Vec<String> = Vec::new();
        let mut mood_matches = BTreeMap::new();
        let mut considered = 0usize;

        if !criteria.genres.is_empty() {
            considered += 1;
            if let Some(genre) = criteria.genres.iter().find(|g| candidate.has_genre(g)) {
                met.push(format!("Matches {} genre", genre));
            }
        }

        // Unknown runtime or release year drops that criterion for this candidate
        if let (Some(target), Some(runtime)) = (criteria.runtime_target, candidate.runtime) {
            considered += 1;
            if runtime.abs_diff(target) <= self.config.runtime_tolerance_minutes {
                met.push(format!("Runtime close to {} minutes", target));
            }
        }

        if let Some(language) = &criteria.language {
            considered += 1;
            if candidate.language.eq_ignore_ascii_case(language) {
                met.push(format!("Original language matches ({})", language));
            }
        }

        if let (Some(era), Some(year)) = (criteria.era, candidate.release_year()) {
            considered += 1;
            if era.contains(year, self.config.year_tolerance) {
                met.push(match era {
                    Era::Year(target) => format!("Released around {}", target),
                    Era::Decade(start) => format!("From the {}s", start),
                });
            }
        }

        if !criteria.tones.is_empty() {
            considered += 1;
            let profile = tables::mood_profile(&candidate.genres);
            for tone in &criteria.tones {
                if let Some(strength) = profile.get(tone.as_str()) {
                    if *strength >= self.config.tone_min_strength {
                        mood_matches.insert(tone.clone(), *strength);
                    }
                }
            }
            if let Some(tone) = strongest(&mood_matches) {
                met.push(format!("Fits the {} tone you asked for", tone.replace('-', " ")));
            }
        }

        // Keyword-only searches fall back to text relevance
        if considered == 0 && !criteria.keywords.is_empty() {
            let haystack = format!("{} {}", candidate.title, candidate.overview).to_lowercase();
            considered = criteria.keywords.len();
            for keyword in &criteria.keywords {
                if haystack.contains(&keyword.to_lowercase()) {
                    met.push(format!("Mentions \"{}\"", keyword));
                }
            }
        }

        let criteria_weight = self.config.search_criteria_weight;
        let per_criterion = ratio(criteria_weight, considered);

        let mut contributions: Vec<Contribution> = met
            .into_iter()
            .map(|reason| Contribution {
                value: per_criterion,
                reason: Some(reason),
            })
            .collect();
        contributions.push(Contribution {
            value: (1.0 - criteria_weight) * self.quality_prior(candidate),
            reason: self.quality_reason(candidate),
        });

        self.finish(
            candidate,
            contributions,
            "Recommended based on your search",
            mood_matches,
            BTreeMap::new(),
        )
    }

    fn quality_reason(&self, candidate: &Candidate) -> Option<String> {
        if candidate.vote_average >= self.config.highly_rated {
            Some("Highly rated film".to_string())
        } else if candidate.vote_average >= self.config.well_reviewed {
            Some("Well-reviewed movie".to_string())
        } else if candidate.popularity > self.config.popular_above {
            Some("Popular choice".to_string())
        } else {
            None
        }
    }

    fn finish(
        &self,
        candidate: &Candidate,
        mut contributions: Vec<Contribution>,
        fallback_reason: &str,
        mood_matches: BTreeMap<String, f64>,
        emotion_matches: BTreeMap<String, f64>,
    ) -> ScoredRecommendation {
        let total: f64 = contributions.iter().map(|c| c.value).sum();

        // Stable: equal contributions keep their component order
        contributions.sort_by(|a, b| b.value.total_cmp(&a.value));
        let mut match_reasons: Vec<String> = contributions
            .into_iter()
            .filter(|c| total > 0.0 && c.value / total >= self.config.reason_threshold)
            .filter_map(|c| c.reason)
            .take(self.config.max_reasons)
            .collect();
        if match_reasons.is_empty() {
            match_reasons.push(fallback_reason.to_string());
        }

        ScoredRecommendation {
            movie: candidate.clone(),
            score: to_percent(total),
            match_reasons,
            mood_matches,
            emotion_matches,
        }
    }
}

/// Clamps into [0, 1]; NaN counts as no signal
fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn ratio(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn to_percent(value: f64) -> u8 {
    (unit(value) * 100.0).round() as u8
}

/// Highest-valued key, ties resolved by key order
fn strongest(matches: &BTreeMap<String, f64>) -> Option<&str> {
    matches
        .iter()
        .fold(None, |best: Option<(&String, f64)>, (key, value)| match best {
            Some((_, best_value)) if best_value >= *value => best,
            _ => Some((key, *value)),
        })
        .map(|(key, _)| key.as_str())
}
