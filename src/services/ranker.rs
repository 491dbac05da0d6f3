use std::collections::HashSet;

use crate::models::ScoredRecommendation;

pub const DEFAULT_LIMIT: usize = 8;
pub const MAX_LIMIT: usize = 20;

/// Clamps a caller-supplied count into `[1, MAX_LIMIT]`; missing or non-positive means the default.
pub fn clamp_limit(requested: Option<i64>) -> usize {
    match requested {
        Some(n) if n >= 1 => usize::try_from(n).unwrap_or(MAX_LIMIT).min(MAX_LIMIT),
        _ => DEFAULT_LIMIT,
    }
}

/// Selects the final recommendation list from scored candidates
#[derive(Debug, Clone, Copy)]
pub struct Ranker {
    /// Entries scoring below this are dropped as filler
    pub min_score: u8,
}

impl Default for Ranker {
    fn default() -> Self {
        Self { min_score: 1 }
    }
}

impl Ranker {
    pub fn new(min_score: u8) -> Self {
        Self { min_score }
    }

    /// Dedupes by movie id (first wins), drops entries under the floor, then
    /// sorts by score, vote count, and vote average, all descending. The sort
    /// is stable so remaining ties keep input order.
    pub fn rank(&self, scored: Vec<ScoredRecommendation>, limit: usize) -> Vec<ScoredRecommendation> {
        let limit = limit.clamp(1, MAX_LIMIT);
        let mut seen = HashSet::new();

        let mut ranked: Vec<ScoredRecommendation> = scored
            .into_iter()
            .filter(|rec| seen.insert(rec.movie.id))
            .filter(|rec| rec.score >= self.min_score)
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| b.movie.vote_count.cmp(&a.movie.vote_count))
                .then_with(|| b.movie.vote_average.total_cmp(&a.movie.vote_average))
        });
        ranked.truncate(limit);
        ranked
    }
}
