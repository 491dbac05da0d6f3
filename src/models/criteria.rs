use serde::{Deserialize, Serialize};

/// Release period requested in a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Era {
    /// A specific release year
    Year(i32),
    /// First year of a decade, e.g. 1990 for "the 90s"
    Decade(i32),
}

impl Era {
    /// Whether `year` falls inside the era; exact years accept `year_tolerance` either side.
    pub fn contains(&self, year: i32, year_tolerance: i32) -> bool {
        match self {
            Era::Year(target) => (year - target).abs() <= year_tolerance,
            Era::Decade(start) => (*start..start + 10).contains(&year),
        }
    }

    /// Inclusive first and last year of the era
    pub fn year_range(&self) -> (i32, i32) {
        match self {
            Era::Year(year) => (*year, *year),
            Era::Decade(start) => (*start, start + 9),
        }
    }
}

/// Criteria extracted from a free-text search
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Desired runtime in minutes
    pub runtime_target: Option<u32>,
    pub era: Option<Era>,
    /// Canonical catalog genre names
    pub genres: Vec<String>,
    /// ISO-639-1 code
    pub language: Option<String>,
    /// Mood labels implied by tone words ("dark", "funny", ...)
    pub tones: Vec<String>,
    /// Leftover words used for the catalog text query only
    pub keywords: Vec<String>,
}

impl SearchCriteria {
    /// Number of declared, scoreable criteria
    pub fn declared_count(&self) -> usize {
        [
            self.runtime_target.is_some(),
            self.era.is_some(),
            !self.genres.is_empty(),
            self.language.is_some(),
            !self.tones.is_empty(),
        ]
        .iter()
        .filter(|declared| **declared)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.declared_count() == 0 && self.keywords.is_empty()
    }
}
