use sha2::{Digest, Sha256};
use std::fmt::Display;

use crate::models::Mode;

/// Lower-cases, trims, and collapses internal whitespace so trivial formatting
/// differences map to the same request.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable hash of a normalized request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(mode: Mode, text: &str, num_recommendations: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(mode.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(normalize_text(text).as_bytes());
        hasher.update(b"\n");
        hasher.update(num_recommendations.to_string().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Feeling   SAD\ttoday \n"), "feeling sad today");
    }

    #[test]
    fn test_formatting_differences_share_fingerprint() {
        let a = Fingerprint::new(Mode::Mood, "I want ACTION", 8);
        let b = Fingerprint::new(Mode::Mood, "  i want   action ", 8);
        assert_eq!(a, b);
    }

    #[test]
    fn test_mode_and_count_change_fingerprint() {
        let base = Fingerprint::new(Mode::Mood, "i want action", 8);
        assert_ne!(base, Fingerprint::new(Mode::Search, "i want action", 8));
        assert_ne!(base, Fingerprint::new(Mode::Mood, "i want action", 5));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fingerprint = Fingerprint::new(Mode::Search, "heist", 8);
        assert_eq!(fingerprint.as_str().len(), 64);
        assert!(fingerprint.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
