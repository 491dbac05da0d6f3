use std::fmt::Display;

use crate::{
    models::Mode,
    services::{fingerprint::Fingerprint, governor::Scope},
};

/// Keys of everything the service keeps in the shared store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// Cached recommendation payload
    Recommendation(Mode, Fingerprint),
    MinuteWindow(Scope),
    DayWindow(Scope),
    /// Monthly AI usage, keyed by `YYYY-MM`
    MonthlyUsage(String),
    EmergencyStop,
    /// Marks the instance currently computing the value under the inner key
    ComputeClaim(Box<StoreKey>),
}

impl Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKey::Recommendation(mode, fingerprint) => write!(f, "rec:{}:{}", mode, fingerprint),
            StoreKey::MinuteWindow(scope) => write!(f, "rate:{}:minute", scope),
            StoreKey::DayWindow(scope) => write!(f, "rate:{}:day", scope),
            StoreKey::MonthlyUsage(month) => write!(f, "usage:{}", month),
            StoreKey::EmergencyStop => write!(f, "governor:emergency_stop"),
            StoreKey::ComputeClaim(key) => write!(f, "claim:{}", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_keys() {
        let scope = Scope::Client("10.0.0.1".to_string());
        assert_eq!(
            StoreKey::MinuteWindow(scope.clone()).to_string(),
            "rate:client:10.0.0.1:minute"
        );
        assert_eq!(StoreKey::DayWindow(scope).to_string(), "rate:client:10.0.0.1:day");
        assert_eq!(StoreKey::DayWindow(Scope::Global).to_string(), "rate:global:day");
    }

    #[test]
    fn test_usage_and_flag_keys() {
        assert_eq!(
            StoreKey::MonthlyUsage("2026-10".to_string()).to_string(),
            "usage:2026-10"
        );
        assert_eq!(StoreKey::EmergencyStop.to_string(), "governor:emergency_stop");
    }

    #[test]
    fn test_recommendation_key_includes_mode() {
        let fingerprint = Fingerprint::new(Mode::Mood, "happy", 8);
        let key = StoreKey::Recommendation(Mode::Mood, fingerprint.clone()).to_string();
        assert_eq!(key, format!("rec:mood:{}", fingerprint));
    }

    #[test]
    fn test_compute_claim_wraps_key() {
        let fingerprint = Fingerprint::new(Mode::Search, "heist", 8);
        let inner = StoreKey::Recommendation(Mode::Search, fingerprint.clone());
        assert_eq!(
            StoreKey::ComputeClaim(Box::new(inner)).to_string(),
            format!("claim:rec:search:{}", fingerprint)
        );
    }
}
