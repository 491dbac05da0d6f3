//! Affinity tables behind mood-mode scoring.
//!
//! Bump [`TABLE_VERSION`] whenever a weight changes: rankings depend on every
//! entry, and cached responses computed from older tables stay valid only
//! until their TTL.

use std::collections::BTreeMap;

pub const TABLE_VERSION: u32 = 2;

type Affinities = &'static [(&'static str, f64)];

/// Catalog genre → how strongly a film of that genre carries each mood
pub const GENRE_MOODS: &[(&str, Affinities)] = &[
    (
        "Action",
        &[("action", 0.9), ("intense", 0.8), ("energetic", 0.7), ("adventure", 0.6)],
    ),
    (
        "Adventure",
        &[("adventure", 0.9), ("energetic", 0.7), ("uplifting", 0.6), ("feel-good", 0.5)],
    ),
    (
        "Animation",
        &[("feel-good", 0.8), ("uplifting", 0.7), ("heartwarming", 0.6), ("comedy", 0.5)],
    ),
    (
        "Comedy",
        &[("comedy", 0.9), ("feel-good", 0.8), ("uplifting", 0.7), ("heartwarming", 0.6)],
    ),
    (
        "Crime",
        &[("intense", 0.8), ("thriller", 0.7), ("drama", 0.6), ("action", 0.5)],
    ),
    (
        "Documentary",
        &[("educational", 0.9), ("thoughtful", 0.8), ("drama", 0.6), ("calming", 0.5)],
    ),
    (
        "Drama",
        &[("drama", 0.9), ("emotional", 0.8), ("thoughtful", 0.7), ("intense", 0.6)],
    ),
    (
        "Family",
        &[
            ("feel-good", 0.9),
            ("heartwarming", 0.8),
            ("uplifting", 0.7),
            ("comedy", 0.6),
            ("nostalgic", 0.5),
        ],
    ),
    (
        "Fantasy",
        &[("fantasy", 0.9), ("magical", 0.9), ("adventure", 0.8), ("uplifting", 0.6), ("feel-good", 0.5)],
    ),
    (
        "History",
        &[("thoughtful", 0.8), ("drama", 0.7), ("educational", 0.6), ("nostalgic", 0.6)],
    ),
    (
        "Horror",
        &[("horror", 0.9), ("scary", 0.9), ("intense", 0.8), ("thriller", 0.7)],
    ),
    (
        "Music",
        &[
            ("uplifting", 0.8),
            ("feel-good", 0.7),
            ("emotional", 0.6),
            ("calming", 0.6),
            ("heartwarming", 0.5),
        ],
    ),
    (
        "Mystery",
        &[("thriller", 0.8), ("intense", 0.7), ("thoughtful", 0.6)],
    ),
    (
        "Romance",
        &[("romance", 0.9), ("heartwarming", 0.8), ("feel-good", 0.7), ("emotional", 0.6)],
    ),
    (
        "Science Fiction",
        &[("sci-fi", 0.9), ("adventure", 0.7), ("thoughtful", 0.6), ("action", 0.5)],
    ),
    ("TV Movie", &[("drama", 0.6), ("feel-good", 0.5)]),
    (
        "Thriller",
        &[("thriller", 0.9), ("intense", 0.8), ("action", 0.6)],
    ),
    (
        "War",
        &[("intense", 0.8), ("drama", 0.7), ("action", 0.6), ("thoughtful", 0.5)],
    ),
    (
        "Western",
        &[("action", 0.7), ("adventure", 0.6), ("drama", 0.5), ("nostalgic", 0.5)],
    ),
];

/// Emotion → the moods a viewer feeling it is drawn to
pub const EMOTION_MOODS: &[(&str, Affinities)] = &[
    (
        "joy",
        &[("feel-good", 0.9), ("uplifting", 0.8), ("comedy", 0.7), ("heartwarming", 0.6)],
    ),
    (
        "sadness",
        &[("emotional", 0.9), ("drama", 0.8), ("melancholic", 0.7), ("thoughtful", 0.6)],
    ),
    ("anger", &[("intense", 0.8), ("action", 0.7), ("thriller", 0.6)]),
    ("fear", &[("scary", 0.9), ("thriller", 0.8), ("intense", 0.7)]),
    ("surprise", &[("adventure", 0.7), ("thriller", 0.6), ("comedy", 0.5)]),
    (
        "excitement",
        &[("energetic", 0.9), ("action", 0.8), ("adventure", 0.7), ("uplifting", 0.6)],
    ),
    (
        "calmness",
        &[("calming", 0.9), ("peaceful", 0.8), ("thoughtful", 0.7), ("drama", 0.5)],
    ),
    (
        "nostalgia",
        &[("nostalgic", 0.9), ("heartwarming", 0.7), ("drama", 0.6), ("feel-good", 0.5)],
    ),
];

fn lookup(table: &[(&str, Affinities)], name: &str) -> Affinities {
    table
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, affinities)| *affinities)
        .unwrap_or(&[])
}

/// Mood strengths of a film, taking the strongest genre for each mood
pub fn mood_profile(genres: &[String]) -> BTreeMap<&'static str, f64> {
    let mut profile = BTreeMap::new();
    for genre in genres {
        for (mood, strength) in lookup(GENRE_MOODS, genre) {
            let entry = profile.entry(*mood).or_insert(0.0);
            if *strength > *entry {
                *entry = *strength;
            }
        }
    }
    profile
}

pub fn emotion_moods(emotion: &str) -> Affinities {
    lookup(EMOTION_MOODS, emotion)
}

/// Genres that carry `mood` at `min_strength` or more, in table order
pub fn genres_for_mood(mood: &str, min_strength: f64) -> Vec<&'static str> {
    GENRE_MOODS
        .iter()
        .filter(|(_, affinities)| {
            affinities
                .iter()
                .any(|(m, strength)| m.eq_ignore_ascii_case(mood) && *strength >= min_strength)
        })
        .map(|(genre, _)| *genre)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_are_unit_interval() {
        for (_, affinities) in GENRE_MOODS.iter().chain(EMOTION_MOODS) {
            for (_, weight) in *affinities {
                assert!((0.0..=1.0).contains(weight));
            }
        }
    }

    #[test]
    fn test_mood_profile_takes_strongest_genre() {
        let profile = mood_profile(&["Action".to_string(), "Thriller".to_string()]);
        assert_eq!(profile["action"], 0.9);
        assert_eq!(profile["thriller"], 0.9);
        assert_eq!(profile["intense"], 0.8);
    }

    #[test]
    fn test_unknown_genre_contributes_nothing() {
        assert!(mood_profile(&["Mockumentary".to_string()]).is_empty());
        assert!(emotion_moods("ennui").is_empty());
    }

    #[test]
    fn test_genres_for_mood() {
        assert_eq!(genres_for_mood("action", 0.7), vec!["Action", "Western"]);
        assert_eq!(genres_for_mood("romance", 0.7), vec!["Romance"]);
        assert!(genres_for_mood("nonexistent", 0.7).is_empty());
    }
}
