use regex::Regex;
use std::{collections::HashSet, sync::LazyLock};

use crate::models::{Era, SearchCriteria};

static MINUTES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\d.])(\d{1,3})\s*(?:minutes?|mins?|分)").unwrap());
static HOURS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\d.])(\d{1,2}(?:\.\d+)?)\s*(?:hours?|hrs?|時間)").unwrap());
static DECADE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b((?:19|20)\d0)'?s\b|(\d{4})年代").unwrap());
static SHORT_DECADE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\d])'?(\d0)'?s\b|(?:^|[^\d])(\d0)年代").unwrap());
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\d])(19\d{2}|20[0-3]\d)(?:[^\d]|$)").unwrap());

/// Keyword → canonical catalog genre
const GENRE_KEYWORDS: &[(&str, &str)] = &[
    ("action", "Action"),
    ("アクション", "Action"),
    ("adventure", "Adventure"),
    ("冒険", "Adventure"),
    ("animation", "Animation"),
    ("animated", "Animation"),
    ("anime", "Animation"),
    ("アニメ", "Animation"),
    ("comedy", "Comedy"),
    ("comedies", "Comedy"),
    ("コメディ", "Comedy"),
    ("crime", "Crime"),
    ("犯罪", "Crime"),
    ("documentary", "Documentary"),
    ("ドキュメンタリー", "Documentary"),
    ("drama", "Drama"),
    ("ドラマ", "Drama"),
    ("family", "Family"),
    ("ファミリー", "Family"),
    ("fantasy", "Fantasy"),
    ("ファンタジー", "Fantasy"),
    ("historical", "History"),
    ("history", "History"),
    ("歴史", "History"),
    ("horror", "Horror"),
    ("ホラー", "Horror"),
    ("musical", "Music"),
    ("音楽", "Music"),
    ("mystery", "Mystery"),
    ("ミステリー", "Mystery"),
    ("推理", "Mystery"),
    ("romance", "Romance"),
    ("romantic", "Romance"),
    ("rom-com", "Romance"),
    ("ロマンス", "Romance"),
    ("恋愛", "Romance"),
    ("sci-fi", "Science Fiction"),
    ("scifi", "Science Fiction"),
    ("science fiction", "Science Fiction"),
    ("sf", "Science Fiction"),
    ("thriller", "Thriller"),
    ("suspense", "Thriller"),
    ("スリラー", "Thriller"),
    ("サスペンス", "Thriller"),
    ("war", "War"),
    ("戦争", "War"),
    ("western", "Western"),
    ("西部劇", "Western"),
];

/// Language word → ISO-639-1 code
const LANGUAGE_KEYWORDS: &[(&str, &str)] = &[
    ("japanese", "ja"),
    ("日本", "ja"),
    ("邦画", "ja"),
    ("english", "en"),
    ("french", "fr"),
    ("フランス", "fr"),
    ("korean", "ko"),
    ("韓国", "ko"),
    ("chinese", "zh"),
    ("mandarin", "zh"),
    ("中国", "zh"),
    ("spanish", "es"),
    ("italian", "it"),
    ("german", "de"),
    ("hindi", "hi"),
    ("bollywood", "hi"),
];

/// Tone word → mood label from the scoring tables
const TONE_KEYWORDS: &[(&str, &str)] = &[
    ("dark", "intense"),
    ("gritty", "intense"),
    ("funny", "comedy"),
    ("hilarious", "comedy"),
    ("笑える", "comedy"),
    ("heartwarming", "heartwarming"),
    ("wholesome", "heartwarming"),
    ("心温まる", "heartwarming"),
    ("scary", "scary"),
    ("creepy", "scary"),
    ("怖い", "scary"),
    ("uplifting", "uplifting"),
    ("inspiring", "uplifting"),
    ("sad", "emotional"),
    ("tearjerker", "emotional"),
    ("泣ける", "emotional"),
    ("relaxing", "calming"),
    ("calm", "calming"),
    ("chill", "calming"),
    ("exciting", "energetic"),
    ("thrilling", "energetic"),
    ("feel-good", "feel-good"),
    ("feelgood", "feel-good"),
    ("thoughtful", "thoughtful"),
    ("cerebral", "thoughtful"),
    ("tense", "thriller"),
    ("suspenseful", "thriller"),
    ("magical", "magical"),
    ("nostalgic", "nostalgic"),
];

const STOPWORDS: &[&str] = &[
    "about", "after", "around", "best", "could", "film", "films", "find", "from", "give", "good",
    "great", "have", "hour", "hours", "into", "just", "like", "long", "looking", "made", "minute",
    "minutes", "mins", "more", "movie", "movies", "much", "need", "please", "really", "recommend",
    "show", "some", "something", "that", "their", "them", "there", "these", "they", "this",
    "tonight", "want", "watch", "what", "when", "where", "which", "with", "would",
];

struct Text {
    lower: String,
    tokens: Vec<String>,
}

impl Text {
    fn new(text: &str) -> Self {
        let lower = text.to_lowercase();
        let tokens = lower
            .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\''))
            .map(|token| token.trim_matches(|c| c == '-' || c == '\''))
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect();
        Self { lower, tokens }
    }

    /// Whole-word match for single ASCII words, substring match otherwise
    fn mentions(&self, keyword: &str) -> bool {
        if keyword.is_ascii() && !keyword.contains(' ') {
            self.tokens.iter().any(|token| token == keyword)
        } else {
            self.lower.contains(keyword)
        }
    }
}

/// Extracts structured search criteria from free text.
///
/// Deterministic and table-driven. Anything not recognised as a criterion
/// and long enough to be meaningful is kept as a keyword for the catalog
/// text query.
pub fn parse_criteria(text: &str) -> SearchCriteria {
    let text = Text::new(text);
    let mut consumed: HashSet<&str> = HashSet::new();

    let runtime_target = parse_runtime(&text.lower);
    let era = parse_era(&text.lower);

    let mut genres: Vec<String> = Vec::new();
    for (keyword, genre) in GENRE_KEYWORDS {
        if text.mentions(keyword) {
            consumed.insert(*keyword);
            if !genres.iter().any(|g| g == genre) {
                genres.push(genre.to_string());
            }
        }
    }

    let mut language = None;
    for (keyword, code) in LANGUAGE_KEYWORDS {
        if text.mentions(keyword) {
            consumed.insert(*keyword);
            language.get_or_insert_with(|| code.to_string());
        }
    }

    let mut tones: Vec<String> = Vec::new();
    for (keyword, mood) in TONE_KEYWORDS {
        if text.mentions(keyword) {
            consumed.insert(*keyword);
            if !tones.iter().any(|t| t == mood) {
                tones.push(mood.to_string());
            }
        }
    }

    let mut keywords: Vec<String> = Vec::new();
    for token in &text.tokens {
        let is_candidate = token.chars().count() > 3
            && token.chars().all(char::is_alphabetic)
            && !STOPWORDS.contains(&token.as_str())
            && !consumed.iter().any(|keyword| token.contains(*keyword));
        if is_candidate && !keywords.contains(token) {
            keywords.push(token.clone());
        }
    }

    SearchCriteria {
        runtime_target,
        era,
        genres,
        language,
        tones,
        keywords,
    }
}

fn parse_runtime(lower: &str) -> Option<u32> {
    if let Some(minutes) = MINUTES_RE
        .captures(lower)
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .filter(|minutes| *minutes > 0)
    {
        return Some(minutes);
    }

    HOURS_RE
        .captures(lower)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .filter(|hours| *hours > 0.0)
        .map(|hours| (hours * 60.0).round() as u32)
}

fn parse_era(lower: &str) -> Option<Era> {
    if let Some(caps) = DECADE_RE.captures(lower) {
        let decade = caps.get(1).or_else(|| caps.get(2))?.as_str().parse::<i32>().ok()?;
        return Some(Era::Decade(decade - decade % 10));
    }

    if let Some(caps) = SHORT_DECADE_RE.captures(lower) {
        let short = caps.get(1).or_else(|| caps.get(2))?.as_str().parse::<i32>().ok()?;
        let century = if short >= 30 { 1900 } else { 2000 };
        return Some(Era::Decade(century + short));
    }

    YEAR_RE
        .captures(lower)
        .and_then(|caps| caps[1].parse::<i32>().ok())
        .map(Era::Year)
}
