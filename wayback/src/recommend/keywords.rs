//! Keyword extraction from video titles.
//!
//! The keywords decide which candidates count as part of the same "series" as
//! the video being watched: episode numbers, genre words, bracketed subtitles,
//! and capitalized names.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Genre and format words looked for anywhere in a title (lowercase).
const GENRE_VOCABULARY: &[&str] = &[
    "minecraft",
    "ftb",
    "feed the beast",
    "tekkit",
    "technic",
    "hexxit",
    "modded",
    "vanilla",
    "survival",
    "hardcore",
    "skyblock",
    "let's play",
    "lets play",
    "let's build",
    "walkthrough",
    "playthrough",
    "gameplay",
    "tutorial",
    "speedrun",
    "mod spotlight",
    "mod showcase",
    "redstone",
    "pvp",
    "hunger games",
    "adventure map",
    "parkour",
    "texture pack",
    "snapshot",
    "review",
    "unboxing",
    "vlog",
    "trailer",
    "music video",
    "cover",
    "remix",
    "parody",
    "animation",
    "podcast",
    "highlights",
    "challenge",
    "reaction",
    "prank",
    "sketch",
    "documentary",
    "season",
    "finale",
    "live stream",
    "compilation",
    "montage",
    "funny moments",
];

/// Capitalized words that never take part in a name-like phrase.
const PHRASE_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "the", "of", "in", "on", "at", "to", "for", "with", "vs", "is", "my",
    "episode", "ep", "part", "pt", "season", "new", "official", "hd", "hq",
];

static EPISODE_MARKED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\b(?:episode|ep|part|pt)\.?\s*|#\s*)(\d{1,4})\b").expect("valid regex")
});

static BARE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,3})\b").expect("valid regex"));

static ENCLOSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]+)"|“([^”]+)”|\[([^\]]+)\]|\(([^)]+)\)|\{([^}]+)\}"#)
        .expect("valid regex")
});

/// Ordered set of keywords, compared case-insensitively.
#[derive(Default)]
struct KeywordSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl KeywordSet {
    fn push(&mut self, keyword: impl Into<String>) {
        let keyword = keyword.into();
        if self.seen.insert(keyword.to_lowercase()) {
            self.ordered.push(keyword);
        }
    }
}

/// Extracts series keywords from `title`, first-seen order, without duplicates.
///
/// ```
/// let keywords = wayback_tube::recommend::extract_keywords("Tekkit Survival Part 3");
/// assert!(keywords.contains(&"ep 3".to_string()));
/// assert!(keywords.contains(&"tekkit".to_string()));
/// ```
pub fn extract_keywords(title: &str) -> Vec<String> {
    let mut keywords = KeywordSet::default();

    for number in episode_numbers(title) {
        keywords.push(format!("episode {number}"));
        keywords.push(format!("ep {number}"));
        keywords.push(format!("part {number}"));
        keywords.push(format!("#{number}"));
    }

    let lowered = title.to_lowercase();
    let flattened = lowered.replace(['\'', '’'], "");
    for &word in GENRE_VOCABULARY {
        if lowered.contains(word) || flattened.contains(word) {
            keywords.push(word);
        }
    }

    for captures in ENCLOSED.captures_iter(title) {
        if let Some(inner) = captures.iter().skip(1).flatten().next() {
            let inner = inner.as_str().trim();
            if inner.chars().count() > 2 {
                keywords.push(inner);
            }
        }
    }

    for phrase in capitalized_phrases(title) {
        keywords.push(phrase);
    }

    keywords.ordered
}

/// Whether `title` contains any of `keywords`, ignoring case.
pub fn matches_any(title: &str, keywords: &[String]) -> bool {
    let title = title.to_lowercase();
    keywords.iter().any(|k| title.contains(&k.to_lowercase()))
}

fn episode_numbers(title: &str) -> Vec<u32> {
    let mut numbers = Vec::new();
    let marked = EPISODE_MARKED.captures_iter(title);
    let bare = BARE_NUMBER.captures_iter(title);
    for captures in marked.chain(bare) {
        if let Some(number) = captures.get(1).and_then(|m| m.as_str().parse().ok())
            && !numbers.contains(&number)
        {
            numbers.push(number);
        }
    }
    numbers
}

fn capitalized_phrases(title: &str) -> Vec<String> {
    fn flush(run: &mut Vec<String>, phrases: &mut Vec<String>) {
        if run.len() >= 2 {
            phrases.push(run.join(" "));
        }
        run.clear();
    }

    let mut phrases = Vec::new();
    let mut run = Vec::new();
    for raw in title.split_whitespace() {
        if raw.starts_with(['(', '[', '{', '"', '“']) {
            flush(&mut run, &mut phrases);
        }

        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        let capitalized = word.chars().next().is_some_and(char::is_uppercase);
        if !capitalized || PHRASE_STOP_WORDS.contains(&word.to_lowercase().as_str()) {
            flush(&mut run, &mut phrases);
            continue;
        }
        run.push(word.to_string());

        if raw.ends_with([')', ']', '}', '"', '”', ':', '|', ',', ';', '!', '?', '.', '-']) {
            flush(&mut run, &mut phrases);
        }
    }
    flush(&mut run, &mut phrases);
    phrases
}
