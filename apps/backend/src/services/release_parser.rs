//! Release title parser: extracts resolution and languages from a raw
//! release title and scores it for ranking.
//!
//! Pure function, no I/O, idempotent — mirrors the shape of the indexer
//! subsystem's original release-name parser but generalized to the
//! resolution ladder and language lexicon the catalog adapter needs.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

/// Resolution ladder, best first. Index doubles as the quality rank.
pub const RESOLUTION_LADDER: &[&str] = &[
    "4320p", "2160p", "1440p", "1080p", "720p", "576p", "540p", "480p", "360p", "240p", "unknown",
];

lazy_static! {
    static ref NUMERIC_RES_RE: Regex =
        Regex::new(r"(?i)\b(4320|2160|1440|1080|720|576|540|480|360|240)p\b").unwrap();
    static ref WORD_RE: Regex = Regex::new(r"[A-Za-z0-9']+").unwrap();
    static ref LANGUAGE_LEXICON: Vec<(&'static str, Vec<&'static str>)> = build_language_lexicon();
}

fn resolution_alias(token: &str) -> Option<&'static str> {
    match token.to_lowercase().as_str() {
        "4k" => Some("2160p"),
        "8k" => Some("4320p"),
        "uhd" => Some("2160p"),
        "fullhd" | "full-hd" | "full_hd" => Some("1080p"),
        "hd" => Some("720p"),
        "sd" => Some("480p"),
        _ => None,
    }
}

/// Rank of a resolution label within [`RESOLUTION_LADDER`]; higher is
/// better quality. `unknown` always scores 0.
pub fn quality_score(resolution: &str) -> u32 {
    let idx = RESOLUTION_LADDER
        .iter()
        .position(|r| *r == resolution)
        .unwrap_or(RESOLUTION_LADDER.len() - 1);
    (RESOLUTION_LADDER.len() - 1 - idx) as u32
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParsedTitle {
    pub resolution: String,
    pub languages: Vec<String>,
    pub quality_score: u32,
}

/// Extracts `{resolution, languages[], qualityScore}` from a release title.
///
/// Resolution precedence: numeric pattern (`2160p`) → alias token (`4k`,
/// `uhd`, `fullhd`, `sd`) → `unknown`.
pub fn parse_title(title: &str) -> ParsedTitle {
    let resolution = detect_resolution(title);
    let languages = detect_languages(title);
    let quality_score = quality_score(&resolution);
    ParsedTitle {
        resolution,
        languages,
        quality_score,
    }
}

fn detect_resolution(title: &str) -> String {
    if let Some(caps) = NUMERIC_RES_RE.captures(title) {
        return format!("{}p", &caps[1]);
    }
    for word in WORD_RE.find_iter(title) {
        if let Some(alias) = resolution_alias(word.as_str()) {
            return alias.to_string();
        }
    }
    "unknown".to_string()
}

/// Whole-word, case-insensitive, punctuation-normalized match against a
/// fixed ~45-language synonym lexicon. Multiple languages may match.
fn detect_languages(title: &str) -> Vec<String> {
    let tokens: std::collections::HashSet<String> = WORD_RE
        .find_iter(title)
        .map(|m| m.as_str().to_lowercase())
        .collect();

    let mut matched = Vec::new();
    for (canonical, synonyms) in LANGUAGE_LEXICON.iter() {
        if synonyms.iter().any(|syn| tokens.contains(*syn)) {
            matched.push((*canonical).to_string());
        }
    }
    matched
}

fn build_language_lexicon() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        ("English", vec!["english", "eng"]),
        ("French", vec!["french", "fra", "francais", "vf", "vff", "truefrench"]),
        ("German", vec!["german", "deu", "ger", "deutsch"]),
        ("Spanish", vec!["spanish", "esp", "castellano", "espanol"]),
        ("Italian", vec!["italian", "ita"]),
        ("Portuguese", vec!["portuguese", "por", "pt"]),
        ("Brazilian Portuguese", vec!["pt-br", "ptbr", "brazilian"]),
        ("Dutch", vec!["dutch", "nld", "nl"]),
        ("Russian", vec!["russian", "rus"]),
        ("Polish", vec!["polish", "pol", "pl"]),
        ("Swedish", vec!["swedish", "swe", "sv"]),
        ("Norwegian", vec!["norwegian", "nor", "no"]),
        ("Danish", vec!["danish", "dan", "dk"]),
        ("Finnish", vec!["finnish", "fin", "fi"]),
        ("Greek", vec!["greek", "gre", "ell"]),
        ("Turkish", vec!["turkish", "tur", "tr"]),
        ("Hungarian", vec!["hungarian", "hun", "hu"]),
        ("Czech", vec!["czech", "cze", "ces"]),
        ("Slovak", vec!["slovak", "slk", "svk"]),
        ("Romanian", vec!["romanian", "ron", "rum"]),
        ("Bulgarian", vec!["bulgarian", "bul"]),
        ("Ukrainian", vec!["ukrainian", "ukr"]),
        ("Croatian", vec!["croatian", "hrv", "cro"]),
        ("Serbian", vec!["serbian", "srp", "srb"]),
        ("Arabic", vec!["arabic", "ara"]),
        ("Hebrew", vec!["hebrew", "heb"]),
        ("Hindi", vec!["hindi", "hin"]),
        ("Tamil", vec!["tamil", "tam"]),
        ("Telugu", vec!["telugu", "tel"]),
        ("Malayalam", vec!["malayalam", "mal"]),
        ("Bengali", vec!["bengali", "ben"]),
        ("Punjabi", vec!["punjabi", "pan"]),
        ("Urdu", vec!["urdu", "urd"]),
        ("Thai", vec!["thai", "tha"]),
        ("Vietnamese", vec!["vietnamese", "vie"]),
        ("Indonesian", vec!["indonesian", "ind", "bahasa"]),
        ("Malay", vec!["malay", "msa", "zsm"]),
        ("Filipino", vec!["filipino", "tagalog", "fil"]),
        ("Japanese", vec!["japanese", "jpn", "jap"]),
        ("Korean", vec!["korean", "kor"]),
        ("Mandarin", vec!["mandarin", "chi", "zho", "chinese"]),
        ("Cantonese", vec!["cantonese", "yue"]),
        ("Persian", vec!["persian", "farsi", "fas"]),
        ("Swahili", vec!["swahili", "swa"]),
        ("Afrikaans", vec!["afrikaans", "afr"]),
        ("Icelandic", vec!["icelandic", "isl", "ice"]),
        ("Latvian", vec!["latvian", "lav"]),
        ("Lithuanian", vec!["lithuanian", "lit"]),
        ("Estonian", vec!["estonian", "est"]),
        ("Multi", vec!["multi", "multilang", "multisubs"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_label_closure() {
        for title in [
            "Movie.2024.1080p.BluRay",
            "Movie.2024.4k.WEB",
            "Movie.2024.UHD.WEB",
            "Movie.2024",
        ] {
            let parsed = parse_title(title);
            assert!(RESOLUTION_LADDER.contains(&parsed.resolution.as_str()));
        }
    }

    #[test]
    fn detects_numeric_resolution() {
        assert_eq!(parse_title("Show.S01E01.2160p.WEB").resolution, "2160p");
        assert_eq!(parse_title("Show.S01E01.720p.WEB").resolution, "720p");
    }

    #[test]
    fn resolves_alias_tokens() {
        assert_eq!(parse_title("Movie.2024.4K.WEB").resolution, "2160p");
        assert_eq!(parse_title("Movie.2024.UHD.WEB").resolution, "2160p");
        assert_eq!(parse_title("Movie.2024.FullHD.WEB").resolution, "1080p");
        assert_eq!(parse_title("Movie.2024.SD.WEB").resolution, "480p");
    }

    #[test]
    fn unknown_when_no_resolution_signal() {
        assert_eq!(parse_title("Movie.2024.WEB-DL").resolution, "unknown");
    }

    #[test]
    fn quality_score_monotonicity() {
        assert!(quality_score("2160p") > quality_score("1080p"));
        assert!(quality_score("1080p") > quality_score("720p"));
        assert_eq!(quality_score("unknown"), 0);
    }

    #[test]
    fn detects_single_and_multiple_languages() {
        let parsed = parse_title("Movie.2023.1080p.Tamil.WEB");
        assert_eq!(parsed.languages, vec!["Tamil".to_string()]);

        let parsed = parse_title("Movie.2023.1080p.French.English.WEB");
        let mut langs = parsed.languages.clone();
        langs.sort();
        assert_eq!(langs, vec!["English".to_string(), "French".to_string()]);
    }

    #[test]
    fn language_match_is_whole_word() {
        // "engine" must not match "eng"
        let parsed = parse_title("Engine.Room.2023.1080p.WEB");
        assert!(!parsed.languages.contains(&"English".to_string()));
    }
}
