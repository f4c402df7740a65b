//! String matching used to score items against a query.

use std::fmt;

use derive_builder::Builder;
use nucleo::{Config, Utf32Str, chars};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Characters that split strings into words, in addition to whitespace.
pub const DEFAULT_SEPARATORS: &str = "\\/-[](){}#!?<>\"'=+*.:,;_";

/// Matching options.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), default)]
#[serde(default)]
pub struct MatchConfig {
    /// Also accept query words whose characters appear in order within a
    /// candidate word.
    pub fuzzy: bool,

    pub ignore_case: bool,

    /// Query words may match candidate words in any order.
    pub ignore_word_order: bool,

    /// Fold accented latin letters to their base letter.
    pub ignore_diacritics: bool,

    /// Word separators besides whitespace.
    pub separators: String,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            fuzzy: false,
            ignore_case: true,
            ignore_word_order: true,
            ignore_diacritics: true,
            separators: DEFAULT_SEPARATORS.to_string(),
        }
    }
}

impl MatchConfig {
    pub fn builder() -> MatchConfigBuilder {
        MatchConfigBuilder::default()
    }

    fn nucleo_config(&self) -> Config {
        let mut config = Config::DEFAULT;
        config.ignore_case = self.ignore_case;
        config.normalize = self.ignore_diacritics;
        config
    }

    fn words<'a>(&self, s: &'a str) -> impl Iterator<Item = &'a str> {
        s.split(|c: char| c.is_whitespace() || self.separators.contains(c))
            .filter(|w| !w.is_empty())
    }

    /// Fold a query word the way nucleo folds haystacks.
    fn fold(&self, word: &str) -> String {
        word.chars()
            .map(|c| if self.ignore_diacritics { chars::normalize(c) } else { c })
            .map(|c| if self.ignore_case { chars::to_lower_case(c) } else { c })
            .collect()
    }
}

/// Outcome of matching a candidate string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    score: f64,
}

impl Match {
    const NONE: Match = Match { score: -1.0 };

    /// Matched share of the candidate, in `[0, 1]`; negative for no match.
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn is_match(&self) -> bool {
        self.score >= 0.0
    }

    /// Matched because the query was empty.
    pub fn is_empty_match(&self) -> bool {
        self.score == 0.0
    }

    pub fn is_exact_match(&self) -> bool {
        self.score == 1.0
    }
}

/// Matches candidate strings against a fixed query string.
///
/// Every query word must match a distinct candidate word. A word matches
/// when it is a prefix of the candidate word, or with `fuzzy` set, when its
/// characters appear in order within it.
pub struct Matcher {
    tokens: Vec<String>,
    config: MatchConfig,
    nucleo: Mutex<nucleo::Matcher>,
}

impl Matcher {
    pub fn new(query: &str, config: MatchConfig) -> Self {
        let tokens = config.words(query).map(|w| config.fold(w)).collect();
        Self {
            tokens,
            nucleo: Mutex::new(nucleo::Matcher::new(config.nucleo_config())),
            config,
        }
    }

    /// Match a single candidate.
    pub fn match_str(&self, candidate: &str) -> Match {
        if self.tokens.is_empty() {
            return Match { score: 0.0 };
        }

        let words: Vec<&str> = self.config.words(candidate).collect();
        let lengths: Vec<usize> = words.iter().map(|w| w.chars().count()).collect();
        let total: usize = lengths.iter().sum();
        if total == 0 {
            return Match::NONE;
        }

        let mut matcher = self.nucleo.lock();
        let mut used = vec![false; words.len()];
        let mut next = 0;
        let mut matched = 0;

        for token in &self.tokens {
            let range = if self.config.ignore_word_order {
                0..words.len()
            } else {
                next..words.len()
            };

            let Some(pos) = range
                .into_iter()
                .find(|&i| !used[i] && self.word_matches(&mut matcher, token, words[i]))
            else {
                return Match::NONE;
            };

            used[pos] = true;
            next = pos + 1;
            matched += token.chars().count().min(lengths[pos]);
        }

        Match {
            score: matched as f64 / total as f64,
        }
    }

    /// Best match over several candidates.
    pub fn match_any<S: AsRef<str>>(&self, candidates: &[S]) -> Match {
        candidates
            .iter()
            .map(|c| self.match_str(c.as_ref()))
            .fold(Match::NONE, |best, m| if m.score > best.score { m } else { best })
    }

    fn word_matches(&self, matcher: &mut nucleo::Matcher, token: &str, word: &str) -> bool {
        let mut haystack_buf = Vec::new();
        let mut needle_buf = Vec::new();
        let haystack = Utf32Str::new(word, &mut haystack_buf);
        let needle = Utf32Str::new(token, &mut needle_buf);

        if matcher.prefix_match(haystack, needle).is_some() {
            return true;
        }
        self.config.fuzzy && matcher.fuzzy_match(haystack, needle).is_some()
    }
}

impl Clone for Matcher {
    fn clone(&self) -> Self {
        Self {
            tokens: self.tokens.clone(),
            nucleo: Mutex::new(nucleo::Matcher::new(self.config.nucleo_config())),
            config: self.config.clone(),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("tokens", &self.tokens)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_match_scores_matched_share() {
        let matcher = Matcher::new("fire", MatchConfig::default());
        let m = matcher.match_str("Firefox");
        assert!(m.is_match());
        assert!((m.score() - 4.0 / 7.0).abs() < 1e-9);

        assert!(matcher.match_str("firefox").score() > matcher.match_str("firefox web").score());
        assert!(!matcher.match_str("chromium").is_match());
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let matcher = Matcher::new("  ", MatchConfig::default());
        let m = matcher.match_str("anything");
        assert!(m.is_match());
        assert!(m.is_empty_match());
    }

    #[test]
    fn test_word_order() {
        let query = "browser web";
        let any_order = Matcher::new(query, MatchConfig::default());
        assert!(any_order.match_str("web browser").is_match());

        let config = MatchConfig::builder().ignore_word_order(false).build().unwrap();
        let ordered = Matcher::new(query, config);
        assert!(!ordered.match_str("web browser").is_match());
        assert!(ordered.match_str("browser for the web").is_match());
    }

    #[test]
    fn test_fuzzy_and_diacritics() {
        let strict = Matcher::new("frfx", MatchConfig::default());
        assert!(!strict.match_str("firefox").is_match());

        let config = MatchConfig::builder().fuzzy(true).build().unwrap();
        let fuzzy = Matcher::new("frfx", config);
        assert!(fuzzy.match_str("firefox").is_match());
        assert!(!fuzzy.match_str("chromium").is_match());

        let m = Matcher::new("cafe", MatchConfig::default()).match_str("Café");
        assert!(m.is_exact_match());

        let config = MatchConfig::builder().ignore_diacritics(false).build().unwrap();
        assert!(!Matcher::new("cafe", config).match_str("Café").is_match());
    }

    #[test]
    fn test_case_sensitivity() {
        let config = MatchConfig::builder().ignore_case(false).build().unwrap();
        let matcher = Matcher::new("Fire", config);
        assert!(matcher.match_str("Firefox").is_match());
        assert!(!matcher.match_str("firefox").is_match());

        let m = Matcher::new("FIRE", MatchConfig::default()).match_str("firefox");
        assert!(m.is_match());
    }

    #[test]
    fn test_separators_split_words() {
        let matcher = Matcher::new("fox", MatchConfig::default());
        assert!(matcher.match_str("mozilla-firefox_fox").is_match());
        assert!(!matcher.match_str("firefox").is_match());

        let clone = matcher.clone();
        assert_eq!(clone.match_str("fox"), matcher.match_str("fox"));
    }

    #[test]
    fn test_match_any_picks_best() {
        let matcher = Matcher::new("term", MatchConfig::default());
        let m = matcher.match_any(&["gnome terminal", "term"]);
        assert!(m.is_exact_match());
        assert!(!matcher.match_any::<&str>(&[]).is_match());
    }
}
