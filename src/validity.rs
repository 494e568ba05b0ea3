//! Lyrics validity filter.
//!
//! Providers sometimes answer a lyrics search with liner notes, scripture
//! excerpts or track listings. [`ValidityFilter::check`] rejects those and
//! text in the wrong language; [`clean`] strips section markers before the
//! text is stored.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::language::{LanguageDetector, LanguageError};

/// Texts longer than this (in characters) are never lyrics.
pub const MAX_LYRICS_CHARS: usize = 6400;

/// Lines needed for an early decision in [`looks_like_enumeration`].
const LINE_THRESHOLD: usize = 10;

/// Bracketed section markers: [Chorus], [Verse 2: Artist], ...
static SECTION_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]\n]*\]").unwrap());

static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Book names a scripture citation can start with.
const SCRIPTURE_BOOKS: &[&str] = &[
    "Genesis", "Exodus", "Leviticus", "Numbers", "Deuteronomy", "Joshua", "Judges", "Ruth",
    "Samuel", "Kings", "Chronicles", "Ezra", "Nehemiah", "Esther", "Job", "Psalms?", "Proverbs",
    "Ecclesiastes", "Isaiah", "Jeremiah", "Lamentations", "Ezekiel", "Daniel", "Hosea", "Joel",
    "Amos", "Obadiah", "Jonah", "Micah", "Nahum", "Habakkuk", "Zephaniah", "Haggai", "Zechariah",
    "Malachi", "Matthew", "Mark", "Luke", "John", "Acts", "Romans", "Corinthians", "Galatians",
    "Ephesians", "Philippians", "Colossians", "Thessalonians", "Timothy", "Titus", "Philemon",
    "Hebrews", "James", "Peter", "Jude", "Revelation",
];

/// Scripture citations such as "John 3:16" or "1 Corinthians 13:4-7".
/// Only book names count, so "Sunday 7:45" is a time of day.
static SCRIPTURE_CITATION: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        r"\b(?:[1-3] ?)?(?:{}) \d{{1,3}}:\d{{1,3}}(?:-\d{{1,3}})?\b",
        SCRIPTURE_BOOKS.join("|")
    );
    Regex::new(&pattern).unwrap()
});

/// Case-insensitive phrases that only appear on non-lyric pages.
const NON_LYRIC_PHRASES: &[&str] = &["tracklist", "track list", "liner notes"];

/// Why a text was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidReason {
    #[error("empty text")]
    Empty,
    #[error("language undetectable: {0}")]
    Undetectable(#[from] LanguageError),
    #[error("language is '{0}'")]
    Language(String),
    #[error("looks like a listing, not lyrics")]
    Enumeration,
}

fn has_dash_separator(line: &str) -> bool {
    line.contains('-') || line.contains('\u{2013}')
}

fn has_non_lyric_marker(line: &str) -> bool {
    if SCRIPTURE_CITATION.is_match(line) {
        return true;
    }
    let lower = line.to_lowercase();
    NON_LYRIC_PHRASES.iter().any(|p| lower.contains(p))
}

/// Whether `text` looks like a listing (track list, liner notes, scripture)
/// rather than lyrics.
///
/// Non-blank lines are scanned in order. A line with a non-lyric marker
/// rejects at once; a line with a dash separator (`-`, `–`, `--`) counts as
/// invalid, any other line as valid. Ten valid lines accept, ten invalid
/// lines reject, whichever comes first. Running out of lines accepts.
pub fn looks_like_enumeration(text: &str) -> bool {
    if text.chars().count() > MAX_LYRICS_CHARS {
        return true;
    }

    let mut valid = 0;
    let mut invalid = 0;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if has_non_lyric_marker(line) {
            return true;
        }
        if has_dash_separator(line) {
            invalid += 1;
            if invalid >= LINE_THRESHOLD {
                return true;
            }
        } else {
            valid += 1;
            if valid >= LINE_THRESHOLD {
                return false;
            }
        }
    }
    false
}

/// Strip section markers and collapse the blank runs they leave behind.
/// Idempotent: `clean(clean(x)) == clean(x)`.
pub fn clean(text: &str) -> String {
    let stripped = SECTION_MARKER.replace_all(text, "");
    let collapsed = BLANK_RUN.replace_all(&stripped, "\n\n");
    collapsed.trim().to_string()
}

/// Validity filter bound to a detector and a target language.
pub struct ValidityFilter<'a> {
    detector: &'a dyn LanguageDetector,
    target_language: String,
}

impl<'a> ValidityFilter<'a> {
    pub fn new(detector: &'a dyn LanguageDetector, target_language: impl Into<String>) -> Self {
        Self {
            detector,
            target_language: target_language.into(),
        }
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    /// Check emptiness, then language, then the enumeration heuristic.
    pub fn check(&self, text: &str) -> Result<(), InvalidReason> {
        if text.trim().is_empty() {
            return Err(InvalidReason::Empty);
        }
        let language = self.detector.detect(text)?;
        if language != self.target_language {
            return Err(InvalidReason::Language(language));
        }
        if looks_like_enumeration(text) {
            return Err(InvalidReason::Enumeration);
        }
        Ok(())
    }

    pub fn is_valid(&self, text: &str) -> bool {
        self.check(text).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDetector(Result<&'static str, LanguageError>);

    impl LanguageDetector for FixedDetector {
        fn detect(&self, _text: &str) -> Result<String, LanguageError> {
            match &self.0 {
                Ok(code) => Ok(code.to_string()),
                Err(LanguageError::TooShort { letters }) => Err(LanguageError::TooShort { letters: *letters }),
                Err(LanguageError::Undetectable) => Err(LanguageError::Undetectable),
            }
        }
    }

    fn lines(line: &str, n: usize) -> String {
        vec![line; n].join("\n")
    }

    #[test]
    fn test_clean_strips_section_markers() {
        let raw = "[Intro]\nHello\n\n[Chorus]\n\n\nLa la la [x2]\n[Outro]";
        assert_eq!(clean(raw), "Hello\n\nLa la la");
    }

    #[test]
    fn test_clean_is_idempotent() {
        let samples = [
            "",
            "plain text",
            "[Verse 1]\nline\n\n\n\n[Chorus]\nline",
            "[[nested]] ] [ open",
            "  [a]\n\n\n[b]\n\n\n  text  \n",
            "[x[y]]z",
            "[unclosed\n[closed] tail",
        ];
        for s in samples {
            let once = clean(s);
            assert_eq!(clean(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn test_ten_valid_lines_accept_before_dashes() {
        let text = format!("{}\n{}", lines("I walk alone", 10), lines("Track 1 - Intro", 20));
        assert!(!looks_like_enumeration(&text));
    }

    #[test]
    fn test_ten_dash_lines_reject() {
        let text = format!("{}\n{}", lines("Track - Name", 10), lines("I walk alone", 20));
        assert!(looks_like_enumeration(&text));
    }

    #[test]
    fn test_en_dash_and_double_hyphen_count_as_invalid() {
        let mut text = lines("Side A \u{2013} Song", 5);
        text.push('\n');
        text.push_str(&lines("Side B -- Song", 5));
        assert!(looks_like_enumeration(&text));
    }

    #[test]
    fn test_counts_are_independent_of_interleaving() {
        // 9 dash lines then 10 plain lines: valid reaches ten first
        let text = format!("{}\n{}", lines("a - b", 9), lines("plain line", 10));
        assert!(!looks_like_enumeration(&text));
    }

    #[test]
    fn test_short_text_defaults_to_accept() {
        assert!(!looks_like_enumeration("one - two\nthree - four\nfive"));
        assert!(!looks_like_enumeration(""));
    }

    #[test]
    fn test_markers_reject_immediately() {
        assert!(looks_like_enumeration("In the beginning\nJohn 3:16\nmore"));
        assert!(looks_like_enumeration("Official Tracklist\nOne\nTwo"));
        assert!(looks_like_enumeration("Liner Notes by someone"));
    }

    #[test]
    fn test_scripture_citations_need_a_book_name() {
        assert!(looks_like_enumeration("1 Corinthians 13:4-7\nLove is patient"));
        assert!(looks_like_enumeration("Psalm 23:1"));
        assert!(looks_like_enumeration("2Kings 2:11"));

        let lyric = "I wake up early on a Sunday\nSunday 7:45 and the coffee's cold\nI keep on walking down the road";
        assert!(!looks_like_enumeration(lyric));
        assert!(!looks_like_enumeration("Friday 9:30, I'm out the door\nMeet me at Midnight 12:00"));
    }

    #[test]
    fn test_size_ceiling() {
        let text = "a".repeat(MAX_LYRICS_CHARS + 1);
        assert!(looks_like_enumeration(&text));
        assert!(!looks_like_enumeration(&"a".repeat(MAX_LYRICS_CHARS)));
    }

    #[test]
    fn test_check_order_and_reasons() {
        let en = FixedDetector(Ok("en"));
        let filter = ValidityFilter::new(&en, "en");
        assert_eq!(filter.check("   \n"), Err(InvalidReason::Empty));
        assert!(filter.is_valid("some lyrics here"));
        assert_eq!(filter.check(&lines("x - y", 10)), Err(InvalidReason::Enumeration));

        let es = FixedDetector(Ok("es"));
        let filter = ValidityFilter::new(&es, "en");
        assert_eq!(filter.check("hola"), Err(InvalidReason::Language("es".to_string())));

        let none = FixedDetector(Err(LanguageError::Undetectable));
        let filter = ValidityFilter::new(&none, "en");
        assert_eq!(
            filter.check("???"),
            Err(InvalidReason::Undetectable(LanguageError::Undetectable))
        );
    }
}
