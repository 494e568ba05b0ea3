//! Language detection for fetched lyrics.
//!
//! [`LanguageDetector`] is the seam the validity filter depends on. The
//! built-in [`StopwordDetector`] classifies non-Latin scripts by Unicode
//! block and Latin-script text by stopword hits.

use once_cell::sync::Lazy;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LanguageError {
    #[error("text has only {letters} letters, too short to detect a language")]
    TooShort { letters: usize },
    #[error("no language could be detected")]
    Undetectable,
}

/// Detects the language of a text as an ISO 639-1 code ("en", "es", ...).
pub trait LanguageDetector {
    fn detect(&self, text: &str) -> Result<String, LanguageError>;
}

// ============================================================================
// SCRIPTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Script {
    Latin,
    Kana,
    Hangul,
    Han,
    Cyrillic,
    Arabic,
    Devanagari,
    Greek,
    Hebrew,
    Thai,
    Other,
}

fn script_of(c: char) -> Script {
    match c as u32 {
        0x41..=0x5A | 0x61..=0x7A | 0xC0..=0x24F => Script::Latin,
        0x3040..=0x30FF => Script::Kana,
        0xAC00..=0xD7AF | 0x1100..=0x11FF => Script::Hangul,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF => Script::Han,
        0x400..=0x4FF => Script::Cyrillic,
        0x600..=0x6FF => Script::Arabic,
        0x900..=0x97F => Script::Devanagari,
        0x370..=0x3FF => Script::Greek,
        0x590..=0x5FF => Script::Hebrew,
        0xE00..=0xE7F => Script::Thai,
        _ => Script::Other,
    }
}

/// Language code for a dominant non-Latin script. Japanese mixes kana with
/// Han, so any meaningful kana share means "ja".
fn script_language(counts: &FxHashMap<Script, usize>, letters: usize) -> Option<&'static str> {
    let kana = counts.get(&Script::Kana).copied().unwrap_or(0);
    let han = counts.get(&Script::Han).copied().unwrap_or(0);
    if kana >= 10 && (kana + han) * 2 > letters {
        return Some("ja");
    }
    let (script, count) = counts
        .iter()
        .filter(|(s, _)| !matches!(s, Script::Latin | Script::Other))
        .max_by_key(|(_, c)| **c)?;
    if count * 2 <= letters {
        return None;
    }
    match script {
        Script::Kana => Some("ja"),
        Script::Hangul => Some("ko"),
        Script::Han => Some("zh"),
        Script::Cyrillic => Some("ru"),
        Script::Arabic => Some("ar"),
        Script::Devanagari => Some("hi"),
        Script::Greek => Some("el"),
        Script::Hebrew => Some("he"),
        Script::Thai => Some("th"),
        Script::Latin | Script::Other => None,
    }
}

// ============================================================================
// STOPWORDS
// ============================================================================

/// Stopword sets in tie-break order (earlier wins on equal hits).
static STOPWORDS: Lazy<Vec<(&'static str, FxHashSet<&'static str>)>> = Lazy::new(|| {
    let table: [(&str, &str); 8] = [
        ("en", "the and you that with this what your for are have not but it's i'm don't can't was when all know just like my me she he they will be is of to in it on we do so oh never"),
        ("es", "el la los las que de y en un una por con para mi tu yo no es me te se lo como pero mas amor corazon quiero esta todo"),
        ("pt", "o os as que de e em um uma nao voce eu meu minha com para por se mais coracao ja tudo esta sou"),
        ("fr", "le la les et de des un une je tu il elle nous vous est pas que qui dans pour avec mon ma mes c'est j'ai moi toi"),
        ("de", "der die das und ich du nicht ist ein eine mit mich dich auf fur wir sie es zu den dem mein dein noch auch"),
        ("it", "il lo la che di e non un una per con mi ti io tu sono come ma piu cuore amore sei nel"),
        ("nl", "de het een en ik je niet is dat van met op mijn jij wij zijn maar ook voor naar"),
        ("sv", "och jag det att en som inte du har med min mig dig var for pa ar"),
    ];
    table
        .iter()
        .map(|(code, words)| (*code, words.split_whitespace().collect()))
        .collect()
});

/// Check if a character is a Unicode combining mark (diacritical mark).
fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Lowercased, diacritic-free word tokens ("Corazón" -> "corazon").
fn fold_tokens(text: &str) -> Vec<String> {
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .replace(['\u{2018}', '\u{2019}'], "'")
        .to_lowercase();
    folded
        .split(|c: char| !(c.is_alphabetic() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// DETECTOR
// ============================================================================

/// Script-block + stopword language detector.
#[derive(Debug, Clone)]
pub struct StopwordDetector {
    /// Fewer letters than this is undetectable.
    pub min_letters: usize,
    /// The winning language needs at least this many stopword hits.
    pub min_hits: usize,
}

impl Default for StopwordDetector {
    fn default() -> Self {
        Self {
            min_letters: 20,
            min_hits: 3,
        }
    }
}

impl LanguageDetector for StopwordDetector {
    fn detect(&self, text: &str) -> Result<String, LanguageError> {
        let mut counts: FxHashMap<Script, usize> = FxHashMap::default();
        let mut letters = 0;
        for c in text.chars().filter(|c| c.is_alphabetic()) {
            letters += 1;
            *counts.entry(script_of(c)).or_default() += 1;
        }
        if letters < self.min_letters {
            return Err(LanguageError::TooShort { letters });
        }
        if let Some(code) = script_language(&counts, letters) {
            return Ok(code.to_string());
        }

        let tokens = fold_tokens(text);
        let mut best: Option<(&str, usize)> = None;
        for (code, words) in STOPWORDS.iter() {
            let hits = tokens.iter().filter(|t| words.contains(t.as_str())).count();
            match best {
                Some((_, best_hits)) if hits <= best_hits => {}
                _ => best = Some((*code, hits)),
            }
        }

        match best {
            Some((code, hits)) if hits >= self.min_hits => Ok(code.to_string()),
            _ => Err(LanguageError::Undetectable),
        }
    }
}
