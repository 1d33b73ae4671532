//! Rule-based resolver and extractor.
//!
//! These let the pipelines run end to end without any model weights. They
//! handle plain declarative sentences ("Alice works for Google. She lives in
//! London.") and nothing fancier; swap in model-backed implementations of
//! [`CorefResolver`] and [`RelationExtractor`] for real text.

use factline::schema::{canonical_relation, FALLBACK_RELATION};
use factline::RelationDef;

use crate::capabilities::{CorefResolver, RelationExtractor, Triple};

/// Pronouns replaced by the antecedent itself.
const SUBJECT_PRONOUNS: &[&str] = &["he", "she", "they", "him", "them"];
/// Pronouns replaced by the antecedent's possessive form.
const POSSESSIVE_PRONOUNS: &[&str] = &["his", "their"];
/// Sentence-initial capitalised words that never name a referent.
const NON_ANTECEDENTS: &[&str] = &[
    "he", "she", "they", "him", "them", "his", "her", "their", "it", "its", "i", "we", "you",
    "the", "a", "an", "this", "that", "these", "those", "there", "then", "but", "and", "so",
];

/// Replaces third-person pronouns with the most recent sentence-initial
/// proper noun.
///
/// Whitespace is normalised to single spaces in the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct PronounResolver;

impl CorefResolver for PronounResolver {
    fn resolve(&self, text: &str) -> anyhow::Result<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut out: Vec<String> = Vec::with_capacity(words.len());
        let mut antecedent: Option<String> = None;
        let mut sentence_start = true;

        for (i, word) in words.iter().enumerate() {
            let (core, tail) = split_trailing_punctuation(word);
            let lower = core.to_lowercase();

            match antecedent.as_deref() {
                Some(name) if SUBJECT_PRONOUNS.contains(&lower.as_str()) => {
                    out.push(format!("{name}{tail}"));
                }
                Some(name) if POSSESSIVE_PRONOUNS.contains(&lower.as_str()) => {
                    out.push(format!("{name}'s{tail}"));
                }
                _ => {
                    if sentence_start
                        && starts_uppercase(core)
                        && !NON_ANTECEDENTS.contains(&lower.as_str())
                    {
                        antecedent = Some(proper_noun_run(&words[i..]));
                    }
                    out.push((*word).to_string());
                }
            }

            sentence_start = tail.ends_with(['.', '!', '?']);
        }

        Ok(out.join(" "))
    }
}

/// Leading run of capitalised words, stopping at the first punctuation.
fn proper_noun_run(words: &[&str]) -> String {
    let mut parts = Vec::new();
    for word in words {
        let (core, tail) = split_trailing_punctuation(word);
        if !starts_uppercase(core) {
            break;
        }
        parts.push(core);
        if !tail.is_empty() {
            break;
        }
    }
    parts.join(" ")
}

fn starts_uppercase(s: &str) -> bool {
    s.chars().next().is_some_and(char::is_uppercase)
}

fn split_trailing_punctuation(word: &str) -> (&str, &str) {
    let core_len = word
        .trim_end_matches(|c: char| c.is_ascii_punctuation() && c != '\'')
        .len();
    word.split_at(core_len)
}

/// Surface phrase -> relation. Earlier entries win when a sentence matches several.
const PHRASES: &[(&str, &str)] = &[
    (" works for ", "works_for"),
    (" works at ", "works_for"),
    (" is employed by ", "works_for"),
    (" is located in ", "located_in"),
    (" is based in ", "located_in"),
    (" lives in ", "located_in"),
    (" moved to ", "located_in"),
    (" is friends with ", "knows"),
    (" knows ", "knows"),
    (" founded ", "founded"),
    (" participated in ", "participated_in"),
    (" took part in ", "participated_in"),
    (" happened at ", "happened_at"),
    (" took place at ", "happened_at"),
    (" took place in ", "happened_at"),
    (" is related to ", FALLBACK_RELATION),
];

/// Sentence-level phrase matcher.
///
/// Each sentence yields at most one triple: the text before the first
/// matching phrase is the subject, the text after it the object. Relations
/// outside the supplied vocabulary are reported as the fallback relation when
/// the vocabulary has one, and dropped otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternExtractor;

impl RelationExtractor for PatternExtractor {
    fn extract(&self, text: &str, vocabulary: &[RelationDef]) -> anyhow::Result<Vec<Triple>> {
        let known = |name: &str| {
            let wanted = canonical_relation(name);
            vocabulary
                .iter()
                .any(|def| canonical_relation(def.name) == wanted)
        };

        let mut triples = Vec::new();
        for sentence in text.split(['.', '!', '?', ';', '\n']) {
            let Some((subject, relation, object)) = match_sentence(sentence) else {
                continue;
            };
            let relation = if known(relation) {
                relation
            } else if known(FALLBACK_RELATION) {
                FALLBACK_RELATION
            } else {
                continue;
            };
            triples.push(Triple::new(subject, relation, object));
        }
        Ok(triples)
    }
}

fn match_sentence(sentence: &str) -> Option<(&str, &'static str, &str)> {
    let sentence = sentence.trim();
    PHRASES.iter().find_map(|(phrase, relation)| {
        let (subject, object) = split_on_phrase(sentence, phrase)?;
        Some((subject, *relation, object))
    })
}

fn split_on_phrase<'a>(text: &'a str, phrase: &str) -> Option<(&'a str, &'a str)> {
    // ASCII-case-insensitive byte search keeps offsets valid for non-ASCII text.
    let needle = phrase.as_bytes();
    let idx = text
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))?;
    let subject = text.get(..idx)?.trim();
    let object = text
        .get(idx + needle.len()..)?
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation());
    if subject.is_empty() || object.is_empty() {
        return None;
    }
    Some((subject, object))
}
