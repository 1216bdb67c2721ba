//! Description normalization
//!
//! Turns a raw bank description into the canonical token string that patterns
//! are learned on and matched against:
//!
//! 1. lowercase
//! 2. fold accented vowels and ñ to ASCII
//! 3. replace everything outside `[a-z0-9 ]` with a space
//! 4. collapse whitespace
//! 5. drop stop words
//! 6. rewrite merchant spelling variants to their canonical name
//!
//! The result is idempotent: normalizing a normalized string returns it as is.

use std::collections::HashSet;

use regex::Regex;

use crate::config::NormalizerConfig;
use crate::error::Result;

/// Upper bound on synonym rewrite passes
const MAX_SYNONYM_PASSES: usize = 8;

struct SynonymRule {
    canonical: Vec<String>,
    variants: Vec<Vec<String>>,
}

/// Normalizer built from the stop-word set and merchant synonym table
pub struct Normalizer {
    strip: Regex,
    stop_words: HashSet<String>,
    synonyms: Vec<SynonymRule>,
}

impl Normalizer {
    pub fn new(config: &NormalizerConfig) -> Result<Self> {
        let synonyms = config
            .synonyms
            .iter()
            .map(|s| SynonymRule {
                canonical: tokens(&s.canonical),
                variants: s
                    .variants
                    .iter()
                    .map(|v| tokens(v))
                    .filter(|v| !v.is_empty())
                    .collect(),
            })
            .collect();

        Ok(Self {
            strip: Regex::new(r"[^a-z0-9 ]+")?,
            stop_words: config.stop_words.iter().cloned().collect(),
            synonyms,
        })
    }

    /// Normalize a raw description
    pub fn normalize(&self, raw: &str) -> String {
        let folded: String = raw.to_lowercase().chars().map(fold_char).collect();
        let stripped = self.strip.replace_all(&folded, " ");

        let kept: Vec<String> = stripped
            .split_whitespace()
            .filter(|t| !self.stop_words.contains(*t))
            .map(str::to_string)
            .collect();

        self.apply_synonyms(kept).join(" ")
    }

    /// Rewrite variant spans until the token list stops changing
    fn apply_synonyms(&self, mut tokens: Vec<String>) -> Vec<String> {
        for _ in 0..MAX_SYNONYM_PASSES {
            let mut changed = false;
            for rule in &self.synonyms {
                for variant in &rule.variants {
                    if let Some(next) = replace_span(&tokens, variant, &rule.canonical) {
                        tokens = next;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        tokens
    }
}

/// Replace every token-aligned occurrence of `needle`, or None if absent
fn replace_span(tokens: &[String], needle: &[String], replacement: &[String]) -> Option<Vec<String>> {
    if needle.is_empty() || needle.len() > tokens.len() || needle == replacement {
        return None;
    }

    let mut out = Vec::with_capacity(tokens.len());
    let mut found = false;
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i..].starts_with(needle) {
            out.extend_from_slice(replacement);
            i += needle.len();
            found = true;
        } else {
            out.push(tokens[i].clone());
            i += 1;
        }
    }

    found.then_some(out)
}

fn tokens(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        _ => c,
    }
}
