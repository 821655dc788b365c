//! Progression text cleanup: chord-symbol rewrite rules and bar-line tidying.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::{Error, Result};

/// One rewrite rule as written in configuration.
///
/// `flags` may contain `i` (case-insensitive) and `m` (multi-line).
/// `$1` in the replacement refers to the first capture group; only one digit
/// is read, so `$12` means group 1 followed by a literal `2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementRule {
    pub pattern: String,
    pub replacement: String,
    #[serde(default)]
    pub flags: String,
}

impl ReplacementRule {
    pub fn new(pattern: &str, replacement: &str, flags: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            flags: flags.to_string(),
        }
    }
}

/// Compiled rewrite rules, applied in order.
#[derive(Debug, Clone)]
pub struct ChordReplacements {
    compiled: Vec<(Regex, String)>,
}

impl ChordReplacements {
    pub fn compile(rules: &[ReplacementRule]) -> Result<Self> {
        let compiled = rules
            .iter()
            .map(|rule| {
                let regex = RegexBuilder::new(&rule.pattern)
                    .case_insensitive(rule.flags.contains('i'))
                    .multi_line(rule.flags.contains('m'))
                    .build()
                    .map_err(|e| Error::InvalidReplacementRule {
                        pattern: rule.pattern.clone(),
                        message: e.to_string(),
                    })?;
                Ok((regex, expand_group_refs(&rule.replacement)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { compiled })
    }

    /// Process-wide default rules, compiled on first use.
    pub fn builtin() -> &'static ChordReplacements {
        static BUILTIN: OnceLock<ChordReplacements> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            let rules = default_rules();
            match Self::compile(&rules) {
                Ok(compiled) => compiled,
                Err(e) => {
                    debug!(error = %e, "builtin replacement rules failed to compile");
                    Self {
                        compiled: Vec::new(),
                    }
                }
            }
        })
    }

    pub fn apply(&self, text: &str) -> String {
        self.compiled
            .iter()
            .fold(text.to_string(), |acc, (regex, replacement)| {
                regex.replace_all(&acc, replacement.as_str()).into_owned()
            })
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

/// Rules used when configuration supplies none.
pub fn default_rules() -> Vec<ReplacementRule> {
    vec![
        ReplacementRule::new(r"maj7|Δ|△", "∆", "i"),
        ReplacementRule::new(r"m7b5|ø7?", "m7(b5)", ""),
        ReplacementRule::new(r"dim7|°7|o7", "º7", ""),
        ReplacementRule::new(r"([A-G][b#]?)-7", "${1}m7", ""),
        ReplacementRule::new(r"7b9", "7(b9)", ""),
        ReplacementRule::new(r"7#9", "7(#9)", ""),
    ]
}

/// Rewrite `$N` references into the `${N}` form, reading a single digit.
fn expand_group_refs(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            if let Some(digit) = chars.peek().copied().filter(char::is_ascii_digit) {
                out.push_str("${");
                out.push(digit);
                out.push('}');
                chars.next();
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Collapse doubled bar lines and normalize spacing around `|`, per line.
pub fn normalise_bars(text: &str) -> String {
    text.lines()
        .map(|line| {
            line.split('|')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
