use crate::extract::normalize_text;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Built-in plate shapes, highest priority first. The broad shapes stay last
/// so they never mask a specific layout.
const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    ("standard-3x4", r"^[A-Z]{3}[ -]?\d{4}$"),
    ("standard-3x3", r"^[A-Z]{3}[ -]?\d{3}$"),
    ("digit-lead-3x3", r"^\d{3}[ -]?[A-Z]{3}$"),
    ("leading-digit-7", r"^\d[A-Z]{3}\d{3}$"),
    ("split-2-1-3", r"^[A-Z]{2}\d[ -]?\d{3}$"),
    ("broad-letters-digits", r"^[A-Z]{1,3}[ -]?\d{2,5}[ -]?[A-Z]{0,2}$"),
    ("broad-digits-letters", r"^\d{1,4}[ -]?[A-Z]{2,3}[ -]?\d{0,4}$"),
];

/// Text printed around plates that is never itself a plate.
const BUILTIN_DENYLIST: &[&str] = &[
    "CALIFORNIA",
    "TEXAS",
    "FLORIDA",
    "NEW YORK",
    "OREGON",
    "WASHINGTON",
    "ARIZONA",
    "NEVADA",
    "ILLINOIS",
    "OHIO",
    "SUNSHINE STATE",
    "LONE STAR STATE",
    "EMPIRE STATE",
    "GARDEN STATE",
    "LAND OF LINCOLN",
    "GRAND CANYON STATE",
    "EVERGREEN STATE",
    "THE SILVER STATE",
    "DEALER",
    "STUDENT PARKING",
    "VISITOR",
    "STAFF",
];

const DEFAULT_SEPARATORS: &str = "-";
const DEFAULT_MIN_LINE_LEN: usize = 3;
const DEFAULT_FALLBACK_MIN_LEN: usize = 3;
const DEFAULT_FALLBACK_MAX_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct PlatePattern {
    pub name: String,
    regex: Regex,
}

impl PlatePattern {
    pub fn new(name: &str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(PlatePattern {
            name: name.to_string(),
            regex: Regex::new(pattern)?,
        })
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// Everything the extraction heuristic treats as data rather than logic.
#[derive(Debug, Clone)]
pub struct PlatePolicy {
    pub patterns: Vec<PlatePattern>,
    pub denylist: Vec<String>,
    /// Non-alphanumeric characters, besides space, allowed inside a line.
    pub separators: String,
    pub min_line_len: usize,
    pub fallback_min_len: usize,
    pub fallback_max_len: usize,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyFile {
    patterns: Option<Vec<PatternFile>>,
    denylist: Option<Vec<String>>,
    separators: Option<String>,
    min_line_len: Option<usize>,
    fallback_min_len: Option<usize>,
    fallback_max_len: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PatternFile {
    name: String,
    regex: String,
}

impl PlatePolicy {
    pub fn builtin() -> Self {
        let patterns = BUILTIN_PATTERNS
            .iter()
            .map(|(name, pattern)| {
                PlatePattern::new(name, pattern).expect("built-in plate pattern is valid")
            })
            .collect();
        PlatePolicy {
            patterns,
            denylist: normalize_denylist(BUILTIN_DENYLIST.iter().copied()),
            separators: DEFAULT_SEPARATORS.to_string(),
            min_line_len: DEFAULT_MIN_LINE_LEN,
            fallback_min_len: DEFAULT_FALLBACK_MIN_LEN,
            fallback_max_len: DEFAULT_FALLBACK_MAX_LEN,
        }
    }

    pub fn load(path: &Path) -> Result<Self, failure::Error> {
        let raw = fs::read_to_string(path).map_err(|e| {
            format_err!("Unable to read plate policy {}: {}", path.display(), e)
        })?;
        Self::from_json(&raw)
            .map_err(|e| format_err!("Invalid plate policy {}: {}", path.display(), e))
    }

    /// Parses a policy document. Keys it leaves out keep their built-in values.
    pub fn from_json(raw: &str) -> Result<Self, failure::Error> {
        let file: PolicyFile = serde_json::from_str(raw)?;
        let mut policy = Self::builtin();

        if let Some(patterns) = file.patterns {
            policy.patterns = patterns
                .iter()
                .map(|p| {
                    PlatePattern::new(&p.name, &p.regex)
                        .map_err(|e| format_err!("pattern '{}': {}", p.name, e))
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(denylist) = file.denylist {
            policy.denylist = normalize_denylist(denylist.iter().map(String::as_str));
        }
        if let Some(separators) = file.separators {
            if let Some(c) = separators.chars().find(|c| c.is_ascii_alphanumeric()) {
                bail!("separator '{}' is alphanumeric", c);
            }
            policy.separators = separators;
        }
        if let Some(len) = file.min_line_len {
            policy.min_line_len = len;
        }
        if let Some(len) = file.fallback_min_len {
            policy.fallback_min_len = len;
        }
        if let Some(len) = file.fallback_max_len {
            policy.fallback_max_len = len;
        }
        if policy.fallback_min_len > policy.fallback_max_len {
            bail!(
                "fallback window {}..={} is empty",
                policy.fallback_min_len,
                policy.fallback_max_len
            );
        }
        Ok(policy)
    }

    pub fn is_denied(&self, candidate: &str) -> bool {
        self.denylist.iter().any(|d| d == candidate)
    }

    /// First pattern, in priority order, that matches `candidate`.
    pub fn first_match(&self, candidate: &str) -> Option<&PlatePattern> {
        self.patterns.iter().find(|p| p.is_match(candidate))
    }
}

fn normalize_denylist<'a>(words: impl Iterator<Item = &'a str>) -> Vec<String> {
    words
        .map(normalize_text)
        .filter(|w| !w.is_empty())
        .collect()
}
