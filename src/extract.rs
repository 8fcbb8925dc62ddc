use crate::policy::PlatePolicy;
use crate::types::{DetectionKind, TextDetection};
use log::debug;

/// Trims, upper-cases and collapses runs of whitespace to a single space.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_permitted(c: char, policy: &PlatePolicy) -> bool {
    c.is_ascii_alphanumeric() || c == ' ' || policy.separators.contains(c)
}

/// Turns raw OCR output into plate candidates, preserving input order.
pub fn candidates(detections: &[TextDetection], policy: &PlatePolicy) -> Vec<String> {
    detections
        .iter()
        .filter(|d| d.kind == DetectionKind::Line)
        .filter(|d| d.text.chars().count() >= policy.min_line_len)
        .filter(|d| d.text.chars().all(|c| is_permitted(c, policy)))
        .map(|d| normalize_text(&d.text))
        .filter(|c| !c.is_empty() && !policy.is_denied(c))
        .collect()
}

/// Tests each candidate, then each adjacent pair joined by a space, against
/// the policy's patterns in priority order.
pub fn match_patterns(candidates: &[String], policy: &PlatePolicy) -> Option<String> {
    for candidate in candidates {
        if let Some(pattern) = policy.first_match(candidate) {
            debug!("Line '{}' matched pattern {}", candidate, pattern.name);
            return Some(candidate.clone());
        }
    }
    for pair in candidates.windows(2) {
        let joined = normalize_text(&format!("{} {}", pair[0], pair[1]));
        if let Some(pattern) = policy.first_match(&joined) {
            debug!("Line pair '{}' matched pattern {}", joined, pattern.name);
            return Some(joined);
        }
    }
    None
}

/// Last resort: the first short alphanumeric line that is not a bare
/// four-digit number.
pub fn fallback(candidates: &[String], policy: &PlatePolicy) -> Option<String> {
    let window = policy.fallback_min_len..=policy.fallback_max_len;
    candidates
        .iter()
        .find(|candidate| {
            let compact: String = candidate.split_whitespace().collect();
            window.contains(&compact.chars().count())
                && compact.chars().all(|c| c.is_ascii_alphanumeric())
                && !is_bare_year(&compact)
        })
        .map(|candidate| {
            debug!("Falling back to line '{}'", candidate);
            candidate.clone()
        })
}

fn is_bare_year(s: &str) -> bool {
    s.len() == 4 && s.chars().all(|c| c.is_ascii_digit())
}

/// Picks the most likely plate out of one OCR pass.
pub fn extract_plate(detections: &[TextDetection], policy: &PlatePolicy) -> Option<String> {
    let candidates = candidates(detections, policy);
    debug!("Plate candidates: {:?}", candidates);
    match_patterns(&candidates, policy).or_else(|| fallback(&candidates, policy))
}
