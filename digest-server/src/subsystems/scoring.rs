//! Scoring: fit, confidence and relevance
//!
//! All functions here are pure and deterministic for a fixed taxonomy version.
//!
//! Keywords match whole words only, with an optional plural "s"/"es"
//! ("investor" matches "investors" but "ai" does not match "daily").
//!
//! Fit score (email × category), clamped to [0, 100]:
//!   +10 per category keyword found anywhere in subject/summary/topics/keywords
//!   +15 more if that keyword is also in the subject
//!   +10 more if that keyword is also in one of the email's own topics
//!   +25 once if the sender domain belongs to the category
//!
//! Confidence (cluster): rounded mean fit score, clamped to [50, 95].
//!
//! Relevance (email × theme): shared keywords / larger keyword set, as 0-100.

use std::collections::HashSet;

use digest_core::{Category, DigestEmail};
use regex::Regex;

/// Base points for a keyword found anywhere in the email text.
pub const KEYWORD_MATCH_POINTS: u32 = 10;

/// Extra points when the keyword is also in the subject line.
pub const SUBJECT_MATCH_POINTS: u32 = 15;

/// Extra points when the keyword is also one of the email's topics.
pub const TOPIC_MATCH_POINTS: u32 = 10;

/// Bonus when the sender domain is one the category lists.
pub const SENDER_BONUS_POINTS: u32 = 25;

pub const MAX_SCORE: u32 = 100;

/// Lowest confidence ever shown for a theme.
pub const CONFIDENCE_FLOOR: u8 = 50;

/// Highest confidence ever shown for a theme.
pub const CONFIDENCE_CEILING: u8 = 95;

/// Confidence for a cluster with no members.
pub const NEUTRAL_CONFIDENCE: u8 = 70;

/// Relevance when either side has no keywords.
pub const DEFAULT_RELEVANCE: u8 = 50;

// ============================================================================
// Fit
// ============================================================================

/// How well `email` fits `category`, in [0, 100].
///
/// Compiles the category's keyword patterns on every call. Use
/// `CategoryMatcher` when scoring many emails against one category.
pub fn fit_score(email: &DigestEmail, category: &Category) -> u8 {
    CategoryMatcher::new(category).fit_score(email)
}

/// A category with its keyword patterns compiled once.
pub struct CategoryMatcher<'a> {
    category: &'a Category,
    terms: Vec<Regex>,
}

impl<'a> CategoryMatcher<'a> {
    pub fn new(category: &'a Category) -> Self {
        let terms = category
            .keywords
            .iter()
            .filter_map(|keyword| term_pattern(keyword))
            .collect();
        Self { category, terms }
    }

    pub fn fit_score(&self, email: &DigestEmail) -> u8 {
        let subject = email.subject.to_lowercase();
        let topics: Vec<String> = email.topics.iter().map(|t| t.to_lowercase()).collect();

        let blob = format!(
            "{} {} {} {}",
            subject,
            email.summary.to_lowercase(),
            topics.join(" "),
            email.keywords.join(" ").to_lowercase()
        );

        let mut score = 0u32;
        for term in &self.terms {
            if !term.is_match(&blob) {
                continue;
            }
            score += KEYWORD_MATCH_POINTS;
            if term.is_match(&subject) {
                score += SUBJECT_MATCH_POINTS;
            }
            if topics.iter().any(|t| term.is_match(t)) {
                score += TOPIC_MATCH_POINTS;
            }
        }

        if sender_matches(&email.sender, self.category) {
            score += SENDER_BONUS_POINTS;
        }

        score.min(MAX_SCORE) as u8
    }
}

/// Whole-word pattern for a lowercase keyword, allowing a plural suffix.
fn term_pattern(keyword: &str) -> Option<Regex> {
    match Regex::new(&format!(r"\b{}(?:e?s)?\b", regex::escape(keyword))) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(keyword = keyword, error = %e, "Skipping unmatchable keyword");
            None
        }
    }
}

/// True if the sender's domain (or a parent domain) is listed on the category.
pub fn sender_matches(sender: &str, category: &Category) -> bool {
    let Some(domain) = sender_domain(sender) else {
        return false;
    };

    category.sender_domains.iter().any(|d| {
        domain == *d
            || domain
                .strip_suffix(d)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Extract bare email from a "From" header like "Name <email@example.com>".
pub fn extract_email_address(from_field: &str) -> String {
    if let Some(start) = from_field.find('<') {
        if let Some(end) = from_field.find('>') {
            if end > start {
                return from_field[start + 1..end].trim().to_lowercase();
            }
        }
    }
    from_field.trim().to_lowercase()
}

/// Lowercase domain part of the sender address, if there is one.
pub fn sender_domain(sender: &str) -> Option<String> {
    let address = extract_email_address(sender);
    let (_, domain) = address.rsplit_once('@')?;
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_string())
    }
}

// ============================================================================
// Confidence
// ============================================================================

/// Confidence for a cluster of `members` assigned to `category`, in [50, 95].
pub fn cluster_confidence(members: &[DigestEmail], category: &Category) -> u8 {
    if members.is_empty() {
        return NEUTRAL_CONFIDENCE;
    }

    let matcher = CategoryMatcher::new(category);
    let total: u32 = members.iter().map(|e| matcher.fit_score(e) as u32).sum();
    let mean = (total as f64 / members.len() as f64).round() as u32;

    mean.clamp(CONFIDENCE_FLOOR as u32, CONFIDENCE_CEILING as u32) as u8
}

// ============================================================================
// Relevance
// ============================================================================

/// How relevant `email` is to a theme with `theme_keywords`, in [0, 100].
/// Display ranking only.
pub fn relevance_score(email: &DigestEmail, theme_keywords: &[String]) -> u8 {
    let email_set = normalized_set(&email.keywords);
    let theme_set = normalized_set(theme_keywords);

    if email_set.is_empty() || theme_set.is_empty() {
        return DEFAULT_RELEVANCE;
    }

    let common = email_set.intersection(&theme_set).count();
    let larger = email_set.len().max(theme_set.len());

    (common as f64 / larger as f64 * 100.0).round() as u8
}

fn normalized_set(words: &[String]) -> HashSet<String> {
    words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}
