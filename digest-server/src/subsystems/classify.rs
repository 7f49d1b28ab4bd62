//! Classifier: partitions a day's emails into themed clusters
//!
//! Categories are evaluated in taxonomy order. Each still-unclaimed email is
//! scored against the category and claimed by it if the fit score reaches
//! `MIN_FIT_SCORE`. The first qualifying category wins, even if a later one
//! would score the email higher. This tie-break is a policy choice kept for
//! reproducibility of stored digests; picking the best-scoring category per
//! email would need a new `TAXONOMY_VERSION`.
//!
//! Whatever is left after the last category lands in "Other", so every input
//! email ends up in exactly one cluster.

use std::collections::HashMap;

use digest_core::taxonomy::OTHER_CATEGORY;
use digest_core::{Category, DigestEmail};
use thiserror::Error;

use super::scoring::{cluster_confidence, CategoryMatcher};

/// Minimum fit score for a category to claim an email.
pub const MIN_FIT_SCORE: u8 = 30;

/// Used for confidence scoring when the taxonomy has no "Other" entry.
const FALLBACK_OTHER: Category = Category {
    name: OTHER_CATEGORY,
    keywords: &[],
    sender_domains: &[],
};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("No emails to classify")]
pub struct EmptyInputError;

/// A group of emails assigned to one theme for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailCluster {
    pub theme: String,
    pub emails: Vec<DigestEmail>,
    /// Most frequent member keywords, lowercase, deduplicated.
    pub keywords: Vec<String>,
    pub confidence: u8,
}

impl EmailCluster {
    /// Ranking key: bigger, more confident themes lead the digest.
    pub fn significance(&self) -> u32 {
        self.emails.len() as u32 * self.confidence as u32
    }
}

/// Partition `emails` into clusters, ordered by significance (descending).
///
/// Ties keep taxonomy order, with "Other" after every named category.
pub fn classify(
    emails: &[DigestEmail],
    taxonomy: &[Category],
    top_keywords: usize,
) -> Result<Vec<EmailCluster>, EmptyInputError> {
    if emails.is_empty() {
        return Err(EmptyInputError);
    }

    let mut unclaimed: Vec<&DigestEmail> = emails.iter().collect();
    let mut groups: Vec<(&Category, Vec<DigestEmail>)> = Vec::new();

    for category in taxonomy {
        if unclaimed.is_empty() {
            break;
        }

        let matcher = CategoryMatcher::new(category);
        let (claimed, rest): (Vec<&DigestEmail>, Vec<&DigestEmail>) = unclaimed
            .into_iter()
            .partition(|e| matcher.fit_score(e) >= MIN_FIT_SCORE);
        unclaimed = rest;

        if !claimed.is_empty() {
            tracing::debug!(
                theme = category.name,
                claimed = claimed.len(),
                remaining = unclaimed.len(),
                "Category claimed emails"
            );
            groups.push((category, claimed.into_iter().cloned().collect()));
        }
    }

    if !unclaimed.is_empty() {
        let leftovers: Vec<DigestEmail> = unclaimed.into_iter().cloned().collect();
        match groups.iter_mut().find(|(c, _)| c.name == OTHER_CATEGORY) {
            Some((_, members)) => members.extend(leftovers),
            None => {
                let other = taxonomy
                    .iter()
                    .find(|c| c.name == OTHER_CATEGORY)
                    .unwrap_or(&FALLBACK_OTHER);
                groups.push((other, leftovers));
            }
        }
    }

    let mut clusters: Vec<EmailCluster> = groups
        .into_iter()
        .map(|(category, members)| EmailCluster {
            theme: category.name.to_string(),
            keywords: top_keywords_by_frequency(&members, top_keywords),
            confidence: cluster_confidence(&members, category),
            emails: members,
        })
        .collect();

    // Stable sort keeps taxonomy order among equally significant clusters.
    clusters.sort_by(|a, b| b.significance().cmp(&a.significance()));

    Ok(clusters)
}

/// Up to `limit` member keywords by frequency. Ties go to the keyword seen
/// first.
pub fn top_keywords_by_frequency(emails: &[DigestEmail], limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut seen = 0usize;

    for email in emails {
        for keyword in &email.keywords {
            let keyword = keyword.trim().to_lowercase();
            if keyword.is_empty() {
                continue;
            }
            let entry = counts.entry(keyword).or_insert((0, seen));
            entry.0 += 1;
            seen += 1;
        }
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(k, (count, first))| (k, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    ranked.into_iter().take(limit).map(|(k, _, _)| k).collect()
}
