//! Digest persistence: digest, sections and source-email links
//!
//! Writes go through a `DigestWriter` unit of work obtained from a
//! `DigestStore`. Nothing is visible to readers until `commit()`; on any
//! failure the writer is rolled back, so a run either stores a complete
//! digest or nothing at all.
//!
//! Section and email counts are derived from the summaries here, never taken
//! from the caller.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use digest_core::{ThematicDigest, ThematicSection, ThemeEntities, ThemeSourceEmail};
use serde::Serialize;
use thiserror::Error;

use super::scoring::relevance_score;
use super::synthesize::ThematicSummary;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Refusing to store a thematic digest with no sections")]
    NoSections,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage rejected write: {0}")]
    Rejected(String),
}

// ============================================================================
// Row inputs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewThematicDigest {
    pub user_id: String,
    pub digest_date: NaiveDate,
    pub email_digest_id: Option<i64>,
    pub sections_count: i32,
    pub total_source_emails: i32,
    pub processing_method: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewThematicSection {
    pub thematic_digest_id: i64,
    pub theme_name: String,
    pub summary: String,
    pub confidence_score: i32,
    pub keywords: Vec<String>,
    pub entities: ThemeEntities,
    pub display_order: i32,
    pub fallback_used: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewThemeSourceEmail {
    pub thematic_section_id: i64,
    pub digest_email_id: i64,
    pub relevance_score: i32,
}

/// A stored digest with its sections (in display order) and their links.
#[derive(Debug, Clone, Serialize)]
pub struct StoredDigest {
    pub digest: ThematicDigest,
    pub sections: Vec<StoredSection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredSection {
    pub section: ThematicSection,
    pub sources: Vec<ThemeSourceEmail>,
}

// ============================================================================
// Storage traits
// ============================================================================

/// One unit of work. Dropping a writer without `commit()` discards its rows.
#[async_trait]
pub trait DigestWriter: Send {
    async fn create_thematic_digest(
        &mut self,
        new: &NewThematicDigest,
    ) -> Result<ThematicDigest, PersistenceError>;

    async fn create_thematic_section(
        &mut self,
        new: &NewThematicSection,
    ) -> Result<ThematicSection, PersistenceError>;

    async fn create_theme_source_email(
        &mut self,
        new: &NewThemeSourceEmail,
    ) -> Result<ThemeSourceEmail, PersistenceError>;

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError>;

    async fn rollback(self: Box<Self>) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait DigestStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn DigestWriter>, PersistenceError>;

    async fn fetch_digest(&self, id: i64) -> Result<Option<StoredDigest>, PersistenceError>;
}

// ============================================================================
// Persister
// ============================================================================

/// Who and what day a digest belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestTarget {
    pub user_id: String,
    pub digest_date: NaiveDate,
    pub email_digest_id: Option<i64>,
    pub processing_method: String,
}

/// Store `summaries` as one thematic digest and return its id.
pub async fn persist_digest(
    store: &dyn DigestStore,
    target: &DigestTarget,
    summaries: &[ThematicSummary],
) -> Result<i64, PersistenceError> {
    if summaries.is_empty() {
        return Err(PersistenceError::NoSections);
    }

    let mut writer = store.begin().await?;

    match write_digest(writer.as_mut(), target, summaries).await {
        Ok(digest_id) => {
            writer.commit().await?;
            tracing::info!(
                digest_id = digest_id,
                user_id = %target.user_id,
                sections = summaries.len(),
                "Thematic digest stored"
            );
            Ok(digest_id)
        }
        Err(e) => {
            if let Err(rollback_err) = writer.rollback().await {
                tracing::error!(error = %rollback_err, "Failed to roll back thematic digest");
            }
            Err(e)
        }
    }
}

async fn write_digest(
    writer: &mut dyn DigestWriter,
    target: &DigestTarget,
    summaries: &[ThematicSummary],
) -> Result<i64, PersistenceError> {
    let digest = writer
        .create_thematic_digest(&NewThematicDigest {
            user_id: target.user_id.clone(),
            digest_date: target.digest_date,
            email_digest_id: target.email_digest_id,
            sections_count: summaries.len() as i32,
            total_source_emails: distinct_source_emails(summaries) as i32,
            processing_method: target.processing_method.clone(),
        })
        .await?;

    for (index, summary) in summaries.iter().enumerate() {
        let section = writer
            .create_thematic_section(&NewThematicSection {
                thematic_digest_id: digest.id,
                theme_name: summary.theme.clone(),
                summary: summary.narrative.clone(),
                confidence_score: summary.confidence as i32,
                keywords: summary.keywords.clone(),
                entities: summary.entities.clone(),
                display_order: index as i32 + 1,
                fallback_used: summary.fallback_used(),
            })
            .await?;

        let mut linked = HashSet::new();
        for email in &summary.emails {
            // At most one link per (section, email).
            if !linked.insert(email.id) {
                continue;
            }
            writer
                .create_theme_source_email(&NewThemeSourceEmail {
                    thematic_section_id: section.id,
                    digest_email_id: email.id,
                    relevance_score: relevance_score(email, &summary.keywords) as i32,
                })
                .await?;
        }
    }

    Ok(digest.id)
}

/// Distinct email ids across every summary.
pub fn distinct_source_emails(summaries: &[ThematicSummary]) -> usize {
    summaries
        .iter()
        .flat_map(|s| s.emails.iter().map(|e| e.id))
        .collect::<HashSet<_>>()
        .len()
}
