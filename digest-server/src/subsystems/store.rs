//! Postgres storage for thematic digests
//!
//! `PgDigestStore::begin` opens one transaction per digest, so the three
//! tables are written atomically. The read helpers serve the UI and the
//! worker binary; the pipeline itself only writes.

use async_trait::async_trait;
use chrono::NaiveDate;
use digest_core::{DigestEmail, ThematicDigest, ThematicSection, ThemeSourceEmail};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use super::persist::{
    DigestStore, DigestWriter, NewThematicDigest, NewThematicSection, NewThemeSourceEmail,
    PersistenceError, StoredDigest, StoredSection,
};

/// Upper bound for history page sizes.
const MAX_HISTORY_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct PgDigestStore {
    pool: PgPool,
}

impl PgDigestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Most recent thematic digest for a user on a given day.
    pub async fn latest_for_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<StoredDigest>, PersistenceError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM thematic_digests
            WHERE user_id = $1 AND digest_date = $2
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        match id {
            Some(id) => self.fetch_digest(id).await,
            None => Ok(None),
        }
    }

    /// A user's digests, newest first. Sections are not loaded.
    pub async fn history(
        &self,
        user_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<ThematicDigest>, PersistenceError> {
        let limit = limit.unwrap_or(30).clamp(1, MAX_HISTORY_LIMIT);
        let offset = offset.unwrap_or(0).max(0);

        let rows = sqlx::query_as::<_, ThematicDigest>(
            r#"
            SELECT id, user_id, digest_date, email_digest_id, sections_count,
                   total_source_emails, processing_method, created_at
            FROM thematic_digests
            WHERE user_id = $1
            ORDER BY digest_date DESC, created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Days for which the user has at least one thematic digest, newest first.
    pub async fn available_dates(&self, user_id: &str) -> Result<Vec<NaiveDate>, PersistenceError> {
        let dates = sqlx::query_scalar(
            r#"
            SELECT DISTINCT digest_date FROM thematic_digests
            WHERE user_id = $1
            ORDER BY digest_date DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(dates)
    }

    /// Summarized emails for a user's daily digest, in arrival order.
    /// Returns the daily digest id alongside, if one exists for that day.
    pub async fn load_digest_emails(
        &self,
        user_id: &str,
        date: NaiveDate,
        email_digest_id: Option<i64>,
    ) -> Result<(Option<i64>, Vec<DigestEmail>), PersistenceError> {
        let digest_id: Option<i64> = match email_digest_id {
            Some(id) => Some(id),
            None => {
                sqlx::query_scalar(
                    r#"
                    SELECT id FROM email_digests
                    WHERE user_id = $1 AND digest_date = $2
                    ORDER BY created_at DESC, id DESC
                    LIMIT 1
                    "#,
                )
                .bind(user_id)
                .bind(date)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        let Some(digest_id) = digest_id else {
            return Ok((None, Vec::new()));
        };

        let emails = sqlx::query_as::<_, DigestEmail>(
            r#"
            SELECT de.id, de.email_digest_id, de.sender, de.subject, de.summary,
                   de.topics, de.keywords
            FROM digest_emails de
            JOIN email_digests ed ON ed.id = de.email_digest_id
            WHERE de.email_digest_id = $1 AND ed.user_id = $2
            ORDER BY de.created_at ASC, de.id ASC
            "#,
        )
        .bind(digest_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok((Some(digest_id), emails))
    }
}

#[async_trait]
impl DigestStore for PgDigestStore {
    async fn begin(&self) -> Result<Box<dyn DigestWriter>, PersistenceError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgDigestWriter { tx }))
    }

    async fn fetch_digest(&self, id: i64) -> Result<Option<StoredDigest>, PersistenceError> {
        let digest = sqlx::query_as::<_, ThematicDigest>(
            r#"
            SELECT id, user_id, digest_date, email_digest_id, sections_count,
                   total_source_emails, processing_method, created_at
            FROM thematic_digests
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(digest) = digest else {
            return Ok(None);
        };

        let sections = sqlx::query_as::<_, ThematicSection>(
            r#"
            SELECT id, thematic_digest_id, theme_name, summary, confidence_score,
                   keywords, entities, display_order, fallback_used
            FROM thematic_sections
            WHERE thematic_digest_id = $1
            ORDER BY display_order ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let section_ids: Vec<i64> = sections.iter().map(|s| s.id).collect();
        let links = sqlx::query_as::<_, ThemeSourceEmail>(
            r#"
            SELECT id, thematic_section_id, digest_email_id, relevance_score
            FROM theme_source_emails
            WHERE thematic_section_id = ANY($1)
            ORDER BY relevance_score DESC, id ASC
            "#,
        )
        .bind(&section_ids)
        .fetch_all(&self.pool)
        .await?;

        let sections = sections
            .into_iter()
            .map(|section| {
                let sources = links
                    .iter()
                    .filter(|l| l.thematic_section_id == section.id)
                    .cloned()
                    .collect();
                StoredSection { section, sources }
            })
            .collect();

        Ok(Some(StoredDigest { digest, sections }))
    }
}

/// Writes for one digest inside a single transaction. Dropping it without
/// `commit()` rolls the transaction back.
pub struct PgDigestWriter {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl DigestWriter for PgDigestWriter {
    async fn create_thematic_digest(
        &mut self,
        new: &NewThematicDigest,
    ) -> Result<ThematicDigest, PersistenceError> {
        let row = sqlx::query_as::<_, ThematicDigest>(
            r#"
            INSERT INTO thematic_digests
                (user_id, digest_date, email_digest_id, sections_count,
                 total_source_emails, processing_method)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, digest_date, email_digest_id, sections_count,
                      total_source_emails, processing_method, created_at
            "#,
        )
        .bind(&new.user_id)
        .bind(new.digest_date)
        .bind(new.email_digest_id)
        .bind(new.sections_count)
        .bind(new.total_source_emails)
        .bind(&new.processing_method)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row)
    }

    async fn create_thematic_section(
        &mut self,
        new: &NewThematicSection,
    ) -> Result<ThematicSection, PersistenceError> {
        let row = sqlx::query_as::<_, ThematicSection>(
            r#"
            INSERT INTO thematic_sections
                (thematic_digest_id, theme_name, summary, confidence_score,
                 keywords, entities, display_order, fallback_used)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, thematic_digest_id, theme_name, summary, confidence_score,
                      keywords, entities, display_order, fallback_used
            "#,
        )
        .bind(new.thematic_digest_id)
        .bind(&new.theme_name)
        .bind(&new.summary)
        .bind(new.confidence_score)
        .bind(&new.keywords)
        .bind(Json(&new.entities))
        .bind(new.display_order)
        .bind(new.fallback_used)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row)
    }

    async fn create_theme_source_email(
        &mut self,
        new: &NewThemeSourceEmail,
    ) -> Result<ThemeSourceEmail, PersistenceError> {
        let row = sqlx::query_as::<_, ThemeSourceEmail>(
            r#"
            INSERT INTO theme_source_emails
                (thematic_section_id, digest_email_id, relevance_score)
            VALUES ($1, $2, $3)
            RETURNING id, thematic_section_id, digest_email_id, relevance_score
            "#,
        )
        .bind(new.thematic_section_id)
        .bind(new.digest_email_id)
        .bind(new.relevance_score)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row)
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), PersistenceError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
