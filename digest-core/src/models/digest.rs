use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ThematicDigest {
    pub id: i64,
    pub user_id: String,
    pub digest_date: NaiveDate,
    pub email_digest_id: Option<i64>,
    pub sections_count: i32,
    pub total_source_emails: i32,
    pub processing_method: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ThematicSection {
    pub id: i64,
    pub thematic_digest_id: i64,
    pub theme_name: String,
    pub summary: String,
    pub confidence_score: i32,
    pub keywords: Vec<String>,
    pub entities: Json<ThemeEntities>,
    pub display_order: i32,
    pub fallback_used: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ThemeSourceEmail {
    pub id: i64,
    pub thematic_section_id: i64,
    pub digest_email_id: i64,
    pub relevance_score: i32,
}

/// Named entities mentioned in a theme. Nothing populates this yet; it is
/// stored so readers can rely on the shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeEntities {
    pub people: Vec<String>,
    pub organizations: Vec<String>,
    pub locations: Vec<String>,
    pub events: Vec<String>,
}

impl ThemeEntities {
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
            && self.organizations.is_empty()
            && self.locations.is_empty()
            && self.events.is_empty()
    }
}
