use serde::{Deserialize, Serialize};

/// One already-summarized email, as produced by the upstream summarization step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DigestEmail {
    pub id: i64,
    pub email_digest_id: i64,
    pub sender: String,
    pub subject: String,
    pub summary: String,
    pub topics: Vec<String>,
    pub keywords: Vec<String>,
}
