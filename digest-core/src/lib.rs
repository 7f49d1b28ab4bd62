pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod taxonomy;

pub use config::DigestConfig;
pub use error::DigestError;
pub use llm::{
    create_backend, narrative_deadline, DisabledNarrativeBackend, EmailProjection,
    GeminiNarrativeClient, LlmError, NarrativeBackend, NarrativeRequest,
};
pub use models::{DigestEmail, ThematicDigest, ThematicSection, ThemeEntities, ThemeSourceEmail};
pub use taxonomy::{Category, OTHER_CATEGORY, PROCESSING_METHOD, TAXONOMY, TAXONOMY_VERSION};
