pub mod subsystems;

pub use subsystems::classify::{classify, EmailCluster, EmptyInputError, MIN_FIT_SCORE};
pub use subsystems::persist::{
    persist_digest, DigestStore, DigestTarget, DigestWriter, PersistenceError, StoredDigest,
    StoredSection,
};
pub use subsystems::pipeline::{DigestJob, PipelineError, PipelineReport, PipelineStage, ThematicPipeline};
pub use subsystems::store::PgDigestStore;
pub use subsystems::synthesize::{NarrativeSynthesizer, SynthesisDegraded, ThematicSummary};
