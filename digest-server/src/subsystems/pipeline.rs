//! Pipeline orchestrator: Classifying → Synthesizing → Persisting → Done
//!
//! A run either ends in `Done` with the id of a complete thematic digest, or
//! in `Failed` from `Classifying` (no input) or `Persisting` (storage). Narrative
//! failures are contained per cluster and never fail the run.
//!
//! Nothing is written before `Persisting`, so dropping the run future earlier
//! leaves no stored state.

use std::sync::Arc;

use chrono::NaiveDate;
use digest_core::{Category, DigestConfig, DigestEmail, TAXONOMY};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use super::classify::{classify, EmptyInputError};
use super::persist::{distinct_source_emails, persist_digest, DigestStore, DigestTarget, PersistenceError};
use super::synthesize::{NarrativeSynthesizer, SynthesisDegraded};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Classification failed: {0}")]
    EmptyInput(#[from] EmptyInputError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

impl PipelineError {
    /// The stage a run was in when it failed with this error.
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::EmptyInput(_) => PipelineStage::Classifying,
            PipelineError::Persistence(_) => PipelineStage::Persisting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Classifying,
    Synthesizing,
    Persisting,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn can_transition_to(self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        matches!(
            (self, next),
            (Classifying, Synthesizing)
                | (Classifying, Failed)
                | (Synthesizing, Persisting)
                | (Persisting, Done)
                | (Persisting, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Classifying => "classifying",
            PipelineStage::Synthesizing => "synthesizing",
            PipelineStage::Persisting => "persisting",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }
}

/// Stages visited by one run, in order.
#[derive(Debug, Clone)]
struct StageTracker {
    visited: Vec<PipelineStage>,
}

impl StageTracker {
    fn start() -> Self {
        tracing::info!(stage = PipelineStage::Classifying.as_str(), "Pipeline stage");
        Self {
            visited: vec![PipelineStage::Classifying],
        }
    }

    fn current(&self) -> PipelineStage {
        self.visited
            .last()
            .copied()
            .unwrap_or(PipelineStage::Classifying)
    }

    fn advance(&mut self, next: PipelineStage) {
        let current = self.current();
        debug_assert!(
            current.can_transition_to(next),
            "illegal stage transition {:?} -> {:?}",
            current,
            next
        );
        if next == PipelineStage::Failed {
            tracing::error!(from = current.as_str(), "Pipeline failed");
        } else {
            tracing::info!(stage = next.as_str(), "Pipeline stage");
        }
        self.visited.push(next);
    }
}

/// One (user, day) to build a thematic digest for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestJob {
    pub user_id: String,
    pub digest_date: NaiveDate,
    /// The daily email digest the emails came from, if there is one.
    pub email_digest_id: Option<i64>,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub digest_id: i64,
    pub sections: usize,
    pub total_source_emails: usize,
    pub degraded: Vec<SynthesisDegraded>,
    pub stages: Vec<PipelineStage>,
}

#[derive(Clone)]
pub struct ThematicPipeline {
    synthesizer: NarrativeSynthesizer,
    store: Arc<dyn DigestStore>,
    taxonomy: &'static [Category],
    top_keywords: usize,
    processing_method: String,
}

impl ThematicPipeline {
    pub fn new(
        synthesizer: NarrativeSynthesizer,
        store: Arc<dyn DigestStore>,
        top_keywords: usize,
        processing_method: impl Into<String>,
    ) -> Self {
        Self {
            synthesizer,
            store,
            taxonomy: TAXONOMY,
            top_keywords,
            processing_method: processing_method.into(),
        }
    }

    pub fn from_config(
        synthesizer: NarrativeSynthesizer,
        store: Arc<dyn DigestStore>,
        config: &DigestConfig,
    ) -> Self {
        Self::new(
            synthesizer,
            store,
            config.pipeline.top_keywords,
            config.pipeline.processing_method.clone(),
        )
    }

    /// Swap the category list, mainly for tests.
    pub fn with_taxonomy(mut self, taxonomy: &'static [Category]) -> Self {
        self.taxonomy = taxonomy;
        self
    }

    /// Process `emails` into a thematic digest and return its id.
    pub async fn process(&self, job: &DigestJob, emails: &[DigestEmail]) -> Result<i64, PipelineError> {
        self.run(job, emails).await.map(|report| report.digest_id)
    }

    /// Like `process`, but reports which clusters fell back and the stages
    /// the run passed through.
    pub async fn run(&self, job: &DigestJob, emails: &[DigestEmail]) -> Result<PipelineReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "thematic_digest",
            run_id = %run_id,
            user_id = %job.user_id,
            digest_date = %job.digest_date,
        );

        self.run_stages(run_id, job, emails).instrument(span).await
    }

    async fn run_stages(
        &self,
        run_id: Uuid,
        job: &DigestJob,
        emails: &[DigestEmail],
    ) -> Result<PipelineReport, PipelineError> {
        let mut stages = StageTracker::start();

        // Classifying. Empty input is rejected before the classifier runs.
        let classified = if emails.is_empty() {
            Err(EmptyInputError)
        } else {
            classify(emails, self.taxonomy, self.top_keywords)
        };
        let clusters = match classified {
            Ok(clusters) => clusters,
            Err(e) => {
                stages.advance(PipelineStage::Failed);
                tracing::warn!(error = %e, "No emails for thematic digest");
                return Err(e.into());
            }
        };
        tracing::info!(
            emails = emails.len(),
            clusters = clusters.len(),
            "Emails classified"
        );

        // Synthesizing
        stages.advance(PipelineStage::Synthesizing);
        let summaries = self.synthesizer.synthesize_all(clusters).await;
        let degraded: Vec<SynthesisDegraded> = summaries.iter().filter_map(|s| s.degraded.clone()).collect();
        if !degraded.is_empty() {
            tracing::warn!(
                degraded = degraded.len(),
                sections = summaries.len(),
                "Some themes use fallback narratives"
            );
        }

        // Persisting
        stages.advance(PipelineStage::Persisting);
        let target = DigestTarget {
            user_id: job.user_id.clone(),
            digest_date: job.digest_date,
            email_digest_id: job.email_digest_id,
            processing_method: self.processing_method.clone(),
        };
        let digest_id = match persist_digest(self.store.as_ref(), &target, &summaries).await {
            Ok(id) => id,
            Err(e) => {
                stages.advance(PipelineStage::Failed);
                tracing::error!(error = %e, "Failed to store thematic digest");
                return Err(e.into());
            }
        };

        stages.advance(PipelineStage::Done);

        Ok(PipelineReport {
            run_id,
            digest_id,
            sections: summaries.len(),
            total_source_emails: distinct_source_emails(&summaries),
            degraded,
            stages: stages.visited,
        })
    }
}
