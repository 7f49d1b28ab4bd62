//! Narrative synthesis: one LLM narrative per cluster
//!
//! Each cluster is sent to the injected `NarrativeBackend` with a compact
//! projection of its emails (sender, subject, summary). Calls for different
//! clusters run concurrently, bounded by `max_concurrent`, and each call is
//! capped by `timeout`.
//!
//! A failed call never fails the run: the cluster gets a templated fallback
//! narrative and a `SynthesisDegraded` record instead.

use std::sync::Arc;
use std::time::Duration;

use digest_core::{
    narrative_deadline, DigestConfig, DigestEmail, EmailProjection, LlmError, NarrativeBackend,
    NarrativeRequest, ThemeEntities,
};
use futures::{stream, StreamExt};

use super::classify::EmailCluster;

/// Keywords named in a fallback narrative.
const FALLBACK_KEYWORDS: usize = 5;

/// Subjects quoted in a fallback narrative.
const FALLBACK_SUBJECTS: usize = 3;

/// Recorded when a cluster's narrative fell back to the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisDegraded {
    pub theme: String,
    pub reason: String,
}

/// One theme, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct ThematicSummary {
    pub theme: String,
    pub narrative: String,
    pub confidence: u8,
    pub keywords: Vec<String>,
    pub entities: ThemeEntities,
    pub emails: Vec<DigestEmail>,
    pub degraded: Option<SynthesisDegraded>,
}

impl ThematicSummary {
    pub fn fallback_used(&self) -> bool {
        self.degraded.is_some()
    }
}

#[derive(Clone)]
pub struct NarrativeSynthesizer {
    backend: Arc<dyn NarrativeBackend>,
    timeout: Duration,
    max_concurrent: usize,
}

impl NarrativeSynthesizer {
    pub fn new(backend: Arc<dyn NarrativeBackend>, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            backend,
            timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// The per-cluster timeout leaves room for every retry the backend makes.
    pub fn from_config(backend: Arc<dyn NarrativeBackend>, config: &DigestConfig) -> Self {
        Self::new(
            backend,
            narrative_deadline(&config.llm),
            config.pipeline.max_concurrent_syntheses,
        )
    }

    /// Synthesize every cluster. Output order matches input order.
    pub async fn synthesize_all(&self, clusters: Vec<EmailCluster>) -> Vec<ThematicSummary> {
        let mut results: Vec<(usize, ThematicSummary)> =
            stream::iter(clusters.into_iter().enumerate().map(|(index, cluster)| async move {
                (index, self.synthesize(cluster).await)
            }))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Synthesize one cluster, degrading to the fallback on any failure.
    pub async fn synthesize(&self, cluster: EmailCluster) -> ThematicSummary {
        let request = narrative_request(&cluster);

        let outcome = match tokio::time::timeout(self.timeout, self.backend.generate(&request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        };

        let (narrative, degraded) = match outcome {
            Ok(text) if !text.trim().is_empty() => {
                tracing::debug!(
                    theme = %cluster.theme,
                    backend = self.backend.name(),
                    "Narrative generated"
                );
                (text.trim().to_string(), None)
            }
            Ok(_) => degrade(&cluster, LlmError::EmptyContent.to_string()),
            Err(e) => degrade(&cluster, e.to_string()),
        };

        ThematicSummary {
            theme: cluster.theme,
            narrative,
            confidence: cluster.confidence,
            keywords: cluster.keywords,
            entities: ThemeEntities::default(),
            emails: cluster.emails,
            degraded,
        }
    }
}

fn degrade(cluster: &EmailCluster, reason: String) -> (String, Option<SynthesisDegraded>) {
    tracing::warn!(
        theme = %cluster.theme,
        emails = cluster.emails.len(),
        reason = %reason,
        "Narrative synthesis failed, using fallback summary"
    );
    (
        fallback_narrative(cluster),
        Some(SynthesisDegraded {
            theme: cluster.theme.clone(),
            reason,
        }),
    )
}

/// Projection of a cluster sent to the LLM.
pub fn narrative_request(cluster: &EmailCluster) -> NarrativeRequest {
    NarrativeRequest {
        theme: cluster.theme.clone(),
        emails: cluster
            .emails
            .iter()
            .map(|e| EmailProjection {
                sender: e.sender.clone(),
                subject: e.subject.clone(),
                summary: e.summary.clone(),
            })
            .collect(),
    }
}

/// Deterministic templated narrative built from cluster size, top keywords
/// and a few subjects.
pub fn fallback_narrative(cluster: &EmailCluster) -> String {
    let count = cluster.emails.len();
    let noun = if count == 1 { "email" } else { "emails" };

    let mut opening = format!("{} {} in today's digest touched on {}.", count, noun, cluster.theme);

    let keywords: Vec<&str> = cluster
        .keywords
        .iter()
        .take(FALLBACK_KEYWORDS)
        .map(String::as_str)
        .collect();
    if !keywords.is_empty() {
        opening.push_str(&format!(" Recurring topics included {}.", join_natural(&keywords)));
    }

    let subjects: Vec<String> = cluster
        .emails
        .iter()
        .map(|e| e.subject.trim())
        .filter(|s| !s.is_empty())
        .take(FALLBACK_SUBJECTS)
        .map(|s| format!("\"{}\"", s))
        .collect();

    let closing = if subjects.is_empty() {
        "A written overview was not available for this theme; the source emails are listed below."
            .to_string()
    } else {
        let refs: Vec<&str> = subjects.iter().map(String::as_str).collect();
        format!(
            "Headlines included {}. A written overview was not available for this theme; the source emails are listed below.",
            join_natural(&refs)
        )
    };

    format!("{}\n\n{}", opening, closing)
}

/// "a", "a and b", "a, b and c"
fn join_natural(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [only] => only.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use digest_core::config::{DatabaseConfig, LlmConfig, PipelineConfig, ServiceConfig};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn email(id: i64, subject: &str) -> DigestEmail {
        DigestEmail {
            id,
            email_digest_id: 1,
            sender: format!("sender{}@example.com", id),
            subject: subject.to_string(),
            summary: format!("summary {}", id),
            topics: vec![],
            keywords: vec![],
        }
    }

    fn cluster(theme: &str, ids: &[i64], keywords: &[&str]) -> EmailCluster {
        EmailCluster {
            theme: theme.to_string(),
            emails: ids.iter().map(|id| email(*id, &format!("Subject {}", id))).collect(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            confidence: 72,
        }
    }

    /// Fails for the listed themes, echoes the theme otherwise.
    struct ScriptedBackend {
        failing: HashSet<String>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(failing: &[&str], delay: Duration) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NarrativeBackend for ScriptedBackend {
        async fn generate(&self, request: &NarrativeRequest) -> Result<String, LlmError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&request.theme) {
                return Err(LlmError::Api {
                    code: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(format!("Narrative about {}.", request.theme))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn test_live_narrative_passes_through() {
        let backend = Arc::new(ScriptedBackend::new(&[], Duration::ZERO));
        let synth = NarrativeSynthesizer::new(backend, Duration::from_secs(5), 3);

        let summary = synth.synthesize(cluster("Politics", &[1, 2], &["senate"])).await;

        assert_eq!(summary.narrative, "Narrative about Politics.");
        assert!(!summary.fallback_used());
        assert_eq!(summary.confidence, 72);
        assert_eq!(summary.keywords, vec!["senate"]);
        assert_eq!(summary.emails.len(), 2);
        assert!(summary.entities.is_empty());
    }

    #[tokio::test]
    async fn test_failure_degrades_to_fallback() {
        let backend = Arc::new(ScriptedBackend::new(&["Politics"], Duration::ZERO));
        let synth = NarrativeSynthesizer::new(backend, Duration::from_secs(5), 3);

        let c = cluster("Politics", &[1], &["senate"]);
        let expected = fallback_narrative(&c);
        let summary = synth.synthesize(c).await;

        assert_eq!(summary.narrative, expected);
        assert_eq!(summary.confidence, 72);
        let degraded = summary.degraded.expect("should be degraded");
        assert_eq!(degraded.theme, "Politics");
        assert!(degraded.reason.contains("503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_to_fallback() {
        let backend = Arc::new(ScriptedBackend::new(&[], Duration::from_secs(120)));
        let synth = NarrativeSynthesizer::new(backend, Duration::from_secs(30), 3);

        let summary = synth.synthesize(cluster("Sports", &[1], &[])).await;

        assert!(summary.fallback_used());
        assert!(summary.degraded.unwrap().reason.contains("timed out after 30s"));
    }

    fn config_with_llm_timeout(seconds: u64, max_retries: usize) -> DigestConfig {
        DigestConfig {
            service: ServiceConfig {
                log_level: "info".to_string(),
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/digest".to_string(),
                max_connections: 1,
            },
            llm: LlmConfig {
                timeout_seconds: seconds,
                max_retries,
                ..LlmConfig::default()
            },
            pipeline: PipelineConfig::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_config_timeout_leaves_room_for_retries() {
        let config = config_with_llm_timeout(5, 2);
        // Slower than a single 5s attempt, well inside 3 × 5s + 2 × 10s.
        let backend = Arc::new(ScriptedBackend::new(&[], Duration::from_secs(12)));
        let synth = NarrativeSynthesizer::from_config(backend, &config);

        assert_eq!(synth.timeout, Duration::from_secs(35));
        let summary = synth.synthesize(cluster("Politics", &[1], &[])).await;
        assert!(!summary.fallback_used());
    }

    #[tokio::test]
    async fn test_whitespace_narrative_counts_as_failure() {
        struct Blank;

        #[async_trait]
        impl NarrativeBackend for Blank {
            async fn generate(&self, _request: &NarrativeRequest) -> Result<String, LlmError> {
                Ok("   \n".to_string())
            }
            fn name(&self) -> &str {
                "blank"
            }
        }

        let synth = NarrativeSynthesizer::new(Arc::new(Blank), Duration::from_secs(5), 1);
        let summary = synth.synthesize(cluster("Media", &[1], &[])).await;
        assert!(summary.fallback_used());
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesize_all_keeps_order_and_bounds_concurrency() {
        let backend = Arc::new(ScriptedBackend::new(&["Sports"], Duration::from_millis(50)));
        let synth = NarrativeSynthesizer::new(backend.clone(), Duration::from_secs(5), 2);

        let clusters = vec![
            cluster("Politics", &[1], &[]),
            cluster("Sports", &[2], &[]),
            cluster("Technology", &[3], &[]),
            cluster("Media", &[4], &[]),
            cluster("Other", &[5], &[]),
        ];

        let summaries = synth.synthesize_all(clusters).await;

        let themes: Vec<&str> = summaries.iter().map(|s| s.theme.as_str()).collect();
        assert_eq!(themes, vec!["Politics", "Sports", "Technology", "Media", "Other"]);
        assert!(summaries[1].fallback_used());
        assert_eq!(summaries.iter().filter(|s| s.fallback_used()).count(), 1);
        assert!(backend.peak.load(Ordering::SeqCst) <= 2);
        assert!(backend.peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_narrative_request_projection() {
        let request = narrative_request(&cluster("Politics", &[1, 2], &[]));
        assert_eq!(request.theme, "Politics");
        assert_eq!(request.emails.len(), 2);
        assert_eq!(request.emails[0].subject, "Subject 1");
        assert_eq!(request.emails[1].sender, "sender2@example.com");
    }

    #[test]
    fn test_fallback_narrative_template() {
        let c = cluster("Technology", &[1, 2, 3, 4], &["ai", "chips", "cloud"]);
        let text = fallback_narrative(&c);
        assert_eq!(
            text,
            "4 emails in today's digest touched on Technology. Recurring topics included ai, chips and cloud.\n\n\
             Headlines included \"Subject 1\", \"Subject 2\" and \"Subject 3\". \
             A written overview was not available for this theme; the source emails are listed below."
        );
        assert_eq!(text, fallback_narrative(&c), "fallback must be deterministic");
    }

    #[test]
    fn test_fallback_narrative_single_email_no_keywords() {
        let mut c = cluster("Other", &[9], &[]);
        c.emails[0].subject = "  ".to_string();
        let text = fallback_narrative(&c);
        assert!(text.starts_with("1 email in today's digest touched on Other."));
        assert!(!text.contains("Recurring topics"));
        assert!(!text.contains("Headlines"));
    }

    #[test]
    fn test_join_natural() {
        assert_eq!(join_natural(&[]), "");
        assert_eq!(join_natural(&["a"]), "a");
        assert_eq!(join_natural(&["a", "b"]), "a and b");
        assert_eq!(join_natural(&["a", "b", "c"]), "a, b and c");
    }
}
