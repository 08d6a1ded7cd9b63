//! Rolling summarizer
//!
//! Folds the oldest stretch of the message buffer into a durable summary.
//! The ordering contract is the whole point: the summary is appended to
//! the summary store BEFORE the covered messages are trimmed from the
//! buffer, so a crash between the two steps loses nothing: the messages
//! are still in the buffer and the next run re-covers them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use concierge_config::SummarySettings;
use concierge_core::{Deadline, LlmClient};
use concierge_redact::{RedactionMode, Redactor};

use crate::buffer::BufferStore;
use crate::error::MemoryError;
use crate::summary::{Summary, SummaryStore};
use crate::tokens::estimate_tokens;

const MAP_CHUNK: usize = 5;
const FALLBACK_MAX_CHARS: usize = 200;

/// Map-reduce summarization over the buffer's oldest messages.
pub struct RollingSummarizer {
    buffer: Arc<BufferStore>,
    summaries: Arc<SummaryStore>,
    redactor: Arc<Redactor>,
    llm: Arc<dyn LlmClient>,
    settings: SummarySettings,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl RollingSummarizer {
    pub fn new(
        buffer: Arc<BufferStore>,
        summaries: Arc<SummaryStore>,
        redactor: Arc<Redactor>,
        llm: Arc<dyn LlmClient>,
        settings: SummarySettings,
    ) -> Self {
        Self {
            buffer,
            summaries,
            redactor,
            llm,
            settings,
            in_flight: DashMap::new(),
        }
    }

    /// Summarize and trim the oldest `summary.chunk` messages of the
    /// session.
    ///
    /// At most one summarization runs per session; a concurrent trigger
    /// waits for the running one and returns `None` without doing work.
    pub async fn summarize_oldest(
        &self,
        session_id: &str,
        deadline: Deadline,
    ) -> Result<Option<Summary>, MemoryError> {
        let gate = self
            .in_flight
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = match gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                // Coalesce: wait for the in-flight run, then no-op.
                let _wait = gate.lock().await;
                return Ok(None);
            }
        };

        let oldest = self.buffer.oldest(session_id, self.settings.chunk).await?;
        if oldest.is_empty() {
            return Ok(None);
        }

        let redacted: Vec<String> = oldest
            .iter()
            .map(|m| {
                let outcome = self
                    .redactor
                    .redact(&m.message.content, RedactionMode::Hash);
                format!("{}: {}", m.message.role.as_str(), outcome.redacted_text)
            })
            .collect();

        let (text, degraded) = match self.map_reduce(&redacted, deadline).await {
            Ok(text) => (text, false),
            Err(err) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %err,
                    "summarization model unavailable, using truncation fallback"
                );
                (fallback_summary(&redacted), true)
            }
        };

        let mut summary = Summary::new(session_id, self.clamp(text));
        summary.covered_message_ids = oldest.iter().map(|m| m.seq).collect();
        summary.degraded = degraded;
        summary.token_estimate = estimate_tokens(&summary.text);

        // Durability order: append first, trim only after the append
        // succeeded. On failure the buffer still holds every message.
        self.summaries.append(summary.clone()).await?;
        self.buffer.trim_oldest(session_id, oldest.len()).await?;

        tracing::info!(
            session_id = %session_id,
            covered = oldest.len(),
            tokens = summary.token_estimate,
            degraded,
            "rolling summary written"
        );
        Ok(Some(summary))
    }

    async fn map_reduce(
        &self,
        lines: &[String],
        deadline: Deadline,
    ) -> Result<String, MemoryError> {
        let mut partials = Vec::new();
        for chunk in lines.chunks(MAP_CHUNK) {
            let prompt = format!(
                "Summarize this conversation excerpt in at most {} tokens. \
                 Keep concrete facts, constraints and decisions; drop pleasantries.\n\n{}",
                self.settings.max_len,
                chunk.join("\n")
            );
            partials.push(self.llm.complete(&prompt, deadline).await?);
        }

        if partials.len() == 1 {
            return Ok(partials.remove(0));
        }

        let prompt = format!(
            "Merge these partial summaries into one summary between {} and {} tokens. \
             Keep every concrete fact; remove repetition.\n\n{}",
            self.settings.min_len,
            self.settings.max_len,
            partials.join("\n---\n")
        );
        Ok(self.llm.complete(&prompt, deadline).await?)
    }

    /// Hard upper bound on summary length, in case the model ignores the
    /// instruction.
    fn clamp(&self, text: String) -> String {
        let max_chars = self.settings.max_len * 4;
        if text.chars().count() <= max_chars {
            return text;
        }
        text.chars().take(max_chars).collect()
    }
}

/// Concatenate-and-truncate fallback when the model is unavailable.
fn fallback_summary(lines: &[String]) -> String {
    let joined = lines.join(" | ");
    if joined.chars().count() <= FALLBACK_MAX_CHARS {
        joined
    } else {
        joined.chars().take(FALLBACK_MAX_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferStore;
    use crate::kv::InMemoryKv;
    use crate::summary::{InMemorySummaryBackend, SummaryBackend, SummaryStore};
    use async_trait::async_trait;
    use concierge_config::BufferSettings;
    use concierge_core::{CollaboratorError, Message};
    use std::time::Duration;

    struct ScriptedLlm {
        reply: Option<String>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(
            &self,
            _prompt: &str,
            _deadline: Deadline,
        ) -> Result<String, CollaboratorError> {
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(CollaboratorError::io("llm", "model offline")),
            }
        }

        async fn classify(
            &self,
            _prompt: &str,
            _schema: &serde_json::Value,
            _deadline: Deadline,
        ) -> Result<serde_json::Value, CollaboratorError> {
            Err(CollaboratorError::io("llm", "not used"))
        }
    }

    struct FailingSummaryBackend;

    #[async_trait]
    impl SummaryBackend for FailingSummaryBackend {
        async fn append(&self, _summary: &Summary) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::io("summaries", "storage outage"))
        }

        async fn list(&self, _session_id: &str) -> Result<Vec<Summary>, CollaboratorError> {
            Ok(Vec::new())
        }
    }

    fn buffer() -> Arc<BufferStore> {
        Arc::new(BufferStore::new(
            Arc::new(InMemoryKv::new()),
            BufferSettings {
                max_messages: 30,
                max_tokens: 4000,
                ttl_secs: 3600,
            },
        ))
    }

    fn summarizer(
        buffer: Arc<BufferStore>,
        backend: Arc<dyn SummaryBackend>,
        llm_reply: Option<String>,
    ) -> (RollingSummarizer, Arc<SummaryStore>) {
        let summaries = Arc::new(SummaryStore::new(backend));
        let summarizer = RollingSummarizer::new(
            buffer,
            summaries.clone(),
            Arc::new(Redactor::new()),
            Arc::new(ScriptedLlm { reply: llm_reply }),
            SummarySettings::default(),
        );
        (summarizer, summaries)
    }

    async fn fill(buffer: &BufferStore, session: &str, n: usize) {
        for i in 0..n {
            buffer
                .append(session, Message::user(format!("the user said thing number {}", i)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_summary_durable_before_trim() {
        let buffer = buffer();
        let (summarizer, summaries) = summarizer(
            buffer.clone(),
            Arc::new(InMemorySummaryBackend::new()),
            Some("the user enumerated twelve things".to_string()),
        );
        fill(&buffer, "s1", 12).await;

        let summary = summarizer
            .summarize_oldest("s1", Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.covered_message_ids.len(), 10);
        assert!(!summary.degraded);
        // Oldest 10 trimmed, 2 remain.
        assert_eq!(buffer.len("s1").await.unwrap(), 2);
        assert_eq!(summaries.all("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_crash_before_durable_write_keeps_messages() {
        let buffer = buffer();
        let (summarizer, _summaries) = summarizer(
            buffer.clone(),
            Arc::new(FailingSummaryBackend),
            Some("irrelevant".to_string()),
        );
        fill(&buffer, "s1", 12).await;

        let result = summarizer
            .summarize_oldest("s1", Deadline::after(Duration::from_secs(5)))
            .await;

        assert!(result.is_err());
        // Nothing trimmed: every message is still readable.
        assert_eq!(buffer.len("s1").await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_model_outage_degrades_but_still_trims() {
        let buffer = buffer();
        let (summarizer, summaries) =
            summarizer(buffer.clone(), Arc::new(InMemorySummaryBackend::new()), None);
        fill(&buffer, "s1", 12).await;

        let summary = summarizer
            .summarize_oldest("s1", Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();

        assert!(summary.degraded);
        assert!(summary.text.chars().count() <= 200);
        // The trim still proceeded.
        assert_eq!(buffer.len("s1").await.unwrap(), 2);
        assert_eq!(summaries.all("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_trigger_coalesces() {
        let buffer = buffer();
        let (summarizer, _summaries) = summarizer(
            buffer.clone(),
            Arc::new(InMemorySummaryBackend::new()),
            Some("summary".to_string()),
        );
        fill(&buffer, "s1", 20).await;

        let summarizer = Arc::new(summarizer);
        let a = {
            let s = summarizer.clone();
            tokio::spawn(async move {
                s.summarize_oldest("s1", Deadline::after(Duration::from_secs(5)))
                    .await
            })
        };
        let b = {
            let s = summarizer.clone();
            tokio::spawn(async move {
                s.summarize_oldest("s1", Deadline::after(Duration::from_secs(5)))
                    .await
            })
        };

        let results = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
        let produced = results.iter().filter(|r| r.is_some()).count();
        // One run did the work; the coalesced one returned None (or, if
        // the first finished before the second started, both ran on
        // disjoint chunks; either way never the same messages twice).
        assert!(produced >= 1);
        let remaining = buffer.len("s1").await.unwrap();
        assert!(remaining == 10 || remaining == 0);
    }

    #[tokio::test]
    async fn test_empty_buffer_is_noop() {
        let buffer = buffer();
        let (summarizer, _summaries) = summarizer(
            buffer.clone(),
            Arc::new(InMemorySummaryBackend::new()),
            Some("summary".to_string()),
        );

        let result = summarizer
            .summarize_oldest("s1", Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_pii_redacted_before_summarization() {
        let buffer = buffer();
        let backend = Arc::new(InMemorySummaryBackend::new());
        // Model offline so the fallback echoes the (redacted) lines.
        let (summarizer, summaries) = summarizer(buffer.clone(), backend, None);

        buffer
            .append("s1", Message::user("my email is anna@example.ch"))
            .await
            .unwrap();

        summarizer
            .summarize_oldest("s1", Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap();

        let summary = summaries.current("s1").await.unwrap().unwrap();
        assert!(!summary.text.contains("anna@example.ch"));
        assert!(summary.text.contains("[EMAIL_"));
    }
}
