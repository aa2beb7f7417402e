//! ExtractionPipeline: segment → agents → aggregate → normalize → validate.
//!
//! Concurrency:
//! - every span of a document is processed concurrently;
//! - every enabled agent of a span runs as its own task, and the
//!   aggregator only runs once all of them have finished (barrier);
//! - a batch fans documents out over a bounded worker pool.
//!
//! Cancellation (explicit or via the document deadline) stops waiting.
//! Agent tasks still running are detached, not aborted, and their results
//! are dropped; the record is built from what had already completed.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::agents::{agent_for, AgentRunner};
use super::aggregator::ResultAggregator;
use super::error::PipelineError;
use super::llm::{LlmClient, TokenBucket};
use super::normalize::OntologyNormalizer;
use super::segmenter::PatientSegmenter;
use super::stats::{AgentStats, PipelineStats};
use super::validation::ValidationLayer;
use crate::config::{ConfigError, PipelineConfig};
use crate::models::{
    AgentResult, DocumentSpan, PatientRecord, RejectedRecord, SourceDocument, ValidatedRecord,
    ValidationStatus,
};

// ═══════════════════════════════════════════════════════════
// Cancellation
// ═══════════════════════════════════════════════════════════

/// Cloneable cancellation signal shared by every task of a run.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the handle is cancelled or the deadline passes.
async fn cancelled(mut rx: watch::Receiver<bool>, deadline: Option<Instant>) {
    let signal = async move {
        let sender_gone = rx.wait_for(|c| *c).await.is_err();
        if sender_gone {
            std::future::pending::<()>().await;
        }
    };
    match deadline {
        Some(at) => {
            tokio::select! {
                _ = signal => {}
                _ = tokio::time::sleep_until(at) => {}
            }
        }
        None => signal.await,
    }
}

// ═══════════════════════════════════════════════════════════
// Outcomes
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct DocumentOutcome {
    pub source_document_id: String,
    pub records: Vec<ValidatedRecord>,
    pub rejected: Vec<RejectedRecord>,
    /// Set when cancellation or the deadline cut agent work short.
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct DocumentFailure {
    pub source_document_id: String,
    pub error: PipelineError,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub documents: Vec<DocumentOutcome>,
    pub failures: Vec<DocumentFailure>,
}

impl BatchOutcome {
    /// All records across documents. Order across documents is not meaningful.
    pub fn records(&self) -> impl Iterator<Item = &ValidatedRecord> {
        self.documents.iter().flat_map(|d| d.records.iter())
    }
}

struct SpanOutcome {
    record: PatientRecord,
    agent_stats: AgentStats,
    discarded: u64,
    cancelled: bool,
}

// ═══════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════

pub struct ExtractionPipeline {
    config: Arc<PipelineConfig>,
    segmenter: PatientSegmenter,
    runners: Vec<AgentRunner>,
    aggregator: ResultAggregator,
    normalizer: Arc<OntologyNormalizer>,
    validator: ValidationLayer,
}

impl ExtractionPipeline {
    /// Build a pipeline. `llm = None` runs every agent pattern-only.
    pub fn new(
        config: PipelineConfig,
        llm: Option<Arc<dyn LlmClient>>,
        normalizer: OntologyNormalizer,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let limiter = Arc::new(TokenBucket::from_config(&config.rate_limit));
        let runners: Vec<AgentRunner> = crate::models::AgentKind::all()
            .iter()
            .filter(|kind| config.is_agent_enabled(**kind))
            .map(|kind| {
                AgentRunner::new(
                    agent_for(*kind),
                    llm.clone(),
                    Arc::clone(&limiter),
                    config.agent_timeout(),
                    &config.model,
                )
            })
            .collect();

        tracing::info!(
            agents = runners.len(),
            llm = llm.is_some(),
            model = %config.model,
            "Extraction pipeline ready"
        );

        Ok(Self {
            aggregator: ResultAggregator::from_config(&config),
            config: Arc::new(config),
            segmenter: PatientSegmenter::new(),
            runners,
            normalizer: Arc::new(normalizer),
            validator: ValidationLayer::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one document. A segmentation error fails only this document.
    pub async fn process_document(
        &self,
        document: &SourceDocument,
        cancel: &CancelHandle,
        stats: &mut PipelineStats,
    ) -> Result<DocumentOutcome, PipelineError> {
        let document_id = document.source_document_id.as_str();

        if cancel.is_cancelled() {
            stats.documents_failed += 1;
            return Err(PipelineError::Cancelled);
        }

        let spans = match self.segmenter.segment(&document.text) {
            Ok(spans) => spans,
            Err(e) => {
                tracing::warn!(document_id, error = %e, "Document failed segmentation");
                stats.documents_failed += 1;
                return Err(e.into());
            }
        };
        stats.spans += spans.len() as u64;
        tracing::info!(document_id, spans = spans.len(), "Processing document");

        let deadline = self.config.document_deadline().map(|d| Instant::now() + d);
        let span_outcomes = join_all(
            spans
                .into_iter()
                .map(|span| self.process_span(Arc::new(span), document_id, cancel, deadline)),
        )
        .await;

        let mut outcome = DocumentOutcome {
            source_document_id: document_id.to_string(),
            ..DocumentOutcome::default()
        };

        for span_outcome in span_outcomes {
            stats.agents += span_outcome.agent_stats;
            stats.agent_results_discarded += span_outcome.discarded;
            outcome.cancelled |= span_outcome.cancelled;

            let mut record = span_outcome.record;
            self.normalizer.normalize_record(&mut record, stats);

            match self.validator.validate(record) {
                Ok(validated) => {
                    match validated.validation_status {
                        ValidationStatus::Flagged => stats.records_flagged += 1,
                        _ => stats.records_valid += 1,
                    }
                    outcome.records.push(validated);
                }
                Err(rejected) => {
                    stats.records_rejected += 1;
                    outcome.rejected.push(rejected);
                }
            }
        }

        stats.documents_processed += 1;
        tracing::info!(
            document_id,
            records = outcome.records.len(),
            rejected = outcome.rejected.len(),
            cancelled = outcome.cancelled,
            "Document complete"
        );
        Ok(outcome)
    }

    /// Run every agent on one span and aggregate once all have returned.
    async fn process_span(
        &self,
        span: Arc<DocumentSpan>,
        document_id: &str,
        cancel: &CancelHandle,
        deadline: Option<Instant>,
    ) -> SpanOutcome {
        let mut tasks: JoinSet<(AgentResult, AgentStats)> = JoinSet::new();
        for runner in &self.runners {
            let runner = runner.clone();
            let span = Arc::clone(&span);
            tasks.spawn(async move {
                let mut agent_stats = AgentStats::default();
                let result = runner.extract(&span, &mut agent_stats).await;
                (result, agent_stats)
            });
        }

        let mut results = Vec::with_capacity(self.runners.len());
        let mut agent_stats = AgentStats::default();
        let mut warnings = Vec::new();
        let mut discarded = 0u64;
        let mut was_cancelled = false;

        let stop = cancelled(cancel.subscribe(), deadline);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                biased;
                next = tasks.join_next() => match next {
                    Some(Ok((result, s))) => {
                        agent_stats += s;
                        results.push(result);
                    }
                    Some(Err(e)) => {
                        tracing::error!(document_id, patient = %span.patient_label, error = %e, "Agent task failed");
                        warnings.push(format!("An agent task failed: {e}"));
                    }
                    None => break,
                },
                _ = &mut stop => {
                    discarded = tasks.len() as u64;
                    was_cancelled = true;
                    // Let in-flight calls finish on their own; their output is dropped.
                    tasks.detach_all();
                    tracing::warn!(
                        document_id,
                        patient = %span.patient_label,
                        discarded,
                        "Extraction cancelled, aggregating completed agents only"
                    );
                    warnings.push(format!(
                        "Extraction cancelled, {discarded} agent result(s) discarded"
                    ));
                    break;
                }
            }
        }

        let mut record = self.aggregator.aggregate(&span, document_id, results);
        record.warnings.extend(warnings);

        SpanOutcome {
            record,
            agent_stats,
            discarded,
            cancelled: was_cancelled,
        }
    }

    /// Process documents on a bounded worker pool. Failures are collected
    /// per document and never abort the batch.
    pub async fn process_batch(
        self: &Arc<Self>,
        documents: Vec<SourceDocument>,
        cancel: &CancelHandle,
        stats: &mut PipelineStats,
    ) -> BatchOutcome {
        let total = documents.len();
        let pool = Arc::new(Semaphore::new(self.config.max_concurrent_documents));
        tracing::info!(
            documents = total,
            workers = self.config.max_concurrent_documents,
            "Starting batch"
        );

        let mut tasks = Vec::with_capacity(total);
        for document in documents {
            let pipeline = Arc::clone(self);
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            let document_id = document.source_document_id.clone();

            let task = tokio::spawn(async move {
                let _permit = pool.acquire_owned().await.ok();
                let mut doc_stats = PipelineStats::default();
                let result = pipeline.process_document(&document, &cancel, &mut doc_stats).await;
                (result, doc_stats)
            });
            tasks.push((document_id, task));
        }

        let mut outcome = BatchOutcome::default();
        for (source_document_id, task) in tasks {
            match task.await {
                Ok((Ok(document), doc_stats)) => {
                    *stats += doc_stats;
                    outcome.documents.push(document);
                }
                Ok((Err(error), doc_stats)) => {
                    *stats += doc_stats;
                    outcome.failures.push(DocumentFailure {
                        source_document_id,
                        error,
                    });
                }
                Err(e) => {
                    tracing::error!(document_id = %source_document_id, error = %e, "Document task failed");
                    stats.documents_failed += 1;
                    outcome.failures.push(DocumentFailure {
                        source_document_id,
                        error: PipelineError::TaskFailed(e.to_string()),
                    });
                }
            }
        }

        tracing::info!(
            documents = outcome.documents.len(),
            failed = outcome.failures.len(),
            "Batch complete"
        );
        outcome
    }
}
