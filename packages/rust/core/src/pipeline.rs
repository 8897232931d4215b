//! End-to-end run: knowledge → prefix stages → per-field loops → document.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use styleguide_shared::{
    DEFAULT_FIELDS, FinalFieldResult, PipelineConfig, Result, StyleGuideDocument, StyleGuideError,
};

use crate::aggregate::{DocumentSink, aggregate};
use crate::capability::{GenerativeCapability, Payload};
use crate::executor::{StageExecutor, StageResult};
use crate::graph::{PipelineGraph, PrefixNode};
use crate::knowledge::{KnowledgeResolver, KnowledgeStore};
use crate::revise::ReviseLoop;
use crate::stages::{self, keys};

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub category: String,
    pub product_type: String,
    /// Hint for product-type analysis. Schema inference has the last word.
    pub fields_needed: Vec<String>,
}

impl RunRequest {
    /// A request with the default field hint.
    pub fn new(category: impl Into<String>, product_type: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            product_type: product_type.into(),
            fields_needed: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        if !fields.is_empty() {
            self.fields_needed = fields;
        }
        self
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after every prefix stage attempt.
    fn stage_finished(&self, stage: &str, attempt: u32, success: bool);
    /// Called as each field loop completes.
    fn field_finished(&self, field: &str, current: usize, total: usize);
    /// Called when the document is ready.
    fn done(&self, document: &StyleGuideDocument);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn stage_finished(&self, _stage: &str, _attempt: u32, _success: bool) {}
    fn field_finished(&self, _field: &str, _current: usize, _total: usize) {}
    fn done(&self, _document: &StyleGuideDocument) {}
}

/// The orchestration engine. Build once, run many times.
pub struct Pipeline {
    graph: Arc<PipelineGraph>,
    executor: Arc<StageExecutor>,
    resolver: KnowledgeResolver,
    sink: Option<Arc<dyn DocumentSink>>,
    config: PipelineConfig,
}

impl Pipeline {
    /// A pipeline over the standard graph. Documents are not persisted
    /// unless a sink is attached.
    pub fn new(
        capability: Arc<dyn GenerativeCapability>,
        knowledge: Arc<dyn KnowledgeStore>,
        config: PipelineConfig,
    ) -> Result<Self> {
        Ok(Self {
            graph: Arc::new(PipelineGraph::standard()?),
            executor: Arc::new(StageExecutor::new(capability, config.stage_timeout)),
            resolver: KnowledgeResolver::new(knowledge, config.knowledge_timeout),
            sink: None,
            config,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn DocumentSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_graph(mut self, graph: PipelineGraph) -> Self {
        self.graph = Arc::new(graph);
        self
    }

    /// Run the pipeline for one (category, product type).
    ///
    /// Returns a complete document, possibly with fields flagged
    /// unresolved, or the single error that stopped the run.
    #[instrument(skip_all, fields(category = %request.category, product_type = %request.product_type))]
    pub async fn run(
        &self,
        request: RunRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<StyleGuideDocument> {
        let start = Instant::now();
        if request.category.trim().is_empty() || request.product_type.trim().is_empty() {
            return Err(StyleGuideError::validation(
                "category and product type must not be empty",
            ));
        }
        let request = if request.fields_needed.is_empty() {
            RunRequest::new(request.category, request.product_type)
        } else {
            request
        };

        info!(fields_needed = ?request.fields_needed, "starting style guide run");

        // --- Phase 1: Shared prefix ---
        progress.phase("Running shared stages");
        let mut context = Payload::new();
        context.insert(keys::CATEGORY.into(), json!(request.category));
        context.insert(keys::PRODUCT_TYPE.into(), json!(request.product_type));
        context.insert(keys::FIELDS_NEEDED.into(), json!(request.fields_needed));

        let mut succeeded: HashSet<String> = HashSet::new();
        let mut fields: Vec<String> = Vec::new();
        for node in self.graph.execution_order() {
            if let Some(dep) = node.depends_on.iter().find(|d| !succeeded.contains(*d)) {
                return Err(StyleGuideError::PrefixFailure {
                    stage: node.name().to_string(),
                    attempts: 0,
                    reason: format!("dependency '{dep}' did not succeed"),
                });
            }

            progress.phase(&format!("Stage: {}", node.name()));
            let result = self.run_prefix_node(node, &request, &mut context, progress).await?;
            if node.declares_fields {
                fields = stages::declared_fields(&result);
            }
            context.extend(result.output);
            succeeded.insert(node.name().to_string());
        }

        info!(fields = ?fields, "schema declared");

        // --- Phase 2: Per-field loops ---
        progress.phase(&format!("Generating {} field guides", fields.len()));
        let results = self.run_fields(&fields, Arc::new(context), progress).await?;

        // --- Phase 3: Aggregate & persist ---
        progress.phase("Aggregating");
        let document = aggregate(&request.category, &request.product_type, &fields, results)?;

        if let Some(sink) = &self.sink {
            progress.phase("Persisting");
            sink.persist(&document).await?;
        }

        progress.done(&document);
        info!(
            record_id = %document.id,
            fields = document.fields.len(),
            unresolved = document.unresolved_fields().len(),
            elapsed_ms = start.elapsed().as_millis(),
            "style guide run complete"
        );
        Ok(document)
    }

    /// Run one prefix node within its retry budget.
    async fn run_prefix_node(
        &self,
        node: &PrefixNode,
        request: &RunRequest,
        context: &mut Payload,
        progress: &dyn ProgressReporter,
    ) -> Result<StageResult> {
        let attempts = self.config.prefix_retries.saturating_add(1);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            if node.loads_knowledge {
                match self
                    .resolver
                    .resolve_bundle(&request.category, &request.product_type)
                    .await
                {
                    Ok(bundle) => {
                        debug!(
                            baseline = ?bundle.baseline.matched,
                            legal = ?bundle.legal.matched,
                            "guidance resolved"
                        );
                        context.insert(keys::BASELINE_GUIDELINES.into(), json!(bundle.baseline.text));
                        context.insert(keys::LEGAL_GUIDELINES.into(), json!(bundle.legal.text));
                    }
                    Err(e) => {
                        warn!(stage = node.name(), attempt, error = %e, "knowledge lookup failed");
                        progress.stage_finished(node.name(), attempt, false);
                        last_reason = e.to_string();
                        continue;
                    }
                }
            }

            let result = self.executor.execute(&node.contract, context).await?;
            let outcome = if !result.success {
                Err(result.reason_or_default().to_string())
            } else if node.declares_fields && stages::declared_fields(&result).is_empty() {
                Err(format!("'{}' contains no usable field names", keys::FIELDS))
            } else {
                Ok(())
            };

            progress.stage_finished(node.name(), attempt, outcome.is_ok());
            match outcome {
                Ok(()) => return Ok(result),
                Err(reason) => {
                    warn!(stage = node.name(), attempt, %reason, "prefix stage attempt failed");
                    last_reason = reason;
                }
            }
        }

        let err = StyleGuideError::PrefixFailure {
            stage: node.name().to_string(),
            attempts,
            reason: last_reason,
        };
        error!(error = %err, "aborting run");
        Err(err)
    }

    /// Fan out one revise loop per field, bounded by the concurrency limit.
    async fn run_fields(
        &self,
        fields: &[String],
        context: Arc<Payload>,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<FinalFieldResult>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_fields.max(1)));
        let revise = ReviseLoop::new(
            self.executor.clone(),
            Arc::new(self.graph.subflow().clone()),
            self.config.max_review_iterations,
        );

        let mut set: JoinSet<(String, Result<Option<FinalFieldResult>>)> = JoinSet::new();
        for field in fields {
            let field = field.clone();
            let sem = semaphore.clone();
            let revise = revise.clone();
            let context = context.clone();
            set.spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let err = StyleGuideError::StageFailure {
                            stage: stages::CONSTRUCTION.into(),
                            reason: format!("field scheduler closed: {e}"),
                        };
                        return (field, Err(err));
                    }
                };
                let outcome = revise.run(&field, &context).await;
                (field, outcome)
            });
        }

        let total = fields.len();
        let mut results = Vec::with_capacity(total);
        let mut finished = 0usize;
        while let Some(joined) = set.join_next().await {
            finished += 1;
            match joined {
                Ok((field, Ok(Some(result)))) => {
                    progress.field_finished(&field, finished, total);
                    results.push(result);
                }
                Ok((field, Ok(None))) => {
                    warn!(%field, "field produced no draft");
                    progress.field_finished(&field, finished, total);
                }
                Ok((field, Err(e))) if e.is_fatal() => {
                    error!(%field, error = %e, "fatal error in field loop, aborting siblings");
                    // Dropping the set aborts every in-flight loop
                    return Err(e);
                }
                Ok((field, Err(e))) => {
                    warn!(%field, error = %e, "field loop failed");
                    progress.field_finished(&field, finished, total);
                }
                Err(e) => {
                    error!(error = %e, "field task panicked or was cancelled");
                }
            }
        }

        Ok(results)
    }
}
