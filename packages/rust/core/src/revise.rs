//! Bounded construct → review → refine loop for one field.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use styleguide_shared::{FinalFieldResult, Result, StyleGuideError};

use crate::capability::Payload;
use crate::executor::{StageExecutor, StageResult};
use crate::graph::FieldSubflow;
use crate::stages::{self, keys};

/// Outcome of one review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    NeedsRevision,
}

impl Verdict {
    /// Interpret a review stage result.
    ///
    /// Any reported legal issue asks for revision, whatever the verdict
    /// says. Without issues, `approved` or no verdict approves. A malformed
    /// review never approves.
    pub fn from_review(review: &StageResult) -> Self {
        if !review.success || !review.list(keys::LEGAL_ISSUES_FOUND).is_empty() {
            return Self::NeedsRevision;
        }
        match review.text(keys::VERDICT).map(str::trim) {
            Some(v) if !v.is_empty() && !v.eq_ignore_ascii_case("approved") => {
                Self::NeedsRevision
            }
            _ => Self::Approved,
        }
    }
}

/// Mutable state of one field's loop.
#[derive(Debug, Clone)]
pub struct FieldTask {
    pub field: String,
    pub current_draft: Option<String>,
    pub verdict: Option<Verdict>,
    pub revision_count: u32,
    pub drafts_generated: u32,
    pub notes: Vec<String>,
}

impl FieldTask {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            current_draft: None,
            verdict: None,
            revision_count: 0,
            drafts_generated: 0,
            notes: Vec::new(),
        }
    }

    fn input(&self, context: &Payload) -> Payload {
        let mut input = context.clone();
        input.insert(keys::FIELD.into(), json!(self.field));
        input
    }
}

/// Runs the subflow for one field. Cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct ReviseLoop {
    executor: Arc<StageExecutor>,
    subflow: Arc<FieldSubflow>,
    max_iterations: u32,
}

impl ReviseLoop {
    pub fn new(executor: Arc<StageExecutor>, subflow: Arc<FieldSubflow>, max_iterations: u32) -> Self {
        Self {
            executor,
            subflow,
            max_iterations,
        }
    }

    /// Drive `field` to a final result.
    ///
    /// Returns `Ok(None)` when no draft was ever produced. `Err` only for
    /// fatal conditions such as a contract violation.
    #[instrument(skip_all, fields(%field))]
    pub async fn run(&self, field: &str, context: &Payload) -> Result<Option<FinalFieldResult>> {
        let mut task = FieldTask::new(field);
        let mut constructions = 0u32;
        let mut approved = false;

        while constructions < self.max_iterations {
            constructions += 1;

            let mut input = task.input(context);
            if let Some(draft) = &task.current_draft {
                input.insert(keys::PRIOR_DRAFT.into(), json!(draft));
                input.insert(keys::REVIEW_FEEDBACK.into(), json!(task.notes));
            }

            let construction = self
                .executor
                .execute(&self.subflow.construction, &input)
                .await?;
            let Some(draft) = construction
                .text(keys::DRAFT_STYLE_GUIDE)
                .filter(|_| construction.success)
                .map(str::to_string)
            else {
                let note = format!(
                    "construction attempt {constructions} failed: {}",
                    construction.reason_or_default()
                );
                warn!(attempt = constructions, reason = construction.reason_or_default(), "construction failed");
                task.notes.push(note);
                continue;
            };
            task.drafts_generated += 1;
            task.current_draft = Some(draft.clone());

            let mut review_input = task.input(context);
            review_input.insert(keys::DRAFT_STYLE_GUIDE.into(), json!(draft));
            let review = self
                .executor
                .execute(&self.subflow.review, &review_input)
                .await?;

            let verdict = Verdict::from_review(&review);
            task.verdict = Some(verdict);
            self.record_review(&mut task, &review, constructions);

            if verdict == Verdict::Approved {
                if let Some(reviewed) = review
                    .text(keys::LEGALLY_REVIEWED_GUIDE)
                    .filter(|t| !t.trim().is_empty())
                {
                    task.current_draft = Some(reviewed.to_string());
                }
                approved = true;
                break;
            }

            if constructions < self.max_iterations {
                task.revision_count += 1;
                debug!(revision = task.revision_count, "draft sent back for revision");
            }
        }

        let Some(draft) = task.current_draft.take() else {
            warn!(attempts = constructions, "no draft produced");
            return Ok(None);
        };

        let unresolved = !approved;
        if unresolved {
            let err = StyleGuideError::ReviewCeilingExhausted {
                field: task.field.clone(),
                attempts: self.max_iterations,
            };
            warn!(error = %err, "emitting last draft flagged unresolved");
            task.notes.push(err.to_string());
        }

        let text = self.refine(&mut task, draft, context).await?;

        info!(
            revisions = task.revision_count,
            drafts = task.drafts_generated,
            unresolved,
            "field complete"
        );

        Ok(Some(FinalFieldResult {
            field: task.field,
            text,
            review_notes: task.notes,
            unresolved,
            revision_count: task.revision_count,
        }))
    }

    fn record_review(&self, task: &mut FieldTask, review: &StageResult, attempt: u32) {
        if !review.success {
            warn!(attempt, reason = review.reason_or_default(), "review output unusable");
            task.notes.push(format!(
                "review attempt {attempt} unusable: {}",
                review.reason_or_default()
            ));
            return;
        }
        task.notes
            .extend(stages::list_as_strings(review.list(keys::LEGAL_ISSUES_FOUND)));
    }

    async fn refine(&self, task: &mut FieldTask, draft: String, context: &Payload) -> Result<String> {
        let mut input = task.input(context);
        input.insert(keys::DRAFT_STYLE_GUIDE.into(), json!(draft));
        input.insert(
            keys::REVIEW_NOTES.into(),
            Value::Array(task.notes.iter().map(|n| json!(n)).collect()),
        );

        let refinement = self
            .executor
            .execute(&self.subflow.refinement, &input)
            .await?;

        match refinement
            .text(keys::FINAL_STYLE_GUIDE)
            .filter(|_| refinement.success)
        {
            Some(text) => {
                task.notes
                    .extend(stages::list_as_strings(refinement.list(keys::NOTES)));
                Ok(text.to_string())
            }
            None => {
                warn!(reason = refinement.reason_or_default(), "refinement failed, keeping draft");
                task.notes.push(format!(
                    "final refinement failed, draft kept verbatim: {}",
                    refinement.reason_or_default()
                ));
                Ok(draft)
            }
        }
    }
}
