//! Pipeline orchestrator: eligibility filter → idempotency ledger → data
//! transform → serialized fiscal dispatch → ledger update.
//!
//! Events inside a batch run strictly sequentially, and a single-permit
//! semaphore serializes dispatch across concurrent batches: the per-cashbox
//! shift state is a shared external resource, and two in-flight dispatches
//! could otherwise race on shift-close recovery.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use crate::db::{self, NewRecord, Pool};
use crate::dispatch::Dispatcher;
use crate::eligibility::{self, Eligibility};
use crate::error::PipelineError;
use crate::model::InboundEvent;
use crate::source::SourceClient;
use crate::transform::{self, FiscalSettings};

/// Per-batch outcome counts returned in the webhook acknowledgment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
}

enum EventOutcome {
    Processed,
    Skipped,
    Failed,
}

pub struct Pipeline {
    pool: Pool,
    source: Arc<dyn SourceClient>,
    dispatcher: Dispatcher,
    trigger: String,
    fiscal_settings: FiscalSettings,
    dispatch_gate: Semaphore,
}

impl Pipeline {
    pub fn new(
        pool: Pool,
        source: Arc<dyn SourceClient>,
        dispatcher: Dispatcher,
        trigger: String,
        fiscal_settings: FiscalSettings,
    ) -> Self {
        Self {
            pool,
            source,
            dispatcher,
            trigger,
            fiscal_settings,
            dispatch_gate: Semaphore::new(1),
        }
    }

    /// Runs every event of a batch through the pipeline. A single event's
    /// business failure is recorded on its ledger row and never aborts
    /// sibling events.
    #[instrument(skip_all, fields(events = events.len()))]
    pub async fn process_batch(&self, events: Vec<InboundEvent>) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for event in &events {
            match self.process_event(event).await {
                EventOutcome::Processed => summary.processed += 1,
                EventOutcome::Skipped => summary.skipped += 1,
                EventOutcome::Failed => summary.failed += 1,
            }
        }
        info!(?summary, "batch finished");
        summary
    }

    async fn process_event(&self, event: &InboundEvent) -> EventOutcome {
        let company_id = event.company_id;
        let resource_id = event.resource_id;

        match eligibility::evaluate(event, &self.trigger) {
            Eligibility::Accept => {}
            Eligibility::Skip(reason) => {
                info!(company_id, resource_id, %reason, "event skipped");
                return EventOutcome::Skipped;
            }
        }

        // Already fiscalized: stop before touching the fiscal endpoint,
        // regardless of payload differences in the resubmission.
        match db::find_record(&self.pool, company_id, resource_id).await {
            Ok(Some(existing)) if existing.processed => {
                info!(company_id, resource_id, "already fiscalized; skipping resubmission");
                return EventOutcome::Skipped;
            }
            Ok(_) => {}
            Err(err) => {
                error!(?err, company_id, resource_id, "ledger lookup failed");
                return EventOutcome::Failed;
            }
        }

        let record_id = match self.upsert(event).await {
            Ok(id) => id,
            Err(err) => {
                error!(?err, company_id, resource_id, "ledger upsert failed");
                return EventOutcome::Failed;
            }
        };

        match self.fiscalize(event).await {
            Ok(outcome) => {
                let response_json = serde_json::to_string(&outcome.response).unwrap_or_default();
                if let Err(err) = db::mark_record_success(
                    &self.pool,
                    record_id,
                    &response_json,
                    &outcome.request_id,
                )
                .await
                {
                    error!(?err, record_id, "failed to persist success outcome");
                    return EventOutcome::Failed;
                }
                info!(company_id, resource_id, "event fiscalized");
                EventOutcome::Processed
            }
            Err(err) => {
                warn!(%err, company_id, resource_id, "event failed");
                let response_json = match &err {
                    PipelineError::Endpoint { response_json, .. } => Some(response_json.as_str()),
                    _ => None,
                };
                if let Err(db_err) =
                    db::mark_record_failed(&self.pool, record_id, &err.to_string(), response_json)
                        .await
                {
                    error!(?db_err, record_id, "failed to persist failure outcome");
                }
                EventOutcome::Failed
            }
        }
    }

    async fn upsert(&self, event: &InboundEvent) -> Result<i64, PipelineError> {
        let client = event.data.client.as_ref();
        let record = NewRecord {
            company_id: event.company_id,
            resource_id: event.resource_id,
            status: event.status.clone(),
            client_phone: client.map(|c| c.phone.clone()).filter(|p| !p.is_empty()),
            client_name: client.map(|c| c.name.clone()).filter(|n| !n.is_empty()),
            record_date: event.record_time(),
            services_data: serde_json::to_string(&event.data.services)?,
            comment: event.data.comment.clone(),
            raw_data: serde_json::to_string(&event.raw)?,
        };
        Ok(db::upsert_record(&self.pool, &record).await?)
    }

    async fn fiscalize(
        &self,
        event: &InboundEvent,
    ) -> Result<crate::dispatch::DispatchOutcome, PipelineError> {
        let document = self
            .source
            .fetch_document(event.company_id, event.document_id())
            .await?;
        let request = transform::build_check_request(event, &document, &self.fiscal_settings)?;

        // Single global serialization point in front of the dispatcher.
        let _permit = self
            .dispatch_gate
            .acquire()
            .await
            .expect("dispatch gate is never closed");
        self.dispatcher.dispatch(&request).await
    }
}
