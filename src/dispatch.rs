//! Fiscal dispatcher: sends a transformed check and recovers from the two
//! coded failures the endpoint can report — expired session and open shift.
//!
//! Recovery is bounded: one credential refresh OR one shift close, then one
//! retried POST whose outcome is final. A dispatch therefore performs at most
//! two check POSTs. Terminal failures and successful recoveries both raise an
//! operator notification; notifications never drive control flow.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::credentials::{Credential, CredentialProvider};
use crate::error::PipelineError;
use crate::fiscal::model::{FiscalCheckRequest, FiscalResponse};
use crate::fiscal::{redact_token, FiscalClient};
use crate::notify::Notifier;

/// Successful dispatch outcome handed back to the orchestrator.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub response: FiscalResponse,
    pub request_id: String,
}

pub struct Dispatcher {
    fiscal: Arc<dyn FiscalClient>,
    credentials: Arc<dyn CredentialProvider>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(
        fiscal: Arc<dyn FiscalClient>,
        credentials: Arc<dyn CredentialProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            fiscal,
            credentials,
            notifier,
        }
    }

    #[instrument(skip_all, fields(check = %request.external_check_number))]
    pub async fn dispatch(
        &self,
        request: &FiscalCheckRequest,
    ) -> Result<DispatchOutcome, PipelineError> {
        let credential = self.load_credential(request).await?;
        let request_id = Uuid::new_v4().to_string();

        let first = self.try_create(&credential.token, request).await?;
        if first.is_success() {
            info!(request_id, "fiscal check accepted");
            return Ok(DispatchOutcome {
                response: first,
                request_id,
            });
        }

        if first.session_expired() {
            return self.recover_session(request, &first, request_id).await;
        }
        if first.shift_must_close() {
            return self
                .recover_shift(request, &credential, &first, request_id)
                .await;
        }

        self.fail(request, &credential.token, first).await
    }

    /// One check POST. Transport failures are terminal and notified like any
    /// other terminal failure.
    async fn try_create(
        &self,
        token: &str,
        request: &FiscalCheckRequest,
    ) -> Result<FiscalResponse, PipelineError> {
        match self.fiscal.create_check(token, request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                self.notifier
                    .notify(&format!(
                        "Fiscalization failed: {err} (token {}). {}",
                        redact_token(token),
                        summarize(request)
                    ))
                    .await;
                Err(err)
            }
        }
    }

    async fn load_credential(
        &self,
        request: &FiscalCheckRequest,
    ) -> Result<Credential, PipelineError> {
        if let Some(credential) = self.credentials.current().await? {
            return Ok(credential);
        }
        warn!("no stored fiscal credential; refreshing before first attempt");
        match self.credentials.refresh().await {
            Ok(credential) => Ok(credential),
            Err(err) => {
                self.notifier
                    .notify(&format!(
                        "Fiscalization blocked: no fiscal credential and refresh failed ({err}). {}",
                        summarize(request)
                    ))
                    .await;
                Err(PipelineError::CredentialUnavailable)
            }
        }
    }

    /// Session expired: refresh once, retry once. The refreshed token may be
    /// byte-identical to the old one; the retry outcome is final either way.
    async fn recover_session(
        &self,
        request: &FiscalCheckRequest,
        first: &FiscalResponse,
        request_id: String,
    ) -> Result<DispatchOutcome, PipelineError> {
        info!(errors = %first.error_summary(), "session expired; refreshing credential");
        let refreshed = match self.credentials.refresh().await {
            Ok(credential) => credential,
            Err(err) => {
                self.notifier
                    .notify(&format!(
                        "Fiscalization failed: session expired and credential refresh failed ({err}). {}",
                        summarize(request)
                    ))
                    .await;
                return Err(PipelineError::CredentialUnavailable);
            }
        };

        let second = self.try_create(&refreshed.token, request).await?;
        if second.is_success() {
            self.notifier
                .notify(&format!(
                    "Fiscal check recovered after token refresh (token {}). {}",
                    redact_token(&refreshed.token),
                    summarize(request)
                ))
                .await;
            return Ok(DispatchOutcome {
                response: second,
                request_id,
            });
        }
        self.fail(request, &refreshed.token, second).await
    }

    /// Shift must close: close it once with the current credential, retry
    /// once. A failed close is terminal for this dispatch.
    async fn recover_shift(
        &self,
        request: &FiscalCheckRequest,
        credential: &Credential,
        first: &FiscalResponse,
        request_id: String,
    ) -> Result<DispatchOutcome, PipelineError> {
        info!(errors = %first.error_summary(), "shift must be closed; closing");
        let close = match self.fiscal.close_shift(&credential.token).await {
            Ok(close) => close,
            Err(err) => {
                self.notifier
                    .notify(&format!(
                        "Fiscalization failed: shift close failed: {err}. {}",
                        summarize(request)
                    ))
                    .await;
                return Err(err);
            }
        };
        if !close.is_success() {
            self.notifier
                .notify(&format!(
                    "Fiscalization failed: shift close rejected: {}. {}",
                    close.error_summary(),
                    summarize(request)
                ))
                .await;
            return Err(PipelineError::Endpoint {
                summary: close.error_summary(),
                response_json: serde_json::to_string(&close)?,
            });
        }

        let second = self.try_create(&credential.token, request).await?;
        if second.is_success() {
            self.notifier
                .notify(&format!(
                    "Fiscal check recovered after shift close (token {}). {}",
                    redact_token(&credential.token),
                    summarize(request)
                ))
                .await;
            return Ok(DispatchOutcome {
                response: second,
                request_id,
            });
        }
        self.fail(request, &credential.token, second).await
    }

    /// Terminal failure: preserve the decoded error list verbatim and alert
    /// the operator.
    async fn fail(
        &self,
        request: &FiscalCheckRequest,
        token: &str,
        response: FiscalResponse,
    ) -> Result<DispatchOutcome, PipelineError> {
        let summary = response.error_summary();
        warn!(errors = %summary, "fiscal check rejected");
        self.notifier
            .notify(&format!(
                "Fiscalization failed: {} (token {}). {}",
                summary,
                redact_token(token),
                summarize(request)
            ))
            .await;
        Err(PipelineError::Endpoint {
            summary,
            response_json: serde_json::to_string(&response)?,
        })
    }
}

fn summarize(request: &FiscalCheckRequest) -> String {
    format!(
        "Check {}: {} position(s), {} payment(s), phone {}",
        request.external_check_number,
        request.positions.len(),
        request.payments.len(),
        request.customer_phone.as_deref().unwrap_or("-")
    )
}
