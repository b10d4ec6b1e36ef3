//! Pipeline error taxonomy.
//!
//! Every variant is terminal for the event it occurred on: recoverable
//! endpoint conditions (expired session, open shift) are classified from the
//! response before an error is ever constructed, so an error reaching the
//! ledger means recovery is already exhausted. Nothing here aborts a batch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid event: {0}")]
    Validation(String),

    #[error("cannot build fiscal check: {0}")]
    DataTransform(String),

    #[error("no fiscal credential available and refresh failed")]
    CredentialUnavailable,

    /// The endpoint answered but rejected the check. `summary` holds the
    /// decoded error list verbatim; `response_json` the raw response body for
    /// the ledger.
    #[error("fiscal endpoint rejected the check: {summary}")]
    Endpoint {
        summary: String,
        response_json: String,
    },

    #[error("network failure talking to {service}: {source}")]
    Network {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("database failure: {0}")]
    Db(#[from] sqlx::Error),

    #[error("storage failure: {0}")]
    Storage(anyhow::Error),

    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Storage(err)
    }
}

impl PipelineError {
    pub fn network(service: &'static str) -> impl FnOnce(reqwest::Error) -> PipelineError {
        move |source| PipelineError::Network { service, source }
    }
}
