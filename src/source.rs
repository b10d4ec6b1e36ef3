//! Source-system (salon SaaS) client.
//!
//! The transaction detail for a document arrives in one of two shapes: a flat
//! array of payment transactions, or a nested sale object that keeps the list
//! under `state.payment_transactions`. Both are normalized here, once, into
//! `SourceDocument`; business logic never sees the raw shape again.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::error::PipelineError;

/// One payment transaction from the source document. `amount` is in minor
/// currency units; commission debits and non-positive amounts are filtered
/// later by the transformer.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentTransaction {
    #[serde(default, deserialize_with = "de_money")]
    pub amount: i64,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub account: Option<Account>,
}

/// Account the transaction was settled against. `is_cash` absent means
/// non-cash.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub is_cash: Option<bool>,
}

/// Canonical source document after shape normalization.
#[derive(Debug, Clone, Default)]
pub struct SourceDocument {
    pub transactions: Vec<PaymentTransaction>,
}

fn de_money<'de, D>(de: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Value::deserialize(de)?;
    Ok(match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        _ => 0,
    })
}

impl SourceDocument {
    /// Accepts either wire shape (after unwrapping an optional `data`
    /// envelope): a flat transaction array, or a nested object with
    /// `state.payment_transactions`.
    pub fn normalize(value: &Value) -> Result<SourceDocument, PipelineError> {
        let value = value.get("data").unwrap_or(value);

        let list = if let Some(items) = value.as_array() {
            items
        } else if let Some(items) = value
            .pointer("/state/payment_transactions")
            .and_then(Value::as_array)
        {
            items
        } else {
            return Err(PipelineError::Validation(
                "source document is neither a transaction list nor a sale object".into(),
            ));
        };

        let transactions = list
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect();
        Ok(SourceDocument { transactions })
    }
}

/// Relative API path for a document's transaction detail.
fn document_path(company_id: i64, document_id: i64) -> String {
    format!("company/{company_id}/transactions/{document_id}")
}

/// Fetches the payment-transaction detail for a document.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch_document(
        &self,
        company_id: i64,
        document_id: i64,
    ) -> Result<SourceDocument, PipelineError>;
}

/// Real client for the salon SaaS API.
#[derive(Clone)]
pub struct SalonApiClient {
    http: Client,
    base_url: Url,
    partner_token: String,
    user_token: String,
}

impl fmt::Debug for SalonApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SalonApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SalonApiClient {
    pub fn new(
        base_url: &str,
        partner_token: String,
        user_token: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut base_url = base_url.to_owned();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base_url = Url::parse(&base_url).context("invalid source base URL")?;
        let http = Client::builder()
            .user_agent("fiscal-bridge/0.1")
            .timeout(timeout)
            .build()
            .context("reqwest client")?;
        Ok(Self {
            http,
            base_url,
            partner_token,
            user_token,
        })
    }
}

#[async_trait]
impl SourceClient for SalonApiClient {
    async fn fetch_document(
        &self,
        company_id: i64,
        document_id: i64,
    ) -> Result<SourceDocument, PipelineError> {
        let url = self
            .base_url
            .join(&document_path(company_id, document_id))
            .map_err(|e| PipelineError::Validation(format!("bad source path: {e}")))?;
        info!(company_id, document_id, "fetching source document");
        let res = self
            .http
            .get(url)
            .header(
                "Authorization",
                format!("Bearer {}, User {}", self.partner_token, self.user_token),
            )
            .header("Accept", "application/vnd.api.v2+json")
            .send()
            .await
            .map_err(PipelineError::network("source system"))?;

        let status = res.status();
        let body: Value = res
            .json()
            .await
            .map_err(PipelineError::network("source system"))?;
        if !status.is_success() {
            return Err(PipelineError::Validation(format!(
                "source document fetch failed with HTTP {status}"
            )));
        }
        SourceDocument::normalize(&body)
    }
}
