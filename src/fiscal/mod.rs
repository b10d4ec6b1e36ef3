use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::PipelineError;

pub mod model;

pub use model::{FiscalCheckRequest, FiscalResponse};

/// Everything the dispatcher needs from the cash-register API. The real
/// implementation is `RegisterClient`; tests drive the state machine with
/// recording fakes.
#[async_trait]
pub trait FiscalClient: Send + Sync {
    /// Exchange operator login/password for a fresh bearer token.
    async fn authorize(&self, login: &str, password: &str) -> Result<String, PipelineError>;

    /// POST a check-creation request with the given operator token.
    async fn create_check(
        &self,
        token: &str,
        request: &FiscalCheckRequest,
    ) -> Result<FiscalResponse, PipelineError>;

    /// Close the current register shift. Used only as dispatch recovery.
    async fn close_shift(&self, token: &str) -> Result<FiscalResponse, PipelineError>;
}

/// Real fiscal-endpoint client. Sends the fixed API key as a header and the
/// per-operator token inside the body, which is what the endpoint expects.
#[derive(Clone)]
pub struct RegisterClient {
    http: Client,
    base_url: Url,
    api_key: String,
    cashbox_unique_number: String,
}

impl fmt::Debug for RegisterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RegisterClient {
    pub fn new(
        base_url: &str,
        api_key: String,
        cashbox_unique_number: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).context("invalid fiscal base URL")?;
        let http = Client::builder()
            .user_agent("fiscal-bridge/0.1")
            .timeout(timeout)
            .build()
            .context("reqwest client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
            cashbox_unique_number,
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<FiscalResponse, PipelineError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| PipelineError::Validation(format!("bad fiscal endpoint path: {e}")))?;
        let res = self
            .http
            .post(url)
            .header("X-API-KEY", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(PipelineError::network("fiscal endpoint"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(PipelineError::network("fiscal endpoint"))?;
        if !status.is_success() {
            return Err(PipelineError::Endpoint {
                summary: format!("HTTP {status}: {text}"),
                response_json: text,
            });
        }
        let parsed: FiscalResponse = serde_json::from_str(&text)?;
        if !parsed.is_success() {
            warn!(errors = %parsed.error_summary(), "fiscal endpoint returned coded errors");
        }
        Ok(parsed)
    }
}

#[async_trait]
impl FiscalClient for RegisterClient {
    async fn authorize(&self, login: &str, password: &str) -> Result<String, PipelineError> {
        info!("requesting fresh fiscal token");
        let body = json!({ "Login": login, "Password": password });
        let response = self.post_json("api/Authorize", &body).await?;
        if !response.is_success() {
            return Err(PipelineError::Endpoint {
                summary: response.error_summary(),
                response_json: serde_json::to_string(&response)?,
            });
        }
        response
            .data
            .as_ref()
            .and_then(|d| d.get("Token"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| PipelineError::Endpoint {
                summary: "authorization response carried no Data.Token".into(),
                response_json: serde_json::to_string(&response).unwrap_or_default(),
            })
    }

    async fn create_check(
        &self,
        token: &str,
        request: &FiscalCheckRequest,
    ) -> Result<FiscalResponse, PipelineError> {
        let mut body = serde_json::to_value(request)?;
        if let Value::Object(map) = &mut body {
            map.insert("Token".into(), Value::String(token.to_owned()));
        }
        info!(
            check = %request.external_check_number,
            positions = request.positions.len(),
            payments = request.payments.len(),
            "dispatching fiscal check"
        );
        self.post_json("api/Check", &body).await
    }

    async fn close_shift(&self, token: &str) -> Result<FiscalResponse, PipelineError> {
        info!(cashbox = %self.cashbox_unique_number, "closing register shift");
        let body = json!({
            "Token": token,
            "CashboxUniqueNumber": self.cashbox_unique_number,
        });
        self.post_json("api/ZReport", &body).await
    }
}

/// Shortened token form safe for logs and operator notifications.
pub fn redact_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 10 {
        return "***".into();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
