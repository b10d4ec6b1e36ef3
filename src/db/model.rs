//! Database row models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::NaiveDateTime;
use serde::Serialize;

/// Terminal fiscalization status of a processing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FiscalStatus {
    Success,
    Failed,
}

impl FiscalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FiscalStatus::Success => "success",
            FiscalStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(FiscalStatus::Success),
            "failed" => Some(FiscalStatus::Failed),
            _ => None,
        }
    }
}

/// Idempotency-ledger row, uniquely keyed by (company_id, resource_id).
///
/// `processed` flips to true only after a successful fiscal dispatch; any
/// other outcome leaves it false with `processing_error` preserved so a
/// resubmission of the same key can retry.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingRecord {
    pub id: i64,
    pub company_id: i64,
    pub resource_id: i64,
    pub status: String,
    pub client_phone: Option<String>,
    pub client_name: Option<String>,
    pub record_date: Option<NaiveDateTime>,
    pub services_data: String,
    pub comment: Option<String>,
    pub raw_data: String,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub fiscal_status: Option<String>,
    pub fiscal_response: Option<String>,
    pub fiscal_request_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Mutable slice of a processing record written on every (re)submission.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub company_id: i64,
    pub resource_id: i64,
    pub status: String,
    pub client_phone: Option<String>,
    pub client_name: Option<String>,
    pub record_date: Option<NaiveDateTime>,
    pub services_data: String,
    pub comment: Option<String>,
    pub raw_data: String,
}

/// Filter for operational listing of ledger rows.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub processed: Option<bool>,
    pub fiscal_status: Option<FiscalStatus>,
    pub resource_id: Option<i64>,
}

/// Current fiscal-endpoint access token and when it was written.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub token: String,
    pub updated_at: NaiveDateTime,
}
