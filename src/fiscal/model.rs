//! Wire types for the cash-register (fiscal) API.
//!
//! Money travels in minor currency units end to end. The endpoint reports
//! failures as a list of coded errors inside an HTTP-200 body; the two codes
//! the dispatcher recovers from are defined here.

use serde::{Deserialize, Serialize};

/// Operation type for a sale check.
pub const OPERATION_SALE: i32 = 2;

/// Payment type codes.
pub const PAYMENT_CASH: i32 = 0;
pub const PAYMENT_NON_CASH: i32 = 1;

/// Coded error: the operator token is no longer valid.
pub const CODE_SESSION_EXPIRED: i64 = 2;
/// Coded error: the register shift exceeded its window and must be closed.
pub const CODE_SHIFT_MUST_CLOSE: i64 = 11;

/// One check position: gross unit price plus a derived discount, never a
/// pre-discounted price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Position {
    pub count: i64,
    pub price: i64,
    pub tax_percent: i64,
    pub tax: i64,
    pub tax_type: i64,
    pub position_name: String,
    pub discount: i64,
}

/// One payment line of a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Payment {
    pub sum: i64,
    pub payment_type: i32,
}

/// Check-creation request body, minus the operator token (the client injects
/// it per attempt, so a refreshed token never requires rebuilding the check).
///
/// `external_check_number` is derived from the source resource id, which makes
/// retried dispatches idempotent at the endpoint itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FiscalCheckRequest {
    pub cashbox_unique_number: String,
    pub operation_type: i32,
    pub positions: Vec<Position>,
    pub payments: Vec<Payment>,
    pub round_type: i32,
    pub external_check_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
}

/// Coded error entry returned by the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalError {
    #[serde(rename = "Code")]
    pub code: i64,
    #[serde(rename = "Text", default)]
    pub text: String,
}

/// Endpoint response: an opaque data payload plus an optional error list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FiscalResponse {
    #[serde(rename = "Data", default)]
    pub data: Option<serde_json::Value>,
    #[serde(rename = "Errors", default)]
    pub errors: Vec<FiscalError>,
}

impl FiscalResponse {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn session_expired(&self) -> bool {
        self.errors.iter().any(|e| e.code == CODE_SESSION_EXPIRED)
    }

    pub fn shift_must_close(&self) -> bool {
        self.errors.iter().any(|e| e.code == CODE_SHIFT_MUST_CLOSE)
    }

    /// Error list as one readable line, with escaped non-ASCII sequences
    /// decoded so operators see native-language text.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("[{}] {}", e.code, decode_unicode_escapes(&e.text)))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Decodes literal `\uXXXX` sequences (including surrogate pairs) that some
/// endpoint responses carry inside already-parsed strings.
pub fn decode_unicode_escapes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    fn hex4(chars: &[char], at: usize) -> Option<u32> {
        if at + 4 > chars.len() {
            return None;
        }
        let mut value = 0u32;
        for &c in &chars[at..at + 4] {
            value = value.checked_mul(16)? + c.to_digit(16)?;
        }
        Some(value)
    }

    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() && chars[i + 1] == 'u' {
            if let Some(unit) = hex4(&chars, i + 2) {
                // High surrogate: try to pair with a following \uXXXX.
                if (0xD800..0xDC00).contains(&unit) {
                    if i + 12 <= chars.len() && chars[i + 6] == '\\' && chars[i + 7] == 'u' {
                        if let Some(low) = hex4(&chars, i + 8) {
                            if (0xDC00..0xE000).contains(&low) {
                                let combined =
                                    0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                                if let Some(c) = char::from_u32(combined) {
                                    out.push(c);
                                    i += 12;
                                    continue;
                                }
                            }
                        }
                    }
                } else if let Some(c) = char::from_u32(unit) {
                    out.push(c);
                    i += 6;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}
