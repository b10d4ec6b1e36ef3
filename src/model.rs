//! Inbound webhook event model.
//!
//! The source system delivers either a single event object or an array of
//! them, and has historically sent the client field in three shapes (object,
//! single-element list, typed record). All of that variance is decoded once,
//! here; the rest of the pipeline only ever sees the canonical structs.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::PipelineError;

/// The two resource kinds the bridge fiscalizes. Anything else is
/// acknowledged and skipped, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Booking,
    GoodsSale,
    Other,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Booking => "record",
            ResourceKind::GoodsSale => "goods_operations_sale",
            ResourceKind::Other => "other",
        }
    }
}

impl<'de> Deserialize<'de> for ResourceKind {
    fn deserialize<D>(de: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(de)?;
        Ok(match s.as_str() {
            "record" | "booking" => ResourceKind::Booking,
            "goods_operations_sale" | "goods_sale" => ResourceKind::GoodsSale,
            _ => ResourceKind::Other,
        })
    }
}

impl Serialize for ResourceKind {
    fn serialize<S>(&self, ser: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        ser.serialize_str(self.as_str())
    }
}

/// One webhook event, immutable once parsed. `raw` keeps the original JSON
/// element for the ledger.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    pub company_id: i64,
    pub resource: ResourceKind,
    pub resource_id: i64,
    #[serde(default)]
    pub status: String,
    pub data: EventData,
    #[serde(skip)]
    pub raw: Value,
}

/// Nested record payload. Booking and goods-sale events share this shape;
/// fields missing on one kind simply default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default, deserialize_with = "de_flag")]
    pub paid_full: bool,
    #[serde(default)]
    pub services: Vec<ServiceLine>,
    #[serde(default)]
    pub goods_transactions: Vec<GoodsLine>,
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
    #[serde(default, deserialize_with = "de_client")]
    pub client: Option<ClientInfo>,
}

/// One service line of a booking. Amounts are minor currency units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceLine {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title: String,
    /// Amount actually charged for the whole line.
    #[serde(default)]
    pub cost: i64,
    /// Original (gross) price per unit, before discount.
    #[serde(default)]
    pub cost_per_unit: Option<i64>,
    #[serde(default)]
    pub first_cost: Option<i64>,
    #[serde(default = "one")]
    pub amount: i64,
    #[serde(default)]
    pub discount: i64,
}

/// One goods line. Quantities arrive negative for returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoodsLine {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cost_per_unit: Option<i64>,
    #[serde(default)]
    pub cost: i64,
    #[serde(default = "one")]
    pub amount: i64,
    #[serde(default)]
    pub discount: i64,
}

/// Payment-linked document reference carried by the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: i64,
}

/// Canonical client identity after shape normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
}

fn one() -> i64 {
    1
}

/// Accepts `1`/`0`, `true`/`false` or absence for the paid-in-full flag.
fn de_flag<'de, D>(de: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(de)?;
    Ok(match v {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    })
}

/// Decodes the client field from any of its historical shapes into a single
/// canonical `ClientInfo`. Downstream code never re-sniffs this.
fn de_client<'de, D>(de: D) -> Result<Option<ClientInfo>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(de)?;
    Ok(match v {
        Some(obj @ Value::Object(_)) => serde_json::from_value(obj).ok(),
        Some(Value::Array(items)) => items
            .into_iter()
            .next()
            .and_then(|item| serde_json::from_value(item).ok()),
        _ => None,
    })
}

impl InboundEvent {
    /// Canonical record timestamp: the `date` field first (space-separated),
    /// then the ISO `datetime` with offset.
    pub fn record_time(&self) -> Option<NaiveDateTime> {
        if let Some(date) = self.data.date.as_deref() {
            if let Ok(ts) = NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S") {
                return Some(ts);
            }
        }
        if let Some(dt) = self.data.datetime.as_deref() {
            if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(dt) {
                return Some(ts.naive_local());
            }
        }
        None
    }

    /// Document id used for the source-document fetch. Falls back to the
    /// resource id when the event carries no document reference.
    pub fn document_id(&self) -> i64 {
        self.data
            .documents
            .first()
            .map(|d| d.id)
            .unwrap_or(self.resource_id)
    }
}

/// Parses a webhook body into events. A single object and an array of objects
/// are both accepted; elements that fail validation are dropped individually
/// (and counted), only a body that is neither shape fails the batch.
pub fn parse_webhook_body(body: &Value) -> Result<(Vec<InboundEvent>, usize), PipelineError> {
    fn parse_one(value: &Value) -> Option<InboundEvent> {
        match serde_json::from_value::<InboundEvent>(value.clone()) {
            Ok(mut event) => {
                event.raw = value.clone();
                Some(event)
            }
            Err(err) => {
                warn!(%err, "dropping malformed webhook element");
                None
            }
        }
    }

    match body {
        Value::Array(items) => {
            let mut events = Vec::with_capacity(items.len());
            let mut dropped = 0;
            for item in items {
                match parse_one(item) {
                    Some(ev) => events.push(ev),
                    None => dropped += 1,
                }
            }
            Ok((events, dropped))
        }
        Value::Object(_) => match parse_one(body) {
            Some(ev) => Ok((vec![ev], 0)),
            None => Ok((Vec::new(), 1)),
        },
        _ => Err(PipelineError::Validation(
            "webhook body must be an event object or an array of them".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn booking_json() -> Value {
        json!({
            "company_id": 307626,
            "resource": "record",
            "resource_id": 596792978,
            "status": "update",
            "data": {
                "id": 596792978,
                "date": "2025-07-12 12:10:00",
                "comment": "фч",
                "paid_full": 1,
                "services": [
                    {"id": 5034676, "title": "Стрижка детская", "cost": 4000,
                     "cost_per_unit": 4000, "first_cost": 4000, "amount": 1, "discount": 0}
                ],
                "documents": [{"id": 683647047, "type_id": 7}],
                "client": {"id": 169711586, "name": "Вячослав", "phone": "+77770220606"}
            }
        })
    }

    #[test]
    fn parses_single_object_body() {
        let (events, dropped) = parse_webhook_body(&booking_json()).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(events.len(), 1);
        let ev = &events[0];
        assert_eq!(ev.resource, ResourceKind::Booking);
        assert_eq!(ev.resource_id, 596792978);
        assert!(ev.data.paid_full);
        assert_eq!(ev.document_id(), 683647047);
        assert_eq!(ev.data.client.as_ref().unwrap().phone, "+77770220606");
        assert!(!ev.raw.is_null());
    }

    #[test]
    fn parses_array_body_and_drops_bad_elements() {
        let body = json!([booking_json(), {"garbage": true}]);
        let (events, dropped) = parse_webhook_body(&body).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn rejects_scalar_body() {
        assert!(parse_webhook_body(&json!("nope")).is_err());
    }

    #[test]
    fn unknown_resource_kind_is_not_an_error() {
        let mut body = booking_json();
        body["resource"] = json!("client");
        let (events, dropped) = parse_webhook_body(&body).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(events[0].resource, ResourceKind::Other);
    }

    #[test]
    fn goods_sale_kind_parses() {
        let mut body = booking_json();
        body["resource"] = json!("goods_operations_sale");
        let (events, _) = parse_webhook_body(&body).unwrap();
        assert_eq!(events[0].resource, ResourceKind::GoodsSale);
    }

    #[test]
    fn client_as_single_element_list() {
        let mut body = booking_json();
        body["data"]["client"] = json!([{"name": "Ая", "phone": "7700"}]);
        let (events, _) = parse_webhook_body(&body).unwrap();
        assert_eq!(events[0].data.client.as_ref().unwrap().phone, "7700");
    }

    #[test]
    fn client_absent_or_empty_list() {
        let mut body = booking_json();
        body["data"]["client"] = json!(null);
        let (events, _) = parse_webhook_body(&body).unwrap();
        assert!(events[0].data.client.is_none());

        let mut body = booking_json();
        body["data"]["client"] = json!([]);
        let (events, _) = parse_webhook_body(&body).unwrap();
        assert!(events[0].data.client.is_none());
    }

    #[test]
    fn paid_full_accepts_bool_and_int() {
        let mut body = booking_json();
        body["data"]["paid_full"] = json!(true);
        let (events, _) = parse_webhook_body(&body).unwrap();
        assert!(events[0].data.paid_full);

        let mut body = booking_json();
        body["data"]["paid_full"] = json!(0);
        let (events, _) = parse_webhook_body(&body).unwrap();
        assert!(!events[0].data.paid_full);
    }

    #[test]
    fn record_time_prefers_date_field() {
        let (events, _) = parse_webhook_body(&booking_json()).unwrap();
        let ts = events[0].record_time().unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-07-12 12:10:00");
    }

    #[test]
    fn document_id_falls_back_to_resource_id() {
        let mut body = booking_json();
        body["data"]["documents"] = json!([]);
        let (events, _) = parse_webhook_body(&body).unwrap();
        assert_eq!(events[0].document_id(), 596792978);
    }
}
