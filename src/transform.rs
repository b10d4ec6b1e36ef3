//! Data transformer: maps an eligible event plus its source document into a
//! fiscal-check request.
//!
//! The fiscal endpoint expects the gross unit price and an explicit discount,
//! never a pre-discounted price, so each position derives
//! `discount = unit_price * quantity - amount_actually_charged`.

use tracing::warn;

use crate::error::PipelineError;
use crate::fiscal::model::{
    FiscalCheckRequest, Payment, Position, OPERATION_SALE, PAYMENT_CASH, PAYMENT_NON_CASH,
};
use crate::model::{InboundEvent, ResourceKind};
use crate::source::SourceDocument;

/// Transformer settings sliced out of the config.
#[derive(Debug, Clone)]
pub struct FiscalSettings {
    pub cashbox_unique_number: String,
    pub round_type: i32,
    pub commission_marker: String,
}

struct Line {
    name: String,
    unit_price: i64,
    quantity: i64,
    charged: i64,
}

impl Line {
    fn discount(&self) -> i64 {
        self.unit_price * self.quantity - self.charged
    }
}

/// Builds the check request. Fails with a data error when the event carries
/// no billable positions or no resolvable client phone.
pub fn build_check_request(
    event: &InboundEvent,
    document: &SourceDocument,
    settings: &FiscalSettings,
) -> Result<FiscalCheckRequest, PipelineError> {
    let lines = collect_lines(event);
    if lines.is_empty() {
        return Err(PipelineError::DataTransform(
            "event has no billable positions".into(),
        ));
    }

    let phone = event
        .data
        .client
        .as_ref()
        .map(|c| c.phone.trim())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            PipelineError::DataTransform("client phone unresolvable from event payload".into())
        })?
        .to_owned();

    // Signed sum of charged amounts: returns subtract from the total.
    let total_charged: i64 = lines.iter().map(|l| l.charged).sum();

    let positions = lines
        .iter()
        .map(|l| Position {
            count: l.quantity.abs(),
            price: l.unit_price,
            tax_percent: 0,
            tax: 0,
            tax_type: 0,
            position_name: l.name.clone(),
            discount: l.discount(),
        })
        .collect();

    let payments = build_payments(event, document, settings, total_charged);

    Ok(FiscalCheckRequest {
        cashbox_unique_number: settings.cashbox_unique_number.clone(),
        operation_type: OPERATION_SALE,
        positions,
        payments,
        round_type: settings.round_type,
        // Stable across resubmissions: the endpoint deduplicates on it.
        external_check_number: event.resource_id.to_string(),
        customer_phone: Some(phone),
    })
}

fn collect_lines(event: &InboundEvent) -> Vec<Line> {
    match event.resource {
        ResourceKind::GoodsSale if !event.data.goods_transactions.is_empty() => event
            .data
            .goods_transactions
            .iter()
            .map(|g| {
                let unit_price = g.cost_per_unit.unwrap_or(g.cost);
                Line {
                    name: g.title.clone(),
                    unit_price,
                    quantity: g.amount,
                    charged: g.cost,
                }
            })
            .collect(),
        _ => event
            .data
            .services
            .iter()
            .map(|s| {
                let unit_price = s.cost_per_unit.or(s.first_cost).unwrap_or(s.cost);
                Line {
                    name: s.title.clone(),
                    unit_price,
                    quantity: s.amount,
                    charged: s.cost,
                }
            })
            .collect(),
    }
}

fn build_payments(
    event: &InboundEvent,
    document: &SourceDocument,
    settings: &FiscalSettings,
    total_charged: i64,
) -> Vec<Payment> {
    let payments: Vec<Payment> = document
        .transactions
        .iter()
        .filter(|t| t.comment.as_deref() != Some(settings.commission_marker.as_str()))
        .filter(|t| t.amount > 0)
        .map(|t| {
            let is_cash = t.account.as_ref().and_then(|a| a.is_cash).unwrap_or(false);
            Payment {
                sum: t.amount,
                payment_type: if is_cash { PAYMENT_CASH } else { PAYMENT_NON_CASH },
            }
        })
        .collect();

    if payments.is_empty() {
        // Heuristic fallback, not a hard error: cover the computed total with
        // a single non-cash payment.
        warn!(
            resource_id = event.resource_id,
            total = total_charged,
            "no usable payment transactions; synthesizing a non-cash payment"
        );
        return vec![Payment {
            sum: total_charged,
            payment_type: PAYMENT_NON_CASH,
        }];
    }
    payments
}
