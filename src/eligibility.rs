//! Eligibility filter: decides whether an incoming event should be
//! fiscalized at all. Unsupported resource kinds are acknowledged and
//! silently skipped, never treated as errors.

use crate::model::{InboundEvent, ResourceKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Accept,
    Skip(String),
}

/// An event is eligible when its kind is supported, its comment carries the
/// configured trigger substring (case-insensitive), and — for bookings only —
/// the visit is paid in full.
pub fn evaluate(event: &InboundEvent, trigger: &str) -> Eligibility {
    match event.resource {
        ResourceKind::Booking | ResourceKind::GoodsSale => {}
        ResourceKind::Other => {
            return Eligibility::Skip("unsupported resource kind".into());
        }
    }

    let comment = event.data.comment.as_deref().unwrap_or("");
    if !comment.to_lowercase().contains(&trigger.to_lowercase()) {
        return Eligibility::Skip(format!("comment does not contain trigger '{trigger}'"));
    }

    if event.resource == ResourceKind::Booking && !event.data.paid_full {
        return Eligibility::Skip("booking is not paid in full".into());
    }

    Eligibility::Accept
}
