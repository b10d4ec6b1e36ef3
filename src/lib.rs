//! Bridge between a salon-management SaaS webhook feed and a cash-register
//! (fiscalization) API.
//!
//! The pipeline is: eligibility filter → idempotency ledger → data transform →
//! fiscal dispatch with credential/shift recovery → ledger update. Everything
//! that talks to the outside world (source system, fiscal endpoint, operator
//! notifications) sits behind a trait so the state machine is testable with
//! fakes.

pub mod config;
pub mod credentials;
pub mod db;
pub mod dispatch;
pub mod eligibility;
pub mod error;
pub mod fiscal;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod server;
pub mod source;
pub mod transform;
