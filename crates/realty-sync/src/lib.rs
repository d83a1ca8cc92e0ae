//! Keeps agents, listings, transactions and commission payments in step
//! across REZEN, Zoho CRM and QuickBooks.

pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod formula;
pub mod reconcile;
pub mod store;
pub mod sync;
pub mod telemetry;
