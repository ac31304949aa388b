//! Invoice approval workflow engine.
//!
//! Invoices enter by manual entry or document upload, get routed against
//! the owning company's auto-approval limit and rule ladder, and end up
//! approved, rejected, or auto-approved. Every state change leaves an
//! audit record. [`service::WorkflowService`] is the front door; the rest
//! of the modules are the vocabulary it works in.

pub mod admin;
pub mod audit;
pub mod auth;
pub mod company;
pub mod error;
pub mod events;
pub mod extract;
pub mod invoice;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod routing;
pub mod rules;
pub mod service;
pub mod store;
pub mod users;
pub mod utils;
