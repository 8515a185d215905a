//! Delivery side of the pipeline: consumes dispatch messages, re-checks
//! preferences, sends through SMS, email or WhatsApp, and records the outcome.

pub mod channels;
pub mod dispatcher;
pub mod processor;
pub mod retry;
