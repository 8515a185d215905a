//! HTTP surface: notification ingestion, status polling and preference management.

pub mod extract;
pub mod routes;
pub mod state;
