// =============================================================================
// Status API
// =============================================================================
//
// Read-only surface for operators and dashboards. Trader CRUD lives in the
// separate admin service; this process only reports.

pub mod rest;

pub use rest::{router, ApiState};
