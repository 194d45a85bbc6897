//! Ingestion API: validates push requests and appends them to the intake queue.

pub mod middleware;
pub mod routes;
pub mod state;
