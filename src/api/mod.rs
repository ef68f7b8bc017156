// src/api/mod.rs
//! HTTP surface of the grading service: health probe and item grading.
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::configure_routes;
pub use state::AppState;
