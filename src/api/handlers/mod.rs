// src/api/handlers/mod.rs
mod grade;
mod health;

pub use grade::grade;
pub use health::health_check;
