// src/lib.rs
pub mod alert;
pub mod api;
pub mod banner;
pub mod batch;
pub mod config;
pub mod errors;
pub mod graders;
pub mod models;
pub mod protocol;
pub mod sandbox;
pub mod service;
pub mod session;
pub mod worker;
