//! Artifact Generation Pipeline
//!
//! This library provides the core functionality for the artifact-pipeline
//! system: durable, idempotent generation jobs driven through a plan,
//! generate, validate/repair pipeline by a pool of polling workers.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
pub mod worker;
