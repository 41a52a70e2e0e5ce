//! Credit Report Engine Library
//!
//! Consolidates competing text extractions of a credit report, normalizes
//! scraper payloads into a bureau-tagged report graph, persists both
//! idempotently, and manages the lifecycle of dispute rounds.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core business logic.
//! - `data`: Data access layer.
//! - `obs`: Observability and logging.
//! - `config`: Configuration management.
//! - `consolidation`: Extraction selection and merging.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Postgres implementation of the report store.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers and routes.
//! - `models`: Core data models.
//! - `normalizer`: Raw payload to report graph.
//! - `payload`: Schema-tolerant field access for scraper payloads.
//! - `persistence`: Upserts and reads of raw and normalized reports.
//! - `rounds`: Dispute round lifecycle.
//! - `store`: Store interface.

pub mod api;
pub mod core;
pub mod data;
pub mod obs;

// Re-export primary modules for shared use in tests and other binaries
pub mod config;
pub mod consolidation;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod normalizer;
pub mod payload;
pub mod persistence;
pub mod rounds;
pub mod store;
