#![deny(missing_docs)]

//! Core library for the medscribe pipeline service.
//!
//! Uploaded voice recordings and medical documents are driven through an
//! asynchronous pipeline (download, transcription or vision extraction,
//! analysis, embedding) into structured, searchable health records.

/// Local post-processing of extracted records.
pub mod analysis;
/// HTTP ingest gateway.
pub mod api;
/// Artifact entity and its processing state machine.
pub mod artifact;
/// Object storage access.
pub mod blob;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Speech and vision extraction clients.
pub mod extraction;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Pipeline orchestrator and stage strategies.
pub mod pipeline;
/// Job queue and worker pool.
pub mod queue;
/// Similarity retrieval over stored embeddings.
pub mod retrieval;
/// Durable artifact persistence.
pub mod store;
