//! # nl-query core
//!
//! Pure, I/O-free logic for nl-query: the data models that flow through
//! the question → SQL pipeline, the rule-table entity extractor, the
//! heuristic routing classifier, prompt assembly, and the knowledge store
//! abstraction with an in-memory implementation.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Collaborators that talk to the outside world live in the `nl-query`
//! app crate.

pub mod entities;
pub mod models;
pub mod prompt;
pub mod routing;
pub mod store;
