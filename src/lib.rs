//! # nl-query
//!
//! Natural-language questions answered against tabular data sources.
//!
//! A question is routed to one of three paths: retrieval over the
//! source's indexed catalog (`rag`), SQL generated from schema context
//! and executed on the source (`code_execution`), or both (`hybrid`).
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────┐
//!  question ───▶ │  Router  │──── rag ────▶ RagResponder ──▶ KnowledgeStore
//!                └────┬─────┘
//!                     │ code_execution
//!                     ▼
//!   ┌──────────────┐   ┌───────────┐   ┌──────────┐   ┌───────────┐
//!   │SchemaResolver│──▶│ Generator │──▶│ Executor │──▶│ Reasoning │
//!   └──────┬───────┘   └─────┬─────┘   └────┬─────┘   └───────────┘
//!          │ knowledge, then │ LanguageModel│ SourceConnector
//!          │ introspection   │              │
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! nlq sources                                   # check configured sources
//! nlq index shop                                # write schema knowledge
//! nlq query shop "total order amount by month"  # generate and run SQL
//! nlq ask shop "what does the orders table hold?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`traits`] | Source connector and status sink traits |
//! | [`connector_sqlite`] | SQLite source connector |
//! | [`sqlite_store`] | SQLite knowledge store |
//! | [`schema`] | Two-tier schema resolution |
//! | [`indexer`] | Schema indexing and relevant-table search |
//! | [`generate`] | SQL generation |
//! | [`execute`] | Query execution and normalization |
//! | [`reasoning`] | Result explanation |
//! | [`pipeline`] | Question → SQL → result orchestration |
//! | [`rag`] | Catalog-grounded answers |
//! | [`router`] | Path classification and dispatch |
//! | [`service`] | Component assembly |

pub mod config;
pub mod connector_sqlite;
pub mod db;
pub mod embedding;
pub mod error;
pub mod execute;
pub mod generate;
pub mod http;
pub mod indexer;
pub mod llm;
pub mod migrate;
pub mod notify;
pub mod pipeline;
pub mod rag;
pub mod reasoning;
pub mod router;
pub mod schema;
pub mod service;
pub mod sources;
pub mod sqlite_store;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;
