//! # geoark-search
//!
//! Natural-language search service over a PostGIS dataset catalog: an LLM
//! decomposes a free-text query into purposed sub-queries, each sub-query is
//! searched against the catalog, the referenced tables are sampled, and the
//! matches are aggregated by purpose into one response envelope.
//!
//! ## Architecture
//!
//! The pipeline is a fixed linear sequence of four stages:
//!
//! ```text
//!                ┌──────────────┐
//!                │  User Query   │
//!                └──────┬───────┘
//!                       ▼
//!            ┌─────────────────────┐
//!            │     decompose        │  LLM → sub-queries with purposes
//!            │  (fallback: query    │  (primary / normalization /
//!            │   as-is, primary)    │   filter / related)
//!            └──────────┬──────────┘
//!                       ▼
//!            ┌─────────────────────┐
//!            │  search_variables    │  catalog search per sub-query,
//!            │  (limit 10 each)     │  matches stamped with origin
//!            └──────────┬──────────┘
//!                       ▼
//!            ┌─────────────────────┐
//!            │  search_database     │  sample ≤5 distinct tables,
//!            │  (3 rows per table)  │  3 rows each
//!            └──────────┬──────────┘
//!                       ▼
//!            ┌─────────────────────┐
//!            │     aggregate        │  group matches by purpose,
//!            │                      │  collect tables + errors
//!            └──────────┬──────────┘
//!                       ▼
//!                ┌──────────────┐
//!                │ SearchResult  │
//!                └──────────────┘
//! ```
//!
//! No stage is revisited and no failure aborts a run: errors accumulate into
//! the result's `errors` list and the pipeline always terminates after the
//! fourth stage.
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for server, catalog DB, and LLM
//! - [`models`] - Shared data types: `SubQuery`, `Decomposition`, `CatalogEntry`,
//!   `MetadataMatch`, `TableSample`, `SearchResult`, request types
//! - [`store`] - sqlx-backed PostGIS catalog client (search, columns, samples,
//!   statistics, joins, spatial features)
//! - [`llm`] - Query decomposition via Ollama or OpenAI-compatible APIs with
//!   defensive JSON scraping
//! - [`pipeline`] - The four-stage run-state machine behind the
//!   `Decomposer`/`Catalog` seams
//! - [`api`] - Axum HTTP handlers for search, decomposition, catalog ops, and
//!   config management
//! - [`state`] - Shared application state holding the catalog pool and config

pub mod api;
pub mod config;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod state;
pub mod store;
