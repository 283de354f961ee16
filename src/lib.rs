//! # Deploy Scout
//!
//! A retrieval and indexing engine for AI deployment advisors.
//!
//! Deploy Scout turns a corpus of model documentation into a content-addressed
//! chunk index with embeddings, and serves three deterministic retrievers over
//! the result: semantic model search, structured compute-instance search, and
//! lexical component search.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────────────────────┐   ┌──────────┐
//! │ JSONL /   │──▶│  Pipeline                  │──▶│  SQLite   │
//! │ catalogs  │   │ Exclude+Dedup+Chunk+Embed │   │ FTS5+Vec  │
//! └───────────┘   └───────────────────────────┘   └────┬─────┘
//!                                                      │
//!                              ┌────────────┬──────────┤
//!                              ▼            ▼          ▼
//!                         ┌────────┐  ┌─────────┐  ┌──────────┐
//!                         │ models │  │ compute │  │components│
//!                         │ search │  │ search  │  │  search  │
//!                         └────────┘  └─────────┘  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! scout init                        # create database
//! scout load cards cards.jsonl     # ingest model documentation
//! scout index build                 # exclude, dedup, chunk
//! scout embed pending               # generate embeddings
//! scout search models "summarization in French"
//! scout report                      # write the build report
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`load`] | Corpus and catalog loaders |
//! | [`chunker`] | Normalization and deterministic chunking |
//! | [`dedup`] | Exclusion rules and canonical document mapping |
//! | [`index`] | Offline index build pipeline |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embedder`] | Resumable batch embedding |
//! | [`model_search`] | Semantic model retrieval and reranking |
//! | [`compute_search`] | Compute-instance filtering and ranking |
//! | [`component_search`] | Lexical component retrieval |
//! | [`ranking`] | Shared deterministic ordering helpers |
//! | [`report`] | Build report and failure log |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod component_search;
pub mod compute_search;
pub mod config;
pub mod db;
pub mod dedup;
pub mod embedder;
pub mod embedding;
pub mod index;
pub mod load;
pub mod migrate;
pub mod model_search;
pub mod models;
pub mod ranking;
pub mod report;
