//! # RAG Harness
//!
//! A single-node retrieval-augmented answering engine.
//!
//! Documents are cleaned, chunked into fragments, embedded and kept in a
//! persistent vector index. Questions are answered by one of seventeen
//! interchangeable retrieval strategies that share a single
//! `retrieve → generate → answer` contract.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │   Ingest    │──▶│   Chunker   │──▶│ Vector Index │◀── Embedder
//! │ .txt / .md  │   │ clean+split │   │ .index/.store│
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                                   ┌────────▼────────┐
//!                                   │ Strategy Engine │◀── Completer
//!                                   │ 17 strategies   │
//!                                   └────────┬────────┘
//!                              ┌─────────────┴───────────┐
//!                              ▼                         ▼
//!                         ┌─────────┐              ┌──────────┐
//!                         │   CLI   │              │   HTTP   │
//!                         │  (rag)  │              │  (axum)  │
//!                         └─────────┘              └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag ingest ./docs                       # chunk, embed and index
//! rag search "capital of France" --k 3    # raw retrieval hits
//! rag ask "What is the capital of France?" --strategy hyde
//! rag serve                               # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Text cleaning and chunking |
//! | [`http`] | JSON-over-HTTP with deadlines and retries |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`completion`] | Completion providers |
//! | [`entry_log`] | Append-only log of index entries |
//! | [`artifacts`] | Persisted index files |
//! | [`vector_index`] | Named stores with exact cosine search |
//! | [`strategy`] | Strategy contract and baseline flow |
//! | [`strategies`] | The seventeen strategies |
//! | [`relevance`] | Relevance estimators for corrective retrieval |
//! | [`engine`] | Strategy registry and fallback chain |
//! | [`ingest`] | File discovery and indexing |
//! | [`server`] | HTTP API |

pub mod artifacts;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod entry_log;
pub mod http;
pub mod ingest;
pub mod models;
pub mod relevance;
pub mod server;
pub mod strategies;
pub mod strategy;
pub mod vector_index;
