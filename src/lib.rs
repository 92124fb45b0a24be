//! # Companion
//!
//! A local-first personal knowledge base with retrieval-augmented Q&A.
//!
//! Companion keeps a structured record of who you are — profile, skills,
//! projects, activities — in a single JSON document, chunks and embeds it
//! into a small vector index, and answers questions about it through a
//! guarded agent backed by a local LLM. Everything runs on your machine;
//! nothing leaves it unless you point the embedding or LLM provider at a
//! remote endpoint yourself.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Knowledge  │──▶│   Pipeline    │──▶│ Vector index │
//! │ JSON store │   │ Flatten+Chunk │   │  meta + vec  │
//! └────────────┘   │   +Embed     │   └──────┬──────┘
//!                  └──────────────┘          │
//!                                            ▼
//!                  ┌──────────────┐   ┌─────────────┐
//!                  │  Guardrails  │──▶│    Agent     │──▶ local LLM
//!                  │ PII + rate   │   │ plan+retrieve│
//!                  └──────────────┘   └──────┬──────┘
//!                                            │
//!                           ┌────────────────┤
//!                           ▼                ▼
//!                      ┌─────────┐     ┌─────────┐
//!                      │   CLI   │     │  HTTP   │
//!                      └─────────┘     └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! companion init                                  # create the data dir
//! companion profile set --name "Ada" --role "Engineer"
//! companion project add --domain "Infra" --description "K8s autoscaler"
//! companion reindex                               # chunk + embed
//! companion ask "What infrastructure work have I done?"
//! companion serve                                 # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Knowledge document persistence and mutations |
//! | [`chunk`] | Character-window text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index build, search, and artifacts |
//! | [`retrieve`] | Hybrid keyword + vector retrieval |
//! | [`guardrails`] | PII masking, topic denylist, rate limiting |
//! | [`session`] | Bounded conversation history |
//! | [`agent`] | Plan classification and the ask pipeline |
//! | [`cache`] | TTL + size bounded response cache |
//! | [`llm`] | Chat-completion client |
//! | [`server`] | HTTP API |
//! | [`stats`] | Knowledge and index statistics |

pub mod agent;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod guardrails;
pub mod index;
pub mod llm;
pub mod models;
pub mod retrieve;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;
