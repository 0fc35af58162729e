//! # dataset-query
//!
//! Answers a user's question about a tabular dataset, posed either as natural
//! language or as SQL. Natural-language questions are translated to SQL by a
//! reasoning service, executed in process against the dataset, and the rows
//! are optionally turned back into a prose answer.
//!
//! ## Quick Start
//!
//! ```no_run
//! use dataset_query::config::load_app_config;
//! use dataset_query::service::{QueryInput, QueryService};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = QueryService::from_config(load_app_config(None)?);
//! let answer = service
//!     .answer(QueryInput::new("which pizzeria has the most reviews?", "abc123"))
//!     .await?;
//! println!("{}", answer.sql);
//! println!("{}", answer.synthesized_text.unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Modules
//!
//! - [`dataset`]: dataset sources, schema extraction and the shared registry
//! - [`query`]: classifier, translator, executor and synthesizer
//! - [`orchestration`]: the deterministic workflow and the agent loop
//! - [`llm`]: reasoning-service abstraction (OpenAI and a scripted stub)
//! - [`service`]: input validation and the end-to-end entry point
//! - [`server`]: the HTTP shell
//! - [`error`]: error taxonomy shared by every stage
//! - [`config`], [`logging`]: ambient setup

pub mod config;
pub mod dataset;
pub mod error;
pub mod llm;
pub mod logging;
pub mod orchestration;
pub mod query;
pub mod server;
pub mod service;
