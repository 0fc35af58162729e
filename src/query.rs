//! The four pipeline capabilities and the data they exchange.
//!
//! | Step | Entry point | Calls the reasoning service |
//! |---|---|---|
//! | classify | [`classify`] | no |
//! | translate | [`Translator::translate`] | yes |
//! | execute | [`execute`] | no |
//! | synthesize | [`Synthesizer::synthesize`] | yes |
//!
//! How the steps are sequenced lives in [`crate::orchestration`].

pub mod classifier;
pub mod executor;
pub mod prompts;
pub mod statement;
pub mod synthesizer;
pub mod translator;
pub mod types;

pub use classifier::classify;
pub use executor::execute;
pub use statement::SqlStatement;
pub use synthesizer::Synthesizer;
pub use translator::Translator;
pub use types::{
    AnswerEnvelope, AnswerMetadata, Classification, ExecutionResult, QueryOptions, QueryRequest,
    Strategy,
};
