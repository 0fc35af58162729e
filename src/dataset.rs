//! Dataset loading and schema extraction.
//!
//! - [`source`]: where records come from (Apify API, a local directory, memory)
//! - [`registry`]: the shared `dataset id -> (handle, schema)` cache
//! - [`schema`]: canonical column/semantic-type descriptor
//!
//! ```no_run
//! use dataset_query::dataset::{DatasetRegistry, DirectorySource};
//! use std::sync::Arc;
//!
//! # async fn example() -> dataset_query::error::Result<()> {
//! let registry = DatasetRegistry::new(Arc::new(DirectorySource::new("data")));
//! let handle = registry.load("restaurants", false).await?;
//! println!("{}", handle.schema().render_for_prompt());
//! # Ok(())
//! # }
//! ```

pub mod registry;
pub mod schema;
pub mod source;

pub use registry::{DatasetHandle, DatasetRegistry};
pub use schema::{SchemaDescriptor, SchemaField, SemanticType};
pub use source::{ApifySource, DatasetSource, DirectorySource, MemorySource};
