//! Query engine for dynamically shaped spreadsheet tables
//!
//! Datasets are registered by their content hash and a column list. Reads
//! take a JSON filter, compile it against the registered descriptor into a
//! parameterized statement, and go through a memory plus optional Redis
//! cache. Indexes for likely filter columns are created in the background.

pub mod advisor;
pub mod cache;
pub mod config;
pub mod descriptor;
pub mod duck_store;
pub mod engine;
pub mod error;
pub mod executor;
pub mod filter;
pub mod registry;
pub mod store;
pub mod testing;
pub mod value;

pub use advisor::{AdvisorReport, IndexAdvisor, IndexDescriptor};
pub use cache::{CacheStats, TieredCache};
pub use config::EngineConfig;
pub use descriptor::{ColumnDescriptor, RawColumnDef, SemanticType, TableDescriptor};
pub use duck_store::DuckStore;
pub use engine::{Engine, QueryPage, WriteOutcome};
pub use error::{CacheError, EngineError, Result};
pub use filter::{CompiledQuery, FilterCompiler, FilterExpression, Pagination};
pub use registry::Registry;
pub use store::{Statement, Store};
