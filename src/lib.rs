//! file-concierge - a personal file concierge for a sandboxed directory.
//!
//! Files under the sandbox are indexed into two local stores: a long-term
//! memory holding metadata, tags, collections and settings, and a vector
//! store holding one embedding per text file. On top of them sit semantic
//! and tag search, a closed set of tools, and a function-calling loop
//! against an OpenAI-compatible chat model.
//!
//! # Quick start
//!
//! ```no_run
//! use file_concierge::{Concierge, DataDir};
//! use file_concierge::config::{EmbedderKind, Overrides};
//! use file_concierge::tools::SearchFilesArgs;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let overrides = Overrides {
//!     embedder: Some(EmbedderKind::Hashed),
//!     ..Default::default()
//! };
//! let concierge = Concierge::open(data_dir, &overrides).unwrap();
//! concierge.index_all_files(false).unwrap();
//!
//! let found = concierge
//!     .toolbox()
//!     .search_files(SearchFilesArgs {
//!         query: Some("quarterly budget".to_string()),
//!         tags: vec!["finance".to_string()],
//!         top_k: Some(5),
//!     })
//!     .unwrap();
//! for hit in &found.results {
//!     println!("{} (similarity: {:.3})", hit.file_path, hit.similarity);
//! }
//! ```

pub mod concierge;
pub mod config;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod model_manager;
pub mod orchestrator;
pub mod processor;
pub mod sandbox;
pub mod search;
pub mod text_util;
pub mod tools;
pub mod vector_store;
pub mod walker;

pub use concierge::Concierge;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use memory::LongTermMemory;
pub use model_manager::ModelManager;
pub use orchestrator::Orchestrator;
pub use sandbox::Sandbox;
pub use tools::{ToolCall, ToolResponse, Toolbox};
pub use vector_store::VectorStore;
