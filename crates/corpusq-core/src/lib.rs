#![allow(unused_variables)]

pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod evidence;
pub mod events;
pub mod extractors;
pub mod gate;
pub mod glossary;
pub mod hashing;
pub mod indexer;
pub mod llm;
pub mod manifest;
pub mod orchestrator;
pub mod processing;
pub mod retrieval;
pub mod search;
pub mod state;
pub mod storage;
pub mod tenant;
pub mod types;

pub use config::RagConfig;
pub use error::CoreError;
pub use tenant::{Tenant, TenantManager};
pub use types::{Chunk, File as IndexedFile, Hit, Source};

pub use anyhow::{Error, Result};
pub use uuid::Uuid;
