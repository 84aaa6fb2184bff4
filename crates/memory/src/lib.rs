//! Storage collaborators for Temple: vector stores, the embedder and the
//! knowledge graph backends.

pub mod hashing;
pub mod embedding;
pub mod vector;
pub mod in_memory;
pub mod file_backend;
pub mod graph;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use hashing::{content_hash, normalize, sha256_hex};
pub use embedding::HashingEmbedder;
pub use vector::{cosine_similarity, rank_records};
pub use in_memory::InMemoryVectorStore;
pub use file_backend::FileVectorStore;
pub use graph::InMemoryGraph;

#[cfg(feature = "sqlite")]
pub use sqlite::{MigrationReport, SqliteGraphStore};
