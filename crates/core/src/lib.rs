//! # Temple Core
//!
//! Domain types, traits, and error definitions for the Temple memory substrate.
//! This crate has **no storage or network dependencies**: it defines the
//! domain model that every other crate implements against.
//!
//! ## Layout
//!
//! Each external collaborator (vector store, embedder, graph engine,
//! extraction backend) is a trait here. Implementations live in their
//! respective crates, so tests can swap in stubs and the dependency graph
//! points inward at core.

pub mod error;
pub mod scope;
pub mod memory;
pub mod graph;
pub mod extraction;
pub mod ingest;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{
    Error, ExtractionError, GraphError, IngestError, MemoryError, Result, ScopeError,
};
pub use scope::{ActiveContext, Scope, ScopeTier, SessionLease};
pub use memory::{Embedder, MemoryEntry, VectorBackend, VectorHit, VectorRecord};
pub use graph::{
    BatchReport, Direction, Entity, EntityQuery, EntityUpdate, GraphBackend, GraphBatch,
    GraphPath, NewEntity, NewRelation, Observation, Provenance, Relation,
};
pub use extraction::{
    Candidate, EntityCandidate, ExtractionRequest, ExtractionResult, ExtractionUsage, Extractor,
    RelationCandidate,
};
pub use ingest::{
    IngestItem, IngestOutcome, IngestState, IngestSubmission, ReviewCandidate, ReviewDecision,
    ReviewStatus, StateTransition,
};
pub use event::{DomainEvent, EventBus};
