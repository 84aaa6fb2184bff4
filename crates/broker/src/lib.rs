//! Temple broker: scope resolution and the memory broker that fronts the
//! vector store, the knowledge graph and the ingest pipeline.

pub mod broker;
pub mod registry;
pub mod resolver;

pub use broker::{
    BrokerBuilder, BrokerStats, ComponentHealth, EntityInput, ExportFilter, GraphExport, GraphNeighbourhood,
    HealthReport, MemoryBroker, RelationInput, RetrieveRequest, RetrieveResponse, SearchRequest, StoreOutcome,
    StoreRequest, SweptSession,
};
pub use registry::{ContextUpdate, ExpiredSession, ScopeRegistry};
pub use resolver::{merge_and_rank, resolve, store_destination, RankedHit};
