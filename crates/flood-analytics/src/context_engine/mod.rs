//! Context engine - turns a question plus remembered session context into an answer
pub mod entity_extractor;
pub mod filter;
pub mod merge_policy;
pub mod orchestrator;
pub mod pagination;
pub mod query_resolver;
pub mod slots;

pub use entity_extractor::{EntityExtractor, ExtractedEntities, ExtractorConfig, Signals};
pub use filter::FilterSpec;
pub use merge_policy::{LocationPolicy, MergeOutcome, MergePolicy};
pub use orchestrator::{OrchestratorConfig, QueryOrchestrator, Reply};
pub use pagination::{ListOrder, PageSlice, PageStep, PaginationCursor, Paginator};
pub use query_resolver::{
    Answer, CurrencyKind, GroupBy, GroupMetric, GroupTotal, QueryResolver, Resolution, ResultPayload,
};
pub use slots::{Action, ContextDelta, ContextSlots, EntitySet, SlotKey};
