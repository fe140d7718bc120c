//! Retrieval gateways and result-quality filters: hybrid/vector/lazy
//! index search, external web search, academic paper sources,
//! reciprocal-rank fusion, and the web quality filter.

pub mod academic;
pub mod filter;
pub mod fusion;
pub mod quality;
pub mod search;
pub mod web;

// Re-exports for convenience.
pub use academic::{AcademicOutcome, AcademicSearch};
pub use fusion::rrf_merge;
pub use quality::{QualityOutcome, WebQualityFilter};
pub use search::{
    IndexSearchGateway, LazySearchOutcome, LazySearchRequest, QueryInput, SearchGateway,
    SearchOptions, SearchOutcome,
};
pub use web::{WebContext, WebSearchGateway, WebSearchOptions, WebSearchOutcome};
