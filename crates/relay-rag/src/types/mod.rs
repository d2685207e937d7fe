//! Core data model: queries, candidates, answers

pub mod answer;
pub mod candidate;
pub mod query;

pub use answer::{Answer, CacheReport, Citation, PipelineStatus, StageTimings, TokenUsage};
pub use candidate::{Candidate, CandidateKey, RankedCandidate, RankedResult};
pub use query::{AnalyzedQuery, Query, QuerySeed};
