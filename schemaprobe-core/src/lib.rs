//! Adaptive schema discovery for opaque record stores.
//!
//! SchemaProbe learns the real shape of a table (column names, required
//! columns, enum domains) when the only access is a REST facade that accepts
//! or rejects whole rows. It submits candidate records, reads the structured
//! rejection, adjusts the candidate, and repeats until a row is accepted or
//! nothing is left to try.
//!
//! # Guarantees
//! - Probing is bounded by an attempt budget
//! - Accepted probe rows are deleted before a run returns
//! - API keys are never stored in reports or written to logs
//!
//! # Architecture
//! - `store`: the `RecordStore` trait with PostgREST and in-memory implementations
//! - `classify`: pure mapping from store errors to refinements
//! - `engine`: the probing loop
//! - `seed`: foreign-key seeding and orphan sweeps around a run

pub mod classify;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod seed;
pub mod store;

// Re-export commonly used types
pub use classify::{ErrorClass, classify};
pub use config::{DiscoveryConfig, ForeignKeySeed, KeyStrategy, ProbePlan, TablePlan};
pub use defaults::TypeHint;
pub use engine::{DiscoveryEngine, ProbeRequest};
pub use error::{ProbeError, Result};
pub use logging::init_logging;
pub use models::{
    Attempt, CandidatePool, CandidateRecord, DiscoveredColumn, DiscoveredSchema,
    DiscoveryResult, EnumFinding, Exhaustion, ExhaustionReason, FieldCandidate, TypeGuess,
};
pub use seed::{prepare_request, sweep_orphans};
pub use store::{Filter, Record, RecordStore, StoreError, StoreErrorKind};
