//! Derivation/valuation engine (S4.6): turns a period-snapshot series and
//! market context into a persisted [`qscan_schemas::DerivationArtifact`]
//! and a DCF-based valuation, or a structured rejection when the inputs
//! don't clear the quality gates.

pub mod dcf;
pub mod engine;
pub mod fields;
pub mod gates;
pub mod metrics;
pub mod types;
pub mod wacc;

pub use engine::evaluate;
pub use types::{DerivationConfig, MarketInputs, PeriodSnapshot, Sensitivity, Valuation, ValuationQuality, YearProjection};
