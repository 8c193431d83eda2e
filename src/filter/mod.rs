//! Safety filter for newly created tokens

pub mod safety;

pub use safety::{FilterReason, FilterResult, KeywordSafetyFilter, SafetyFilter};
