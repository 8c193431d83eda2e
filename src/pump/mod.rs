//! Pump.fun program knowledge
//!
//! Program constants, the creation-event predicate and best-effort
//! extraction of creation events from transaction logs.

pub mod events;
pub mod program;

pub use events::{extract_creation_event, is_creation_transaction, CreationEvent};
pub use program::PUMP_PROGRAM_ID_STR;
